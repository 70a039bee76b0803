//! Peer-facing RPC service.
//!
//! Handlers forward requests to the core loop over the event channel and wait
//! on a oneshot for the computed response, so all consensus state stays on
//! the single core task.

use std::net::SocketAddr;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tonic::{Request, Response, Status};
use tracing::warn;

use crate::proto::consensus::consensus_server::{Consensus, ConsensusServer};
use crate::proto::consensus::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    VoteRequest, VoteResponse,
};
use crate::raft::RaftEvent;
use crate::Result;

pub(crate) struct ConsensusService {
    event_tx: mpsc::Sender<RaftEvent>,
    request_timeout: Duration,
}

impl ConsensusService {
    pub(crate) fn new(event_tx: mpsc::Sender<RaftEvent>, request_timeout: Duration) -> Self {
        Self {
            event_tx,
            request_timeout,
        }
    }

    async fn dispatch<T>(
        &self,
        event: RaftEvent,
        rx: oneshot::Receiver<T>,
        what: &'static str,
    ) -> std::result::Result<Response<T>, Status> {
        self.event_tx
            .send(event)
            .await
            .map_err(|_| Status::unavailable("replicated log is not running"))?;
        match timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => Ok(Response::new(response)),
            Ok(Err(_)) => Err(Status::internal(format!("{what} dropped by the log core"))),
            Err(_) => Err(Status::deadline_exceeded(format!("{what} timed out"))),
        }
    }
}

#[tonic::async_trait]
impl Consensus for ConsensusService {
    async fn append_entries(
        &self,
        request: Request<AppendEntriesRequest>,
    ) -> std::result::Result<Response<AppendEntriesResponse>, Status> {
        let (tx, rx) = oneshot::channel();
        self.dispatch(
            RaftEvent::AppendEntries(request.into_inner(), tx),
            rx,
            "append_entries",
        )
        .await
    }

    async fn request_vote(
        &self,
        request: Request<VoteRequest>,
    ) -> std::result::Result<Response<VoteResponse>, Status> {
        let (tx, rx) = oneshot::channel();
        self.dispatch(
            RaftEvent::RequestVote(request.into_inner(), tx),
            rx,
            "request_vote",
        )
        .await
    }

    async fn install_snapshot(
        &self,
        request: Request<InstallSnapshotRequest>,
    ) -> std::result::Result<Response<InstallSnapshotResponse>, Status> {
        let (tx, rx) = oneshot::channel();
        self.dispatch(
            RaftEvent::InstallSnapshot(request.into_inner(), tx),
            rx,
            "install_snapshot",
        )
        .await
    }
}

/// Runs the plaintext log transport listener until shutdown. Peer-facing
/// only; it must not be reachable from outside the cluster.
pub(crate) async fn start_consensus_server(
    listen_address: SocketAddr,
    service: ConsensusService,
    mut shutdown: watch::Receiver<()>,
) -> Result<()> {
    tonic::transport::Server::builder()
        .add_service(ConsensusServer::new(service))
        .serve_with_shutdown(
            listen_address,
            shutdown.changed().map(move |_| {
                warn!(%listen_address, "stopping log transport listener");
            }),
        )
        .await?;
    Ok(())
}
