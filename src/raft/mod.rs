//! The replicated log.
//!
//! The rest of the crate consumes this module through a narrow contract: a
//! [`RaftHandle`] to submit commands and membership changes and to observe
//! leadership, plus the [`StateMachine`] trait the log drives with committed
//! entries. Election, replication, snapshots, and durable storage all stay
//! behind the module boundary.

mod core;
mod log;
mod service;
mod transport;

#[cfg(test)]
mod core_test;

pub(crate) use self::core::RaftCore;
pub(crate) use self::log::{HardState, RaftLog};
pub(crate) use self::service::{start_consensus_server, ConsensusService};

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;

use crate::errors::ConsensusError;
use crate::proto::consensus::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    SnapshotSource, VoteRequest, VoteResponse,
};
use crate::Result;

/// Consensus role of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

/// Point-in-time leadership view, published on a watch channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaftStatus {
    pub role: Role,
    /// Raft address of the current leader, empty when unknown.
    pub leader: String,
    pub term: u64,
}

impl RaftStatus {
    fn unknown() -> Self {
        Self {
            role: Role::Follower,
            leader: String::new(),
            term: 0,
        }
    }
}

/// Applied side of the log. The implementation owns the materialized state;
/// the log owns ordering and durability.
///
/// `apply` is invoked serially, in log order, on every node. `capture` must
/// deep-copy under the implementation's own lock and leave the live state
/// unmodified; `restore` replaces the state wholesale and is never invoked
/// concurrently with `apply`.
pub(crate) trait StateMachine: Send + Sync + 'static {
    fn apply(&self, data: &[u8]);
    fn capture(&self) -> Vec<SnapshotSource>;
    fn restore(&self, sources: Vec<SnapshotSource>);
}

/// Events consumed by the core loop. Peer RPC handlers and background send
/// tasks communicate with the single-threaded core exclusively through these.
pub(crate) enum RaftEvent {
    AppendEntries(AppendEntriesRequest, oneshot::Sender<AppendEntriesResponse>),
    RequestVote(VoteRequest, oneshot::Sender<VoteResponse>),
    InstallSnapshot(
        InstallSnapshotRequest,
        oneshot::Sender<InstallSnapshotResponse>,
    ),
    Propose {
        data: Bytes,
        reply: oneshot::Sender<Result<()>>,
    },
    AddPeer {
        addr: String,
        reply: oneshot::Sender<Result<()>>,
    },
    PeerResult(PeerResult),
}

/// Outcome of a background RPC to one peer.
pub(crate) enum PeerResult {
    Append {
        peer: String,
        response: std::result::Result<AppendEntriesResponse, String>,
    },
    Vote {
        peer: String,
        requested_term: u64,
        response: std::result::Result<VoteResponse, String>,
    },
    Snapshot {
        peer: String,
        snapshot_index: u64,
        response: std::result::Result<InstallSnapshotResponse, String>,
    },
}

/// Cloneable handle to the replicated log, the surface the store consumes.
#[derive(Clone)]
pub(crate) struct RaftHandle {
    event_tx: mpsc::Sender<RaftEvent>,
    status_rx: watch::Receiver<RaftStatus>,
    apply_timeout: Duration,
}

impl RaftHandle {
    pub(crate) fn new(
        event_tx: mpsc::Sender<RaftEvent>,
        status_rx: watch::Receiver<RaftStatus>,
        apply_timeout: Duration,
    ) -> Self {
        Self {
            event_tx,
            status_rx,
            apply_timeout,
        }
    }

    pub(crate) fn is_leader(&self) -> bool {
        self.status_rx.borrow().role == Role::Leader
    }

    /// Raft address of the current leader, or empty when unknown.
    pub(crate) fn leader(&self) -> String {
        self.status_rx.borrow().leader.clone()
    }

    /// Submits a command and waits until it is committed and applied locally,
    /// bounded by the configured apply timeout.
    pub(crate) async fn propose(&self, data: Bytes) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.event_tx
            .send(RaftEvent::Propose { data, reply })
            .await
            .map_err(|_| ConsensusError::CoreStopped)?;
        self.wait(rx).await
    }

    /// Adds a voter at the given raft address. Resolves once the membership
    /// change commits; a known peer resolves immediately.
    pub(crate) async fn add_peer(&self, addr: String) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.event_tx
            .send(RaftEvent::AddPeer { addr, reply })
            .await
            .map_err(|_| ConsensusError::CoreStopped)?;
        self.wait(rx).await
    }

    async fn wait(&self, rx: oneshot::Receiver<Result<()>>) -> Result<()> {
        match timeout(self.apply_timeout, rx).await {
            Err(_) => Err(ConsensusError::CommitTimeout(self.apply_timeout).into()),
            Ok(Err(_)) => Err(ConsensusError::CoreStopped.into()),
            Ok(Ok(result)) => result,
        }
    }
}
