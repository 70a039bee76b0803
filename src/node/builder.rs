//! Builder assembling a node's components.
//!
//! `build()` opens the durable log, restores the state machine, and spawns
//! the log core, the log transport listener, and the publisher.
//! `start_rpc_server()` brings up the client-facing listener and, on a
//! joining node, issues the Join call to the configured member. `ready()`
//! hands back the assembled [`Node`].
//!
//! ```ignore
//! let node = NodeBuilder::new(config, shutdown_rx)
//!     .build()
//!     .await?
//!     .start_rpc_server()
//!     .await?
//!     .ready()?;
//! ```

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use crate::client::{ClientTlsOptions, IrisClient};
use crate::config::IrisConfig;
use crate::errors::SystemError;
use crate::network::{self, IrisService, Proxy};
use crate::node::Node;
use crate::raft::{start_consensus_server, ConsensusService, RaftCore};
use crate::session::{Publisher, SessionRegistry, SubscriptionIndex};
use crate::store::{Fsm, Store};
use crate::Result;

struct Assembled {
    store: Arc<Store>,
    sessions: Arc<SessionRegistry>,
    subscriptions: Arc<SubscriptionIndex>,
}

pub struct NodeBuilder {
    config: IrisConfig,
    shutdown: watch::Receiver<()>,
    assembled: Option<Assembled>,
}

impl NodeBuilder {
    pub fn new(config: IrisConfig, shutdown: watch::Receiver<()>) -> Self {
        Self {
            config,
            shutdown,
            assembled: None,
        }
    }

    /// Opens the replicated log and spawns the background machinery: the log
    /// core, the peer-facing transport listener, and the publisher.
    pub async fn build(mut self) -> Result<Self> {
        let cluster = &self.config.cluster;
        info!(raft_dir = %cluster.raft_dir.display(), "opening data store");
        let db = sled::open(&cluster.raft_dir)?;

        let (publish_tx, publish_rx) = mpsc::unbounded_channel();
        let fsm = Arc::new(Fsm::new(publish_tx));

        let (core, raft) = RaftCore::open(
            cluster.raft_addr(),
            self.config.raft.clone(),
            &self.config.network,
            &db,
            fsm.clone(),
            cluster.bootstrap(),
            self.shutdown.clone(),
        )?;

        let consensus_service =
            ConsensusService::new(core.event_sender(), self.config.network.request_timeout());
        let raft_listen = cluster.raft_socket_addr()?;
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = start_consensus_server(raft_listen, consensus_service, shutdown).await {
                error!(error = %e, "log transport listener stopped");
            }
        });
        tokio::spawn(core.run());

        let sessions = Arc::new(SessionRegistry::new());
        let subscriptions = Arc::new(SubscriptionIndex::new());
        tokio::spawn(Publisher::new(publish_rx, sessions.clone(), subscriptions.clone()).run());

        self.assembled = Some(Assembled {
            store: Arc::new(Store::new(raft, fsm)),
            sessions,
            subscriptions,
        });
        Ok(self)
    }

    /// Starts the client-facing RPC listener and, when configured with a
    /// join address, asks that member to add this node to the cluster.
    pub async fn start_rpc_server(self) -> Result<Self> {
        let assembled = self.assembled.as_ref().ok_or_else(|| {
            SystemError::NodeStartFailed("build() must run before start_rpc_server()".into())
        })?;

        let proxy = Proxy::new(&self.config.tls, &self.config.network);
        let service = IrisService::new(
            assembled.store.clone(),
            assembled.sessions.clone(),
            assembled.subscriptions.clone(),
            Some(proxy),
        );
        let listen_address = self.config.cluster.service_socket_addr()?;
        let config = self.config.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = network::start_rpc_server(service, listen_address, config, shutdown).await
            {
                error!(error = %e, "RPC server stopped");
            }
        });

        if let Some(join_address) = self.config.cluster.join_address.clone() {
            self.join_cluster(&join_address).await?;
        }
        Ok(self)
    }

    /// Hands back the assembled node.
    pub fn ready(self) -> Result<Node> {
        let assembled = self
            .assembled
            .ok_or_else(|| SystemError::NodeStartFailed("node was never built".into()))?;
        Ok(Node {
            config: self.config,
            store: assembled.store,
            shutdown: self.shutdown,
        })
    }

    /// Issues a Join to an existing member; that node proxies the request to
    /// the leader, which adds our raft address to the peer set.
    async fn join_cluster(&self, join_address: &str) -> Result<()> {
        let raft_addr = self.config.cluster.raft_addr();
        info!(join = %join_address, raft_addr = %raft_addr, "joining existing cluster");
        let tls = ClientTlsOptions::mirror(&self.config.tls);
        let mut client =
            IrisClient::connect(join_address, tls, self.config.network.connect_timeout()).await?;
        client.join(&raft_addr).await?;
        info!("join request accepted");
        Ok(())
    }
}
