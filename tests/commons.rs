//! Shared helpers for the end-to-end tests: boot nodes on localhost ports,
//! wait for readiness, and drive them through the typed client.

use std::path::Path;
use std::time::Duration;

use iris::{IrisClient, IrisConfig, Node, NodeBuilder};
use tokio::sync::watch;
use tokio::time::{sleep, timeout};

pub const READY_TIMEOUT: Duration = Duration::from_secs(10);

pub fn test_config(port: u16, raft_dir: &Path, join: Option<String>) -> IrisConfig {
    let mut config = IrisConfig::default();
    config.tls.insecure = true;
    config.cluster.bind_address = "127.0.0.1".into();
    config.cluster.service_port = port;
    config.cluster.raft_dir = raft_dir.to_path_buf();
    config.cluster.join_address = join;
    // Tighter timing than production keeps the scenarios fast.
    config.raft.election_timeout_min_in_ms = 150;
    config.raft.election_timeout_max_in_ms = 300;
    config.raft.heartbeat_interval_in_ms = 50;
    config
}

pub async fn start_node(config: IrisConfig) -> (Node, watch::Sender<()>) {
    let (graceful_tx, graceful_rx) = watch::channel(());
    let node = NodeBuilder::new(config, graceful_rx)
        .build()
        .await
        .expect("build node")
        .start_rpc_server()
        .await
        .expect("start rpc server")
        .ready()
        .expect("node ready");
    (node, graceful_tx)
}

pub async fn wait_for_leadership(node: &Node) {
    timeout(READY_TIMEOUT, async {
        while !node.store().is_leader() {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("node never became leader");
}

/// Dials a node, retrying while its listener comes up.
pub async fn connect_client(port: u16) -> IrisClient {
    let addr = format!("127.0.0.1:{port}");
    timeout(READY_TIMEOUT, async {
        loop {
            match IrisClient::connect(&addr, None, Duration::from_secs(1)).await {
                Ok(client) => return client,
                Err(_) => sleep(Duration::from_millis(50)).await,
            }
        }
    })
    .await
    .expect("server never came up")
}

pub async fn shutdown(graceful_tx: watch::Sender<()>) {
    let _ = graceful_tx.send(());
    // Give listeners and the log core time to wind down and release the
    // data directory.
    sleep(Duration::from_millis(500)).await;
}
