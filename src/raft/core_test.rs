use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use prost::Message;
use tempfile::TempDir;
use tokio::sync::{mpsc, watch};

use super::*;
use crate::config::{NetworkConfig, RaftConfig};
use crate::errors::ConsensusError;
use crate::proto::consensus::Command;
use crate::store::Fsm;
use crate::Error;

fn fast_raft_config(snapshot_threshold: u64) -> RaftConfig {
    RaftConfig {
        election_timeout_min_in_ms: 100,
        election_timeout_max_in_ms: 200,
        heartbeat_interval_in_ms: 30,
        apply_timeout_in_ms: 2_000,
        snapshot_threshold,
        max_append_entries: 64,
    }
}

/// Boots a log core over the given directory with no peer transport; enough
/// for the single-node paths.
fn start_core(
    dir: &Path,
    bootstrap: bool,
    snapshot_threshold: u64,
) -> (RaftHandle, Arc<Fsm>, watch::Sender<()>) {
    let db = sled::open(dir).unwrap();
    let (publish_tx, _publish_rx) = mpsc::unbounded_channel();
    let fsm = Arc::new(Fsm::new(publish_tx));
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let (core, handle) = RaftCore::open(
        "127.0.0.1:41001".to_string(),
        fast_raft_config(snapshot_threshold),
        &NetworkConfig::default(),
        &db,
        fsm.clone(),
        bootstrap,
        shutdown_rx,
    )
    .unwrap();
    tokio::spawn(core.run());
    (handle, fsm, shutdown_tx)
}

fn set_command(source: &str, key: &str, value: &'static [u8]) -> Bytes {
    Command::set(source, key, Bytes::from_static(value))
        .encode_to_vec()
        .into()
}

async fn stop(shutdown_tx: watch::Sender<()>) {
    let _ = shutdown_tx.send(());
    // Let the core task exit and release the sled lock before a reopen.
    tokio::time::sleep(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn bootstrap_node_is_immediately_leader() {
    let dir = TempDir::new().unwrap();
    let (handle, fsm, shutdown_tx) = start_core(dir.path(), true, 8_192);

    assert!(handle.is_leader());
    assert_eq!(handle.leader(), "127.0.0.1:41001");

    handle
        .propose(set_command("colors", "primary", b"red"))
        .await
        .unwrap();
    assert_eq!(fsm.get("colors", "primary"), Bytes::from_static(b"red"));

    stop(shutdown_tx).await;
}

#[tokio::test]
async fn passive_node_rejects_proposals() {
    let dir = TempDir::new().unwrap();
    let (handle, _fsm, shutdown_tx) = start_core(dir.path(), false, 8_192);

    assert!(!handle.is_leader());
    assert_eq!(handle.leader(), "");

    match handle.propose(set_command("colors", "primary", b"red")).await {
        Err(Error::Consensus(ConsensusError::NotLeader { leader })) => assert!(leader.is_none()),
        other => panic!("expected NotLeader, got {other:?}"),
    }

    stop(shutdown_tx).await;
}

#[tokio::test]
async fn committed_state_survives_restart() {
    let dir = TempDir::new().unwrap();

    let (handle, fsm, shutdown_tx) = start_core(dir.path(), true, 8_192);
    handle.propose(set_command("colors", "primary", b"red")).await.unwrap();
    handle.propose(set_command("colors", "secondary", b"green")).await.unwrap();
    handle
        .propose(
            Command::delete_key("colors", "secondary")
                .encode_to_vec()
                .into(),
        )
        .await
        .unwrap();
    assert_eq!(fsm.keys("colors"), vec!["primary".to_string()]);
    stop(shutdown_tx).await;

    let (handle, fsm, shutdown_tx) = start_core(dir.path(), true, 8_192);
    assert!(handle.is_leader());
    assert_eq!(fsm.get("colors", "primary"), Bytes::from_static(b"red"));
    assert!(fsm.keys("colors") == vec!["primary".to_string()]);
    stop(shutdown_tx).await;
}

#[tokio::test]
async fn snapshot_compacts_the_log_and_still_recovers() {
    let dir = TempDir::new().unwrap();

    let (handle, _fsm, shutdown_tx) = start_core(dir.path(), true, 4);
    for i in 0..10u32 {
        let key = format!("k{i}");
        let command = Command::set("numbers", &key, Bytes::from(i.to_string()));
        handle.propose(command.encode_to_vec().into()).await.unwrap();
    }
    stop(shutdown_tx).await;

    // The threshold was crossed, so the log prefix must be gone.
    {
        let db = sled::open(dir.path()).unwrap();
        let log = RaftLog::open(&db).unwrap();
        assert!(log.snapshot_last_index() >= 4);
        assert!(log.first_index() > 1);
        assert!(log.snapshot_image().unwrap().is_some());
    }

    let (handle, fsm, shutdown_tx) = start_core(dir.path(), true, 4);
    assert!(handle.is_leader());
    for i in 0..10u32 {
        let key = format!("k{i}");
        assert_eq!(fsm.get("numbers", &key), Bytes::from(i.to_string()));
    }
    stop(shutdown_tx).await;
}

#[tokio::test]
async fn add_peer_is_idempotent_for_known_peers() {
    let dir = TempDir::new().unwrap();
    let (handle, _fsm, shutdown_tx) = start_core(dir.path(), true, 8_192);

    // Its own address is already part of the voter set.
    handle.add_peer("127.0.0.1:41001".to_string()).await.unwrap();

    stop(shutdown_tx).await;
}
