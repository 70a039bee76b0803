use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use super::*;
use crate::errors::ConsensusError;
use crate::raft::{RaftHandle, RaftStatus, Role};
use crate::{Error, Store};

/// A handle whose status never leaves the given view and whose proposals go
/// nowhere; enough to exercise the leader gate.
fn stalled_handle(status: RaftStatus) -> RaftHandle {
    let (event_tx, _event_rx) = mpsc::channel(1);
    // A watch receiver keeps serving the last value after the sender drops.
    let (_status_tx, status_rx) = watch::channel(status);
    RaftHandle::new(event_tx, status_rx, Duration::from_millis(100))
}

fn follower_store(leader: &str) -> Store {
    let (publish_tx, _publish_rx) = mpsc::unbounded_channel();
    let fsm = Arc::new(Fsm::new(publish_tx));
    let status = RaftStatus {
        role: Role::Follower,
        leader: leader.to_string(),
        term: 1,
    };
    Store::new(stalled_handle(status), fsm)
}

#[tokio::test]
async fn writes_on_a_follower_are_rejected() {
    let store = follower_store("10.0.0.1:32001");
    assert!(!store.is_leader());
    assert_eq!(store.leader(), "10.0.0.1:32001");

    let result = store.set("colors", "primary", Bytes::from_static(b"red")).await;
    match result {
        Err(Error::Consensus(ConsensusError::NotLeader { leader })) => {
            assert_eq!(leader.as_deref(), Some("10.0.0.1:32001"));
        }
        other => panic!("expected NotLeader, got {other:?}"),
    }

    assert!(store.delete_key("colors", "primary").await.is_err());
    assert!(store.delete_source("colors").await.is_err());
    assert!(store.join("10.0.0.2:32001").await.is_err());
}

#[tokio::test]
async fn leader_hint_is_omitted_when_unknown() {
    let store = follower_store("");
    assert_eq!(store.leader(), "");

    match store.set("colors", "primary", Bytes::new()).await {
        Err(Error::Consensus(ConsensusError::NotLeader { leader })) => {
            assert!(leader.is_none());
        }
        other => panic!("expected NotLeader, got {other:?}"),
    }
}

#[tokio::test]
async fn reads_come_straight_from_the_state_machine() {
    let store = follower_store("");
    // Reads never consult the log and work regardless of role.
    assert_eq!(store.get("colors", "primary"), Bytes::new());
    assert!(store.get_sources().is_empty());
    assert!(store.get_keys("colors").is_empty());
}
