//! Two-node scenarios: join flow, follower proxying, and replication.

mod commons;

use std::time::Duration;

use bytes::Bytes;
use commons::*;
use tempfile::TempDir;
use tokio::time::{sleep, timeout};

#[tokio::test(flavor = "multi_thread")]
async fn follower_proxies_writes_and_reads_to_the_leader() {
    let leader_dir = TempDir::new().unwrap();
    let follower_dir = TempDir::new().unwrap();

    let (leader_node, leader_tx) = start_node(test_config(33200, leader_dir.path(), None)).await;
    wait_for_leadership(&leader_node).await;
    // Make sure the leader is accepting RPCs before the second node joins.
    let mut leader_client = connect_client(33200).await;

    let (follower_node, follower_tx) = start_node(test_config(
        33210,
        follower_dir.path(),
        Some("127.0.0.1:33200".into()),
    ))
    .await;
    assert!(!follower_node.store().is_leader());

    // A write issued to the follower is forwarded to the leader.
    let mut follower_client = connect_client(33210).await;
    let session = follower_client.connect_session().await.unwrap();
    let echoed = follower_client
        .set_value(&session, "colors", "primary", Bytes::from_static(b"red"))
        .await
        .unwrap();
    assert_eq!(echoed, Bytes::from_static(b"red"));

    // Reads through the follower reflect the committed value.
    let value = follower_client
        .get_value(&session, "colors", "primary")
        .await
        .unwrap();
    assert_eq!(value, Bytes::from_static(b"red"));
    assert_eq!(
        follower_client.get_sources(&session).await.unwrap(),
        vec!["colors"]
    );

    // The leader observes the same state directly.
    let leader_session = leader_client.connect_session().await.unwrap();
    let value = leader_client
        .get_value(&leader_session, "colors", "primary")
        .await
        .unwrap();
    assert_eq!(value, Bytes::from_static(b"red"));

    // Replication reaches the follower's own state machine.
    timeout(Duration::from_secs(5), async {
        loop {
            if follower_node.store().get("colors", "primary") == Bytes::from_static(b"red") {
                break;
            }
            sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("follower never applied the replicated write");

    shutdown(follower_tx).await;
    shutdown(leader_tx).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn joining_twice_is_treated_as_success() {
    let leader_dir = TempDir::new().unwrap();
    let follower_dir = TempDir::new().unwrap();

    let (leader_node, leader_tx) = start_node(test_config(33220, leader_dir.path(), None)).await;
    wait_for_leadership(&leader_node).await;
    let mut leader_client = connect_client(33220).await;

    let (_follower_node, follower_tx) = start_node(test_config(
        33230,
        follower_dir.path(),
        Some("127.0.0.1:33220".into()),
    ))
    .await;

    // Re-issuing the join for a known peer succeeds without another
    // membership change.
    leader_client.join("127.0.0.1:33231").await.unwrap();
    leader_client.join("127.0.0.1:33231").await.unwrap();

    shutdown(follower_tx).await;
    shutdown(leader_tx).await;
}
