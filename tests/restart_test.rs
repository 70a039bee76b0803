//! Restart recovery: a node must come back with exactly the state it had,
//! rebuilt from snapshot plus log tail.

mod commons;

use bytes::Bytes;
use commons::*;
use tempfile::TempDir;

#[tokio::test(flavor = "multi_thread")]
async fn restart_recovers_exact_state() {
    let dir = TempDir::new().unwrap();

    let mut config = test_config(33300, dir.path(), None);
    // Force a snapshot partway through the workload so recovery exercises
    // both the image and the log tail.
    config.raft.snapshot_threshold = 4;

    let (node, graceful_tx) = start_node(config.clone()).await;
    wait_for_leadership(&node).await;

    let mut client = connect_client(33300).await;
    let session = client.connect_session().await.unwrap();

    for i in 0..8u32 {
        let key = format!("k{i}");
        client
            .set_value(&session, "numbers", &key, Bytes::from(i.to_string()))
            .await
            .unwrap();
    }
    client
        .set_value(&session, "colors", "primary", Bytes::from_static(b"red"))
        .await
        .unwrap();
    client.remove_value(&session, "numbers", "k0").await.unwrap();
    client
        .set_value(&session, "colors", "secondary", Bytes::from_static(b"green"))
        .await
        .unwrap();
    client.remove_source(&session, "colors").await.unwrap();
    client
        .set_value(&session, "colors", "primary", Bytes::from_static(b"blue"))
        .await
        .unwrap();

    drop(client);
    drop(node);
    shutdown(graceful_tx).await;

    // Same port, same directory: the node comes back under its old identity.
    let (node, graceful_tx) = start_node(config).await;
    wait_for_leadership(&node).await;

    let mut client = connect_client(33300).await;
    let session = client.connect_session().await.unwrap();

    let mut sources = client.get_sources(&session).await.unwrap();
    sources.sort();
    assert_eq!(sources, vec!["colors", "numbers"]);

    let mut keys = client.get_keys(&session, "numbers").await.unwrap();
    keys.sort();
    assert_eq!(keys, vec!["k1", "k2", "k3", "k4", "k5", "k6", "k7"]);
    for i in 1..8u32 {
        let key = format!("k{i}");
        let value = client.get_value(&session, "numbers", &key).await.unwrap();
        assert_eq!(value, Bytes::from(i.to_string()));
    }

    assert_eq!(
        client.get_keys(&session, "colors").await.unwrap(),
        vec!["primary"]
    );
    let value = client.get_value(&session, "colors", "primary").await.unwrap();
    assert_eq!(value, Bytes::from_static(b"blue"));

    shutdown(graceful_tx).await;
}
