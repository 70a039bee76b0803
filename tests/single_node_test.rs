//! Single-node end-to-end scenarios: round trips, subscriptions, and delete
//! semantics, all through the public RPC surface.

mod commons;

use std::time::Duration;

use bytes::Bytes;
use commons::*;
use tempfile::TempDir;
use tokio::time::timeout;
use tonic::Code;

use iris::proto::iris::Update;

async fn next_update(stream: &mut tonic::Streaming<Update>) -> Update {
    timeout(Duration::from_secs(5), stream.message())
        .await
        .expect("timed out waiting for update")
        .expect("listen stream failed")
        .expect("listen stream ended")
}

#[tokio::test(flavor = "multi_thread")]
async fn single_node_round_trip() {
    let dir = TempDir::new().unwrap();
    let (node, graceful_tx) = start_node(test_config(33100, dir.path(), None)).await;
    wait_for_leadership(&node).await;

    let mut client = connect_client(33100).await;
    let session = client.connect_session().await.unwrap();
    assert_eq!(session.len(), 20);

    let echoed = client
        .set_value(&session, "colors", "primary", Bytes::from_static(b"red"))
        .await
        .unwrap();
    assert_eq!(echoed, Bytes::from_static(b"red"));

    let value = client.get_value(&session, "colors", "primary").await.unwrap();
    assert_eq!(value, Bytes::from_static(b"red"));

    assert_eq!(client.get_sources(&session).await.unwrap(), vec!["colors"]);
    assert_eq!(
        client.get_keys(&session, "colors").await.unwrap(),
        vec!["primary"]
    );

    shutdown(graceful_tx).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn subscribe_then_write_delivers_in_order() {
    let dir = TempDir::new().unwrap();
    let (node, graceful_tx) = start_node(test_config(33110, dir.path(), None)).await;
    wait_for_leadership(&node).await;

    let mut client = connect_client(33110).await;
    let session = client.connect_session().await.unwrap();
    let mut updates = client.listen(&session).await.unwrap();
    client.subscribe(&session, "colors").await.unwrap();

    client
        .set_value(&session, "colors", "primary", Bytes::from_static(b"red"))
        .await
        .unwrap();
    client
        .set_value(&session, "colors", "secondary", Bytes::from_static(b"green"))
        .await
        .unwrap();

    let first = next_update(&mut updates).await;
    assert_eq!(
        (first.source.as_str(), first.key.as_str()),
        ("colors", "primary")
    );
    assert_eq!(first.value, Bytes::from_static(b"red"));

    let second = next_update(&mut updates).await;
    assert_eq!(second.key, "secondary");
    assert_eq!(second.value, Bytes::from_static(b"green"));

    shutdown(graceful_tx).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn key_subscription_filters_other_keys() {
    let dir = TempDir::new().unwrap();
    let (node, graceful_tx) = start_node(test_config(33120, dir.path(), None)).await;
    wait_for_leadership(&node).await;

    let mut client = connect_client(33120).await;
    let session = client.connect_session().await.unwrap();
    let mut updates = client.listen(&session).await.unwrap();
    client.subscribe_key(&session, "colors", "primary").await.unwrap();

    client
        .set_value(&session, "colors", "secondary", Bytes::from_static(b"green"))
        .await
        .unwrap();
    client
        .set_value(&session, "colors", "primary", Bytes::from_static(b"blue"))
        .await
        .unwrap();

    // The secondary write must not reach this session; the first delivered
    // update is the matching key.
    let update = next_update(&mut updates).await;
    assert_eq!(update.key, "primary");
    assert_eq!(update.value, Bytes::from_static(b"blue"));

    shutdown(graceful_tx).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_source_notifies_every_key_with_empty_values() {
    let dir = TempDir::new().unwrap();
    let (node, graceful_tx) = start_node(test_config(33130, dir.path(), None)).await;
    wait_for_leadership(&node).await;

    let mut client = connect_client(33130).await;
    let session = client.connect_session().await.unwrap();

    client
        .set_value(&session, "colors", "primary", Bytes::from_static(b"red"))
        .await
        .unwrap();
    client
        .set_value(&session, "colors", "secondary", Bytes::from_static(b"green"))
        .await
        .unwrap();

    let mut updates = client.listen(&session).await.unwrap();
    client.subscribe(&session, "colors").await.unwrap();
    client.remove_source(&session, "colors").await.unwrap();

    // Two updates, one per key that was present, both with empty values;
    // the order between keys is unspecified.
    let mut deleted = vec![
        next_update(&mut updates).await,
        next_update(&mut updates).await,
    ];
    deleted.sort_by(|a, b| a.key.cmp(&b.key));
    assert_eq!(deleted[0].key, "primary");
    assert_eq!(deleted[1].key, "secondary");
    assert!(deleted.iter().all(|u| u.source == "colors" && u.value.is_empty()));

    assert!(client.get_sources(&session).await.unwrap().is_empty());

    shutdown(graceful_tx).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_key_semantics() {
    let dir = TempDir::new().unwrap();
    let (node, graceful_tx) = start_node(test_config(33140, dir.path(), None)).await;
    wait_for_leadership(&node).await;

    let mut client = connect_client(33140).await;
    let session = client.connect_session().await.unwrap();

    client
        .set_value(&session, "colors", "primary", Bytes::from_static(b"red"))
        .await
        .unwrap();
    client.remove_value(&session, "colors", "primary").await.unwrap();

    // The last key is gone, so the source is gone with it.
    assert!(client.get_sources(&session).await.unwrap().is_empty());

    // Removing an absent key is a committed no-op.
    client.remove_value(&session, "colors", "primary").await.unwrap();

    // An absent key reads as an empty value, same as a stored empty value.
    let value = client.get_value(&session, "colors", "primary").await.unwrap();
    assert!(value.is_empty());

    shutdown(graceful_tx).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn validation_and_session_errors() {
    let dir = TempDir::new().unwrap();
    let (node, graceful_tx) = start_node(test_config(33150, dir.path(), None)).await;
    wait_for_leadership(&node).await;

    let mut client = connect_client(33150).await;
    let session = client.connect_session().await.unwrap();

    let missing_key = client
        .set_value(&session, "colors", "", Bytes::from_static(b"red"))
        .await;
    assert_grpc_code(missing_key, Code::InvalidArgument);

    let missing_source = client.subscribe(&session, "").await;
    assert_grpc_code(missing_source, Code::InvalidArgument);

    let unknown_session = client.subscribe("0000000000000000FFFF", "colors").await;
    assert_grpc_code(unknown_session, Code::NotFound);

    let missing_address = client.join("").await;
    assert_grpc_code(missing_address, Code::InvalidArgument);

    shutdown(graceful_tx).await;
}

fn assert_grpc_code<T: std::fmt::Debug>(result: iris::Result<T>, expected: Code) {
    match result {
        Err(iris::Error::System(iris::SystemError::Network(iris::NetworkError::Status(
            status,
        )))) => {
            assert_eq!(status.code(), expected, "unexpected status: {status:?}");
        }
        other => panic!("expected gRPC status {expected:?}, got {other:?}"),
    }
}
