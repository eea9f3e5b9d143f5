//! Behaviour of one store server/client pair over the wire.

use std::time::Duration;

use adapter_testing::{ChangeEvent, StoreKind};
use adapter_testing_harness::store::{StoreClient, StoreServer};
use adapter_testing_harness::StoreSettings;
use serde_json::json;
use tokio::sync::mpsc;

const CONNECT: Duration = Duration::from_millis(2000);
const RECV: Duration = Duration::from_millis(2000);

async fn pair() -> (StoreServer, StoreClient, mpsc::UnboundedReceiver<ChangeEvent>) {
    let server = StoreServer::listen(StoreKind::States, &StoreSettings::local(0))
        .await
        .expect("server binds an ephemeral port");
    let (change_tx, change_rx) = mpsc::unbounded_channel();
    let client = StoreClient::connect(StoreKind::States, server.local_addr(), CONNECT, change_tx)
        .await
        .expect("client connects");
    (server, client, change_rx)
}

async fn next_change(rx: &mut mpsc::UnboundedReceiver<ChangeEvent>) -> ChangeEvent {
    tokio::time::timeout(RECV, rx.recv())
        .await
        .expect("a change arrives in time")
        .expect("the change channel is open")
}

#[tokio::test]
async fn get_returns_what_set_stored() {
    let (server, client, _rx) = pair().await;

    assert_eq!(client.get("demo.0.value").await.expect("get"), None);
    client
        .set("demo.0.value", json!({"val": 42}))
        .await
        .expect("set");
    assert_eq!(
        client.get("demo.0.value").await.expect("get"),
        Some(json!({"val": 42}))
    );

    client
        .set("demo.0.value", json!({"val": 43}))
        .await
        .expect("overwrite");
    assert_eq!(
        client.get("demo.0.value").await.expect("get"),
        Some(json!({"val": 43}))
    );

    client.destroy().await;
    server.destroy().await;
}

#[tokio::test]
async fn subscriptions_only_match_their_pattern() {
    let (server, client, mut rx) = pair().await;
    client.subscribe("demo.0.*").await.expect("subscribe");

    client
        .set("other.0.ignored", json!({"val": 1}))
        .await
        .expect("set");
    client
        .set("demo.0.seen", json!({"val": 2}))
        .await
        .expect("set");

    let change = next_change(&mut rx).await;
    assert_eq!(change.id, "demo.0.seen");
    assert_eq!(change.payload, Some(json!({"val": 2})));

    client.destroy().await;
    server.destroy().await;
}

#[tokio::test]
async fn changes_arrive_in_publish_order() {
    let (server, client, mut rx) = pair().await;
    client.subscribe("*").await.expect("subscribe");

    for n in 0..10 {
        client
            .set("demo.0.counter", json!({"val": n}))
            .await
            .expect("set");
    }

    for n in 0..10 {
        let change = next_change(&mut rx).await;
        assert_eq!(change.payload, Some(json!({"val": n})));
    }

    client.destroy().await;
    server.destroy().await;
}

#[tokio::test]
async fn two_clients_see_each_other() {
    let (server, writer, _writer_rx) = pair().await;
    let (change_tx, mut reader_rx) = mpsc::unbounded_channel();
    let reader = StoreClient::connect(StoreKind::States, server.local_addr(), CONNECT, change_tx)
        .await
        .expect("second client connects");
    reader.subscribe("demo.*").await.expect("subscribe");

    writer
        .set("demo.0.shared", json!({"val": "hello"}))
        .await
        .expect("set");

    let change = next_change(&mut reader_rx).await;
    assert_eq!(change.id, "demo.0.shared");
    assert_eq!(
        reader.get("demo.0.shared").await.expect("get"),
        Some(json!({"val": "hello"}))
    );

    writer.destroy().await;
    reader.destroy().await;
    server.destroy().await;
}
