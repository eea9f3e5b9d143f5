//! Message round trips between the harness and a fake adapter instance.
//!
//! The fake adapter is a plain store client subscribed to its own
//! messagebox channel; it answers envelopes by writing to the harness's
//! messagebox with the caller's callback id.

use std::time::Duration;

use adapter_testing::{ChangeEvent, StoreKind};
use adapter_testing_harness::store::StoreClient;
use adapter_testing_harness::{HarnessConfig, TestHarness};
use serde_json::{Value, json};
use tokio::sync::mpsc;

const CONNECT: Duration = Duration::from_millis(2000);
const SETTLE: Duration = Duration::from_secs(10);

const ECHO_BOX: &str = "messagebox.system.adapter.echo.0";
const HARNESS_BOX: &str = "messagebox.system.adapter.test.0";

fn config() -> HarnessConfig {
    HarnessConfig::new("demo", "/tmp/demo.test", "/tmp/demo.test/main").with_ephemeral_ports()
}

async fn echo_adapter(harness: &TestHarness) -> (StoreClient, mpsc::UnboundedReceiver<ChangeEvent>) {
    let addr = harness.states_addr().expect("states server is up");
    let (change_tx, change_rx) = mpsc::unbounded_channel();
    let client = StoreClient::connect(StoreKind::States, addr, CONNECT, change_tx)
        .await
        .expect("echo adapter connects");
    client.subscribe(ECHO_BOX).await.expect("subscribe");
    (client, change_rx)
}

#[tokio::test]
async fn each_response_reaches_its_own_callback() {
    let mut harness = TestHarness::new(config());
    harness.start_controller().await.expect("controller starts");
    harness.enable_send_to().await.expect("sendTo enabled");

    let (echo_client, mut echo_rx) = echo_adapter(&harness).await;
    let responder = tokio::spawn(async move {
        let mut envelopes = Vec::new();
        while envelopes.len() < 3 {
            let event = echo_rx.recv().await.expect("an envelope arrives");
            envelopes.push(event.payload.expect("envelopes carry a payload"));
        }
        // Answer in reverse order so correlation, not arrival order,
        // decides which callback fires.
        for envelope in envelopes.iter().rev() {
            let response = json!({
                "command": envelope["command"],
                "message": {"echo": envelope["message"]},
                "callback": {"id": envelope["callback"]["id"]},
            });
            echo_client
                .set(HARNESS_BOX, response)
                .await
                .expect("the response is written");
        }
        echo_client.destroy().await;
    });

    let (result_tx, mut result_rx) = mpsc::unbounded_channel::<(u64, Value)>();
    for n in 0..3_u64 {
        let tx = result_tx.clone();
        harness
            .send_to("echo.0", "ping", json!({"n": n}), move |payload| {
                let _ = tx.send((n, payload));
            })
            .await
            .expect("the message is published");
    }

    let mut seen = 0;
    while seen < 3 {
        let (n, payload) = tokio::time::timeout(SETTLE, result_rx.recv())
            .await
            .expect("a response arrives in time")
            .expect("the result channel is open");
        assert_eq!(payload["echo"], json!({"n": n}));
        seen += 1;
    }

    responder.await.expect("responder finishes");
    harness.stop_controller().await.expect("teardown succeeds");
}

#[tokio::test]
async fn responses_without_a_callback_id_are_accepted() {
    let mut harness = TestHarness::new(config());
    harness.start_controller().await.expect("controller starts");
    harness.enable_send_to().await.expect("sendTo enabled");

    let (echo_client, mut echo_rx) = echo_adapter(&harness).await;
    let responder = tokio::spawn(async move {
        let event = echo_rx.recv().await.expect("an envelope arrives");
        let envelope = event.payload.expect("envelopes carry a payload");
        assert_eq!(envelope["command"], json!("ping"));
        assert_eq!(envelope["from"], json!("system.adapter.test.0"));
        // A minimal adapter answering without echoing the callback.
        echo_client
            .set(HARNESS_BOX, json!({"message": {"ok": true}}))
            .await
            .expect("the response is written");
        echo_client.destroy().await;
    });

    let (result_tx, mut result_rx) = mpsc::unbounded_channel::<Value>();
    harness
        .send_to("echo.0", "ping", json!({}), move |payload| {
            let _ = result_tx.send(payload);
        })
        .await
        .expect("the message is published");

    let payload = tokio::time::timeout(SETTLE, result_rx.recv())
        .await
        .expect("a response arrives in time")
        .expect("the result channel is open");
    assert_eq!(payload, json!({"ok": true}));

    responder.await.expect("responder finishes");
    harness.stop_controller().await.expect("teardown succeeds");
}

#[tokio::test]
async fn correlation_ids_count_up_from_one() {
    let mut harness = TestHarness::new(config());
    harness.start_controller().await.expect("controller starts");
    harness.enable_send_to().await.expect("sendTo enabled");

    let (echo_client, mut echo_rx) = echo_adapter(&harness).await;

    for _ in 0..2 {
        harness
            .send_to("echo.0", "ping", json!({}), |_| {})
            .await
            .expect("the message is published");
    }

    for expected in 1..=2_u64 {
        let event = tokio::time::timeout(SETTLE, echo_rx.recv())
            .await
            .expect("an envelope arrives in time")
            .expect("the change channel is open");
        let envelope = event.payload.expect("envelopes carry a payload");
        assert_eq!(envelope["callback"]["id"], json!(expected));
        assert_eq!(envelope["callback"]["ack"], json!(false));
        assert_eq!(envelope["message"], json!({}));
    }

    echo_client.destroy().await;
    harness.stop_controller().await.expect("teardown succeeds");
}

#[tokio::test]
async fn a_failed_send_leaves_no_listener_behind() {
    let mut harness = TestHarness::new(config());

    // No controller yet, so the publish fails and the callback from this
    // call must never fire, even for a later uncorrelated response.
    let (stale_tx, mut stale_rx) = mpsc::unbounded_channel::<Value>();
    harness
        .send_to("echo.0", "ping", json!({}), move |payload| {
            let _ = stale_tx.send(payload);
        })
        .await
        .expect_err("publishing without a controller fails");

    harness.start_controller().await.expect("controller starts");
    harness.enable_send_to().await.expect("sendTo enabled");

    let (echo_client, mut echo_rx) = echo_adapter(&harness).await;
    let responder = tokio::spawn(async move {
        let _ = echo_rx.recv().await.expect("an envelope arrives");
        // Answer without a callback id. Any lingering listener from the
        // failed call would intercept this before the live one.
        echo_client
            .set(HARNESS_BOX, json!({"message": {"ok": true}}))
            .await
            .expect("the response is written");
        echo_client.destroy().await;
    });

    let (result_tx, mut result_rx) = mpsc::unbounded_channel::<Value>();
    harness
        .send_to("echo.0", "ping", json!({}), move |payload| {
            let _ = result_tx.send(payload);
        })
        .await
        .expect("the message is published");

    let payload = tokio::time::timeout(SETTLE, result_rx.recv())
        .await
        .expect("a response arrives in time")
        .expect("the result channel is open");
    assert_eq!(payload, json!({"ok": true}));
    assert!(stale_rx.try_recv().is_err());

    responder.await.expect("responder finishes");
    harness.stop_controller().await.expect("teardown succeeds");
}

#[tokio::test]
async fn the_instance_object_is_created_on_enable() {
    let mut harness = TestHarness::new(config());
    harness.start_controller().await.expect("controller starts");
    harness.enable_send_to().await.expect("sendTo enabled");

    let object = harness
        .objects_client()
        .expect("objects client is up")
        .get("system.adapter.test.0")
        .await
        .expect("get succeeds")
        .expect("the harness instance object exists");
    assert_eq!(object["type"], json!("instance"));

    harness.stop_controller().await.expect("teardown succeeds");
}
