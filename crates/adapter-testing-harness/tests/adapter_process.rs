//! Tests that run real adapter processes: shell scripts standing in for an
//! adapter's main file.

#![cfg(unix)]

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;

use adapter_testing::ids;
use adapter_testing::{ChangeEvent, State, StoreKind};
use adapter_testing_harness::store::StoreClient;
use adapter_testing_harness::{
    ExitReason, HarnessConfig, HarnessError, LifecycleState, Retain, TestHarness,
};
use camino::{Utf8Path, Utf8PathBuf};
use serde_json::json;
use serial_test::serial;
use tokio::sync::mpsc;

const CONNECT: Duration = Duration::from_millis(2000);
const SETTLE: Duration = Duration::from_secs(10);

struct ScriptAdapter {
    _dir: tempfile::TempDir,
    config: HarnessConfig,
}

/// Writes `script` as the adapter's executable main file in a fresh
/// directory and builds a matching harness config.
fn script_adapter(name: &str, script: &str) -> ScriptAdapter {
    let dir = tempfile::tempdir().expect("temporary adapter directory");
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
        .expect("temporary directories have UTF-8 paths");
    let main = write_executable(&root, script);
    let config = HarnessConfig::new(name, root, main).with_ephemeral_ports();
    ScriptAdapter { _dir: dir, config }
}

fn write_executable(dir: &Utf8Path, script: &str) -> Utf8PathBuf {
    let main = dir.join("main");
    std::fs::write(&main, script).expect("write the script");
    let mut permissions = std::fs::metadata(&main)
        .expect("script metadata")
        .permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(&main, permissions).expect("mark the script executable");
    main
}

async fn states_injector(harness: &TestHarness) -> StoreClient {
    let addr = harness.states_addr().expect("states server is up");
    let (change_tx, _change_rx) = mpsc::unbounded_channel::<ChangeEvent>();
    StoreClient::connect(StoreKind::States, addr, CONNECT, change_tx)
        .await
        .expect("injector connects")
}

#[tokio::test]
#[serial]
async fn startup_failure_reports_the_exit_code() {
    let adapter = script_adapter("demo", "#!/bin/sh\nexit 1\n");
    let mut harness = TestHarness::new(adapter.config.clone());
    harness.start_controller().await.expect("controller starts");

    let error = harness
        .start_adapter_and_wait(HashMap::new())
        .await
        .expect_err("the adapter exits before reporting alive");
    assert!(matches!(
        error,
        HarnessError::AdapterStartupFailed(ExitReason::Code(1))
    ));
    assert!(error.to_string().contains("code 1"));

    harness.stop_controller().await.expect("teardown succeeds");
}

#[tokio::test]
#[serial]
async fn the_environment_reaches_the_adapter_process() {
    let adapter = script_adapter("demo", "#!/bin/sh\nexit \"${DEMO_EXIT_CODE:-0}\"\n");
    let mut harness = TestHarness::new(adapter.config.clone());
    harness.start_controller().await.expect("controller starts");

    let env = HashMap::from([("DEMO_EXIT_CODE".to_string(), "5".to_string())]);
    let error = harness
        .start_adapter_and_wait(env)
        .await
        .expect_err("the adapter exits with the injected code");
    assert!(matches!(
        error,
        HarnessError::AdapterStartupFailed(ExitReason::Code(5))
    ));

    harness.stop_controller().await.expect("teardown succeeds");
}

#[tokio::test]
#[serial]
async fn an_alive_state_resolves_startup_and_a_spent_harness_refuses_reuse() {
    let adapter = script_adapter("demo", "#!/bin/sh\nsleep 30\n");
    let mut harness = TestHarness::new(adapter.config.clone());
    harness.start_controller().await.expect("controller starts");

    // A short declared stop timeout keeps the force-kill path quick.
    harness
        .objects_client()
        .expect("objects client is up")
        .set(
            &ids::instance_id("demo"),
            json!({"type": "instance", "common": {"stopTimeout": 500}}),
        )
        .await
        .expect("declare the stop timeout");

    let injector = states_injector(&harness).await;
    let inject = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        injector
            .set_state(
                &ids::alive_id("demo"),
                &State::new(true, "system.adapter.demo.0"),
            )
            .await
            .expect("inject the alive state");
        injector.destroy().await;
    });

    tokio::time::timeout(SETTLE, harness.start_adapter_and_wait(HashMap::new()))
        .await
        .expect("startup settles in time")
        .expect("the alive state resolves startup");
    inject.await.expect("injector task finishes");
    assert!(harness.is_adapter_running());
    assert_eq!(harness.state(), LifecycleState::AdapterRunning);

    // The script ignores the sigKill control state, so the stop protocol
    // escalates to a force kill after the declared timeout. A forced kill
    // is not a clean stop.
    tokio::time::timeout(SETTLE, harness.stop_adapter())
        .await
        .expect("the stop protocol settles in time")
        .expect("stopping succeeds");
    assert!(harness.did_adapter_stop());
    assert_eq!(harness.state(), LifecycleState::AdapterFailed);
    assert!(matches!(
        harness.adapter_exit(),
        Some(ExitReason::Signal(signal)) if signal == "SIGKILL"
    ));

    let error = harness
        .start_adapter(HashMap::new())
        .expect_err("a spent harness refuses another adapter");
    assert!(matches!(error, HarnessError::HarnessUsedUp));

    harness.stop_controller().await.expect("teardown succeeds");
}

#[tokio::test]
#[serial]
async fn a_running_adapter_cannot_be_started_twice() {
    let adapter = script_adapter("demo", "#!/bin/sh\nsleep 30\n");
    let mut harness = TestHarness::new(adapter.config.clone());
    harness.start_controller().await.expect("controller starts");

    harness
        .objects_client()
        .expect("objects client is up")
        .set(
            &ids::instance_id("demo"),
            json!({"type": "instance", "common": {"stopTimeout": 500}}),
        )
        .await
        .expect("declare the stop timeout");

    harness.start_adapter(HashMap::new()).expect("first start succeeds");

    let error = harness
        .start_adapter(HashMap::new())
        .expect_err("a second start without a stop is rejected");
    assert!(matches!(error, HarnessError::AdapterAlreadyRunning));

    tokio::time::timeout(SETTLE, harness.stop_adapter())
        .await
        .expect("the stop protocol settles in time")
        .expect("stopping succeeds");
    harness.stop_controller().await.expect("teardown succeeds");
}

#[tokio::test]
#[serial]
async fn a_crashing_adapter_emits_the_failed_notification() {
    let adapter = script_adapter("demo", "#!/bin/sh\nsleep 0.2\nexit 7\n");
    let mut harness = TestHarness::new(adapter.config.clone());
    harness.start_controller().await.expect("controller starts");

    let (failed_tx, mut failed_rx) = mpsc::unbounded_channel::<ExitReason>();
    harness.on_failed(move |reason| {
        let _ = failed_tx.send(reason.clone());
        Retain::Discard
    });

    harness.start_adapter(HashMap::new()).expect("adapter starts");

    let reason = tokio::time::timeout(SETTLE, failed_rx.recv())
        .await
        .expect("the crash is noticed in time")
        .expect("the channel is open");
    assert_eq!(reason, ExitReason::Code(7));
    assert_eq!(reason.to_string(), "code 7");
    assert_eq!(harness.state(), LifecycleState::AdapterFailed);

    harness.stop_controller().await.expect("teardown succeeds");
}

#[tokio::test]
#[serial]
async fn a_deliberate_stop_within_the_timeout_is_clean_and_silent() {
    // The script ends on its own well inside the stop window, so the
    // graceful race is won.
    let adapter = script_adapter("demo", "#!/bin/sh\nsleep 0.7\n");
    let mut harness = TestHarness::new(adapter.config.clone());
    harness.start_controller().await.expect("controller starts");

    harness
        .objects_client()
        .expect("objects client is up")
        .set(
            &ids::instance_id("demo"),
            json!({"type": "instance", "common": {"stopTimeout": 500}}),
        )
        .await
        .expect("declare the stop timeout");

    let (failed_tx, mut failed_rx) = mpsc::unbounded_channel::<ExitReason>();
    harness.on_failed(move |reason| {
        let _ = failed_tx.send(reason.clone());
        Retain::Keep
    });

    harness.start_adapter(HashMap::new()).expect("adapter starts");
    tokio::time::sleep(Duration::from_millis(300)).await;

    tokio::time::timeout(SETTLE, harness.stop_adapter())
        .await
        .expect("the stop protocol settles in time")
        .expect("stopping succeeds");
    assert!(harness.did_adapter_stop());
    assert_eq!(harness.state(), LifecycleState::AdapterStoppedCleanly);

    // Nothing may have been emitted during the deliberate stop.
    assert!(failed_rx.try_recv().is_err());

    harness.stop_controller().await.expect("teardown succeeds");
}
