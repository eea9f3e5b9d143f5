//! The integration test harness.
//!
//! One [`TestHarness`] encapsulates a controller instance (the two local
//! stores) and a single adapter process, and monitors their status. Create a
//! fresh harness in every test: once its adapter has stopped, the harness is
//! spent and refuses to start another one.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use adapter_testing::ids::{HARNESS_ADAPTER_ID, HARNESS_HOST_ID};
use adapter_testing::{ChangeEvent, State, StoreKind, extend, ids};
use adapter_testing::MessageEnvelope;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::HarnessConfig;
use crate::error::HarnessError;
use crate::events::{EventBus, ExitReason, Retain, SubscriptionToken};
use crate::store::{StoreClient, StoreError, StoreServer};
use crate::supervisor::{self, AdapterProcess};

/// Default time an adapter gets to acknowledge a graceful stop.
const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_millis(5000);

/// Safety margin added to an adapter's declared stop timeout.
const STOP_TIMEOUT_MARGIN: Duration = Duration::from_millis(1000);

/// Where the harness currently is in its single-use lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Nothing is running yet.
    Idle,
    /// The stores are up, no adapter has been started.
    ControllerRunning,
    /// The adapter process is alive.
    AdapterRunning,
    /// The adapter was stopped deliberately and terminated within its stop
    /// timeout.
    AdapterStoppedCleanly,
    /// The adapter terminated on its own before being stopped, or had to be
    /// force-killed.
    AdapterFailed,
}

/// The real-process test harness.
///
/// Owns the store connection pairs, the adapter child process and the
/// message-correlation counter exclusively; none of them are shared across
/// harnesses. Dropping the harness releases everything: the store tasks
/// unwind as their channels close and the child keeps only a detached
/// monitor that reaps it.
pub struct TestHarness {
    config: HarnessConfig,
    bus: EventBus,
    objects_server: Option<StoreServer>,
    objects_client: Option<StoreClient>,
    states_server: Option<StoreServer>,
    states_client: Option<StoreClient>,
    process: Option<AdapterProcess>,
    adapter_exit: Option<ExitReason>,
    clean_stop: bool,
    send_to_id: u64,
    pumps: Vec<JoinHandle<()>>,
}

impl TestHarness {
    /// Creates an idle harness for the given configuration.
    #[must_use]
    pub fn new(config: HarnessConfig) -> Self {
        tracing::debug!(
            adapter = %config.adapter_name,
            app = %config.app_name,
            adapter_dir = %config.adapter_dir,
            controller_dir = %config.controller_dir,
            "creating test harness"
        );
        Self {
            config,
            bus: EventBus::new(),
            objects_server: None,
            objects_client: None,
            states_server: None,
            states_client: None,
            process: None,
            adapter_exit: None,
            clean_stop: false,
            send_to_id: 1,
            pumps: Vec::new(),
        }
    }

    /// The harness configuration.
    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        if self.is_adapter_running() {
            LifecycleState::AdapterRunning
        } else if self.did_adapter_stop() {
            if self.clean_stop {
                LifecycleState::AdapterStoppedCleanly
            } else {
                LifecycleState::AdapterFailed
            }
        } else if self.is_controller_running() {
            LifecycleState::ControllerRunning
        } else {
            LifecycleState::Idle
        }
    }

    /// Whether any of the four store handles is up.
    #[must_use]
    pub fn is_controller_running(&self) -> bool {
        self.objects_server.is_some()
            || self.objects_client.is_some()
            || self.states_server.is_some()
            || self.states_client.is_some()
    }

    /// Whether the adapter process is alive.
    #[must_use]
    pub fn is_adapter_running(&self) -> bool {
        self.process.as_ref().is_some_and(|p| !p.has_exited())
    }

    /// Whether the adapter process has already exited.
    #[must_use]
    pub fn did_adapter_stop(&self) -> bool {
        self.adapter_exit.is_some()
            || self.process.as_ref().is_some_and(AdapterProcess::has_exited)
    }

    /// The recorded exit code or signal, if the adapter terminated.
    #[must_use]
    pub fn adapter_exit(&self) -> Option<ExitReason> {
        self.adapter_exit
            .clone()
            .or_else(|| self.process.as_ref().and_then(AdapterProcess::exit_reason))
    }

    /// Starts the controller instance by bringing up both stores.
    ///
    /// The objects store comes up strictly before the states store, because
    /// object lookups are needed to resolve adapter stop timeouts. Within
    /// each pair the server reports listening before the client connects and
    /// subscribes to all ids.
    ///
    /// # Errors
    ///
    /// [`HarnessError::ControllerAlreadyRunning`] when called twice, or a
    /// store error when a server or client fails to come up.
    pub async fn start_controller(&mut self) -> Result<(), HarnessError> {
        if self.is_controller_running() {
            return Err(HarnessError::ControllerAlreadyRunning);
        }
        tracing::debug!("starting controller instance");
        self.create_store(StoreKind::Objects).await?;
        self.create_store(StoreKind::States).await?;
        tracing::debug!("controller instance created");
        Ok(())
    }

    async fn create_store(&mut self, kind: StoreKind) -> Result<(), HarnessError> {
        let settings = match kind {
            StoreKind::Objects => self.config.objects.clone(),
            StoreKind::States => self.config.states.clone(),
        };
        let server = StoreServer::listen(kind, &settings).await?;
        let (change_tx, mut change_rx) = mpsc::unbounded_channel::<ChangeEvent>();
        let client = StoreClient::connect(
            kind,
            server.local_addr(),
            settings.connect_timeout,
            change_tx,
        )
        .await?;
        client.subscribe("*").await?;

        // Re-emit store notifications tagged with the store kind. The pump
        // ends when the client connection goes away.
        let bus = self.bus.clone();
        self.pumps.push(tokio::spawn(async move {
            while let Some(event) = change_rx.recv().await {
                match kind {
                    StoreKind::Objects => bus.emit_object_change(&event),
                    StoreKind::States => bus.emit_state_change(&event),
                }
            }
        }));

        match kind {
            StoreKind::Objects => {
                self.objects_server = Some(server);
                self.objects_client = Some(client);
            }
            StoreKind::States => {
                self.states_server = Some(server);
                self.states_client = Some(client);
            }
        }
        Ok(())
    }

    /// Starts the adapter in a separate process and monitors its status.
    ///
    /// # Errors
    ///
    /// [`HarnessError::AdapterAlreadyRunning`] while the process is alive,
    /// [`HarnessError::HarnessUsedUp`] when this harness already ran an
    /// adapter, [`HarnessError::ControllerNotRunning`] without a controller,
    /// or [`HarnessError::Process`] when spawning fails.
    pub fn start_adapter(&mut self, env: HashMap<String, String>) -> Result<(), HarnessError> {
        if self.is_adapter_running() {
            return Err(HarnessError::AdapterAlreadyRunning);
        }
        if self.did_adapter_stop() {
            return Err(HarnessError::HarnessUsedUp);
        }
        if !self.is_controller_running() {
            return Err(HarnessError::ControllerNotRunning);
        }
        let process = AdapterProcess::spawn(
            &self.config.main_file,
            &self.config.adapter_dir,
            &env,
            self.bus.clone(),
        )?;
        self.process = Some(process);
        Ok(())
    }

    /// Starts the adapter and resolves once it reports readiness.
    ///
    /// Races the `alive = true` state change against the `failed`
    /// notification; whichever fires first settles the call.
    ///
    /// # Errors
    ///
    /// All `start_adapter` errors, plus
    /// [`HarnessError::AdapterStartupFailed`] naming the exit code or signal
    /// when the process terminates before readiness.
    pub async fn start_adapter_and_wait(
        &mut self,
        env: HashMap<String, String>,
    ) -> Result<(), HarnessError> {
        let (tx, rx) = oneshot::channel::<Result<(), ExitReason>>();
        let slot = Arc::new(Mutex::new(Some(tx)));

        let alive_id = ids::alive_id(&self.config.adapter_name);
        let alive_slot = Arc::clone(&slot);
        let alive_token = self.bus.on_state_change(move |event| {
            let is_alive = event.id == alive_id
                && event
                    .payload
                    .as_ref()
                    .and_then(|value| value.get("val"))
                    .is_some_and(|val| *val == Value::Bool(true));
            if !is_alive {
                return Retain::Keep;
            }
            if let Some(tx) = take_slot(&alive_slot) {
                let _ = tx.send(Ok(()));
            }
            Retain::Discard
        });

        let failed_slot = Arc::clone(&slot);
        let failed_token = self.bus.on_failed(move |reason| {
            if let Some(tx) = take_slot(&failed_slot) {
                let _ = tx.send(Err(reason.clone()));
            }
            Retain::Discard
        });

        if let Err(error) = self.start_adapter(env) {
            self.bus.remove(alive_token);
            self.bus.remove(failed_token);
            return Err(error);
        }

        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(HarnessError::AdapterStartupFailed(reason)),
            Err(_) => Err(HarnessError::AdapterStartupFailed(ExitReason::Signal(
                "unknown".to_string(),
            ))),
        }
    }

    /// Stops the adapter process, gracefully if possible.
    ///
    /// No-op when no adapter is running. The graceful path writes the
    /// `sigKill = -1` control state if a states client exists, else sends
    /// SIGTERM; the wait is raced against the adapter's declared stop
    /// timeout plus a safety margin (default 5000 ms when undeclared), and
    /// the process is force-killed when the race is lost. Only a race won
    /// in time counts as a clean stop; a force-killed adapter ends up in
    /// [`LifecycleState::AdapterFailed`]. A late acknowledgement after the
    /// force kill is ignored; the process handle has already moved on.
    ///
    /// # Errors
    ///
    /// Returns a store error when the control state cannot be written.
    pub async fn stop_adapter(&mut self) -> Result<(), HarnessError> {
        if !self.is_adapter_running() {
            if let Some(reason) = self.adapter_exit() {
                self.adapter_exit = Some(reason);
                self.process = None;
            }
            return Ok(());
        }

        let stop_timeout = self.resolve_stop_timeout().await;
        tracing::debug!(?stop_timeout, "giving the adapter time to terminate");

        let exit_watch = {
            let Some(process) = &self.process else {
                return Ok(());
            };
            process.mark_stopping();
            process.exit_watch()
        };

        if let Some(states) = &self.states_client {
            states
                .set_state(
                    &ids::sig_kill_id(&self.config.adapter_name),
                    &State::new(-1, HARNESS_HOST_ID),
                )
                .await?;
        } else if let Some(process) = &self.process {
            #[cfg(unix)]
            process.terminate();
        }

        let reason = match tokio::time::timeout(stop_timeout, supervisor::wait_on(exit_watch)).await
        {
            Ok(reason) => {
                tracing::debug!("adapter terminated");
                self.clean_stop = true;
                reason
            }
            Err(_) => {
                tracing::debug!("adapter did not terminate, killing it");
                match &self.process {
                    Some(process) => {
                        #[cfg(unix)]
                        process.force_kill();
                        process.wait_exit().await
                    }
                    None => ExitReason::Signal("unknown".to_string()),
                }
            }
        };
        self.adapter_exit = Some(reason);
        self.process = None;
        Ok(())
    }

    /// Stops the controller instance, and the adapter first if needed.
    ///
    /// No-op when no controller is running. Store teardown is strictly
    /// sequenced: objects client, objects server, states client, states
    /// server. Afterwards all four handles are cleared.
    ///
    /// # Errors
    ///
    /// Propagates failures from the adapter stop protocol.
    pub async fn stop_controller(&mut self) -> Result<(), HarnessError> {
        if !self.is_controller_running() {
            return Ok(());
        }

        if self.did_adapter_stop() {
            tracing::debug!("adapter already stopped, no need to terminate");
        } else if self.process.is_some() {
            tracing::debug!("stopping adapter instance");
            self.stop_adapter().await?;
        }

        tracing::debug!("stopping controller instance");
        if let Some(client) = self.objects_client.take() {
            client.destroy().await;
        }
        if let Some(server) = self.objects_server.take() {
            server.destroy().await;
        }
        if let Some(client) = self.states_client.take() {
            client.destroy().await;
        }
        if let Some(server) = self.states_server.take() {
            server.destroy().await;
        }
        for pump in self.pumps.drain(..) {
            pump.abort();
        }
        tracing::debug!("controller instance stopped");
        Ok(())
    }

    // Best-effort lookup of the adapter's declared stop timeout. Every
    // failure mode falls back to the default; none is surfaced.
    async fn resolve_stop_timeout(&self) -> Duration {
        let declared = match &self.objects_client {
            Some(objects) => objects
                .get(&ids::instance_id(&self.config.adapter_name))
                .await
                .ok()
                .flatten()
                .and_then(|object| {
                    object
                        .get("common")
                        .and_then(|common| common.get("stopTimeout"))
                        .and_then(Value::as_u64)
                }),
            None => None,
        };
        stop_timeout_from(declared)
    }

    /// Creates the harness's own instance object and subscribes its
    /// messagebox channel, enabling [`send_to`](Self::send_to).
    ///
    /// # Errors
    ///
    /// [`HarnessError::ControllerNotRunning`] without a controller, or a
    /// store error.
    pub async fn enable_send_to(&mut self) -> Result<(), HarnessError> {
        let objects = self
            .objects_client
            .as_ref()
            .ok_or(HarnessError::ControllerNotRunning)?;
        objects
            .set(HARNESS_ADAPTER_ID, json!({"type": "instance", "common": {}}))
            .await?;
        let states = self
            .states_client
            .as_ref()
            .ok_or(HarnessError::ControllerNotRunning)?;
        states
            .subscribe(&ids::messagebox_id(HARNESS_ADAPTER_ID))
            .await?;
        Ok(())
    }

    /// Sends a message to an adapter instance and registers a one-shot
    /// response callback.
    ///
    /// The envelope is published to `messagebox.system.adapter.<target>`
    /// with a correlation id drawn from this harness's counter (starting at
    /// 1). The callback fires at most once, with the `message` payload of
    /// the response arriving on the harness's own messagebox channel whose
    /// callback id matches. No timeout is imposed; a response that never
    /// arrives leaves the listener registered for the harness's lifetime.
    ///
    /// # Errors
    ///
    /// [`HarnessError::ControllerNotRunning`] without a states client, or a
    /// store error when publishing fails.
    pub async fn send_to(
        &mut self,
        target: &str,
        command: &str,
        message: Value,
        callback: impl FnOnce(Value) + Send + 'static,
    ) -> Result<(), HarnessError> {
        let correlation_id = self.send_to_id;
        self.send_to_id += 1;

        let own_box = ids::messagebox_id(HARNESS_ADAPTER_ID);
        let mut callback = Some(callback);
        let token = self.bus.on_state_change(move |event| {
            if event.id != own_box || !correlates(event, correlation_id) {
                return Retain::Keep;
            }
            if let Some(callback) = callback.take() {
                let payload = event
                    .payload
                    .as_ref()
                    .and_then(|value| value.get("message"))
                    .cloned()
                    .unwrap_or(Value::Null);
                callback(payload);
            }
            Retain::Discard
        });

        let envelope = MessageEnvelope::new(command, message, HARNESS_ADAPTER_ID, correlation_id);
        if let Err(error) = self.publish_envelope(target, &envelope).await {
            // The listener must not outlive a failed publish, or it would
            // swallow a later call's response.
            self.bus.remove(token);
            return Err(error);
        }
        tracing::debug!(target, correlation_id, "published message");
        Ok(())
    }

    async fn publish_envelope(
        &self,
        target: &str,
        envelope: &MessageEnvelope,
    ) -> Result<(), HarnessError> {
        let states = self
            .states_client
            .as_ref()
            .ok_or(HarnessError::ControllerNotRunning)?;
        let value = serde_json::to_value(envelope).map_err(StoreError::Codec)?;
        states
            .set(&ids::messagebox_id(&format!("system.adapter.{target}")), value)
            .await?;
        Ok(())
    }

    /// Merges partial `changes` into an adapter's instance object.
    ///
    /// The changes may be any subset of the target object; existing keys
    /// outside the changes survive. Missing instance objects are skipped
    /// silently, mirroring the platform's tolerant config helpers.
    ///
    /// # Errors
    ///
    /// [`HarnessError::ControllerNotRunning`] without a controller, or a
    /// store error.
    pub async fn change_adapter_config(
        &mut self,
        adapter_name: &str,
        changes: &Value,
    ) -> Result<(), HarnessError> {
        let objects = self
            .objects_client
            .as_ref()
            .ok_or(HarnessError::ControllerNotRunning)?;
        let id = ids::instance_id(adapter_name);
        if let Some(mut object) = objects.get(&id).await? {
            extend(&mut object, changes);
            objects.set(&id, object).await?;
        }
        Ok(())
    }

    /// The objects store client, while the controller is running.
    #[must_use]
    pub fn objects_client(&self) -> Option<&StoreClient> {
        self.objects_client.as_ref()
    }

    /// The states store client, while the controller is running.
    #[must_use]
    pub fn states_client(&self) -> Option<&StoreClient> {
        self.states_client.as_ref()
    }

    /// The bound address of the objects store server.
    #[must_use]
    pub fn objects_addr(&self) -> Option<SocketAddr> {
        self.objects_server.as_ref().map(StoreServer::local_addr)
    }

    /// The bound address of the states store server.
    #[must_use]
    pub fn states_addr(&self) -> Option<SocketAddr> {
        self.states_server.as_ref().map(StoreServer::local_addr)
    }

    /// Subscribes to objects-store change events.
    pub fn on_object_change(
        &self,
        handler: impl FnMut(&ChangeEvent) -> Retain + Send + 'static,
    ) -> SubscriptionToken {
        self.bus.on_object_change(handler)
    }

    /// Subscribes to states-store change events.
    pub fn on_state_change(
        &self,
        handler: impl FnMut(&ChangeEvent) -> Retain + Send + 'static,
    ) -> SubscriptionToken {
        self.bus.on_state_change(handler)
    }

    /// Subscribes to adapter failure notifications.
    pub fn on_failed(
        &self,
        handler: impl FnMut(&ExitReason) -> Retain + Send + 'static,
    ) -> SubscriptionToken {
        self.bus.on_failed(handler)
    }

    /// Removes a subscription made through this harness.
    pub fn remove_subscription(&self, token: SubscriptionToken) -> bool {
        self.bus.remove(token)
    }
}

// Any declared timeout gets the margin, including a declared 0; only an
// undeclared timeout falls back to the default.
fn stop_timeout_from(declared: Option<u64>) -> Duration {
    match declared {
        Some(millis) => Duration::from_millis(millis) + STOP_TIMEOUT_MARGIN,
        None => DEFAULT_STOP_TIMEOUT,
    }
}

fn take_slot<T>(slot: &Arc<Mutex<Option<T>>>) -> Option<T> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

// A response correlates when its callback id matches; responses without any
// callback id are accepted for compatibility with minimal adapters.
fn correlates(event: &ChangeEvent, correlation_id: u64) -> bool {
    let responded_id = event
        .payload
        .as_ref()
        .and_then(|value| value.get("callback"))
        .and_then(|callback| callback.get("id"))
        .and_then(Value::as_u64);
    match responded_id {
        Some(id) => id == correlation_id,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::{correlates, stop_timeout_from};
    use adapter_testing::ChangeEvent;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn undeclared_stop_timeout_falls_back_to_the_default() {
        assert_eq!(stop_timeout_from(None), Duration::from_millis(5000));
    }

    #[test]
    fn declared_stop_timeouts_get_the_margin() {
        assert_eq!(stop_timeout_from(Some(500)), Duration::from_millis(1500));
        assert_eq!(stop_timeout_from(Some(0)), Duration::from_millis(1000));
    }

    #[test]
    fn responses_correlate_on_their_callback_id() {
        let event = ChangeEvent::new(
            "messagebox.system.adapter.test.0",
            Some(json!({"message": {}, "callback": {"id": 3}})),
        );
        assert!(correlates(&event, 3));
        assert!(!correlates(&event, 4));
    }

    #[test]
    fn responses_without_callback_are_accepted() {
        let event = ChangeEvent::new(
            "messagebox.system.adapter.test.0",
            Some(json!({"message": {"ok": true}})),
        );
        assert!(correlates(&event, 1));
    }
}
