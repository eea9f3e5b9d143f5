//! The controllable mock adapter instance.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value};

use crate::mock_store::MockStore;
use crate::termination::TerminationStrategy;

/// The awaitable half of a deferred readiness hook.
pub type ReadyFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// What a readiness hook returns.
///
/// A hook may finish its work synchronously or hand back a future the
/// engine awaits before considering startup complete.
pub enum ReadyOutcome {
    /// The hook completed before returning.
    Completed,
    /// The hook deferred the rest of its work to the returned future.
    Deferred(ReadyFuture),
}

type ReadyHandler = Box<dyn FnMut() -> ReadyOutcome + Send>;
type UnloadHandler = Box<dyn FnMut() + Send>;
type MessageHandler = Box<dyn FnMut(&Value) + Send>;

/// A recorded, controllable adapter instance.
///
/// Constructed by the [`AdapterRuntimeShim`](crate::AdapterRuntimeShim) when
/// the sandboxed program asks the platform API for an adapter. Cloning
/// yields another handle onto the same instance.
#[derive(Clone)]
pub struct MockAdapter {
    name: String,
    namespace: String,
    store: MockStore,
    termination: Arc<dyn TerminationStrategy>,
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    config: Map<String, Value>,
    ready: Option<ReadyHandler>,
    unload: Option<UnloadHandler>,
    message: Option<MessageHandler>,
}

impl MockAdapter {
    pub(crate) fn new(
        name: &str,
        store: MockStore,
        termination: Arc<dyn TerminationStrategy>,
        config: Map<String, Value>,
    ) -> Self {
        Self {
            name: name.to_string(),
            namespace: format!("{name}.0"),
            store,
            termination,
            inner: Arc::new(Mutex::new(Inner {
                config,
                ..Inner::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The adapter name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The instance namespace, `<name>.0`.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// A snapshot of the adapter configuration.
    #[must_use]
    pub fn config(&self) -> Map<String, Value> {
        self.lock().config.clone()
    }

    /// Replaces the adapter configuration.
    pub fn set_config(&self, config: Map<String, Value>) {
        self.lock().config = config;
    }

    /// Registers the readiness hook.
    pub fn on_ready(&self, handler: impl FnMut() -> ReadyOutcome + Send + 'static) {
        self.lock().ready = Some(Box::new(handler));
    }

    /// Registers the unload hook.
    pub fn on_unload(&self, handler: impl FnMut() + Send + 'static) {
        self.lock().unload = Some(Box::new(handler));
    }

    /// Registers the message hook.
    pub fn on_message(&self, handler: impl FnMut(&Value) + Send + 'static) {
        self.lock().message = Some(Box::new(handler));
    }

    /// Whether a readiness hook was registered.
    #[must_use]
    pub fn has_ready_handler(&self) -> bool {
        self.lock().ready.is_some()
    }

    /// Invokes the readiness hook once, if registered.
    ///
    /// The handler runs outside the instance lock so it may freely call
    /// back into the adapter.
    pub(crate) fn invoke_ready(&self) -> Option<ReadyOutcome> {
        let mut handler = self.lock().ready.take()?;
        let outcome = handler();
        self.lock().ready = Some(handler);
        Some(outcome)
    }

    /// Invokes the unload hook, if registered.
    pub fn invoke_unload(&self) {
        let handler = self.lock().unload.take();
        if let Some(mut handler) = handler {
            handler();
            self.lock().unload = Some(handler);
        }
    }

    /// Delivers a message to the message hook, if registered.
    pub fn deliver_message(&self, message: &Value) {
        let handler = self.lock().message.take();
        if let Some(mut handler) = handler {
            handler(message);
            self.lock().message = Some(handler);
        }
    }

    /// The store this adapter reads and writes.
    #[must_use]
    pub fn store(&self) -> &MockStore {
        &self.store
    }

    /// Writes a state to the mock store.
    pub fn set_state(&self, id: impl Into<String>, value: Value) {
        self.store.set_state(id, value);
    }

    /// Reads a state from the mock store.
    #[must_use]
    pub fn get_state(&self, id: &str) -> Option<Value> {
        self.store.get_state(id)
    }

    /// Writes an object to the mock store.
    pub fn set_object(&self, id: impl Into<String>, value: Value) {
        self.store.set_object(id, value);
    }

    /// Reads an object from the mock store.
    #[must_use]
    pub fn get_object(&self, id: &str) -> Option<Value> {
        self.store.get_object(id)
    }

    /// Requests termination with a textual reason.
    ///
    /// Under the mock engine this raises an intercepted signal instead of
    /// ending the process.
    pub fn terminate(&self, reason: &str) -> ! {
        self.termination.terminate(reason)
    }

    /// Requests a process exit with a code.
    pub fn exit(&self, code: i32) -> ! {
        self.termination.exit(code)
    }
}

impl std::fmt::Debug for MockAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("MockAdapter")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("config_keys", &inner.config.len())
            .field("has_ready", &inner.ready.is_some())
            .field("has_unload", &inner.unload.is_some())
            .field("has_message", &inner.message.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{MockAdapter, ReadyOutcome};
    use crate::mock_store::MockStore;
    use crate::termination::InterceptingTermination;
    use serde_json::{Map, json};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn adapter() -> MockAdapter {
        MockAdapter::new(
            "unit",
            MockStore::new(),
            Arc::new(InterceptingTermination),
            Map::new(),
        )
    }

    #[test]
    fn namespace_is_instance_zero() {
        assert_eq!(adapter().namespace(), "unit.0");
    }

    #[test]
    fn ready_hook_may_call_back_into_the_adapter() {
        let adapter = adapter();
        let reentrant = adapter.clone();
        adapter.on_ready(move || {
            reentrant.set_state("unit.0.connected", json!({"val": true}));
            ReadyOutcome::Completed
        });

        assert!(adapter.invoke_ready().is_some());
        assert_eq!(
            adapter.get_state("unit.0.connected"),
            Some(json!({"val": true}))
        );
    }

    #[test]
    fn hooks_survive_invocation() {
        let adapter = adapter();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        adapter.on_unload(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        adapter.invoke_unload();
        adapter.invoke_unload();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn invoke_ready_without_handler_returns_none() {
        assert!(adapter().invoke_ready().is_none());
    }
}
