//! The substitute for the platform's adapter base API.

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Map, Value};

use crate::adapter::MockAdapter;
use crate::error::MockError;
use crate::mock_store::MockStore;
use crate::termination::TerminationStrategy;

/// The dependency identifier adapter programs resolve to reach the platform
/// API. Inside the sandbox it resolves to an [`AdapterRuntimeShim`].
pub const PLATFORM_API_ID: &str = "platform-adapter-api";

/// Records the single adapter instance a sandboxed program constructs.
///
/// The shim hands out [`MockAdapter`] instances bound to the engine's
/// [`MockStore`] and termination strategy. Exactly one instance may exist
/// per run; a second construction attempt is a usage error. A starting
/// configuration supplied up front is applied at construction, before the
/// program's own initialisation can read it.
pub struct AdapterRuntimeShim {
    store: MockStore,
    termination: Arc<dyn TerminationStrategy>,
    pending_config: Mutex<Option<Map<String, Value>>>,
    created: Mutex<Option<MockAdapter>>,
}

impl AdapterRuntimeShim {
    /// Creates a shim bound to a store and a termination strategy.
    #[must_use]
    pub fn new(store: MockStore, termination: Arc<dyn TerminationStrategy>) -> Self {
        Self {
            store,
            termination,
            pending_config: Mutex::new(None),
            created: Mutex::new(None),
        }
    }

    /// Sets the configuration applied to the adapter at construction.
    #[must_use]
    pub fn with_config(self, config: Map<String, Value>) -> Self {
        *self
            .pending_config
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(config);
        self
    }

    /// Constructs the run's adapter instance.
    ///
    /// # Errors
    ///
    /// [`MockError::AdapterAlreadyConstructed`] on a second attempt.
    pub fn build_adapter(&self, name: &str) -> Result<MockAdapter, MockError> {
        let mut created = self.created.lock().unwrap_or_else(PoisonError::into_inner);
        if created.is_some() {
            return Err(MockError::AdapterAlreadyConstructed);
        }
        let config = self
            .pending_config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_default();
        let adapter = MockAdapter::new(
            name,
            self.store.clone(),
            Arc::clone(&self.termination),
            config,
        );
        tracing::debug!(name, "mock adapter constructed");
        *created = Some(adapter.clone());
        Ok(adapter)
    }

    /// The adapter instance constructed in this run, if any.
    #[must_use]
    pub fn created_adapter(&self) -> Option<MockAdapter> {
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
