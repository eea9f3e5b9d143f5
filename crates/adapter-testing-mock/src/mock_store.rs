//! In-memory object/state tables with the store surface.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use adapter_testing::{ChangeEvent, StoreKind, pattern_matches};
use serde_json::Value;

/// A synchronous, in-memory substitute for both stores.
///
/// Cheap to clone; all clones share the same tables. Mutations on ids
/// matching a subscription are recorded as change events for later
/// assertions, in mutation order.
#[derive(Debug, Clone, Default)]
pub struct MockStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<String, Value>,
    states: BTreeMap<String, Value>,
    object_subscriptions: Vec<String>,
    state_subscriptions: Vec<String>,
    changes: Vec<(StoreKind, ChangeEvent)>,
}

impl MockStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seeds an object without recording a change event.
    pub fn publish_object(&self, id: impl Into<String>, value: Value) {
        self.lock().objects.insert(id.into(), value);
    }

    /// Seeds several objects without recording change events.
    pub fn publish_objects(&self, objects: impl IntoIterator<Item = (String, Value)>) {
        let mut inner = self.lock();
        for (id, value) in objects {
            inner.objects.insert(id, value);
        }
    }

    /// Seeds a state without recording a change event.
    pub fn publish_state(&self, id: impl Into<String>, value: Value) {
        self.lock().states.insert(id.into(), value);
    }

    /// Stores an object, recording a change if the id is subscribed.
    pub fn set_object(&self, id: impl Into<String>, value: Value) {
        let id = id.into();
        let mut inner = self.lock();
        inner.objects.insert(id.clone(), value.clone());
        record(&mut inner, StoreKind::Objects, id, Some(value));
    }

    /// Reads an object.
    #[must_use]
    pub fn get_object(&self, id: &str) -> Option<Value> {
        self.lock().objects.get(id).cloned()
    }

    /// Whether an object exists.
    #[must_use]
    pub fn has_object(&self, id: &str) -> bool {
        self.lock().objects.contains_key(id)
    }

    /// Removes an object, recording a deletion if the id is subscribed.
    pub fn delete_object(&self, id: &str) {
        let mut inner = self.lock();
        if inner.objects.remove(id).is_some() {
            record(&mut inner, StoreKind::Objects, id.to_string(), None);
        }
    }

    /// Stores a state, recording a change if the id is subscribed.
    pub fn set_state(&self, id: impl Into<String>, value: Value) {
        let id = id.into();
        let mut inner = self.lock();
        inner.states.insert(id.clone(), value.clone());
        record(&mut inner, StoreKind::States, id, Some(value));
    }

    /// Reads a state.
    #[must_use]
    pub fn get_state(&self, id: &str) -> Option<Value> {
        self.lock().states.get(id).cloned()
    }

    /// Whether a state exists.
    #[must_use]
    pub fn has_state(&self, id: &str) -> bool {
        self.lock().states.contains_key(id)
    }

    /// Removes a state, recording a deletion if the id is subscribed.
    pub fn delete_state(&self, id: &str) {
        let mut inner = self.lock();
        if inner.states.remove(id).is_some() {
            record(&mut inner, StoreKind::States, id.to_string(), None);
        }
    }

    /// Subscribes object mutations matching `pattern`.
    pub fn subscribe_objects(&self, pattern: impl Into<String>) {
        self.lock().object_subscriptions.push(pattern.into());
    }

    /// Subscribes state mutations matching `pattern`.
    pub fn subscribe_states(&self, pattern: impl Into<String>) {
        self.lock().state_subscriptions.push(pattern.into());
    }

    /// A snapshot of the objects table.
    #[must_use]
    pub fn objects(&self) -> BTreeMap<String, Value> {
        self.lock().objects.clone()
    }

    /// A snapshot of the states table.
    #[must_use]
    pub fn states(&self) -> BTreeMap<String, Value> {
        self.lock().states.clone()
    }

    /// The change events recorded for subscribed ids, in mutation order.
    #[must_use]
    pub fn recorded_changes(&self) -> Vec<(StoreKind, ChangeEvent)> {
        self.lock().changes.clone()
    }

    /// Drops all tables, subscriptions and recorded changes.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.objects.clear();
        inner.states.clear();
        inner.object_subscriptions.clear();
        inner.state_subscriptions.clear();
        inner.changes.clear();
    }
}

fn record(inner: &mut Inner, kind: StoreKind, id: String, payload: Option<Value>) {
    let subscriptions = match kind {
        StoreKind::Objects => &inner.object_subscriptions,
        StoreKind::States => &inner.state_subscriptions,
    };
    if subscriptions
        .iter()
        .any(|pattern| pattern_matches(pattern, &id))
    {
        inner.changes.push((kind, ChangeEvent::new(id, payload)));
    }
}
