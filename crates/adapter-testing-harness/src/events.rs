//! Typed pub-sub bus for harness notifications.
//!
//! The bus keeps one explicit subscription list per event category
//! (object change, state change, failed) and delivers synchronously, in
//! subscription order. There is no ordering guarantee across categories.
//!
//! Handlers decide their own lifetime by returning [`Retain`]: a persistent
//! handler returns [`Retain::Keep`]; a one-shot handler returns
//! [`Retain::Discard`] once it has matched, which deregisters it before any
//! further event can reach it.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use adapter_testing::ChangeEvent;

/// Why the adapter process terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// The process exited with a numeric code.
    Code(i32),
    /// The process was terminated by a signal.
    Signal(String),
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "code {code}"),
            Self::Signal(name) => write!(f, "signal {name}"),
        }
    }
}

/// A handler's decision about its own subscription after one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retain {
    /// Keep the subscription for subsequent events.
    Keep,
    /// Deregister the subscription; no further event will be delivered.
    Discard,
}

/// Identifies one subscription for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

type ChangeHandler = Box<dyn FnMut(&ChangeEvent) -> Retain + Send>;
type FailedHandler = Box<dyn FnMut(&ExitReason) -> Retain + Send>;

struct Entry<H> {
    token: SubscriptionToken,
    handler: H,
}

#[derive(Default)]
struct BusInner {
    object_change: Vec<Entry<ChangeHandler>>,
    state_change: Vec<Entry<ChangeHandler>>,
    failed: Vec<Entry<FailedHandler>>,
    next_token: u64,
}

/// Shared, cloneable handle to the harness event bus.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_token(inner: &mut BusInner) -> SubscriptionToken {
        inner.next_token += 1;
        SubscriptionToken(inner.next_token)
    }

    /// Subscribes to objects-store change events.
    pub fn on_object_change(
        &self,
        handler: impl FnMut(&ChangeEvent) -> Retain + Send + 'static,
    ) -> SubscriptionToken {
        let mut inner = self.lock();
        let token = Self::next_token(&mut inner);
        inner.object_change.push(Entry {
            token,
            handler: Box::new(handler),
        });
        token
    }

    /// Subscribes to states-store change events.
    pub fn on_state_change(
        &self,
        handler: impl FnMut(&ChangeEvent) -> Retain + Send + 'static,
    ) -> SubscriptionToken {
        let mut inner = self.lock();
        let token = Self::next_token(&mut inner);
        inner.state_change.push(Entry {
            token,
            handler: Box::new(handler),
        });
        token
    }

    /// Subscribes to adapter failure notifications.
    pub fn on_failed(
        &self,
        handler: impl FnMut(&ExitReason) -> Retain + Send + 'static,
    ) -> SubscriptionToken {
        let mut inner = self.lock();
        let token = Self::next_token(&mut inner);
        inner.failed.push(Entry {
            token,
            handler: Box::new(handler),
        });
        token
    }

    /// Removes a subscription; returns `false` if it was already gone.
    pub fn remove(&self, token: SubscriptionToken) -> bool {
        let mut inner = self.lock();
        let before = inner.object_change.len() + inner.state_change.len() + inner.failed.len();
        inner.object_change.retain(|entry| entry.token != token);
        inner.state_change.retain(|entry| entry.token != token);
        inner.failed.retain(|entry| entry.token != token);
        before != inner.object_change.len() + inner.state_change.len() + inner.failed.len()
    }

    /// Delivers an objects-store change to all current subscribers.
    pub fn emit_object_change(&self, event: &ChangeEvent) {
        // Handlers run outside the registry lock so they may subscribe or
        // send messages themselves without deadlocking.
        let mut taken = std::mem::take(&mut self.lock().object_change);
        taken.retain_mut(|entry| (entry.handler)(event) == Retain::Keep);
        let mut inner = self.lock();
        // Handlers registered during delivery landed in the fresh list; kept
        // entries predate them and go back in front to preserve order.
        taken.append(&mut inner.object_change);
        inner.object_change = taken;
    }

    /// Delivers a states-store change to all current subscribers.
    pub fn emit_state_change(&self, event: &ChangeEvent) {
        let mut taken = std::mem::take(&mut self.lock().state_change);
        taken.retain_mut(|entry| (entry.handler)(event) == Retain::Keep);
        let mut inner = self.lock();
        taken.append(&mut inner.state_change);
        inner.state_change = taken;
    }

    /// Delivers a failure notification to all current subscribers.
    pub fn emit_failed(&self, reason: &ExitReason) {
        let mut taken = std::mem::take(&mut self.lock().failed);
        taken.retain_mut(|entry| (entry.handler)(reason) == Retain::Keep);
        let mut inner = self.lock();
        taken.append(&mut inner.failed);
        inner.failed = taken;
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("EventBus")
            .field("object_change", &inner.object_change.len())
            .field("state_change", &inner.state_change.len())
            .field("failed", &inner.failed.len())
            .finish()
    }
}
