//! Change events emitted by the stores.

use std::fmt;

use serde_json::Value;

/// The two store kinds the host platform provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    /// Structural and configuration entities.
    Objects,
    /// Live runtime values, control signals and messages.
    States,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Objects => f.write_str("objects"),
            Self::States => f.write_str("states"),
        }
    }
}

/// A single mutation observed on a subscribed id.
///
/// Every store mutation on a subscribed id produces exactly one change event,
/// delivered in publish order per store. A `None` payload reports a deleted
/// entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// The id that changed.
    pub id: String,
    /// The new payload, or `None` when the entry was removed.
    pub payload: Option<Value>,
}

impl ChangeEvent {
    /// Creates a change event.
    #[must_use]
    pub fn new(id: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }
}
