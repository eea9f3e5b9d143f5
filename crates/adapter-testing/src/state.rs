//! State values as stored in the states store.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A runtime state value.
///
/// States carry a payload (`val`), an acknowledgement flag and the id of the
/// participant that wrote them. Missing fields deserialise to their defaults
/// so the harness can read states written by minimal adapters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// The payload of the state.
    pub val: Value,
    /// Whether the value has been acknowledged by its owner.
    #[serde(default)]
    pub ack: bool,
    /// The id of the participant that wrote the state.
    #[serde(default)]
    pub from: String,
}

impl State {
    /// Creates an unacknowledged state with the given payload and sender.
    #[must_use]
    pub fn new(val: impl Into<Value>, from: impl Into<String>) -> Self {
        Self {
            val: val.into(),
            ack: false,
            from: from.into(),
        }
    }

    /// Returns `true` when the payload is the boolean `true`.
    ///
    /// This is the check applied to the `alive` readiness signal.
    #[must_use]
    pub fn is_true(&self) -> bool {
        self.val == Value::Bool(true)
    }
}
