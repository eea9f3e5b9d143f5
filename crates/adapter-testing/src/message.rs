//! The `sendTo` wire envelope.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Callback metadata attached to an outgoing message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageCallback {
    /// The original message payload, echoed for correlation.
    pub message: Value,
    /// Per-harness correlation id, monotonically increasing from 1.
    pub id: u64,
    /// Always `false` for requests.
    pub ack: bool,
    /// Milliseconds since the Unix epoch at envelope creation.
    pub time: u64,
}

/// The envelope published to a target adapter's messagebox channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// The command the target should execute.
    pub command: String,
    /// The command payload.
    pub message: Value,
    /// The id of the sending instance.
    pub from: String,
    /// Correlation metadata for the response.
    pub callback: MessageCallback,
}

impl MessageEnvelope {
    /// Builds an envelope, stamping the callback with the current time.
    #[must_use]
    pub fn new(
        command: impl Into<String>,
        message: Value,
        from: impl Into<String>,
        callback_id: u64,
    ) -> Self {
        Self {
            command: command.into(),
            message: message.clone(),
            from: from.into(),
            callback: MessageCallback {
                message,
                id: callback_id,
                ack: false,
                time: epoch_millis(),
            },
        }
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
