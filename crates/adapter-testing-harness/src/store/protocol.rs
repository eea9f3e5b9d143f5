//! Wire frames of the local store protocol.
//!
//! One JSON object per line in both directions. Requests carry a `seq` the
//! server echoes in its reply; change notifications carry no `seq` because
//! they are pushed, not requested.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub(crate) enum Request {
    Get {
        seq: u64,
        id: String,
    },
    Set {
        seq: u64,
        id: String,
        value: Value,
    },
    Subscribe {
        seq: u64,
        pattern: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub(crate) enum Response {
    Reply {
        seq: u64,
        value: Option<Value>,
    },
    Change {
        id: String,
        value: Option<Value>,
    },
}
