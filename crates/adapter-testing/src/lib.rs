//! Shared vocabulary for the `adapter-testing` harnesses.
//!
//! Both the real-process integration harness and the in-process mock engine
//! speak the same control-plane language: well-known state ids, state values,
//! change events, the `sendTo` message envelope, and id pattern matching.
//! This crate defines that vocabulary once so the two harnesses cannot drift
//! apart.

mod change;
mod extend;
pub mod ids;
mod message;
mod pattern;
mod state;

pub use change::{ChangeEvent, StoreKind};
pub use extend::extend;
pub use message::{MessageCallback, MessageEnvelope};
pub use pattern::pattern_matches;
pub use state::State;
