//! Real-process integration harness for platform adapters.
//!
//! The harness supervises an adapter as an independently spawned child
//! process wired to a pair of real, local pub-sub stores (objects and
//! states), and turns its side effects (process exit, asynchronous
//! readiness, inter-instance messages) into deterministic, awaitable test
//! signals.
//!
//! Create one [`TestHarness`] per test. A harness is single-use: once its
//! adapter has stopped, starting another adapter is a usage error and a
//! fresh harness is required.

mod config;
mod error;
mod events;
mod harness;
mod logging;
pub mod store;
mod supervisor;

pub use config::{HarnessConfig, StoreSettings};
pub use error::HarnessError;
pub use events::{EventBus, ExitReason, Retain, SubscriptionToken};
pub use harness::{LifecycleState, TestHarness};
pub use logging::init_logging;
