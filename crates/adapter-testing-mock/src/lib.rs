//! In-process mock execution engine for platform adapters.
//!
//! Instead of spawning the adapter as a real process against real stores,
//! this crate runs the adapter's entry code in the test process: the
//! platform's adapter API is substituted by a recording shim bound to an
//! in-memory [`MockStore`], and the process-termination entry points are
//! intercepted so a terminating adapter produces a structured result rather
//! than ending the test run.
//!
//! The centre piece is [`run_mock_adapter`], which loads an adapter program
//! in a [`SandboxContext`], drives its readiness hook to completion and
//! returns the mock instances for further assertions.

mod adapter;
mod engine;
mod error;
mod mock_store;
mod sandbox;
mod shim;
mod termination;

pub use adapter::{MockAdapter, ReadyFuture, ReadyOutcome};
pub use engine::{MockAdapterOptions, MockAdapterRun, run_mock_adapter};
pub use error::MockError;
pub use mock_store::MockStore;
pub use sandbox::{ModuleExport, SandboxContext, SubstitutionMap};
pub use shim::{AdapterRuntimeShim, PLATFORM_API_ID};
pub use termination::{
    InterceptingTermination, TerminationSignal, TerminationStrategy, intercept_termination,
};
