//! Semantic error types for the integration harness.
//!
//! Usage errors (reusing a spent harness, starting things twice) are fatal
//! and never retryable; they get their own variants so tests can assert on
//! them precisely.

use thiserror::Error;

use crate::events::ExitReason;
use crate::store::StoreError;

/// Errors surfaced by [`TestHarness`](crate::TestHarness) operations.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// `start_controller` was called while a controller is already running.
    #[error("the controller is already running")]
    ControllerAlreadyRunning,

    /// An operation needed a running controller but none is up.
    #[error("no controller is running")]
    ControllerNotRunning,

    /// `start_adapter` was called while the adapter process is alive.
    #[error("the adapter is already running")]
    AdapterAlreadyRunning,

    /// The harness already ran an adapter once; it must not be reused.
    #[error("this test harness has already been used; create a fresh harness for each test")]
    HarnessUsedUp,

    /// The adapter terminated before reporting readiness.
    #[error("the adapter startup was interrupted unexpectedly with {0}")]
    AdapterStartupFailed(ExitReason),

    /// A store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Spawning or signalling the adapter process failed.
    #[error("adapter process error: {0}")]
    Process(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(HarnessError::ControllerAlreadyRunning, "the controller is already running")]
    #[case(HarnessError::ControllerNotRunning, "no controller is running")]
    #[case(HarnessError::AdapterAlreadyRunning, "the adapter is already running")]
    fn usage_errors_display_their_condition(#[case] error: HarnessError, #[case] message: &str) {
        assert_eq!(error.to_string(), message);
    }

    #[test]
    fn reuse_error_points_at_a_fresh_harness() {
        assert!(HarnessError::HarnessUsedUp.to_string().contains("fresh harness"));
    }

    #[rstest]
    #[case(ExitReason::Code(1), "code 1")]
    #[case(ExitReason::Signal("SIGKILL".into()), "signal SIGKILL")]
    fn startup_failure_names_code_or_signal(#[case] reason: ExitReason, #[case] expected: &str) {
        let error = HarnessError::AdapterStartupFailed(reason);
        assert!(error.to_string().contains(expected));
    }
}
