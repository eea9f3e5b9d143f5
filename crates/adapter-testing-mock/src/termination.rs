//! Interception of process-termination entry points.
//!
//! Sandboxed adapter code must not end the test process. The strategy
//! object below decides how termination surfaces; the intercepting
//! implementation raises a panic carrying a typed [`TerminationSignal`]
//! payload, which the engine catches and converts into a structured result.
//! Panics carrying anything else are resumed unmodified; the sandbox only
//! knows the two lifecycle-termination shapes.

use std::any::Any;
use std::panic;

/// The two shapes of a sandboxed termination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationSignal {
    /// The adapter called the process-exit entry point with a code.
    ExitCode(i32),
    /// The adapter terminated itself with a textual reason.
    TerminateReason(String),
}

impl TerminationSignal {
    /// Raises this signal as a typed panic payload.
    pub fn raise(self) -> ! {
        panic::resume_unwind(Box::new(self))
    }
}

/// Decides how a termination request surfaces.
///
/// The real platform ends the process; test engines substitute a strategy
/// that records the request instead.
pub trait TerminationStrategy: Send + Sync {
    /// The adapter requested a process exit with `code`.
    fn exit(&self, code: i32) -> !;

    /// The adapter requested termination with a textual `reason`.
    fn terminate(&self, reason: &str) -> !;
}

/// The sandbox strategy: raises a [`TerminationSignal`] instead of ending
/// the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct InterceptingTermination;

impl TerminationStrategy for InterceptingTermination {
    fn exit(&self, code: i32) -> ! {
        TerminationSignal::ExitCode(code).raise()
    }

    fn terminate(&self, reason: &str) -> ! {
        TerminationSignal::TerminateReason(reason.to_string()).raise()
    }
}

/// Extracts a [`TerminationSignal`] from a caught panic payload.
///
/// # Errors
///
/// Returns the payload untouched when it is not a termination signal, so the
/// caller can resume the unwind unmodified.
pub fn intercept_termination(
    payload: Box<dyn Any + Send>,
) -> Result<TerminationSignal, Box<dyn Any + Send>> {
    payload.downcast::<TerminationSignal>().map(|signal| *signal)
}

#[cfg(test)]
mod tests {
    use super::{InterceptingTermination, TerminationSignal, TerminationStrategy, intercept_termination};
    use std::panic::{AssertUnwindSafe, catch_unwind};

    #[test]
    fn exit_raises_a_catchable_exit_code() {
        let payload = catch_unwind(AssertUnwindSafe(|| InterceptingTermination.exit(11)))
            .expect_err("exit must unwind");
        assert_eq!(
            intercept_termination(payload).ok(),
            Some(TerminationSignal::ExitCode(11))
        );
    }

    #[test]
    fn terminate_raises_a_catchable_reason() {
        let payload = catch_unwind(AssertUnwindSafe(|| {
            InterceptingTermination.terminate("no connection")
        }))
        .expect_err("terminate must unwind");
        assert_eq!(
            intercept_termination(payload).ok(),
            Some(TerminationSignal::TerminateReason("no connection".into()))
        );
    }

    #[test]
    fn foreign_payloads_are_returned_untouched() {
        let payload = catch_unwind(|| panic!("unrelated")).expect_err("must unwind");
        let passed_through = intercept_termination(payload).expect_err("not a signal");
        assert_eq!(
            passed_through.downcast_ref::<&str>().copied(),
            Some("unrelated")
        );
    }
}
