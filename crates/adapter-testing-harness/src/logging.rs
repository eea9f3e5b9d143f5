//! Opt-in structured logging for harness runs.
//!
//! The stores and the harness trace their progress through `tracing`; this
//! module wires a subscriber for tests that want to see it. The external
//! store implementations expect a five-severity logger surface, which maps
//! directly onto `tracing`'s `trace` through `error` levels.

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter, e.g. `debug` or
/// `adapter_testing_harness=trace`.
pub const LOG_ENV_VAR: &str = "ADAPTER_TESTING_LOG";

/// Initialises the logging subsystem from [`LOG_ENV_VAR`].
///
/// Logs go to stderr so they interleave with the inherited output of the
/// adapter process without corrupting it. If a global subscriber is already
/// set the call is silently ignored; the first subscriber wins, which is the
/// expected behaviour when several tests initialise logging.
pub fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("warn"));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
