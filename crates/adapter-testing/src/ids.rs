//! Builders for the well-known control-plane ids.
//!
//! The host platform addresses adapter instances through structured string
//! ids. Instance zero is the only instance a harness ever runs, so the
//! builders hard-code the `.0` suffix.

/// The id the harness itself acts under when exchanging messages.
pub const HARNESS_ADAPTER_ID: &str = "system.adapter.test.0";

/// The host id used as the sender of control-plane writes.
pub const HARNESS_HOST_ID: &str = "system.host.testing";

/// Returns the instance object id for an adapter.
///
/// # Examples
///
/// ```
/// assert_eq!(adapter_testing::ids::instance_id("hue"), "system.adapter.hue.0");
/// ```
#[must_use]
pub fn instance_id(adapter_name: &str) -> String {
    format!("system.adapter.{adapter_name}.0")
}

/// Returns the readiness state id for an adapter.
///
/// The adapter sets this state to `true` once it has started up.
#[must_use]
pub fn alive_id(adapter_name: &str) -> String {
    format!("system.adapter.{adapter_name}.0.alive")
}

/// Returns the graceful-stop control state id for an adapter.
///
/// Writing `-1` to this state asks a cooperative adapter to shut down.
#[must_use]
pub fn sig_kill_id(adapter_name: &str) -> String {
    format!("system.adapter.{adapter_name}.0.sigKill")
}

/// Returns the messagebox channel id for a full adapter instance id.
///
/// # Examples
///
/// ```
/// assert_eq!(
///     adapter_testing::ids::messagebox_id("system.adapter.test.0"),
///     "messagebox.system.adapter.test.0",
/// );
/// ```
#[must_use]
pub fn messagebox_id(adapter_id: &str) -> String {
    format!("messagebox.{adapter_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_id_targets_instance_zero() {
        assert_eq!(instance_id("sql"), "system.adapter.sql.0");
    }

    #[test]
    fn alive_and_sig_kill_extend_the_instance_id() {
        assert_eq!(alive_id("sql"), "system.adapter.sql.0.alive");
        assert_eq!(sig_kill_id("sql"), "system.adapter.sql.0.sigKill");
    }

    #[test]
    fn messagebox_id_prefixes_the_adapter_id() {
        assert_eq!(
            messagebox_id(HARNESS_ADAPTER_ID),
            "messagebox.system.adapter.test.0"
        );
    }
}
