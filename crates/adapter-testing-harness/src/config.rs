//! Harness and store connection configuration.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};

/// Default port of the objects store server.
pub const DEFAULT_OBJECTS_PORT: u16 = 19001;

/// Default port of the states store server.
pub const DEFAULT_STATES_PORT: u16 = 19000;

/// Default handshake timeout for store client connections.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Connection settings for one local store server.
///
/// Port `0` requests an ephemeral port; the harness always points its client
/// at the address the server actually bound, so ephemeral ports are safe for
/// parallel test runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    /// Host the server binds and the client connects to.
    pub host: String,
    /// TCP port of the store server.
    pub port: u16,
    /// How long the client waits for the TCP connect to succeed.
    pub connect_timeout: Duration,
}

impl StoreSettings {
    /// Creates settings for the loopback host on the given port.
    #[must_use]
    pub fn local(port: u16) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Configuration of one [`TestHarness`](crate::TestHarness).
///
/// Locating an adapter's main file on disk is a caller concern; the config
/// carries the already resolved path.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Name of the adapter under test, e.g. `sql` for `system.adapter.sql.0`.
    pub adapter_name: String,
    /// Name of the host application the harness substitutes for.
    pub app_name: String,
    /// Root directory of the adapter's test working copy; the child process
    /// runs with this as its working directory.
    pub adapter_dir: Utf8PathBuf,
    /// Root directory of the controller working copy.
    pub controller_dir: Utf8PathBuf,
    /// The resolved entry file spawned as the adapter process.
    pub main_file: Utf8PathBuf,
    /// Connection settings for the objects store.
    pub objects: StoreSettings,
    /// Connection settings for the states store.
    pub states: StoreSettings,
}

impl HarnessConfig {
    /// Creates a config with default local store settings.
    ///
    /// The controller directory defaults to `<adapter_dir>/.controller`.
    #[must_use]
    pub fn new(
        adapter_name: impl Into<String>,
        adapter_dir: impl Into<Utf8PathBuf>,
        main_file: impl Into<Utf8PathBuf>,
    ) -> Self {
        let adapter_dir = adapter_dir.into();
        let controller_dir = adapter_dir.join(".controller");
        Self {
            adapter_name: adapter_name.into(),
            app_name: "testing".to_string(),
            adapter_dir,
            controller_dir,
            main_file: main_file.into(),
            objects: StoreSettings::local(DEFAULT_OBJECTS_PORT),
            states: StoreSettings::local(DEFAULT_STATES_PORT),
        }
    }

    /// Overrides the host application name.
    #[must_use]
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    /// Overrides the controller working directory.
    #[must_use]
    pub fn with_controller_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.controller_dir = dir.into();
        self
    }

    /// Requests ephemeral ports for both stores.
    ///
    /// Use this when harness tests run in parallel and must not collide on
    /// the fixed default ports.
    #[must_use]
    pub fn with_ephemeral_ports(mut self) -> Self {
        self.objects.port = 0;
        self.states.port = 0;
        self
    }

    /// Returns the adapter's test working copy directory.
    #[must_use]
    pub fn adapter_dir(&self) -> &Utf8Path {
        &self.adapter_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_the_fixed_local_ports() {
        let config = HarnessConfig::new("sql", "/tmp/sql", "/tmp/sql/main");
        assert_eq!(config.objects.port, DEFAULT_OBJECTS_PORT);
        assert_eq!(config.states.port, DEFAULT_STATES_PORT);
        assert_eq!(config.objects.host, "127.0.0.1");
        assert_eq!(config.app_name, "testing");
        assert_eq!(config.controller_dir, Utf8PathBuf::from("/tmp/sql/.controller"));
    }

    #[test]
    fn ephemeral_ports_zero_both_stores() {
        let config = HarnessConfig::new("sql", "/tmp/sql", "/tmp/sql/main").with_ephemeral_ports();
        assert_eq!(config.objects.port, 0);
        assert_eq!(config.states.port, 0);
    }
}
