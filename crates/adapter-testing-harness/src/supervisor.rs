//! Child-process supervision for the adapter under test.

use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use camino::Utf8Path;
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::events::{EventBus, ExitReason};

/// A supervised adapter process.
///
/// Spawning hands the child to a monitor task; the first close/exit
/// observation records the [`ExitReason`] in a watch channel and, unless a
/// deliberate stop is in progress, emits a `failed` notification on the bus.
/// Later observations are no-ops because the watch value has already been
/// set and the handle state has moved on.
pub(crate) struct AdapterProcess {
    pid: Option<i32>,
    exit_rx: watch::Receiver<Option<ExitReason>>,
    stopping: Arc<AtomicBool>,
    _monitor: JoinHandle<()>,
}

impl AdapterProcess {
    /// Spawns `<main_file> --console` with inherited standard streams.
    ///
    /// The child runs in `cwd` with the harness process environment merged
    /// with the caller-supplied overrides.
    pub(crate) fn spawn(
        main_file: &Utf8Path,
        cwd: &Utf8Path,
        env: &HashMap<String, String>,
        bus: EventBus,
    ) -> std::io::Result<Self> {
        let mut command = Command::new(main_file.as_std_path());
        command
            .arg("--console")
            .current_dir(cwd.as_std_path())
            .envs(env)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let mut child = command.spawn()?;
        let pid = child.id().and_then(|raw| i32::try_from(raw).ok());
        tracing::debug!(%main_file, ?pid, "adapter process spawned");

        let (exit_tx, exit_rx) = watch::channel(None);
        let stopping = Arc::new(AtomicBool::new(false));
        let monitor_stopping = Arc::clone(&stopping);
        let monitor = tokio::spawn(async move {
            let reason = match child.wait().await {
                Ok(status) => classify(status),
                Err(error) => {
                    tracing::warn!(%error, "waiting for the adapter process failed");
                    ExitReason::Signal("unknown".to_string())
                }
            };
            tracing::debug!(%reason, "adapter process terminated");
            let _ = exit_tx.send(Some(reason.clone()));
            if !monitor_stopping.load(Ordering::SeqCst) {
                bus.emit_failed(&reason);
            }
        });

        Ok(Self {
            pid,
            exit_rx,
            stopping,
            _monitor: monitor,
        })
    }

    /// Whether the monitor has observed the process exit.
    pub(crate) fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    /// The recorded exit reason, if the process has exited.
    pub(crate) fn exit_reason(&self) -> Option<ExitReason> {
        self.exit_rx.borrow().clone()
    }

    /// Marks a deliberate stop so the monitor suppresses the `failed`
    /// notification for the upcoming exit.
    pub(crate) fn mark_stopping(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    /// A watch receiver that resolves once the process has exited.
    pub(crate) fn exit_watch(&self) -> watch::Receiver<Option<ExitReason>> {
        self.exit_rx.clone()
    }

    /// Waits until the process has exited and returns the reason.
    pub(crate) async fn wait_exit(&self) -> ExitReason {
        wait_on(self.exit_watch()).await
    }

    /// Sends SIGTERM, tolerating an already-reaped pid.
    #[cfg(unix)]
    pub(crate) fn terminate(&self) {
        self.signal(nix::sys::signal::Signal::SIGTERM);
    }

    /// Sends SIGKILL, tolerating an already-reaped pid.
    #[cfg(unix)]
    pub(crate) fn force_kill(&self) {
        self.signal(nix::sys::signal::Signal::SIGKILL);
    }

    #[cfg(unix)]
    fn signal(&self, signal: nix::sys::signal::Signal) {
        if let Some(pid) = self.pid {
            if let Err(error) = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), signal) {
                tracing::debug!(pid, %signal, %error, "signal delivery failed");
            }
        }
    }
}

/// Waits on an exit watch handed out by [`AdapterProcess::exit_watch`].
pub(crate) async fn wait_on(mut exit_rx: watch::Receiver<Option<ExitReason>>) -> ExitReason {
    let waited = exit_rx.wait_for(Option::is_some).await.map(|r| r.clone());
    match waited {
        Ok(Some(reason)) => reason,
        // The monitor never drops the sender before recording a reason, but
        // a closed channel still needs an answer.
        _ => ExitReason::Signal("unknown".to_string()),
    }
}

fn classify(status: ExitStatus) -> ExitReason {
    if let Some(code) = status.code() {
        return ExitReason::Code(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExitReason::Signal(signal_name(signal));
        }
    }
    ExitReason::Signal("unknown".to_string())
}

#[cfg(unix)]
fn signal_name(signal: i32) -> String {
    nix::sys::signal::Signal::try_from(signal)
        .map(|s| s.as_str().to_string())
        .unwrap_or_else(|_| format!("signal {signal}"))
}
