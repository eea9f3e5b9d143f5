//! The mock execution engine.
//!
//! [`run_mock_adapter`] loads an adapter program in a sandbox, drives its
//! readiness hook to completion and returns the resulting mock instances
//! together with any captured termination. Only the readiness hook runs
//! under interception: an adapter that exits or terminates there produces a
//! [`MockAdapterRun`] recording the request. Termination raised while the
//! program loads, and panics that are not termination signals, propagate to
//! the caller unmodified.

use std::any::Any;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use serde_json::{Map, Value};

use crate::adapter::{MockAdapter, ReadyFuture, ReadyOutcome};
use crate::error::MockError;
use crate::mock_store::MockStore;
use crate::sandbox::{ModuleExport, SandboxContext, SubstitutionMap};
use crate::shim::{AdapterRuntimeShim, PLATFORM_API_ID};
use crate::termination::{InterceptingTermination, TerminationSignal, intercept_termination};

/// Controls how the engine runs an adapter program.
#[derive(Debug, Default)]
pub struct MockAdapterOptions {
    compact: bool,
    config: Option<Map<String, Value>>,
    instance_objects: Vec<(String, Value)>,
}

impl MockAdapterOptions {
    /// Creates the default options: direct invocation, no starting
    /// configuration, no pre-seeded objects.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the program in compact mode: the program must export an entry
    /// function, which the engine then calls.
    #[must_use]
    pub fn compact(mut self, compact: bool) -> Self {
        self.compact = compact;
        self
    }

    /// Sets the configuration the adapter sees from construction onwards.
    #[must_use]
    pub fn with_config(mut self, config: Map<String, Value>) -> Self {
        self.config = Some(config);
        self
    }

    /// Seeds an object into the store before the program runs.
    #[must_use]
    pub fn with_instance_object(mut self, id: impl Into<String>, value: Value) -> Self {
        self.instance_objects.push((id.into(), value));
        self
    }
}

/// The outcome of one engine run.
#[derive(Debug)]
pub struct MockAdapterRun {
    /// The store the adapter ran against, for post-run assertions.
    pub store: MockStore,
    /// The adapter instance the program constructed.
    pub adapter: MockAdapter,
    /// The exit code, when the adapter ended the run via the process-exit
    /// entry point.
    pub exit_code: Option<i32>,
    /// The reason, when the adapter ended the run via its terminate entry
    /// point.
    pub terminate_reason: Option<String>,
}

impl MockAdapterRun {
    fn new(store: MockStore, adapter: MockAdapter, signal: Option<TerminationSignal>) -> Self {
        let (exit_code, terminate_reason) = match signal {
            Some(TerminationSignal::ExitCode(code)) => (Some(code), None),
            Some(TerminationSignal::TerminateReason(reason)) => (None, Some(reason)),
            None => (None, None),
        };
        Self {
            store,
            adapter,
            exit_code,
            terminate_reason,
        }
    }

    /// Whether the adapter requested termination or exit during the run.
    #[must_use]
    pub fn terminated(&self) -> bool {
        self.exit_code.is_some() || self.terminate_reason.is_some()
    }
}

/// Runs an adapter program against an in-memory store.
///
/// The program receives a [`SandboxContext`] whose substitution table maps
/// [`PLATFORM_API_ID`] to an [`AdapterRuntimeShim`]; resolving and using
/// that shim is how the program constructs its adapter. After loading (and,
/// in compact mode, calling the exported entry function), the engine
/// invokes the adapter's readiness hook and awaits a deferred outcome.
///
/// # Errors
///
/// - [`MockError::CompactExportNotFunction`] when compact mode is requested
///   but the program exports no entry function.
/// - [`MockError::AdapterNotConstructed`] when the program never built an
///   adapter instance.
/// - [`MockError::MissingReadyHandler`] when the adapter registered no
///   readiness hook.
///
/// # Panics
///
/// Resumes any panic from the program that is not a termination signal.
/// A termination signal raised while the program loads (or while the
/// compact entry function runs) also propagates; only the readiness hook
/// has its terminations captured into the run.
pub async fn run_mock_adapter<P>(
    program: P,
    options: MockAdapterOptions,
) -> Result<MockAdapterRun, MockError>
where
    P: FnOnce(&SandboxContext) -> ModuleExport,
{
    let store = MockStore::new();
    store.publish_objects(options.instance_objects);

    let mut shim = AdapterRuntimeShim::new(store.clone(), Arc::new(InterceptingTermination));
    if let Some(config) = options.config {
        shim = shim.with_config(config);
    }
    let shim = Arc::new(shim);

    let mut substitutions = SubstitutionMap::new();
    substitutions.insert(PLATFORM_API_ID, Arc::clone(&shim) as Arc<dyn Any + Send + Sync>);
    let ctx = SandboxContext::new(
        substitutions,
        Arc::new(InterceptingTermination),
        !options.compact,
    );

    tracing::debug!(compact = options.compact, "loading adapter program");
    let export = program(&ctx);

    if options.compact {
        let ModuleExport::Factory(entry) = export else {
            return Err(MockError::CompactExportNotFunction);
        };
        entry(&ctx);
    }

    let adapter = shim.created_adapter().ok_or(MockError::AdapterNotConstructed)?;
    if !adapter.has_ready_handler() {
        return Err(MockError::MissingReadyHandler);
    }

    let outcome = match catch_unwind(AssertUnwindSafe(|| adapter.invoke_ready())) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let signal = interpret(payload);
            tracing::debug!(?signal, "adapter terminated in readiness hook");
            return Ok(MockAdapterRun::new(store, adapter, Some(signal)));
        }
    };

    if let Some(ReadyOutcome::Deferred(future)) = outcome {
        if let Err(payload) = (CatchUnwind { inner: future }).await {
            let signal = interpret(payload);
            tracing::debug!(?signal, "adapter terminated in deferred readiness");
            return Ok(MockAdapterRun::new(store, adapter, Some(signal)));
        }
    }

    tracing::debug!("adapter startup completed");
    Ok(MockAdapterRun::new(store, adapter, None))
}

fn interpret(payload: Box<dyn Any + Send>) -> TerminationSignal {
    match intercept_termination(payload) {
        Ok(signal) => signal,
        Err(other) => resume_unwind(other),
    }
}

/// Awaits a readiness future while catching unwinds from its polls.
struct CatchUnwind {
    inner: ReadyFuture,
}

impl Future for CatchUnwind {
    type Output = Result<(), Box<dyn Any + Send>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // ReadyFuture is a boxed pin, so Self is Unpin.
        let this = self.get_mut();
        match catch_unwind(AssertUnwindSafe(|| this.inner.as_mut().poll(cx))) {
            Ok(Poll::Ready(())) => Poll::Ready(Ok(())),
            Ok(Poll::Pending) => Poll::Pending,
            Err(payload) => Poll::Ready(Err(payload)),
        }
    }
}
