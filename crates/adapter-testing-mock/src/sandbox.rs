//! The sandboxed loading environment for adapter programs.
//!
//! An adapter program is a callable that receives a [`SandboxContext`] and
//! returns its [`ModuleExport`], the in-process model of "load the main
//! file and capture what it exports". The context carries the three levers
//! of the sandbox: the dependency substitution table, the termination
//! strategy, and the invocation-style flag.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::MockError;
use crate::termination::TerminationStrategy;

/// An injectable dependency resolution table.
///
/// The contract is "substitution map wins, else the lookup fails": an
/// in-process program has no default resolution path, so every dependency
/// it asks for must be substituted.
#[derive(Default)]
pub struct SubstitutionMap {
    entries: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl SubstitutionMap {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a substitute for a dependency identifier.
    pub fn insert(&mut self, id: impl Into<String>, substitute: Arc<dyn Any + Send + Sync>) {
        self.entries.insert(id.into(), substitute);
    }

    /// Looks up a substitute.
    #[must_use]
    pub fn resolve(&self, id: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.entries.get(id).map(Arc::clone)
    }
}

// Substitutes are type-erased; only the keys are printable.
impl fmt::Debug for SubstitutionMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

/// What a sandboxed program exports.
pub enum ModuleExport {
    /// The program exported nothing; it self-initialised on load.
    None,
    /// The program exported an entry function, as compact-mode adapters do.
    Factory(Box<dyn FnOnce(&SandboxContext) + Send>),
}

impl fmt::Debug for ModuleExport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("ModuleExport::None"),
            Self::Factory(_) => f.write_str("ModuleExport::Factory"),
        }
    }
}

/// The environment a sandboxed adapter program runs in.
pub struct SandboxContext {
    substitutions: SubstitutionMap,
    termination: Arc<dyn TerminationStrategy>,
    invoked_directly: bool,
}

impl SandboxContext {
    /// Creates a context from its three parts.
    #[must_use]
    pub fn new(
        substitutions: SubstitutionMap,
        termination: Arc<dyn TerminationStrategy>,
        invoked_directly: bool,
    ) -> Self {
        Self {
            substitutions,
            termination,
            invoked_directly,
        }
    }

    /// Resolves a dependency from the substitution table.
    ///
    /// # Errors
    ///
    /// [`MockError::UnresolvedDependency`] when no substitute is registered.
    pub fn resolve(&self, id: &str) -> Result<Arc<dyn Any + Send + Sync>, MockError> {
        self.substitutions
            .resolve(id)
            .ok_or_else(|| MockError::UnresolvedDependency(id.to_string()))
    }

    /// Resolves a dependency and downcasts it to its concrete type.
    ///
    /// # Errors
    ///
    /// [`MockError::UnresolvedDependency`] when no substitute is registered,
    /// [`MockError::DependencyTypeMismatch`] when the substitute is not a
    /// `T`.
    pub fn resolve_as<T: Send + Sync + 'static>(&self, id: &str) -> Result<Arc<T>, MockError> {
        self.resolve(id)?
            .downcast::<T>()
            .map_err(|_| MockError::DependencyTypeMismatch(id.to_string()))
    }

    /// How termination surfaces inside this sandbox.
    #[must_use]
    pub fn termination(&self) -> &Arc<dyn TerminationStrategy> {
        &self.termination
    }

    /// Whether the program should behave as if invoked directly.
    ///
    /// Adapters that conditionally self-initialise based on how they were
    /// loaded check this flag; outside compact mode the sandbox presents
    /// itself as a direct invocation.
    #[must_use]
    pub fn invoked_directly(&self) -> bool {
        self.invoked_directly
    }
}
