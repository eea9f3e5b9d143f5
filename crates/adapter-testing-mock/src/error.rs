//! Semantic error types for the mock execution engine.

use thiserror::Error;

/// Errors raised while loading or running an adapter in the mock engine.
///
/// The structural variants are hard preconditions of the engine, not
/// recoverable test outcomes: an adapter that never constructs an instance
/// or never registers a readiness hook cannot meaningfully be tested.
#[derive(Debug, Error)]
pub enum MockError {
    /// Compact mode requires the program to export an entry function.
    #[error("the adapter's main file must export a function in compact mode")]
    CompactExportNotFunction,

    /// The program ran to completion without constructing an adapter.
    #[error("the adapter was not initialised")]
    AdapterNotConstructed,

    /// The constructed adapter registered no readiness hook.
    #[error("the adapter did not register a ready handler")]
    MissingReadyHandler,

    /// A second adapter construction was attempted in the same run.
    #[error("only one adapter instance may be constructed per mock run")]
    AdapterAlreadyConstructed,

    /// A dependency identifier had no entry in the substitution map.
    #[error("no substitute registered for dependency `{0}`")]
    UnresolvedDependency(String),

    /// A substitute existed but had an unexpected type.
    #[error("the substitute for dependency `{0}` has an unexpected type")]
    DependencyTypeMismatch(String),
}

#[cfg(test)]
mod tests {
    use super::MockError;
    use rstest::rstest;

    #[test]
    fn compact_error_names_the_requirement() {
        assert!(
            MockError::CompactExportNotFunction
                .to_string()
                .contains("must export a function in compact mode")
        );
    }

    #[rstest]
    #[case(MockError::AdapterNotConstructed, "the adapter was not initialised")]
    #[case(
        MockError::MissingReadyHandler,
        "the adapter did not register a ready handler"
    )]
    #[case(
        MockError::AdapterAlreadyConstructed,
        "only one adapter instance may be constructed per mock run"
    )]
    fn structural_errors_are_descriptive(#[case] error: MockError, #[case] message: &str) {
        assert_eq!(error.to_string(), message);
    }

    #[rstest]
    #[case(MockError::UnresolvedDependency("platform-adapter-api".into()))]
    #[case(MockError::DependencyTypeMismatch("platform-adapter-api".into()))]
    fn dependency_errors_name_the_identifier(#[case] error: MockError) {
        assert!(error.to_string().contains("platform-adapter-api"));
    }
}
