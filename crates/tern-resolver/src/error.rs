use miette::Diagnostic;
use thiserror::Error;

use tern_core::environment::TargetEnvironment;
use tern_core::error::ConstraintError;

use crate::provider::MetadataError;
use crate::report::ConflictReport;
use crate::resolver::ResolveRequest;

/// Why a resolution attempt produced no solution.
#[derive(Debug, Error, Diagnostic)]
pub enum ResolveError {
    /// No assignment satisfies every requirement.
    #[error("no solution satisfies the requirements\n\n{0}")]
    #[diagnostic(help("Relax one of the conflicting requirements, or pin the package with an override"))]
    Conflict(ConflictReport),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Constraint(#[from] ConstraintError),

    /// The iteration cap was hit; a resolver defect rather than a user error.
    #[error("resolver gave up after {0} iterations")]
    #[diagnostic(help("Raise `max-iterations` in [tool.tern] to retry, and report the project if it persists"))]
    IterationLimit(u64),

    #[error("no target interpreter satisfies requires-python `{requires}` (targets: {targets})")]
    #[diagnostic(help("Widen `requires-python`, or resolve for an interpreter it admits"))]
    UnsupportedPython { requires: String, targets: String },

    #[error("resolution was cancelled")]
    Cancelled,

    #[error("another tern process is resolving this project ({path} is locked)")]
    #[diagnostic(help("Wait for the other invocation to finish, or set `lock-wait = \"wait\"`"))]
    ResolutionInProgress { path: String },
}

impl ResolveError {
    pub(crate) fn unsupported_python(
        request: &ResolveRequest,
        environments: &[TargetEnvironment],
    ) -> Self {
        let targets: Vec<String> = environments.iter().map(ToString::to_string).collect();
        ResolveError::UnsupportedPython {
            requires: request.requires_python.to_string(),
            targets: targets.join(", "),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ResolveError::Conflict(_))
    }
}
