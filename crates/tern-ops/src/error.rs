use miette::Diagnostic;
use thiserror::Error;

use tern_core::error::ConstraintError;
use tern_core::lockfile::LockfileError;
use tern_core::solution::SolutionError;
use tern_resolver::ResolveError;
use tern_util::errors::TernError;

use crate::installer::InstallError;

/// Failure of a lock or sync operation.
#[derive(Debug, Error, Diagnostic)]
pub enum SyncError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Lockfile(#[from] LockfileError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Constraint(#[from] ConstraintError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Solution(#[from] SolutionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Install(#[from] InstallError),

    #[error("cannot read environment at {path}: {message}")]
    #[diagnostic(help("Recreate the environment, or remove its install record"))]
    Environment { path: String, message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Tern(#[from] TernError),
}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        SyncError::Tern(TernError::Io(e))
    }
}
