use miette::Diagnostic;
use thiserror::Error;

/// A malformed version, specifier, marker, or requirement string.
///
/// Constraint errors are never retried: the input must be fixed.
#[derive(Debug, Clone, Error, Diagnostic, PartialEq, Eq)]
pub enum ConstraintError {
    #[error("invalid version `{input}`: {reason}")]
    Version { input: String, reason: String },

    #[error("invalid version specifier `{input}`: {reason}")]
    #[diagnostic(help("Specifiers look like `>=2.25, <3`"))]
    Specifier { input: String, reason: String },

    #[error("invalid marker `{input}`: {reason}")]
    #[diagnostic(help("Markers look like `python_version >= \"3.9\" and sys_platform == \"linux\"`"))]
    Marker { input: String, reason: String },

    #[error("invalid requirement `{input}`: {reason}")]
    Requirement { input: String, reason: String },

    #[error("invalid package name `{0}`")]
    Name(String),
}
