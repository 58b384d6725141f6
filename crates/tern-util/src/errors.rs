use miette::Diagnostic;
use thiserror::Error;

/// Cross-cutting error type for tern operations that are not owned by a
/// single domain (I/O, configuration files, locks).
#[derive(Debug, Error, Diagnostic)]
pub enum TernError {
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The project manifest could not be read or parsed.
    #[error("Manifest error: {message}")]
    #[diagnostic(help("Check pyproject.toml for syntax errors"))]
    Manifest { message: String },

    /// A configuration file or override could not be read or parsed.
    #[error("Configuration error: {message}")]
    #[diagnostic(help("Check tern.toml and the [tool.tern] table of pyproject.toml"))]
    Config { message: String },

    /// Another process holds an exclusive lock on the given path.
    #[error("{path} is locked by another tern process")]
    #[diagnostic(help("Wait for the other invocation to finish, or retry"))]
    Locked { path: String },

    /// Catch-all for miscellaneous errors.
    #[error("{message}")]
    Generic { message: String },
}
