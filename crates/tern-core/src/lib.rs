//! Core data types for tern.
//!
//! This crate defines the model the resolver and synchronizer operate on:
//! normalized package names and versions, the version-specifier and marker
//! algebra, requirements and their roots, the target-environment
//! descriptor, resolved solutions, the lockfile format, project manifests,
//! and layered configuration.
//!
//! This crate is intentionally free of async code and network I/O.

/// Built-in package index used when no configuration names one.
pub const DEFAULT_INDEX_URL: &str = "https://pypi.org/simple";

/// Interpreter version assumed when neither config nor the project names one.
pub const DEFAULT_PYTHON_VERSION: &str = "3.12";

pub mod config;
pub mod environment;
pub mod error;
pub mod lockfile;
pub mod manifest;
pub mod marker;
pub mod name;
pub mod requirement;
pub mod solution;
pub mod specifier;
pub mod version;
