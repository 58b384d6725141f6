//! Shared utilities for tern.
//!
//! This crate provides cross-cutting concerns used by all other tern crates:
//! the umbrella error type, filesystem helpers (including atomic writes),
//! content hashing, advisory file locks, cooperative cancellation, and
//! terminal progress indicators.

pub mod cancel;
pub mod errors;
pub mod fs;
pub mod hash;
pub mod lock;
pub mod progress;
