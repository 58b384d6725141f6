//! Operations that tie the resolver and lockfile to an environment.
//!
//! `ops_lock` resolves a project and writes `tern.lock` under an exclusive
//! lock; `ops_sync` decides whether the lockfile may be trusted, diffs it
//! against an environment and hands the plan to an [`Installer`].

pub mod environment;
pub mod error;
pub mod installer;
pub mod ops_lock;
pub mod ops_sync;
pub mod plan;
pub mod record;

pub use environment::{EnvironmentInspector, EnvironmentState, InstalledPackage};
pub use error::SyncError;
pub use installer::{InstallError, Installer};
pub use ops_sync::{SyncOptions, SyncReport, Synchronizer};
pub use plan::{InstallPlan, PlanStep};
