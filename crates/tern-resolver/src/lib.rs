//! Version solving for tern.
//!
//! The solver is a conflict-driven search in the PubGrub style: it keeps a
//! store of incompatibilities and a partial solution, propagates until a
//! fixpoint, learns a new incompatibility from every conflict, and picks the
//! newest admissible version when it has to decide. Universal resolution
//! partitions the target environments by the markers reachable in the
//! requirement graph and solves each region separately.

pub mod cache;
pub mod error;
pub mod graph;
pub mod incompatibility;
pub mod partial_solution;
pub mod provider;
pub mod report;
pub mod resolver;
pub mod solver;
pub mod term;
pub mod universal;

pub use error::ResolveError;
pub use provider::{MetadataError, PackageCandidate, PackageMetadataProvider, StaticProvider};
pub use graph::DependencyGraph;
pub use resolver::{resolve, ResolveRequest, ResolveTarget, ResolverOptions, TieBreak};
pub use universal::MarkerRegion;
