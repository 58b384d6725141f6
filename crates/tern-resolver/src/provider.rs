//! The metadata capability the resolver consumes.

use miette::Diagnostic;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use thiserror::Error;

use tern_core::marker::MarkerTree;
use tern_core::name::PackageName;
use tern_core::requirement::{PackageSource, Requirement};
use tern_core::specifier::VersionSpecifiers;
use tern_core::version::Version;
use tern_core::DEFAULT_INDEX_URL;

/// One concrete version of a package as reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageCandidate {
    pub name: PackageName,
    pub version: Version,
    /// Declared requirements. Requirements belonging to an extra carry an
    /// `extra == "..."` marker.
    pub requirements: Vec<Requirement>,
    pub requires_python: VersionSpecifiers,
    /// Environments the candidate supports; `True` for all of them.
    pub supported: MarkerTree,
    pub source: PackageSource,
}

impl PackageCandidate {
    pub fn new(name: PackageName, version: Version) -> Self {
        Self {
            name,
            version,
            requirements: Vec::new(),
            requires_python: VersionSpecifiers::any(),
            supported: MarkerTree::True,
            source: PackageSource::registry(DEFAULT_INDEX_URL),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum MetadataError {
    #[error("package `{name}` was not found in any index")]
    NotFound { name: PackageName },

    #[error("temporary failure fetching metadata for `{name}`: {message}")]
    #[diagnostic(help("Check your network connection and retry"))]
    Transient { name: PackageName, message: String },

    #[error("failed to fetch metadata for `{name}`: {message}")]
    Permanent { name: PackageName, message: String },
}

impl MetadataError {
    pub fn is_transient(&self) -> bool {
        matches!(self, MetadataError::Transient { .. })
    }
}

/// Source of package candidates.
///
/// Implementations fetch from an index, a local cache, or memory. They
/// never retry on their own; the per-run cache does that.
#[allow(async_fn_in_trait)]
pub trait PackageMetadataProvider {
    /// Every known version of `name`, newest first.
    async fn candidates_for(
        &self,
        name: &PackageName,
    ) -> Result<Vec<PackageCandidate>, MetadataError>;

    /// Requirements `candidate` imposes when selected.
    fn declared_requirements(&self, candidate: &PackageCandidate) -> Vec<Requirement> {
        candidate.requirements.clone()
    }
}

/// An in-memory index. Useful offline and as a test double.
#[derive(Debug, Default)]
pub struct StaticProvider {
    packages: BTreeMap<PackageName, Vec<PackageCandidate>>,
    failures: Mutex<HashMap<PackageName, (usize, MetadataError)>>,
    fetches: AtomicUsize,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, candidate: PackageCandidate) {
        let versions = self.packages.entry(candidate.name.clone()).or_default();
        versions.push(candidate);
        versions.sort_by(|a, b| b.version.cmp(&a.version));
    }

    /// Register `name==version` depending on `requirements` (PEP 508
    /// strings).
    pub fn add_simple(
        &mut self,
        name: &str,
        version: &str,
        requirements: &[&str],
    ) -> Result<(), tern_core::error::ConstraintError> {
        let mut candidate = PackageCandidate::new(PackageName::new(name)?, Version::parse(version)?);
        for raw in requirements {
            candidate.requirements.push(Requirement::parse(raw)?);
        }
        self.add(candidate);
        Ok(())
    }

    /// Fail the next `times` fetches of `name` with `error`.
    pub fn fail(&self, name: &PackageName, times: usize, error: MetadataError) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(name.clone(), (times, error));
        }
    }

    /// Number of `candidates_for` calls served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl PackageMetadataProvider for StaticProvider {
    async fn candidates_for(
        &self,
        name: &PackageName,
    ) -> Result<Vec<PackageCandidate>, MetadataError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut failures) = self.failures.lock() {
            if let Some((remaining, error)) = failures.get_mut(name) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(error.clone());
                }
            }
        }
        self.packages
            .get(name)
            .cloned()
            .ok_or_else(|| MetadataError::NotFound { name: name.clone() })
    }
}
