//! Incompatibilities: sets of terms that must not all hold at once.

use std::collections::BTreeMap;
use std::fmt;

use tern_core::specifier::VersionSet;
use tern_core::version::Version;

use crate::term::{Package, Term};

/// Index into the [`IncompatibilityStore`].
pub type IncompatId = usize;

/// Why an incompatibility exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cause {
    /// The project itself must be selected.
    Root,
    /// No candidate version lies in the term's range.
    NoVersions,
    /// The package cannot be used at all, with a reason.
    Unavailable(String),
    /// A selected version requires another package.
    Dependency,
    /// A configured constraint forbids the range.
    Constraint,
    /// Learned from two earlier incompatibilities during conflict
    /// resolution.
    Derived(IncompatId, IncompatId),
}

#[derive(Debug, Clone)]
pub struct Incompatibility {
    pub terms: BTreeMap<Package, Term>,
    pub cause: Cause,
}

impl Incompatibility {
    pub fn root(root_version: Version) -> Self {
        let mut terms = BTreeMap::new();
        terms.insert(Package::Root, Term::Negative(VersionSet::singleton(root_version)));
        Self {
            terms,
            cause: Cause::Root,
        }
    }

    pub fn no_versions(package: Package, set: VersionSet) -> Self {
        Self::single(package, set, Cause::NoVersions)
    }

    pub fn unavailable(package: Package, set: VersionSet, reason: String) -> Self {
        Self::single(package, set, Cause::Unavailable(reason))
    }

    pub fn constraint(package: Package, forbidden: VersionSet) -> Self {
        Self::single(package, forbidden, Cause::Constraint)
    }

    fn single(package: Package, set: VersionSet, cause: Cause) -> Self {
        let mut terms = BTreeMap::new();
        terms.insert(package, Term::Positive(set));
        Self { terms, cause }
    }

    /// `package == version` requires `dependency` in `range`.
    pub fn dependency(
        package: Package,
        version: Version,
        dependency: Package,
        range: VersionSet,
    ) -> Self {
        let mut terms = BTreeMap::new();
        terms.insert(package, Term::exact(version));
        terms.insert(dependency, Term::Negative(range));
        Self {
            terms,
            cause: Cause::Dependency,
        }
    }

    /// Combine terms, intersecting those on the same package.
    pub fn derived(
        terms: impl IntoIterator<Item = (Package, Term)>,
        left: IncompatId,
        right: IncompatId,
    ) -> Self {
        let mut merged: BTreeMap<Package, Term> = BTreeMap::new();
        for (package, term) in terms {
            let combined = match merged.remove(&package) {
                Some(existing) => existing.intersection(&term),
                None => term,
            };
            merged.insert(package, combined);
        }
        Self {
            terms: merged,
            cause: Cause::Derived(left, right),
        }
    }

    pub fn get(&self, package: &Package) -> Option<&Term> {
        self.terms.get(package)
    }

    /// True when the incompatibility says the whole resolution is
    /// impossible: it has no terms, or only requires the root not to be
    /// selected.
    pub fn is_terminal(&self, root_version: &Version) -> bool {
        match self.terms.len() {
            0 => true,
            1 => matches!(
                self.terms.iter().next(),
                Some((Package::Root, Term::Positive(set))) if set.contains(root_version)
            ),
            _ => false,
        }
    }
}

impl fmt::Display for Incompatibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .terms
            .iter()
            .map(|(package, term)| format!("{package} {term}"))
            .collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

/// Arena of incompatibilities plus a per-package index for propagation.
#[derive(Debug, Default)]
pub struct IncompatibilityStore {
    arena: Vec<Incompatibility>,
    by_package: BTreeMap<Package, Vec<IncompatId>>,
}

impl IncompatibilityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store and index for propagation.
    pub fn add(&mut self, incompat: Incompatibility) -> IncompatId {
        let id = self.arena.len();
        for package in incompat.terms.keys() {
            self.by_package.entry(package.clone()).or_default().push(id);
        }
        self.arena.push(incompat);
        id
    }

    /// Store without indexing: an intermediate step of conflict resolution
    /// kept only so explanations can refer to it.
    pub fn record(&mut self, incompat: Incompatibility) -> IncompatId {
        self.arena.push(incompat);
        self.arena.len() - 1
    }

    /// Index a previously recorded incompatibility for propagation.
    pub fn activate(&mut self, id: IncompatId) {
        for package in self.arena[id].terms.keys() {
            let ids = self.by_package.entry(package.clone()).or_default();
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }

    pub fn get(&self, id: IncompatId) -> &Incompatibility {
        &self.arena[id]
    }

    /// Ids mentioning `package`, oldest first.
    pub fn mentioning(&self, package: &Package) -> Vec<IncompatId> {
        self.by_package.get(package).cloned().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }
}
