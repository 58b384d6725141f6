//! Packages as the solver sees them, and terms over their versions.

use std::fmt;

use tern_core::name::{ExtraName, PackageName};
use tern_core::specifier::VersionSet;

/// A solver variable.
///
/// Extras are separate virtual packages pinned to their base package's
/// version, so `requests[socks]` can only be selected alongside the same
/// `requests`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Package {
    Root,
    Base(PackageName),
    Extra(PackageName, ExtraName),
}

impl Package {
    pub fn name(&self) -> Option<&PackageName> {
        match self {
            Package::Root => None,
            Package::Base(name) | Package::Extra(name, _) => Some(name),
        }
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Package::Root => f.write_str("the project"),
            Package::Base(name) => write!(f, "{name}"),
            Package::Extra(name, extra) => write!(f, "{name}[{extra}]"),
        }
    }
}

/// A statement about one package.
///
/// `Positive(s)`: the package is selected at a version in `s`.
/// `Negative(s)`: the package is not selected at a version in `s` (it may
/// not be selected at all).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Positive(VersionSet),
    Negative(VersionSet),
}

/// How a term relates to what the partial solution already knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermRelation {
    Satisfied,
    Contradicted,
    Inconclusive,
}

impl Term {
    pub fn any() -> Self {
        Term::Negative(VersionSet::empty())
    }

    pub fn exact(version: tern_core::version::Version) -> Self {
        Term::Positive(VersionSet::singleton(version))
    }

    pub fn is_positive(&self) -> bool {
        matches!(self, Term::Positive(_))
    }

    pub fn set(&self) -> &VersionSet {
        match self {
            Term::Positive(s) | Term::Negative(s) => s,
        }
    }

    pub fn negate(&self) -> Term {
        match self {
            Term::Positive(s) => Term::Negative(s.clone()),
            Term::Negative(s) => Term::Positive(s.clone()),
        }
    }

    pub fn intersection(&self, other: &Term) -> Term {
        match (self, other) {
            (Term::Positive(a), Term::Positive(b)) => Term::Positive(a.intersection(b)),
            (Term::Positive(a), Term::Negative(b)) | (Term::Negative(b), Term::Positive(a)) => {
                Term::Positive(a.difference(b))
            }
            (Term::Negative(a), Term::Negative(b)) => Term::Negative(a.union(b)),
        }
    }

    pub fn union(&self, other: &Term) -> Term {
        self.negate().intersection(&other.negate()).negate()
    }

    /// No state satisfies the term.
    pub fn is_empty(&self) -> bool {
        matches!(self, Term::Positive(s) if s.is_empty())
    }

    /// Every state allowed by `self` is allowed by `other`.
    pub fn is_subset_of(&self, other: &Term) -> bool {
        match (self, other) {
            (Term::Positive(a), Term::Positive(b)) => a.is_subset_of(b),
            (Term::Positive(a), Term::Negative(b)) => a.is_disjoint(b),
            (Term::Negative(_), Term::Positive(_)) => false,
            (Term::Negative(a), Term::Negative(b)) => b.is_subset_of(a),
        }
    }

    pub fn is_disjoint(&self, other: &Term) -> bool {
        match (self, other) {
            (Term::Positive(a), Term::Positive(b)) => a.is_disjoint(b),
            (Term::Positive(a), Term::Negative(b)) | (Term::Negative(b), Term::Positive(a)) => {
                a.is_subset_of(b)
            }
            (Term::Negative(_), Term::Negative(_)) => false,
        }
    }

    /// Relation of `self` (an incompatibility term) to `known`, the
    /// accumulated assignment for the same package.
    pub fn relation(&self, known: &Term) -> TermRelation {
        if known.is_subset_of(self) {
            TermRelation::Satisfied
        } else if known.is_disjoint(self) {
            TermRelation::Contradicted
        } else {
            TermRelation::Inconclusive
        }
    }

    pub fn contains(&self, version: &tern_core::version::Version) -> bool {
        match self {
            Term::Positive(s) => s.contains(version),
            Term::Negative(s) => !s.contains(version),
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Positive(s) => write!(f, "{s}"),
            Term::Negative(s) => write!(f, "not {s}"),
        }
    }
}
