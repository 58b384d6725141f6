//! The solver's working assignment: an explicit trail of decisions and
//! derivations, each tagged with the decision level it was made at.
//!
//! Level 0 holds derivations made before any decision. The project itself
//! is decided at level 1, which is also the lowest level a backjump can
//! reach.

use std::collections::BTreeMap;

use tern_core::specifier::VersionSet;
use tern_core::version::Version;

use crate::incompatibility::{IncompatId, Incompatibility};
use crate::term::{Package, Term, TermRelation};

#[derive(Debug, Clone)]
pub struct Assignment {
    pub package: Package,
    pub term: Term,
    pub level: u32,
    /// The incompatibility this was derived from; `None` for decisions.
    pub cause: Option<IncompatId>,
}

impl Assignment {
    pub fn is_decision(&self) -> bool {
        self.cause.is_none()
    }
}

/// How an incompatibility relates to the partial solution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relation {
    Satisfied,
    Contradicted,
    /// Every term but the one on this package is satisfied.
    AlmostSatisfied(Package),
    Inconclusive,
}

#[derive(Debug, Default)]
pub struct PartialSolution {
    trail: Vec<Assignment>,
    accumulated: BTreeMap<Package, Term>,
    decisions: BTreeMap<Package, Version>,
    level: u32,
}

impl PartialSolution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn decisions(&self) -> &BTreeMap<Package, Version> {
        &self.decisions
    }

    pub fn assignment(&self, index: usize) -> &Assignment {
        &self.trail[index]
    }

    pub fn decide(&mut self, package: Package, version: Version) {
        self.level += 1;
        let term = Term::exact(version.clone());
        self.push(Assignment {
            package: package.clone(),
            term,
            level: self.level,
            cause: None,
        });
        self.decisions.insert(package, version);
    }

    pub fn derive(&mut self, package: Package, term: Term, cause: IncompatId) {
        self.push(Assignment {
            package,
            term,
            level: self.level,
            cause: Some(cause),
        });
    }

    fn push(&mut self, assignment: Assignment) {
        let combined = match self.accumulated.get(&assignment.package) {
            Some(existing) => existing.intersection(&assignment.term),
            None => assignment.term.clone(),
        };
        self.accumulated.insert(assignment.package.clone(), combined);
        self.trail.push(assignment);
    }

    /// Drop every assignment made above `level`.
    pub fn backtrack(&mut self, level: u32) {
        self.trail.retain(|a| a.level <= level);
        self.level = level;
        self.accumulated.clear();
        self.decisions.clear();
        for assignment in &self.trail {
            let combined = match self.accumulated.get(&assignment.package) {
                Some(existing) => existing.intersection(&assignment.term),
                None => assignment.term.clone(),
            };
            self.accumulated
                .insert(assignment.package.clone(), combined);
            if assignment.is_decision() {
                if let Some(v) = assignment.term.set().as_singleton() {
                    self.decisions.insert(assignment.package.clone(), v.clone());
                }
            }
        }
    }

    pub fn term(&self, package: &Package) -> Option<&Term> {
        self.accumulated.get(package)
    }

    /// Packages required by the assignment but not yet decided, with the
    /// versions still allowed.
    pub fn undecided(&self) -> Vec<(Package, VersionSet)> {
        self.accumulated
            .iter()
            .filter(|(package, _)| !self.decisions.contains_key(*package))
            .filter_map(|(package, term)| match term {
                Term::Positive(set) => Some((package.clone(), set.clone())),
                Term::Negative(_) => None,
            })
            .collect()
    }

    pub fn relation(&self, incompat: &Incompatibility) -> Relation {
        let any = Term::any();
        let mut unsatisfied: Option<&Package> = None;
        for (package, term) in &incompat.terms {
            let known = self.accumulated.get(package).unwrap_or(&any);
            match term.relation(known) {
                TermRelation::Satisfied => {}
                TermRelation::Contradicted => return Relation::Contradicted,
                TermRelation::Inconclusive => {
                    if unsatisfied.is_some() {
                        return Relation::Inconclusive;
                    }
                    unsatisfied = Some(package);
                }
            }
        }
        match unsatisfied {
            Some(package) => Relation::AlmostSatisfied(package.clone()),
            None => Relation::Satisfied,
        }
    }

    /// Locate the assignment that made `incompat` satisfied, and the
    /// decision level of the one before it.
    ///
    /// Returns `None` if the incompatibility holds without any assignment.
    pub fn satisfier(&self, incompat: &Incompatibility) -> Option<(usize, u32)> {
        let mut earliest: Vec<(&Package, Option<usize>)> = Vec::new();
        for (package, term) in &incompat.terms {
            earliest.push((package, self.earliest_satisfying(package, term, Term::any(), None)));
        }
        let (sat_package, sat_index) = earliest
            .iter()
            .filter_map(|(p, i)| i.map(|i| (*p, i)))
            .max_by_key(|(_, i)| *i)?;

        let satisfier = &self.trail[sat_index];
        let mut previous = earliest
            .iter()
            .filter(|(p, _)| *p != sat_package)
            .filter_map(|(_, i)| *i)
            .max();

        let term = &incompat.terms[sat_package];
        if !satisfier.term.is_subset_of(term) {
            let own = self.earliest_satisfying(
                sat_package,
                term,
                satisfier.term.clone(),
                Some(sat_index),
            );
            previous = previous.max(own);
        }
        let level = previous.map_or(1, |i| self.trail[i].level.max(1));
        Some((sat_index, level))
    }

    /// First index at which the assignments to `package` (starting from
    /// `start`, looking only before `limit`) make `term` hold.
    fn earliest_satisfying(
        &self,
        package: &Package,
        term: &Term,
        start: Term,
        limit: Option<usize>,
    ) -> Option<usize> {
        let end = limit.unwrap_or(self.trail.len());
        let mut acc = start;
        for (index, assignment) in self.trail[..end].iter().enumerate() {
            if &assignment.package != package {
                continue;
            }
            acc = acc.intersection(&assignment.term);
            if acc.is_subset_of(term) {
                return Some(index);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_core::name::PackageName;

    fn pkg(s: &str) -> Package {
        Package::Base(PackageName::new(s).unwrap())
    }

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn decisions_raise_the_level_and_backtrack_restores() {
        let mut ps = PartialSolution::new();
        ps.derive(Package::Root, Term::exact(Version::new([0])), 0);
        ps.decide(Package::Root, Version::new([0]));
        ps.derive(pkg("a"), Term::Positive(VersionSet::at_least(v("1.0"))), 1);
        ps.decide(pkg("a"), v("1.2"));
        assert_eq!(ps.level(), 2);
        assert!(ps.undecided().is_empty());

        ps.backtrack(1);
        assert_eq!(ps.level(), 1);
        assert_eq!(ps.undecided().len(), 1);
        assert!(ps.decisions().contains_key(&Package::Root));
        assert!(!ps.decisions().contains_key(&pkg("a")));
    }

    #[test]
    fn relation_and_satisfier() {
        let mut ps = PartialSolution::new();
        ps.decide(Package::Root, Version::new([0]));
        ps.derive(pkg("b"), Term::Positive(VersionSet::at_least(v("2.0"))), 7);
        ps.decide(pkg("c"), v("1.0"));

        let incompat = Incompatibility::dependency(
            pkg("c"),
            v("1.0"),
            pkg("b"),
            VersionSet::less_than(v("2.0")),
        );
        assert_eq!(ps.relation(&incompat), Relation::Satisfied);
        let (index, previous_level) = ps.satisfier(&incompat).unwrap();
        assert_eq!(ps.assignment(index).package, pkg("c"));
        assert_eq!(previous_level, 1);
    }

    #[test]
    fn almost_satisfied_names_the_open_term() {
        let mut ps = PartialSolution::new();
        ps.decide(pkg("a"), v("1.0"));
        let incompat =
            Incompatibility::dependency(pkg("a"), v("1.0"), pkg("b"), VersionSet::full());
        assert_eq!(ps.relation(&incompat), Relation::AlmostSatisfied(pkg("b")));
    }
}
