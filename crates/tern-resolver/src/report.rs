//! Human-readable explanations of resolution failures.
//!
//! The explanation walks the derivation tree of the terminal
//! incompatibility, emitting one "Because X and Y, Z." line per derived
//! node, causes before consequences. External facts (dependencies, missing
//! versions, constraints) appear inline in the lines that use them.

use std::collections::HashSet;
use std::fmt;

use tern_core::specifier::VersionSet;

use crate::incompatibility::{Cause, IncompatId, Incompatibility, IncompatibilityStore};
use crate::term::{Package, Term};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictReport {
    lines: Vec<String>,
    environment: Option<String>,
}

impl ConflictReport {
    /// Explain why `terminal` holds, from the derivations in `store`.
    pub fn from_store(store: &IncompatibilityStore, terminal: IncompatId) -> Self {
        let mut lines = Vec::new();
        let mut explained = HashSet::new();
        explain(store, terminal, &mut lines, &mut explained);
        if lines.is_empty() {
            // The terminal incompatibility is itself external.
            lines.push(format!(
                "Because {}, version solving failed.",
                describe(store.get(terminal))
            ));
        }
        Self {
            lines,
            environment: None,
        }
    }

    /// Tag the report with the target it was produced for.
    pub fn with_environment(mut self, label: impl Into<String>) -> Self {
        self.environment = Some(label.into());
        self
    }

    pub fn environment(&self) -> Option<&str> {
        self.environment.as_deref()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

impl fmt::Display for ConflictReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(env) = &self.environment {
            writeln!(f, "While resolving for {env}:")?;
        }
        for (i, line) in self.lines.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            f.write_str(line)?;
        }
        Ok(())
    }
}

fn explain(
    store: &IncompatibilityStore,
    id: IncompatId,
    lines: &mut Vec<String>,
    explained: &mut HashSet<IncompatId>,
) {
    let incompat = store.get(id);
    let Cause::Derived(left, right) = incompat.cause else {
        return;
    };
    if !explained.insert(id) {
        return;
    }
    explain(store, left, lines, explained);
    explain(store, right, lines, explained);
    lines.push(format!(
        "Because {} and {}, {}.",
        describe(store.get(left)),
        describe(store.get(right)),
        describe(incompat)
    ));
}

/// `package range`, or just `package` when every version is meant.
fn phrase(package: &Package, set: &VersionSet) -> String {
    match package {
        Package::Root => package.to_string(),
        _ if set.is_full() => package.to_string(),
        _ => format!("{package} {set}"),
    }
}

fn term_phrase(package: &Package, term: &Term) -> String {
    match term {
        Term::Positive(set) => phrase(package, set),
        Term::Negative(set) => format!("not {}", phrase(package, set)),
    }
}

/// One incompatibility as a statement of fact.
fn describe(incompat: &Incompatibility) -> String {
    let terms: Vec<(&Package, &Term)> = incompat.terms.iter().collect();
    match &incompat.cause {
        Cause::Root => "the project is selected".to_string(),
        Cause::NoVersions => match terms.as_slice() {
            [(package, term)] if term.set().is_full() => {
                format!("no versions of {package} are available")
            }
            [(package, term)] => format!("no versions of {package} match {}", term.set()),
            _ => generic(&terms),
        },
        Cause::Unavailable(reason) => match terms.as_slice() {
            [(package, term)] => format!("{} is unavailable: {reason}", phrase(package, term.set())),
            _ => generic(&terms),
        },
        Cause::Constraint => match terms.as_slice() {
            [(package, term)] => format!("constraints forbid {}", phrase(package, term.set())),
            _ => generic(&terms),
        },
        Cause::Dependency => {
            let depender = terms.iter().find(|(_, t)| t.is_positive());
            let dependee = terms.iter().find(|(_, t)| !t.is_positive());
            match (depender, dependee) {
                (Some((p, t)), Some((d, r))) => format!(
                    "{} depends on {}",
                    phrase(p, t.set()),
                    phrase(d, r.set())
                ),
                _ => generic(&terms),
            }
        }
        Cause::Derived(..) => generic(&terms),
    }
}

fn generic(terms: &[(&Package, &Term)]) -> String {
    let non_root: Vec<&(&Package, &Term)> = terms
        .iter()
        .filter(|(p, t)| !(matches!(p, Package::Root) && t.is_positive()))
        .collect();
    if non_root.is_empty() {
        return "version solving failed".to_string();
    }
    let requirer = if non_root.len() < terms.len() {
        "the project"
    } else {
        ""
    };

    let positives: Vec<String> = non_root
        .iter()
        .filter(|(_, t)| t.is_positive())
        .map(|(p, t)| phrase(p, t.set()))
        .collect();
    let negatives: Vec<String> = non_root
        .iter()
        .filter(|(_, t)| !t.is_positive())
        .map(|(p, t)| phrase(p, t.set()))
        .collect();

    match (positives.as_slice(), negatives.as_slice()) {
        ([], [only]) if !requirer.is_empty() => format!("{requirer} requires {only}"),
        ([], [only]) => format!("{only} is required"),
        ([only], []) if requirer.is_empty() => format!("{only} is forbidden"),
        ([only], []) => format!("{requirer} forbids {only}"),
        (pos, [only]) => format!("{} requires {only}", pos.join(" and ")),
        _ => {
            let all: Vec<String> = non_root.iter().map(|(p, t)| term_phrase(p, t)).collect();
            format!("{} are incompatible", all.join(" and "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_core::name::PackageName;
    use tern_core::version::Version;

    fn pkg(s: &str) -> Package {
        Package::Base(PackageName::new(s).unwrap())
    }

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn describes_external_causes() {
        let dep = Incompatibility::dependency(
            pkg("a"),
            v("1.0"),
            pkg("b"),
            VersionSet::at_least(v("2.0")),
        );
        assert_eq!(describe(&dep), "a ==1.0 depends on b >=2.0");

        let none = Incompatibility::no_versions(pkg("b"), VersionSet::at_least(v("2.0")));
        assert_eq!(describe(&none), "no versions of b match >=2.0");

        let gone = Incompatibility::unavailable(pkg("x"), VersionSet::full(), "not found".into());
        assert_eq!(describe(&gone), "x is unavailable: not found");
    }

    #[test]
    fn explains_a_derivation_chain() {
        let mut store = IncompatibilityStore::new();
        let root_dep = store.add(Incompatibility::dependency(
            Package::Root,
            Version::new([0]),
            pkg("a"),
            VersionSet::full(),
        ));
        let missing = store.add(Incompatibility::unavailable(
            pkg("a"),
            VersionSet::full(),
            "not found in any index".into(),
        ));
        let mut terms = std::collections::BTreeMap::new();
        terms.insert(Package::Root, Term::exact(Version::new([0])));
        let terminal = store.record(Incompatibility {
            terms,
            cause: Cause::Derived(root_dep, missing),
        });

        let report = ConflictReport::from_store(&store, terminal);
        assert_eq!(
            report.to_string(),
            "Because the project depends on a and a is unavailable: not found in any index, \
             version solving failed."
        );
    }

    #[test]
    fn environment_label_is_shown_first() {
        let mut store = IncompatibilityStore::new();
        let id = store.add(Incompatibility::no_versions(pkg("a"), VersionSet::full()));
        let report = ConflictReport::from_store(&store, id).with_environment("linux-x86_64-py3.12");
        let text = report.to_string();
        assert!(text.starts_with("While resolving for linux-x86_64-py3.12:"));
        assert!(text.contains("no versions of a are available"));
    }
}
