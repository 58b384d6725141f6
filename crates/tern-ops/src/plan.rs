//! Diff a locked solution against an environment.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tern_core::name::PackageName;
use tern_core::requirement::{PackageSource, RootSelection};
use tern_core::solution::Solution;
use tern_core::version::Version;
use tern_resolver::DependencyGraph;

use crate::environment::{EnvironmentState, InstalledPackage};
use crate::error::SyncError;

/// A package the plan wants present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedPackage {
    pub name: PackageName,
    pub version: Version,
    pub source: PackageSource,
}

impl From<&PlannedPackage> for InstalledPackage {
    fn from(p: &PlannedPackage) -> Self {
        InstalledPackage::new(p.name.clone(), p.version.clone(), p.source.clone())
    }
}

impl fmt::Display for PlannedPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=={}", self.name, self.version)
    }
}

/// The changes that bring an environment in line with a solution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallPlan {
    /// Missing or at the wrong version, dependencies first.
    pub to_install: Vec<PlannedPackage>,
    /// Present but not wanted, by name.
    pub to_remove: Vec<InstalledPackage>,
    /// Right version from a different source, dependencies first.
    pub to_reinstall: Vec<PlannedPackage>,
    /// Wanted packages already in place.
    pub unchanged: usize,
}

/// One unit of work for an [`crate::installer::Installer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanStep {
    Remove(InstalledPackage),
    Reinstall(PlannedPackage),
    Install(PlannedPackage),
}

impl PlanStep {
    pub fn name(&self) -> &PackageName {
        match self {
            PlanStep::Remove(p) => &p.name,
            PlanStep::Reinstall(p) | PlanStep::Install(p) => &p.name,
        }
    }
}

impl fmt::Display for PlanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanStep::Remove(p) => write!(f, "remove {p}"),
            PlanStep::Reinstall(p) => write!(f, "reinstall {p}"),
            PlanStep::Install(p) => write!(f, "install {p}"),
        }
    }
}

impl InstallPlan {
    pub fn is_empty(&self) -> bool {
        self.to_install.is_empty() && self.to_remove.is_empty() && self.to_reinstall.is_empty()
    }

    pub fn len(&self) -> usize {
        self.to_install.len() + self.to_remove.len() + self.to_reinstall.len()
    }

    /// Removals, then reinstalls, then installs.
    pub fn steps(&self) -> Vec<PlanStep> {
        self.to_remove
            .iter()
            .cloned()
            .map(PlanStep::Remove)
            .chain(self.to_reinstall.iter().cloned().map(PlanStep::Reinstall))
            .chain(self.to_install.iter().cloned().map(PlanStep::Install))
            .collect()
    }
}

/// Knobs for [`diff`].
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    /// Never removed, even when the solution does not mention them.
    pub protected: BTreeSet<PackageName>,
    /// Keep packages the solution does not mention.
    pub inexact: bool,
    /// Reinstall every wanted package that is already present.
    pub reinstall: bool,
}

/// Compute what `state` needs to match the packages `selection` installs
/// from `solution` on the environment's own target.
pub fn diff(
    solution: &Solution,
    state: &EnvironmentState,
    selection: &RootSelection,
    options: &PlanOptions,
) -> Result<InstallPlan, SyncError> {
    let graph = DependencyGraph::for_environment(solution, &state.target, selection)?;
    let selected = solution.selected_for(&state.target)?;

    let mut wanted: BTreeMap<PackageName, PlannedPackage> = BTreeMap::new();
    let mut plan = InstallPlan::default();
    for name in graph.install_order() {
        let Some(pkg) = selected.get(&name) else {
            continue;
        };
        let want = PlannedPackage {
            name: pkg.name.clone(),
            version: pkg.version.clone(),
            source: pkg.source.clone(),
        };
        match state.get(&name) {
            None => plan.to_install.push(want.clone()),
            Some(have) if have.version != want.version => plan.to_install.push(want.clone()),
            Some(have) if have.source != want.source || options.reinstall => {
                plan.to_reinstall.push(want.clone())
            }
            Some(_) => plan.unchanged += 1,
        }
        wanted.insert(name, want);
    }

    if !options.inexact {
        for (name, installed) in &state.packages {
            if wanted.contains_key(name) || options.protected.contains(name) {
                continue;
            }
            plan.to_remove.push(installed.clone());
        }
    }

    tracing::info!(
        install = plan.to_install.len(),
        remove = plan.to_remove.len(),
        reinstall = plan.to_reinstall.len(),
        unchanged = plan.unchanged,
        env = %state.target,
        "computed install plan"
    );
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tern_core::environment::{Platform, TargetEnvironment};
    use tern_core::requirement::RequirementRoot;
    use tern_core::solution::{DependencyRef, ResolvedPackage};

    fn name(s: &str) -> PackageName {
        PackageName::new(s).unwrap()
    }

    fn registry() -> PackageSource {
        PackageSource::registry("https://pypi.org/simple")
    }

    fn env() -> TargetEnvironment {
        TargetEnvironment::new(Platform::Linux, "x86_64", &Version::new([3, 12]))
    }

    /// app -> lib -> base, all registry 1.0.
    fn solution() -> Solution {
        let mut solution = Solution::default();
        solution
            .roots
            .insert(RequirementRoot::Runtime, vec![DependencyRef::new(name("app"))]);
        for (pkg, dep) in [("app", Some("lib")), ("lib", Some("base")), ("base", None)] {
            let mut p = ResolvedPackage::new(name(pkg), Version::new([1, 0]), registry());
            p.dependencies.extend(dep.map(|d| DependencyRef::new(name(d))));
            solution.packages.push(p);
        }
        solution.canonicalize();
        solution
    }

    fn installed(pkg: &str, version: &str) -> InstalledPackage {
        InstalledPackage::new(name(pkg), Version::parse(version).unwrap(), registry())
    }

    #[test]
    fn installs_dependencies_first() {
        let state = EnvironmentState::empty(Path::new("/env"), env());
        let plan = diff(&solution(), &state, &RootSelection::runtime_only(), &PlanOptions::default())
            .unwrap();
        let order: Vec<&str> = plan.to_install.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(order, ["base", "lib", "app"]);
        assert!(plan.to_remove.is_empty());
    }

    #[test]
    fn classifies_each_package() {
        let mut state = EnvironmentState::empty(Path::new("/env"), env());
        state.insert(installed("app", "1.0"));
        state.insert(installed("lib", "0.9"));
        state.insert(InstalledPackage::new(
            name("base"),
            Version::new([1, 0]),
            PackageSource::Path {
                path: "/src/base".to_string(),
            },
        ));
        state.insert(installed("stray", "2.0"));
        state.insert(installed("python", "3.12"));

        let options = PlanOptions {
            protected: [name("python")].into_iter().collect(),
            ..PlanOptions::default()
        };
        let plan = diff(&solution(), &state, &RootSelection::runtime_only(), &options).unwrap();
        assert_eq!(plan.to_install.len(), 1);
        assert_eq!(plan.to_install[0].name, name("lib"));
        assert_eq!(plan.to_reinstall.len(), 1);
        assert_eq!(plan.to_reinstall[0].name, name("base"));
        assert_eq!(plan.to_remove, vec![installed("stray", "2.0")]);
        assert_eq!(plan.unchanged, 1);
    }

    #[test]
    fn inexact_keeps_extraneous_packages() {
        let mut state = EnvironmentState::empty(Path::new("/env"), env());
        state.insert(installed("stray", "2.0"));
        let options = PlanOptions {
            inexact: true,
            ..PlanOptions::default()
        };
        let plan = diff(&solution(), &state, &RootSelection::runtime_only(), &options).unwrap();
        assert!(plan.to_remove.is_empty());
        assert_eq!(plan.to_install.len(), 3);
    }

    #[test]
    fn steps_remove_before_installing() {
        let mut state = EnvironmentState::empty(Path::new("/env"), env());
        state.insert(installed("stray", "2.0"));
        let plan = diff(&solution(), &state, &RootSelection::runtime_only(), &PlanOptions::default())
            .unwrap();
        let steps: Vec<String> = plan.steps().iter().map(ToString::to_string).collect();
        assert_eq!(
            steps,
            [
                "remove stray==2.0",
                "install base==1.0",
                "install lib==1.0",
                "install app==1.0"
            ]
        );
    }
}
