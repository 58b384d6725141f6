//! The resolved package set produced by the resolver and persisted in the
//! lockfile.
//!
//! A single-target solution has no regions and no package markers. A
//! universal solution lists its marker regions; a package whose version is
//! the same everywhere carries no marker, otherwise each entry carries the
//! disjunction of the regions it was selected in.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::str::FromStr;

use crate::environment::TargetEnvironment;
use crate::error::ConstraintError;
use crate::marker::MarkerTree;
use crate::name::{ExtraName, PackageName};
use crate::requirement::{PackageSource, RequirementRoot, RootSelection};
use crate::version::Version;

/// An edge to another locked package, with the extras it enables and the
/// environment condition under which the edge exists.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DependencyRef {
    pub name: PackageName,
    pub extras: Vec<ExtraName>,
    pub marker: Option<MarkerTree>,
}

impl DependencyRef {
    pub fn new(name: PackageName) -> Self {
        Self {
            name,
            extras: Vec::new(),
            marker: None,
        }
    }

    pub fn applies_to(&self, env: &TargetEnvironment) -> bool {
        self.marker.as_ref().map_or(true, |m| m.evaluate(env, &[]))
    }
}

impl fmt::Display for DependencyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name.as_str())?;
        if !self.extras.is_empty() {
            let extras: Vec<&str> = self.extras.iter().map(ExtraName::as_str).collect();
            write!(f, "[{}]", extras.join(","))?;
        }
        if let Some(marker) = &self.marker {
            write!(f, "; {marker}")?;
        }
        Ok(())
    }
}

impl FromStr for DependencyRef {
    type Err = ConstraintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (head, marker) = match s.split_once(';') {
            Some((head, marker)) => (head.trim(), Some(MarkerTree::parse(marker.trim())?)),
            None => (s.trim(), None),
        };
        let (name, extras) = match head.split_once('[') {
            Some((name, rest)) => {
                let inner = rest.strip_suffix(']').ok_or_else(|| ConstraintError::Requirement {
                    input: s.to_string(),
                    reason: "unterminated extras list".to_string(),
                })?;
                let mut extras = inner
                    .split(',')
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .map(ExtraName::new)
                    .collect::<Result<Vec<_>, _>>()?;
                extras.sort();
                extras.dedup();
                (name, extras)
            }
            None => (head, Vec::new()),
        };
        Ok(Self {
            name: PackageName::new(name)?,
            extras,
            marker,
        })
    }
}

impl Serialize for DependencyRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DependencyRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One selected package version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ResolvedPackage {
    pub name: PackageName,
    pub version: Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<MarkerTree>,
    pub source: PackageSource,
    #[serde(default)]
    pub dependencies: Vec<DependencyRef>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub optional_dependencies: BTreeMap<ExtraName, Vec<DependencyRef>>,
}

impl ResolvedPackage {
    pub fn new(name: PackageName, version: Version, source: PackageSource) -> Self {
        Self {
            name,
            version,
            marker: None,
            source,
            dependencies: Vec::new(),
            optional_dependencies: BTreeMap::new(),
        }
    }

    pub fn applies_to(&self, env: &TargetEnvironment) -> bool {
        self.marker.as_ref().map_or(true, |m| m.evaluate(env, &[]))
    }

    fn sort_key(&self) -> (PackageName, String) {
        (
            self.name.clone(),
            self.marker.as_ref().map(ToString::to_string).unwrap_or_default(),
        )
    }
}

/// A consistent package set, possibly spanning several marker regions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Solution {
    pub regions: Vec<MarkerTree>,
    pub roots: BTreeMap<RequirementRoot, Vec<DependencyRef>>,
    pub packages: Vec<ResolvedPackage>,
}

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum SolutionError {
    #[error("package `{name}` is selected more than once for {env}")]
    #[diagnostic(help("the lockfile's marker regions overlap; re-lock the project"))]
    Overlap { name: PackageName, env: String },

    #[error("package `{name}` is required on {env} but not locked for it")]
    #[diagnostic(help("the lockfile does not cover this target; re-lock the project"))]
    Missing { name: PackageName, env: String },
}

impl Solution {
    /// Sort everything into the canonical order used for serialization.
    pub fn canonicalize(&mut self) {
        for pkg in &mut self.packages {
            pkg.marker = pkg.marker.take().and_then(MarkerTree::into_option);
        }
        self.packages.sort_by_cached_key(ResolvedPackage::sort_key);
        for pkg in &mut self.packages {
            pkg.dependencies.sort();
            pkg.dependencies.dedup();
            for deps in pkg.optional_dependencies.values_mut() {
                deps.sort();
                deps.dedup();
            }
        }
        for deps in self.roots.values_mut() {
            deps.sort();
            deps.dedup();
        }
    }

    pub fn is_universal(&self) -> bool {
        !self.regions.is_empty()
    }

    /// All entries for `name`, one per region with a distinct selection.
    pub fn get<'a, 'n>(
        &'a self,
        name: &'n PackageName,
    ) -> impl Iterator<Item = &'a ResolvedPackage> + 'n
    where
        'a: 'n,
    {
        self.packages.iter().filter(move |p| &p.name == name)
    }

    /// The entries that apply on `env`, keyed by name.
    pub fn selected_for(
        &self,
        env: &TargetEnvironment,
    ) -> Result<BTreeMap<PackageName, &ResolvedPackage>, SolutionError> {
        let mut selected = BTreeMap::new();
        for pkg in self.packages.iter().filter(|p| p.applies_to(env)) {
            if selected.insert(pkg.name.clone(), pkg).is_some() {
                return Err(SolutionError::Overlap {
                    name: pkg.name.clone(),
                    env: env.label(),
                });
            }
        }
        Ok(selected)
    }

    /// Packages reachable on `env` from the roots in `selection`, following
    /// only edges whose markers hold there. Sorted by name.
    pub fn installable_for(
        &self,
        env: &TargetEnvironment,
        selection: &RootSelection,
    ) -> Result<Vec<&ResolvedPackage>, SolutionError> {
        let selected = self.selected_for(env)?;
        let mut enabled: BTreeMap<PackageName, BTreeSet<ExtraName>> = BTreeMap::new();
        let mut queue: VecDeque<&DependencyRef> = self
            .roots
            .iter()
            .filter(|(root, _)| selection.includes(root))
            .flat_map(|(_, deps)| deps.iter())
            .collect();

        while let Some(dep) = queue.pop_front() {
            if !dep.applies_to(env) {
                continue;
            }
            let pkg = selected
                .get(&dep.name)
                .ok_or_else(|| SolutionError::Missing {
                    name: dep.name.clone(),
                    env: env.label(),
                })?;
            let first_visit = !enabled.contains_key(&dep.name);
            let extras = enabled.entry(dep.name.clone()).or_default();
            if first_visit {
                queue.extend(pkg.dependencies.iter());
            }
            for extra in &dep.extras {
                if extras.insert(extra.clone()) {
                    if let Some(deps) = pkg.optional_dependencies.get(extra) {
                        queue.extend(deps.iter());
                    }
                }
            }
        }

        Ok(enabled
            .keys()
            .filter_map(|name| selected.get(name).copied())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Platform;

    fn name(s: &str) -> PackageName {
        PackageName::new(s).unwrap()
    }

    fn pkg(n: &str, v: &str, deps: &[&str]) -> ResolvedPackage {
        let mut p = ResolvedPackage::new(
            name(n),
            Version::parse(v).unwrap(),
            PackageSource::registry("https://pypi.org/simple"),
        );
        p.dependencies = deps.iter().map(|d| d.parse().unwrap()).collect();
        p
    }

    fn linux() -> TargetEnvironment {
        TargetEnvironment::new(Platform::Linux, "x86_64", &Version::new([3, 12]))
    }

    fn windows() -> TargetEnvironment {
        TargetEnvironment::new(Platform::Windows, "x86_64", &Version::new([3, 12]))
    }

    #[test]
    fn dependency_ref_round_trip() {
        for raw in ["idna", "requests[socks]", r#"colorama; os_name == "nt""#] {
            let dep: DependencyRef = raw.parse().unwrap();
            assert_eq!(dep.to_string(), raw);
        }
    }

    #[test]
    fn installable_follows_markers_and_extras() {
        let mut app = pkg("app", "1.0", &[r#"colorama; os_name == "nt""#]);
        app.optional_dependencies
            .insert(ExtraName::new("fast").unwrap(), vec!["speedups".parse().unwrap()]);
        let mut solution = Solution {
            regions: Vec::new(),
            roots: BTreeMap::new(),
            packages: vec![app, pkg("colorama", "0.4.6", &[]), pkg("speedups", "2.0", &[])],
        };
        solution
            .roots
            .insert(RequirementRoot::Runtime, vec!["app".parse().unwrap()]);
        solution.roots.insert(
            RequirementRoot::DevGroup(ExtraName::new("dev").unwrap()),
            vec!["app[fast]".parse().unwrap()],
        );

        let names = |pkgs: Vec<&ResolvedPackage>| -> Vec<String> {
            pkgs.iter().map(|p| p.name.to_string()).collect()
        };
        let runtime = RootSelection::runtime_only();
        assert_eq!(names(solution.installable_for(&linux(), &runtime).unwrap()), ["app"]);
        assert_eq!(
            names(solution.installable_for(&windows(), &runtime).unwrap()),
            ["app", "colorama"]
        );
        let mut dev = RootSelection::default();
        dev.groups.insert(ExtraName::new("dev").unwrap());
        assert_eq!(
            names(solution.installable_for(&linux(), &dev).unwrap()),
            ["app", "speedups"]
        );
    }

    #[test]
    fn overlapping_entries_are_rejected() {
        let solution = Solution {
            regions: Vec::new(),
            roots: BTreeMap::new(),
            packages: vec![pkg("a", "1.0", &[]), pkg("a", "2.0", &[])],
        };
        assert!(matches!(
            solution.selected_for(&linux()),
            Err(SolutionError::Overlap { .. })
        ));
    }

    #[test]
    fn canonical_order_is_name_then_marker() {
        let mut b = pkg("b", "1.0", &[]);
        b.marker = Some(MarkerTree::parse(r#"sys_platform == "win32""#).unwrap());
        let mut b2 = pkg("b", "2.0", &[]);
        b2.marker = Some(MarkerTree::parse(r#"sys_platform != "win32""#).unwrap());
        let mut solution = Solution {
            packages: vec![b, pkg("a", "1.0", &["z", "c"]), b2],
            ..Solution::default()
        };
        solution.canonicalize();
        let versions: Vec<String> = solution
            .packages
            .iter()
            .map(|p| format!("{}=={}", p.name, p.version))
            .collect();
        assert_eq!(versions, ["a==1.0", "b==2.0", "b==1.0"]);
        assert_eq!(solution.packages[0].dependencies[0].name.as_str(), "c");
    }
}
