//! Universal resolution: one solution covering several target
//! environments.
//!
//! Every non-`extra` marker atom reachable from the roots is collected once
//! up front, together with a `python_full_version` atom per candidate
//! `requires-python` clause. Environments are grouped by the truth values
//! of those atoms;
//! each group is resolved on its own and the results are merged, tagging
//! packages that differ between groups with the group markers.

use std::collections::{BTreeMap, BTreeSet};

use tern_core::environment::TargetEnvironment;
use tern_core::marker::{MarkerExpression, MarkerKey, MarkerTree};
use tern_core::name::PackageName;
use tern_core::solution::{ResolvedPackage, Solution};
use tern_core::version::Version;
use tern_core::DEFAULT_PYTHON_VERSION;
use tern_util::cancel::Cancellation;

use crate::cache::MetadataCache;
use crate::error::ResolveError;
use crate::provider::PackageMetadataProvider;
use crate::resolver::ResolveRequest;
use crate::solver::{overridden, Solver};

/// A set of environments indistinguishable by every reachable marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerRegion {
    pub marker: MarkerTree,
    pub environments: Vec<TargetEnvironment>,
}

pub(crate) async fn resolve_universal<P: PackageMetadataProvider>(
    cache: &mut MetadataCache<'_, P>,
    request: &ResolveRequest,
    environments: &[TargetEnvironment],
    cancel: &Cancellation,
) -> Result<Solution, ResolveError> {
    let defaults;
    let environments = if environments.is_empty() {
        defaults = TargetEnvironment::builtin_targets(&Version::parse(DEFAULT_PYTHON_VERSION)?);
        &defaults[..]
    } else {
        environments
    };
    let environments = admitted(request, environments)?;

    let atoms = discover_atoms(cache, request, cancel).await?;
    let regions = partition(&atoms, &environments);
    tracing::info!(
        atoms = atoms.len(),
        environments = environments.len(),
        regions = regions.len(),
        "partitioned target environments"
    );

    let mut forks = Vec::with_capacity(regions.len());
    for region in regions {
        if cancel.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }
        // Every environment in a region evaluates every reachable marker
        // identically, so any of them stands for the whole region.
        let Some(representative) = region.environments.first() else {
            continue;
        };
        tracing::debug!(region = %region.marker, env = %representative, "resolving region");
        let resolution = Solver::new(&mut *cache, request, representative, cancel)
            .solve()
            .await?;
        forks.push((region.marker.clone(), resolution.into_solution(request, representative)));
    }
    Ok(merge(forks))
}

/// The environments the project's `requires-python` admits.
fn admitted(
    request: &ResolveRequest,
    environments: &[TargetEnvironment],
) -> Result<Vec<TargetEnvironment>, ResolveError> {
    let (kept, dropped): (Vec<_>, Vec<_>) = environments
        .iter()
        .cloned()
        .partition(|env| request.requires_python.contains(&env.python_full_version));
    for env in &dropped {
        tracing::debug!(
            env = %env,
            requires = %request.requires_python,
            "target outside requires-python"
        );
    }
    if kept.is_empty() {
        return Err(ResolveError::unsupported_python(request, environments));
    }
    Ok(kept)
}

/// Breadth-first walk over every candidate of every reachable package,
/// collecting the environment atoms of requirement markers, support
/// markers and `requires-python` clauses.
pub(crate) async fn discover_atoms<P: PackageMetadataProvider>(
    cache: &mut MetadataCache<'_, P>,
    request: &ResolveRequest,
    cancel: &Cancellation,
) -> Result<BTreeSet<MarkerExpression>, ResolveError> {
    let mut atoms = BTreeSet::new();
    let mut seen: BTreeSet<PackageName> = BTreeSet::new();
    let mut frontier: Vec<PackageName> = Vec::new();

    for req in &request.requirements {
        let req = overridden(req, &request.overrides);
        collect_atoms(&req.marker, &mut atoms);
        frontier.push(req.name.clone());
    }
    for constraint in &request.constraints {
        collect_atoms(&constraint.marker, &mut atoms);
    }

    while !frontier.is_empty() {
        if cancel.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }
        let batch: Vec<PackageName> = frontier
            .drain(..)
            .filter(|name| seen.insert(name.clone()))
            .collect();
        cache.prefetch(batch.iter().cloned()).await;
        for name in batch {
            // Fetch failures surface when the region solver needs the package.
            let Ok(candidates) = cache.get(&name).await else {
                continue;
            };
            for candidate in candidates.iter() {
                collect_atoms(&candidate.supported, &mut atoms);
                atoms.extend(
                    candidate
                        .requires_python
                        .clauses()
                        .iter()
                        .map(MarkerExpression::python_full_version),
                );
                for req in cache.provider().declared_requirements(candidate) {
                    let req = overridden(&req, &request.overrides);
                    collect_atoms(&req.marker, &mut atoms);
                    if !seen.contains(&req.name) {
                        frontier.push(req.name.clone());
                    }
                }
            }
        }
    }
    Ok(atoms)
}

fn collect_atoms(marker: &MarkerTree, atoms: &mut BTreeSet<MarkerExpression>) {
    atoms.extend(
        marker
            .expressions()
            .into_iter()
            .filter(|e| e.key != MarkerKey::Extra)
            .cloned(),
    );
}

/// Group `environments` by the truth vector of `atoms`. Atoms with the same
/// value everywhere do not split anything and are left out of the region
/// markers.
pub fn partition(
    atoms: &BTreeSet<MarkerExpression>,
    environments: &[TargetEnvironment],
) -> Vec<MarkerRegion> {
    let atoms: Vec<&MarkerExpression> = atoms.iter().collect();
    let vectors: Vec<Vec<bool>> = environments
        .iter()
        .map(|env| atoms.iter().map(|a| a.evaluate(env, &[])).collect())
        .collect();
    let Some(first) = vectors.first() else {
        return Vec::new();
    };
    let varying: Vec<usize> = (0..atoms.len())
        .filter(|&i| vectors.iter().any(|v| v[i] != first[i]))
        .collect();

    let mut groups: BTreeMap<Vec<bool>, Vec<TargetEnvironment>> = BTreeMap::new();
    for (env, vector) in environments.iter().zip(&vectors) {
        let key: Vec<bool> = varying.iter().map(|&i| vector[i]).collect();
        let members = groups.entry(key).or_default();
        if !members.contains(env) {
            members.push(env.clone());
        }
    }

    groups
        .into_iter()
        .map(|(key, environments)| {
            let marker = varying
                .iter()
                .zip(&key)
                .fold(MarkerTree::True, |acc, (&i, &holds)| {
                    let atom = MarkerTree::Expression(atoms[i].clone());
                    acc.and(if holds { atom } else { atom.negate() })
                });
            MarkerRegion {
                marker,
                environments,
            }
        })
        .collect()
}

/// Merge per-region solutions. A package selected identically in every
/// region carries no marker; otherwise each distinct selection carries the
/// disjunction of the regions it was selected in.
pub fn merge(forks: Vec<(MarkerTree, Solution)>) -> Solution {
    if forks.len() == 1 {
        if let Some((_, solution)) = forks.into_iter().next() {
            return solution;
        }
        return Solution::default();
    }

    let regions: Vec<MarkerTree> = forks.iter().map(|(m, _)| m.clone()).collect();
    let mut roots = BTreeMap::new();
    let mut groups: BTreeMap<PackageName, Vec<(ResolvedPackage, Vec<usize>)>> = BTreeMap::new();

    for (index, (_, solution)) in forks.into_iter().enumerate() {
        for (root, deps) in solution.roots {
            roots.entry(root).or_insert_with(Vec::new).extend(deps);
        }
        for pkg in solution.packages {
            let entries = groups.entry(pkg.name.clone()).or_default();
            match entries
                .iter_mut()
                .find(|(p, _)| p.version == pkg.version && p.source == pkg.source)
            {
                Some((merged, members)) => {
                    merged.dependencies.extend(pkg.dependencies);
                    for (extra, deps) in pkg.optional_dependencies {
                        merged
                            .optional_dependencies
                            .entry(extra)
                            .or_default()
                            .extend(deps);
                    }
                    members.push(index);
                }
                None => entries.push((pkg, vec![index])),
            }
        }
    }

    let mut packages = Vec::new();
    for entries in groups.into_values() {
        for (mut pkg, members) in entries {
            pkg.marker = if members.len() == regions.len() {
                None
            } else {
                Some(
                    members
                        .iter()
                        .fold(MarkerTree::False, |acc, &i| acc.or(regions[i].clone())),
                )
            };
            packages.push(pkg);
        }
    }

    Solution {
        regions,
        roots,
        packages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_core::environment::Platform;

    fn atom(raw: &str) -> MarkerExpression {
        match MarkerTree::parse(raw).unwrap() {
            MarkerTree::Expression(e) => e,
            other => panic!("not a single atom: {other}"),
        }
    }

    fn py312() -> Version {
        Version::new([3, 12])
    }

    #[test]
    fn constant_atoms_do_not_split() {
        let atoms: BTreeSet<_> = [atom(r#"python_version >= "3.8""#)].into_iter().collect();
        let regions = partition(&atoms, &TargetEnvironment::builtin_targets(&py312()));
        assert_eq!(regions.len(), 1);
        assert!(regions[0].marker.is_true());
        assert_eq!(regions[0].environments.len(), 5);
    }

    #[test]
    fn platform_atoms_split_environments() {
        let atoms: BTreeSet<_> = [atom(r#"sys_platform == "linux""#)].into_iter().collect();
        let regions = partition(&atoms, &TargetEnvironment::builtin_targets(&py312()));
        assert_eq!(regions.len(), 2);
        let linux = TargetEnvironment::new(Platform::Linux, "x86_64", &py312());
        let mac = TargetEnvironment::new(Platform::Macos, "aarch64", &py312());
        let linux_regions: Vec<_> = regions
            .iter()
            .filter(|r| r.marker.evaluate(&linux, &[]))
            .collect();
        assert_eq!(linux_regions.len(), 1);
        assert!(!linux_regions[0].marker.evaluate(&mac, &[]));
        assert_eq!(linux_regions[0].environments.len(), 2);
    }

    #[test]
    fn interpreter_atoms_split_same_platform_targets() {
        let clause = tern_core::specifier::VersionSpecifier::parse(">=3.10").unwrap();
        let atoms: BTreeSet<_> = [MarkerExpression::python_full_version(&clause)]
            .into_iter()
            .collect();
        let new = TargetEnvironment::new(Platform::Linux, "x86_64", &py312());
        let old = TargetEnvironment::new(Platform::Linux, "x86_64", &Version::new([3, 8]));
        let regions = partition(&atoms, &[new.clone(), old.clone()]);
        assert_eq!(regions.len(), 2);
        for region in &regions {
            assert_eq!(region.environments.len(), 1);
            assert!(region.marker.evaluate(&region.environments[0], &[]));
        }
    }
}
