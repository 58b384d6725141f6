//! Public entry points: turn project requirements into a [`Solution`].

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use tern_core::config::{PrereleaseMode, ResolvedPolicy, Upgrade};
use tern_core::environment::TargetEnvironment;
use tern_core::name::PackageName;
use tern_core::requirement::{PackageSource, Requirement};
use tern_core::solution::Solution;
use tern_core::specifier::VersionSpecifiers;
use tern_core::version::Version;
use tern_util::cancel::Cancellation;

use crate::cache::{FetchPolicy, MetadataCache};
use crate::error::ResolveError;
use crate::provider::PackageMetadataProvider;
use crate::solver::Solver;
use crate::universal;

/// Ordering among candidates that share a version but differ in where they
/// come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TieBreak {
    /// Keep the order the provider reported.
    #[default]
    ProviderOrder,
    /// Index candidates before direct URLs and local paths.
    PreferRegistry,
    /// Local paths first, then direct URLs, then index candidates.
    PreferLocal,
}

impl TieBreak {
    /// Lower ranks sort first. Equal ranks keep provider order.
    pub fn rank(self, source: &PackageSource) -> u8 {
        match (self, source) {
            (TieBreak::ProviderOrder, _) => 0,
            (TieBreak::PreferRegistry, PackageSource::Registry { .. }) => 0,
            (TieBreak::PreferRegistry, PackageSource::Url { .. }) => 1,
            (TieBreak::PreferRegistry, PackageSource::Path { .. }) => 2,
            (TieBreak::PreferLocal, PackageSource::Path { .. }) => 0,
            (TieBreak::PreferLocal, PackageSource::Url { .. }) => 1,
            (TieBreak::PreferLocal, PackageSource::Registry { .. }) => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolverOptions {
    pub prerelease: PrereleaseMode,
    pub tie_break: TieBreak,
    pub max_iterations: u64,
    pub fetch: FetchPolicy,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            prerelease: PrereleaseMode::IfNecessary,
            tie_break: TieBreak::ProviderOrder,
            max_iterations: 100_000,
            fetch: FetchPolicy::default(),
        }
    }
}

impl ResolverOptions {
    pub fn from_policy(policy: &ResolvedPolicy) -> Self {
        Self {
            prerelease: policy.prerelease,
            tie_break: TieBreak::default(),
            max_iterations: policy.max_iterations,
            fetch: FetchPolicy {
                retries: policy.fetch_retries,
                backoff: Duration::from_millis(50),
                concurrency: policy.concurrent_fetches.max(1),
            },
        }
    }
}

/// Everything a resolution run needs besides the metadata provider.
#[derive(Debug, Clone, Default)]
pub struct ResolveRequest {
    /// Root declarations of every root (runtime, extras, groups), tagged
    /// with their origin.
    pub requirements: Vec<Requirement>,
    /// Restrict a package's versions if it is selected; never add it.
    pub constraints: Vec<Requirement>,
    /// Replace every declared requirement on the named package.
    pub overrides: Vec<Requirement>,
    /// Versions to keep when still admissible, usually from the previous
    /// lockfile.
    pub preferences: BTreeMap<PackageName, BTreeSet<Version>>,
    /// Interpreters the project supports; targets outside it are refused.
    pub requires_python: VersionSpecifiers,
    pub options: ResolverOptions,
}

impl ResolveRequest {
    pub fn new(requirements: Vec<Requirement>) -> Self {
        Self {
            requirements,
            ..Self::default()
        }
    }

    pub fn from_policy(requirements: Vec<Requirement>, policy: &ResolvedPolicy) -> Self {
        Self {
            requirements,
            constraints: policy.constraints.clone(),
            overrides: policy.overrides.clone(),
            preferences: BTreeMap::new(),
            requires_python: VersionSpecifiers::any(),
            options: ResolverOptions::from_policy(policy),
        }
    }

    pub fn with_requires_python(mut self, requires_python: VersionSpecifiers) -> Self {
        self.requires_python = requires_python;
        self
    }

    /// Prefer the versions locked in `previous`, except for packages
    /// `upgrade` releases.
    pub fn with_preferences(mut self, previous: &Solution, upgrade: &Upgrade) -> Self {
        for pkg in &previous.packages {
            if upgrade.allows(&pkg.name) {
                continue;
            }
            self.preferences
                .entry(pkg.name.clone())
                .or_default()
                .insert(pkg.version.clone());
        }
        self
    }
}

/// What a resolution must cover.
#[derive(Debug, Clone)]
pub enum ResolveTarget {
    /// One concrete environment; markers are evaluated away.
    Single(TargetEnvironment),
    /// Every listed environment, forking on marker regions.
    Universal(Vec<TargetEnvironment>),
}

impl ResolveTarget {
    pub fn from_policy(policy: &ResolvedPolicy) -> Self {
        if policy.universal {
            ResolveTarget::Universal(policy.environments.clone())
        } else {
            ResolveTarget::Single(TargetEnvironment::host(&policy.python_version))
        }
    }
}

/// Resolve `request` against `provider` for `target`.
///
/// Metadata is cached for the duration of this call only, shared across
/// universal forks.
pub async fn resolve<P: PackageMetadataProvider>(
    provider: &P,
    request: &ResolveRequest,
    target: &ResolveTarget,
    cancel: &Cancellation,
) -> Result<Solution, ResolveError> {
    let mut cache = MetadataCache::new(provider, request.options.fetch);
    let mut solution = match target {
        ResolveTarget::Single(env) => {
            if !request.requires_python.contains(&env.python_full_version) {
                return Err(ResolveError::unsupported_python(
                    request,
                    std::slice::from_ref(env),
                ));
            }
            tracing::info!(env = %env, roots = request.requirements.len(), "resolving");
            let resolution = Solver::new(&mut cache, request, env, cancel).solve().await?;
            resolution.into_solution(request, env)
        }
        ResolveTarget::Universal(envs) => {
            universal::resolve_universal(&mut cache, request, envs, cancel).await?
        }
    };
    solution.canonicalize();
    tracing::info!(
        packages = solution.packages.len(),
        regions = solution.regions.len(),
        "resolution complete"
    );
    Ok(solution)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tie_break_ranks() {
        let registry = PackageSource::registry("https://pypi.org/simple");
        let local = PackageSource::Path {
            path: "/src/pkg".to_string(),
        };
        assert!(TieBreak::PreferRegistry.rank(&registry) < TieBreak::PreferRegistry.rank(&local));
        assert!(TieBreak::PreferLocal.rank(&local) < TieBreak::PreferLocal.rank(&registry));
        assert_eq!(
            TieBreak::ProviderOrder.rank(&local),
            TieBreak::ProviderOrder.rank(&registry)
        );
    }

    #[test]
    fn upgrade_drops_preferences() {
        use tern_core::solution::ResolvedPackage;

        let name = |s: &str| PackageName::new(s).unwrap();
        let mut previous = Solution::default();
        for n in ["a", "b"] {
            previous.packages.push(ResolvedPackage::new(
                name(n),
                Version::parse("1.0").unwrap(),
                PackageSource::registry("https://pypi.org/simple"),
            ));
        }
        let upgrade = Upgrade::Packages([name("b")].into_iter().collect());
        let request = ResolveRequest::default().with_preferences(&previous, &upgrade);
        assert!(request.preferences.contains_key(&name("a")));
        assert!(!request.preferences.contains_key(&name("b")));
    }
}
