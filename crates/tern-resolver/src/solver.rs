//! Conflict-driven version solving for one target environment.
//!
//! The loop alternates unit propagation and decisions. A satisfied
//! incompatibility triggers conflict resolution, which walks the trail
//! backwards, learns a new incompatibility and backjumps. Everything the
//! search mutates lives in the [`Solver`]; nothing is visible to the caller
//! until a [`Resolution`] is returned.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tern_core::config::PrereleaseMode;
use tern_core::environment::TargetEnvironment;
use tern_core::name::{ExtraName, PackageName};
use tern_core::requirement::{PackageSource, Requirement};
use tern_core::solution::{DependencyRef, ResolvedPackage, Solution};
use tern_core::specifier::VersionSet;
use tern_core::version::Version;
use tern_util::cancel::Cancellation;

use crate::cache::MetadataCache;
use crate::error::ResolveError;
use crate::incompatibility::{IncompatId, Incompatibility, IncompatibilityStore};
use crate::partial_solution::{PartialSolution, Relation};
use crate::provider::{MetadataError, PackageCandidate, PackageMetadataProvider};
use crate::report::ConflictReport;
use crate::resolver::ResolveRequest;
use crate::term::{Package, Term};

/// A selected candidate with the requirements it was resolved with
/// (overrides already applied).
#[derive(Debug, Clone)]
pub struct SelectedPackage {
    pub candidate: PackageCandidate,
    pub requirements: Vec<Requirement>,
}

/// The outcome of a successful search.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub packages: BTreeMap<PackageName, SelectedPackage>,
    /// Extras activated for each selected package.
    pub extras: BTreeMap<PackageName, BTreeSet<ExtraName>>,
}

/// Replace `req` by the last override naming the same package.
pub(crate) fn overridden(req: &Requirement, overrides: &[Requirement]) -> Requirement {
    match overrides.iter().rev().find(|o| o.name == req.name) {
        Some(o) => Requirement {
            origin: req.origin.clone(),
            ..o.clone()
        },
        None => req.clone(),
    }
}

fn dependency_ref(req: &Requirement, marker: tern_core::marker::MarkerTree) -> DependencyRef {
    DependencyRef {
        name: req.name.clone(),
        extras: req.extras.clone(),
        marker: marker.into_option(),
    }
}

impl Resolution {
    /// Lower into the lockfile model for `env`: no regions, no package
    /// markers, edges kept with the environment part of their markers.
    pub fn into_solution(self, request: &ResolveRequest, env: &TargetEnvironment) -> Solution {
        let mut solution = Solution::default();
        for req in &request.requirements {
            let req = overridden(req, &request.overrides);
            if !req.applies_to(env, &[]) {
                continue;
            }
            let marker = req.marker.assume_extras(&[]);
            solution
                .roots
                .entry(req.origin.clone())
                .or_default()
                .push(dependency_ref(&req, marker));
        }

        for (name, selected) in self.packages {
            let mut pkg = ResolvedPackage::new(
                name.clone(),
                selected.candidate.version.clone(),
                selected.candidate.source.clone(),
            );
            let extras = self.extras.get(&name);
            for req in &selected.requirements {
                if req.name == name && req.extras.is_empty() {
                    continue;
                }
                let base = req.applies_to(env, &[]);
                if base {
                    pkg.dependencies
                        .push(dependency_ref(req, req.marker.assume_extras(&[])));
                }
                for extra in extras.into_iter().flatten() {
                    let active = std::slice::from_ref(extra);
                    if !base && req.applies_to(env, active) {
                        pkg.optional_dependencies
                            .entry(extra.clone())
                            .or_default()
                            .push(dependency_ref(req, req.marker.assume_extras(active)));
                    }
                }
            }
            solution.packages.push(pkg);
        }
        solution
    }
}

type Available = Option<Arc<Vec<PackageCandidate>>>;

pub struct Solver<'a, 'p, P> {
    cache: &'a mut MetadataCache<'p, P>,
    request: &'a ResolveRequest,
    env: &'a TargetEnvironment,
    cancel: &'a Cancellation,
    store: IncompatibilityStore,
    solution: PartialSolution,
    root_version: Version,
    /// Direct URL or path sources named by root requirements.
    pinned: BTreeMap<PackageName, PackageSource>,
    prerelease_opt_in: BTreeSet<PackageName>,
    /// Candidates usable on `env`, newest first; `None` when not found.
    available: HashMap<PackageName, Available>,
    dependencies_added: HashSet<(Package, Version)>,
    chosen: BTreeMap<(PackageName, Version), SelectedPackage>,
    iterations: u64,
}

impl<'a, 'p, P: PackageMetadataProvider> Solver<'a, 'p, P> {
    pub fn new(
        cache: &'a mut MetadataCache<'p, P>,
        request: &'a ResolveRequest,
        env: &'a TargetEnvironment,
        cancel: &'a Cancellation,
    ) -> Self {
        let mut pinned = BTreeMap::new();
        let mut prerelease_opt_in = BTreeSet::new();
        for req in &request.requirements {
            let req = overridden(req, &request.overrides);
            if let Some(source) = req.source.as_ref().filter(|s| !s.is_registry()) {
                if req.applies_to(env, &[]) {
                    pinned.insert(req.name.clone(), source.clone());
                }
            }
        }
        for req in request
            .requirements
            .iter()
            .chain(&request.constraints)
            .chain(&request.overrides)
        {
            if req.specifier.mentions_prerelease() {
                prerelease_opt_in.insert(req.name.clone());
            }
        }

        Self {
            cache,
            request,
            env,
            cancel,
            store: IncompatibilityStore::new(),
            solution: PartialSolution::new(),
            root_version: Version::new([0]),
            pinned,
            prerelease_opt_in,
            available: HashMap::new(),
            dependencies_added: HashSet::new(),
            chosen: BTreeMap::new(),
            iterations: 0,
        }
    }

    pub async fn solve(mut self) -> Result<Resolution, ResolveError> {
        self.store
            .add(Incompatibility::root(self.root_version.clone()));
        self.add_constraints();

        let mut next = Package::Root;
        loop {
            self.propagate(next)?;
            let undecided = self.solution.undecided();
            if undecided.is_empty() {
                break;
            }
            self.check_cancelled()?;
            self.tick()?;

            let names: Vec<PackageName> = undecided
                .iter()
                .filter_map(|(p, _)| p.name().cloned())
                .collect();
            self.cache.prefetch(names).await;

            let Some((package, set)) = self.pick(undecided).await? else {
                break;
            };
            next = self.decide(package, set).await?;
        }

        tracing::debug!(
            env = %self.env,
            decisions = self.solution.decisions().len(),
            incompatibilities = self.store.len(),
            iterations = self.iterations,
            "solved"
        );
        Ok(self.finish())
    }

    fn check_cancelled(&self) -> Result<(), ResolveError> {
        if self.cancel.is_cancelled() {
            tracing::debug!("resolution cancelled");
            return Err(ResolveError::Cancelled);
        }
        Ok(())
    }

    fn tick(&mut self) -> Result<(), ResolveError> {
        self.iterations += 1;
        if self.iterations > self.request.options.max_iterations {
            return Err(ResolveError::IterationLimit(
                self.request.options.max_iterations,
            ));
        }
        Ok(())
    }

    fn add_constraints(&mut self) {
        for constraint in &self.request.constraints {
            if !constraint.applies_to(self.env, &[]) {
                continue;
            }
            let forbidden = constraint.specifier.to_set().complement();
            if forbidden.is_empty() {
                continue;
            }
            self.store.add(Incompatibility::constraint(
                Package::Base(constraint.name.clone()),
                forbidden,
            ));
        }
    }

    /// Unit propagation from `start` until nothing changes.
    fn propagate(&mut self, start: Package) -> Result<(), ResolveError> {
        let mut changed = vec![start];
        while let Some(package) = changed.pop() {
            self.check_cancelled()?;
            let ids = self.store.mentioning(&package);
            for &id in ids.iter().rev() {
                match self.solution.relation(self.store.get(id)) {
                    Relation::Satisfied => {
                        let learned = self.resolve_conflict(id)?;
                        changed.clear();
                        if let Some(p) = self.derive_from_learned(learned)? {
                            changed.push(p);
                        }
                        break;
                    }
                    Relation::AlmostSatisfied(p) => {
                        self.derive(&p, id);
                        if !changed.contains(&p) {
                            changed.push(p);
                        }
                    }
                    Relation::Contradicted | Relation::Inconclusive => {}
                }
            }
        }
        Ok(())
    }

    fn derive(&mut self, package: &Package, cause: IncompatId) {
        if let Some(term) = self.store.get(cause).get(package).map(Term::negate) {
            self.solution.derive(package.clone(), term, cause);
        }
    }

    fn derive_from_learned(
        &mut self,
        mut learned: IncompatId,
    ) -> Result<Option<Package>, ResolveError> {
        loop {
            match self.solution.relation(self.store.get(learned)) {
                Relation::AlmostSatisfied(p) => {
                    self.derive(&p, learned);
                    return Ok(Some(p));
                }
                Relation::Satisfied => learned = self.resolve_conflict(learned)?,
                Relation::Contradicted | Relation::Inconclusive => return Ok(None),
            }
        }
    }

    /// Learn from a satisfied incompatibility and backjump. Returns the
    /// incompatibility that is almost satisfied afterwards.
    fn resolve_conflict(&mut self, conflict: IncompatId) -> Result<IncompatId, ResolveError> {
        tracing::debug!(incompatibility = %self.store.get(conflict), "conflict");
        let mut current = conflict;
        let mut learned = false;
        loop {
            self.tick()?;
            let incompat = self.store.get(current).clone();
            if incompat.is_terminal(&self.root_version) {
                return Err(self.failure(current));
            }
            let Some((index, previous_level)) = self.solution.satisfier(&incompat) else {
                return Err(self.failure(current));
            };
            let satisfier = self.solution.assignment(index).clone();
            let Some(term) = incompat.get(&satisfier.package).cloned() else {
                return Err(self.failure(current));
            };

            match satisfier.cause {
                Some(cause) if previous_level >= satisfier.level => {
                    let prior = self.store.get(cause);
                    let mut terms: Vec<(Package, Term)> = incompat
                        .terms
                        .iter()
                        .chain(prior.terms.iter())
                        .filter(|(p, _)| **p != satisfier.package)
                        .map(|(p, t)| (p.clone(), t.clone()))
                        .collect();
                    if !satisfier.term.is_subset_of(&term) {
                        let difference = satisfier.term.intersection(&term.negate());
                        terms.push((satisfier.package.clone(), difference.negate()));
                    }
                    let derived = Incompatibility::derived(terms, current, cause);
                    tracing::trace!(derived = %derived, "conflict resolution step");
                    current = self.store.record(derived);
                    learned = true;
                }
                _ => {
                    self.solution.backtrack(previous_level);
                    if learned {
                        self.store.activate(current);
                    }
                    tracing::debug!(
                        learned = %self.store.get(current),
                        level = previous_level,
                        "backjump"
                    );
                    return Ok(current);
                }
            }
        }
    }

    fn failure(&self, terminal: IncompatId) -> ResolveError {
        let report =
            ConflictReport::from_store(&self.store, terminal).with_environment(self.env.label());
        tracing::debug!(env = %self.env, "no solution");
        ResolveError::Conflict(report)
    }

    /// Candidates for `name` usable on this target, cached per run.
    async fn candidates(&mut self, name: &PackageName) -> Result<Available, ResolveError> {
        if let Some(entry) = self.available.get(name) {
            return Ok(entry.clone());
        }
        let entry = match self.cache.get(name).await {
            Ok(all) => Some(Arc::new(self.usable(name, &all))),
            Err(MetadataError::NotFound { .. }) => None,
            Err(err) => return Err(err.into()),
        };
        self.available.insert(name.clone(), entry.clone());
        Ok(entry)
    }

    fn usable(&self, name: &PackageName, all: &[PackageCandidate]) -> Vec<PackageCandidate> {
        let pin = self.pinned.get(name);
        let mut usable: Vec<PackageCandidate> = all
            .iter()
            .filter(|c| c.requires_python.contains(&self.env.python_full_version))
            .filter(|c| c.supported.evaluate(self.env, &[]))
            .filter(|c| pin.map_or(true, |source| &c.source == source))
            .cloned()
            .collect();
        if usable.len() < all.len() {
            tracing::trace!(
                package = %name,
                skipped = all.len() - usable.len(),
                env = %self.env,
                "candidates unusable on target"
            );
        }
        let tie_break = self.request.options.tie_break;
        usable.sort_by(|a, b| {
            b.version
                .cmp(&a.version)
                .then_with(|| tie_break.rank(&a.source).cmp(&tie_break.rank(&b.source)))
        });
        usable
    }

    /// The undecided package with the fewest matching versions; ties go to
    /// the first in package order.
    async fn pick(
        &mut self,
        undecided: Vec<(Package, VersionSet)>,
    ) -> Result<Option<(Package, VersionSet)>, ResolveError> {
        let mut best: Option<(usize, Package, VersionSet)> = None;
        for (package, set) in undecided {
            let count = match package.name() {
                None => 0,
                Some(name) => {
                    let name = name.clone();
                    match self.candidates(&name).await? {
                        Some(list) => list.iter().filter(|c| set.contains(&c.version)).count(),
                        None => 0,
                    }
                }
            };
            if best.as_ref().map_or(true, |(n, _, _)| count < *n) {
                best = Some((count, package, set));
            }
        }
        Ok(best.map(|(_, package, set)| (package, set)))
    }

    /// Decide `package`, or record why it cannot be. Returns the package to
    /// propagate from.
    async fn decide(
        &mut self,
        package: Package,
        set: VersionSet,
    ) -> Result<Package, ResolveError> {
        let name = match &package {
            Package::Root => {
                self.add_root_dependencies();
                self.solution
                    .decide(Package::Root, self.root_version.clone());
                return Ok(Package::Root);
            }
            Package::Base(name) | Package::Extra(name, _) => name.clone(),
        };

        let Some(candidates) = self.candidates(&name).await? else {
            tracing::debug!(package = %name, "package not found");
            self.store.add(Incompatibility::unavailable(
                package.clone(),
                VersionSet::full(),
                "not found in any index".to_string(),
            ));
            return Ok(package);
        };

        let Some(candidate) = self.choose(&package, &set, &candidates) else {
            tracing::debug!(package = %package, range = %set, "no admissible version");
            self.store
                .add(Incompatibility::no_versions(package.clone(), set));
            return Ok(package);
        };

        self.add_dependencies(&package, &candidate);
        tracing::debug!(
            package = %package,
            version = %candidate.version,
            level = self.solution.level() + 1,
            "decision"
        );
        self.solution.decide(package.clone(), candidate.version);
        Ok(package)
    }

    /// Newest admissible candidate, unless a preferred version is still
    /// admissible.
    fn choose(
        &self,
        package: &Package,
        set: &VersionSet,
        candidates: &[PackageCandidate],
    ) -> Option<PackageCandidate> {
        let name = package.name()?;
        // An extra follows its base. Any other version conflicts with the
        // base decision and is learned away by propagation.
        if let Package::Extra(base, _) = package {
            if let Some(version) = self.solution.decisions().get(&Package::Base(base.clone())) {
                if let Some(c) = candidates
                    .iter()
                    .find(|c| &c.version == version && set.contains(&c.version))
                {
                    return Some(c.clone());
                }
            }
        }

        let opted_in = self.prerelease_opt_in.contains(name);
        let allow_prerelease = match self.request.options.prerelease {
            PrereleaseMode::Allow => true,
            PrereleaseMode::Disallow => false,
            PrereleaseMode::Explicit => opted_in,
            PrereleaseMode::IfNecessary => {
                opted_in
                    || !candidates
                        .iter()
                        .any(|c| set.contains(&c.version) && !c.version.is_prerelease())
            }
        };

        let mut admissible = candidates
            .iter()
            .filter(|c| set.contains(&c.version))
            .filter(|c| allow_prerelease || !c.version.is_prerelease());

        if let Some(preferred) = self.request.preferences.get(name) {
            if let Some(c) = admissible.clone().find(|c| preferred.contains(&c.version)) {
                return Some(c.clone());
            }
        }
        admissible.next().cloned()
    }

    fn add_root_dependencies(&mut self) {
        let request = self.request;
        let mut deps = BTreeMap::new();
        for req in &request.requirements {
            let req = overridden(req, &request.overrides);
            if req.applies_to(self.env, &[]) {
                self.collect(&mut deps, None, &req);
            }
        }
        for (dependency, range) in deps {
            self.store.add(Incompatibility::dependency(
                Package::Root,
                self.root_version.clone(),
                dependency,
                range,
            ));
        }
    }

    fn add_dependencies(&mut self, package: &Package, candidate: &PackageCandidate) {
        if !self
            .dependencies_added
            .insert((package.clone(), candidate.version.clone()))
        {
            return;
        }
        let request = self.request;
        let env = self.env;
        let requirements: Vec<Requirement> = self
            .cache
            .provider()
            .declared_requirements(candidate)
            .iter()
            .map(|req| overridden(req, &request.overrides))
            .collect();

        let mut deps = BTreeMap::new();
        match package {
            Package::Root => return,
            Package::Base(name) => {
                for req in &requirements {
                    if req.applies_to(env, &[]) {
                        self.collect(&mut deps, Some(name), req);
                    }
                }
                self.chosen.insert(
                    (name.clone(), candidate.version.clone()),
                    SelectedPackage {
                        candidate: candidate.clone(),
                        requirements,
                    },
                );
            }
            Package::Extra(name, extra) => {
                deps.insert(
                    Package::Base(name.clone()),
                    VersionSet::singleton(candidate.version.clone()),
                );
                let active = std::slice::from_ref(extra);
                for req in &requirements {
                    if req.applies_to(env, active) && !req.applies_to(env, &[]) {
                        self.collect(&mut deps, None, req);
                    }
                }
            }
        }

        for (dependency, range) in deps {
            self.store.add(Incompatibility::dependency(
                package.clone(),
                candidate.version.clone(),
                dependency,
                range,
            ));
        }
    }

    /// Add `req` to `deps`, intersecting ranges of repeated packages.
    /// `owner` skips a package's dependency on itself.
    fn collect(
        &mut self,
        deps: &mut BTreeMap<Package, VersionSet>,
        owner: Option<&PackageName>,
        req: &Requirement,
    ) {
        let range = req.specifier.to_set();
        let mut targets = Vec::new();
        if owner != Some(&req.name) {
            targets.push(Package::Base(req.name.clone()));
        }
        for extra in &req.extras {
            targets.push(Package::Extra(req.name.clone(), extra.clone()));
        }
        for target in targets {
            let merged = match deps.remove(&target) {
                Some(existing) => existing.intersection(&range),
                None => range.clone(),
            };
            deps.insert(target, merged);
        }
        if req.specifier.mentions_prerelease() {
            self.prerelease_opt_in.insert(req.name.clone());
        }
    }

    fn finish(mut self) -> Resolution {
        let mut resolution = Resolution::default();
        for (package, version) in self.solution.decisions() {
            match package {
                Package::Root => {}
                Package::Base(name) => {
                    if let Some(selected) = self.chosen.remove(&(name.clone(), version.clone())) {
                        resolution.packages.insert(name.clone(), selected);
                    }
                }
                Package::Extra(name, extra) => {
                    resolution
                        .extras
                        .entry(name.clone())
                        .or_default()
                        .insert(extra.clone());
                }
            }
        }
        resolution
    }
}
