//! Operation: make an environment match the project's lockfile.

use std::collections::BTreeSet;
use std::path::Path;

use tern_core::config::{ResolvedPolicy, SyncMode};
use tern_core::lockfile::Lockfile;
use tern_core::name::ExtraName;
use tern_core::requirement::{Requirement, RootSelection};
use tern_resolver::{PackageMetadataProvider, ResolveError};
use tern_util::cancel::Cancellation;
use tern_util::errors::TernError;
use tern_util::progress::{status, status_warn};

use crate::environment::EnvironmentInspector;
use crate::error::SyncError;
use crate::installer::Installer;
use crate::ops_lock::{relock, take_lock, Project};
use crate::plan::{self, InstallPlan, PlanOptions};

/// Lock file guarding an environment root while it is planned and changed.
pub const ENV_LOCK_FILE: &str = ".tern-env.lock";

/// Options for `tern sync`.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub mode: SyncMode,
    /// Optional extras of the project to install.
    pub extras: BTreeSet<ExtraName>,
    /// Dev groups to install in addition to the defaults.
    pub groups: BTreeSet<ExtraName>,
    /// Skip dev groups not named in `groups`.
    pub no_dev: bool,
    /// Compute the plan without applying it.
    pub dry_run: bool,
    /// Reinstall every locked package already present.
    pub reinstall: bool,
    /// Keep installed packages the lockfile does not mention.
    pub inexact: bool,
}

impl SyncOptions {
    pub fn from_policy(policy: &ResolvedPolicy) -> Self {
        Self {
            mode: policy.mode,
            ..Self::default()
        }
    }

    fn selection(&self, declarations: &[Requirement]) -> RootSelection {
        let mut selection = RootSelection {
            extras: self.extras.clone(),
            groups: self.groups.clone(),
        };
        if !self.no_dev {
            selection.groups.extend(RootSelection::all(declarations).groups);
        }
        selection
    }
}

/// What a sync did.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub lockfile: Lockfile,
    /// The lockfile was resolved again and rewritten.
    pub relocked: bool,
    pub plan: InstallPlan,
    /// The plan was handed to the installer.
    pub applied: bool,
}

/// Wires a metadata provider, an environment inspector and an installer
/// together under one policy.
pub struct Synchronizer<'a, P, I, N> {
    provider: &'a P,
    inspector: &'a I,
    installer: &'a N,
    policy: &'a ResolvedPolicy,
    cancel: Cancellation,
}

impl<'a, P, I, N> Synchronizer<'a, P, I, N>
where
    P: PackageMetadataProvider,
    I: EnvironmentInspector,
    N: Installer,
{
    pub fn new(
        provider: &'a P,
        inspector: &'a I,
        installer: &'a N,
        policy: &'a ResolvedPolicy,
    ) -> Self {
        Self {
            provider,
            inspector,
            installer,
            policy,
            cancel: Cancellation::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    /// The lockfile to install from. Frozen mode never resolves; locked mode
    /// re-resolves when the lockfile is missing, unreadable or stale.
    async fn current_lockfile(
        &self,
        project: &Project,
        mode: SyncMode,
    ) -> Result<(Lockfile, bool), SyncError> {
        let path = project.lockfile_path();
        match mode {
            SyncMode::Frozen => {
                let lockfile = Lockfile::load(&path)?;
                lockfile.check_fresh(&project.requirement_hash)?;
                Ok((lockfile, false))
            }
            SyncMode::Locked => match Lockfile::load(&path) {
                Ok(lockfile) if lockfile.check_fresh(&project.requirement_hash).is_ok() => {
                    Ok((lockfile, false))
                }
                Ok(stale) => {
                    tracing::info!(path = %path.display(), "lockfile is stale, re-resolving");
                    let lockfile =
                        relock(project, self.provider, self.policy, Some(&stale), &self.cancel)
                            .await?;
                    Ok((lockfile, true))
                }
                Err(e) => {
                    tracing::info!(error = %e, "lockfile unusable, resolving");
                    let lockfile =
                        relock(project, self.provider, self.policy, None, &self.cancel).await?;
                    Ok((lockfile, true))
                }
            },
        }
    }

    /// Bring the environment at `env_root` in line with the lockfile of the
    /// project at `project_root`.
    pub async fn sync(
        &self,
        project_root: &Path,
        env_root: &Path,
        options: &SyncOptions,
    ) -> Result<SyncReport, SyncError> {
        let project = Project::load(project_root, self.policy)?;
        let (lockfile, relocked) = self.current_lockfile(&project, options.mode).await?;

        let env_lock = env_root.join(ENV_LOCK_FILE);
        let _guard = take_lock(env_lock.clone(), self.policy.lock_wait)
            .await?
            .ok_or_else(|| TernError::Locked {
                path: env_lock.display().to_string(),
            })?;
        let state = self.inspector.snapshot(env_root)?;
        if !project
            .requires_python
            .contains(&state.target.python_full_version)
        {
            return Err(ResolveError::UnsupportedPython {
                requires: project.requires_python.to_string(),
                targets: state.target.to_string(),
            }
            .into());
        }
        let selection = options.selection(&project.declarations);
        let plan_options = PlanOptions {
            protected: self.policy.protected.clone(),
            inexact: options.inexact,
            reinstall: options.reinstall,
        };
        let plan = plan::diff(&lockfile.solution, &state, &selection, &plan_options)?;

        let mut report = SyncReport {
            lockfile,
            relocked,
            plan,
            applied: false,
        };
        if report.plan.is_empty() {
            status(
                "Audited",
                &format!("{} packages", report.plan.unchanged),
            );
            return Ok(report);
        }
        if options.dry_run {
            for step in report.plan.steps() {
                status_warn("Would", &step.to_string());
            }
            return Ok(report);
        }

        self.installer.apply(&report.plan)?;
        report.applied = true;
        status(
            "Synced",
            &format!(
                "{} installed, {} reinstalled, {} removed",
                report.plan.to_install.len(),
                report.plan.to_reinstall.len(),
                report.plan.to_remove.len()
            ),
        );
        Ok(report)
    }
}
