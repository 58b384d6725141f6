//! Operation: resolve the project and rewrite `tern.lock`.

use std::path::{Path, PathBuf};

use tern_core::config::{LockWait, ResolvedPolicy};
use tern_core::lockfile::{requirement_hash, Lockfile, LOCKFILE_NAME};
use tern_core::manifest::{Manifest, MANIFEST_NAME};
use tern_core::requirement::Requirement;
use tern_core::specifier::VersionSpecifiers;
use tern_resolver::{resolve, PackageMetadataProvider, ResolveError, ResolveRequest, ResolveTarget};
use tern_util::cancel::Cancellation;
use tern_util::errors::TernError;
use tern_util::lock::{sidecar_path, FileLock};
use tern_util::progress::{spinner, status};

use crate::error::SyncError;

/// The resolution inputs of a project.
#[derive(Debug, Clone)]
pub struct Project {
    pub root: PathBuf,
    pub declarations: Vec<Requirement>,
    pub requires_python: VersionSpecifiers,
    pub requirement_hash: String,
}

impl Project {
    /// Read `pyproject.toml` under `root` and hash its declarations and
    /// `requires-python` together with the policy's constraints and
    /// overrides.
    pub fn load(root: &Path, policy: &ResolvedPolicy) -> Result<Self, SyncError> {
        let manifest = Manifest::from_path(&root.join(MANIFEST_NAME)).map_err(|report| {
            match report.downcast::<TernError>() {
                Ok(e) => e,
                Err(other) => TernError::Manifest {
                    message: other.to_string(),
                },
            }
        })?;
        let declarations = manifest.declarations()?;
        let requires_python = manifest.requires_python()?;
        let requirement_hash = requirement_hash(
            &declarations,
            &policy.constraints,
            &policy.overrides,
            &requires_python,
        );
        Ok(Self {
            root: root.to_path_buf(),
            declarations,
            requires_python,
            requirement_hash,
        })
    }

    pub fn lockfile_path(&self) -> PathBuf {
        self.root.join(LOCKFILE_NAME)
    }
}

/// Take the exclusive lock guarding `path`, off the async runtime.
async fn acquire_lock(lock_path: PathBuf) -> Result<FileLock, SyncError> {
    tokio::task::spawn_blocking(move || FileLock::acquire(&lock_path))
        .await
        .map_err(|e| TernError::Generic {
            message: format!("lock task failed: {e}"),
        })?
        .map_err(SyncError::from)
}

/// Take the lock on `lock_path`, blocking or not as `wait` says. `None`
/// when another holder has it and `wait` is fail-fast.
pub(crate) async fn take_lock(
    lock_path: PathBuf,
    wait: LockWait,
) -> Result<Option<FileLock>, SyncError> {
    match wait {
        LockWait::Wait => acquire_lock(lock_path).await.map(Some),
        LockWait::FailFast => Ok(FileLock::try_acquire(&lock_path)?),
    }
}

async fn lock_lockfile(path: &Path, wait: LockWait) -> Result<FileLock, SyncError> {
    take_lock(sidecar_path(path), wait).await?.ok_or_else(|| {
        ResolveError::ResolutionInProgress {
            path: path.display().to_string(),
        }
        .into()
    })
}

/// Resolve `project` and write the lockfile, preferring the versions locked
/// in `previous`.
pub(crate) async fn relock<P: PackageMetadataProvider>(
    project: &Project,
    provider: &P,
    policy: &ResolvedPolicy,
    previous: Option<&Lockfile>,
    cancel: &Cancellation,
) -> Result<Lockfile, SyncError> {
    let path = project.lockfile_path();
    let _guard = lock_lockfile(&path, policy.lock_wait).await?;

    let mut request = ResolveRequest::from_policy(project.declarations.clone(), policy)
        .with_requires_python(project.requires_python.clone());
    if let Some(previous) = previous {
        request = request.with_preferences(&previous.solution, &policy.upgrade);
    }
    let target = ResolveTarget::from_policy(policy);

    let sp = spinner("Resolving dependencies...");
    let result = resolve(provider, &request, &target, cancel).await;
    sp.finish_and_clear();
    let solution = result?;

    let lockfile = Lockfile::new(project.requirement_hash.clone(), solution);
    lockfile.write(&path)?;
    status(
        "Locked",
        &format!("{} packages", lockfile.solution.packages.len()),
    );
    Ok(lockfile)
}

/// Re-resolve the project at `project_root` and rewrite `tern.lock`,
/// keeping previously locked versions that still fit.
pub async fn lock<P: PackageMetadataProvider>(
    project_root: &Path,
    provider: &P,
    policy: &ResolvedPolicy,
    cancel: &Cancellation,
) -> Result<Lockfile, SyncError> {
    let project = Project::load(project_root, policy)?;
    let previous = match Lockfile::load(&project.lockfile_path()) {
        Ok(previous) => Some(previous),
        Err(e) => {
            tracing::debug!(error = %e, "no usable previous lockfile");
            None
        }
    };
    relock(&project, provider, policy, previous.as_ref(), cancel).await
}
