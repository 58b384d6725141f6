use std::path::Path;
use std::time::Duration;

use tern_core::config::{LockWait, ResolvedPolicy, SyncMode, Upgrade};
use tern_core::environment::TargetEnvironment;
use tern_core::lockfile::{Lockfile, LockfileError, LOCKFILE_NAME};
use tern_core::name::PackageName;
use tern_core::requirement::PackageSource;
use tern_core::version::Version;
use tern_ops::ops_lock;
use tern_ops::ops_sync::ENV_LOCK_FILE;
use tern_ops::plan::{InstallPlan, PlannedPackage};
use tern_ops::record::{RecordInspector, RecordInstaller};
use tern_ops::{
    EnvironmentInspector, InstallError, Installer, SyncError, SyncOptions, Synchronizer,
};
use tern_resolver::{ResolveError, StaticProvider};
use tern_util::cancel::Cancellation;
use tern_util::errors::TernError;
use tern_util::lock::{sidecar_path, FileLock};

fn name(s: &str) -> PackageName {
    PackageName::new(s).unwrap()
}

fn python() -> Version {
    Version::new([3, 12])
}

fn policy() -> ResolvedPolicy {
    ResolvedPolicy {
        universal: false,
        python_version: python(),
        ..ResolvedPolicy::default()
    }
}

fn inspector() -> RecordInspector {
    RecordInspector::new(TargetEnvironment::host(&python()))
}

fn write_manifest(root: &Path, dependencies: &[&str]) {
    let deps: Vec<String> = dependencies.iter().map(|d| format!("{d:?}")).collect();
    let text = format!(
        "[project]\nname = \"demo\"\nversion = \"0.1.0\"\ndependencies = [{}]\n\n[dependency-groups]\ndev = [\"pytest\"]\n",
        deps.join(", ")
    );
    std::fs::write(root.join("pyproject.toml"), text).unwrap();
}

fn provider() -> StaticProvider {
    let mut provider = StaticProvider::new();
    provider.add_simple("app", "1.0", &["lib>=1"]).unwrap();
    provider.add_simple("lib", "1.0", &[]).unwrap();
    provider.add_simple("extra", "0.5", &[]).unwrap();
    provider.add_simple("pytest", "8.0", &[]).unwrap();
    provider
}

fn install_names(plan: &InstallPlan) -> Vec<String> {
    plan.to_install.iter().map(|p| p.name.to_string()).collect()
}

struct Dirs {
    project: tempfile::TempDir,
    env: tempfile::TempDir,
}

fn dirs(dependencies: &[&str]) -> Dirs {
    let dirs = Dirs {
        project: tempfile::tempdir().unwrap(),
        env: tempfile::tempdir().unwrap(),
    };
    write_manifest(dirs.project.path(), dependencies);
    dirs
}

async fn sync_with(
    provider: &StaticProvider,
    policy: &ResolvedPolicy,
    dirs: &Dirs,
    options: &SyncOptions,
) -> Result<tern_ops::SyncReport, SyncError> {
    let inspector = inspector();
    let installer = RecordInstaller::new(dirs.env.path());
    Synchronizer::new(provider, &inspector, &installer, policy)
        .sync(dirs.project.path(), dirs.env.path(), options)
        .await
}

#[tokio::test]
async fn first_sync_locks_and_installs_dependencies_first() {
    let dirs = dirs(&["app"]);
    let report = sync_with(&provider(), &policy(), &dirs, &SyncOptions::default())
        .await
        .unwrap();
    assert!(report.relocked);
    assert!(report.applied);
    assert!(dirs.project.path().join(LOCKFILE_NAME).is_file());
    let installed = install_names(&report.plan);
    let lib = installed.iter().position(|n| n == "lib").unwrap();
    let app = installed.iter().position(|n| n == "app").unwrap();
    assert!(lib < app);
    assert!(installed.contains(&"pytest".to_string()));
}

#[tokio::test]
async fn second_sync_is_a_no_op() {
    let dirs = dirs(&["app"]);
    let provider = provider();
    sync_with(&provider, &policy(), &dirs, &SyncOptions::default())
        .await
        .unwrap();
    let again = sync_with(&provider, &policy(), &dirs, &SyncOptions::default())
        .await
        .unwrap();
    assert!(!again.relocked);
    assert!(again.plan.is_empty());
    assert!(!again.applied);
}

#[tokio::test]
async fn stale_lockfile_is_re_resolved_by_default() {
    let dirs = dirs(&["app"]);
    let provider = provider();
    sync_with(&provider, &policy(), &dirs, &SyncOptions::default())
        .await
        .unwrap();

    write_manifest(dirs.project.path(), &["app", "extra"]);
    let report = sync_with(&provider, &policy(), &dirs, &SyncOptions::default())
        .await
        .unwrap();
    assert!(report.relocked);
    assert_eq!(install_names(&report.plan), ["extra"]);
}

#[tokio::test]
async fn frozen_refuses_a_stale_lockfile() {
    let dirs = dirs(&["app"]);
    let provider = provider();
    sync_with(&provider, &policy(), &dirs, &SyncOptions::default())
        .await
        .unwrap();
    let before = std::fs::read_to_string(dirs.project.path().join(LOCKFILE_NAME)).unwrap();

    write_manifest(dirs.project.path(), &["app", "extra"]);
    let frozen = SyncOptions {
        mode: SyncMode::Frozen,
        ..SyncOptions::default()
    };
    let err = sync_with(&provider, &policy(), &dirs, &frozen)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Lockfile(LockfileError::Stale { .. })));
    let after = std::fs::read_to_string(dirs.project.path().join(LOCKFILE_NAME)).unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn frozen_without_a_lockfile_fails() {
    let dirs = dirs(&["app"]);
    let frozen = SyncOptions {
        mode: SyncMode::Frozen,
        ..SyncOptions::default()
    };
    let err = sync_with(&provider(), &policy(), &dirs, &frozen)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Lockfile(LockfileError::Missing { .. })));
}

#[tokio::test]
async fn frozen_installs_a_fresh_lockfile_without_resolving() {
    let dirs = dirs(&["app"]);
    ops_lock::lock(dirs.project.path(), &provider(), &policy(), &Cancellation::new())
        .await
        .unwrap();

    let empty = StaticProvider::new();
    let frozen = SyncOptions {
        mode: SyncMode::Frozen,
        ..SyncOptions::default()
    };
    let report = sync_with(&empty, &policy(), &dirs, &frozen).await.unwrap();
    assert!(!report.relocked);
    assert_eq!(empty.fetch_count(), 0);
    assert_eq!(report.plan.to_install.len(), 3);
}

#[tokio::test]
async fn extraneous_packages_are_removed_unless_protected_or_inexact() {
    let dirs = dirs(&["app"]);
    let seed = InstallPlan {
        to_install: vec![
            PlannedPackage {
                name: name("stray"),
                version: Version::new([2, 0]),
                source: PackageSource::registry("https://pypi.org/simple"),
            },
            PlannedPackage {
                name: name("python"),
                version: python(),
                source: PackageSource::registry("https://pypi.org/simple"),
            },
        ],
        ..InstallPlan::default()
    };
    RecordInstaller::new(dirs.env.path()).apply(&seed).unwrap();

    let inexact = SyncOptions {
        inexact: true,
        dry_run: true,
        ..SyncOptions::default()
    };
    let report = sync_with(&provider(), &policy(), &dirs, &inexact).await.unwrap();
    assert!(report.plan.to_remove.is_empty());
    assert!(!report.applied);

    let report = sync_with(&provider(), &policy(), &dirs, &SyncOptions::default())
        .await
        .unwrap();
    let removed: Vec<&str> = report.plan.to_remove.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(removed, ["stray"]);
    let after = inspector().snapshot(dirs.env.path()).unwrap();
    assert!(after.get(&name("python")).is_some());
    assert!(after.get(&name("stray")).is_none());
}

#[tokio::test]
async fn dev_groups_can_be_skipped() {
    let dirs = dirs(&["app"]);
    let options = SyncOptions {
        no_dev: true,
        ..SyncOptions::default()
    };
    let report = sync_with(&provider(), &policy(), &dirs, &options).await.unwrap();
    assert!(!install_names(&report.plan).contains(&"pytest".to_string()));
}

/// Fails every step touching one package.
struct FailingInstaller {
    broken: PackageName,
}

impl Installer for FailingInstaller {
    fn apply(&self, plan: &InstallPlan) -> Result<(), InstallError> {
        InstallError::collect(
            plan.steps()
                .into_iter()
                .map(|step| {
                    let result = if step.name() == &self.broken {
                        Err("wheel is corrupt".to_string())
                    } else {
                        Ok(())
                    };
                    (step, result)
                })
                .collect(),
        )
    }
}

#[tokio::test]
async fn partial_install_failure_reports_both_halves() {
    let dirs = dirs(&["app"]);
    let provider = provider();
    let policy = policy();
    let inspector = inspector();
    let installer = FailingInstaller {
        broken: name("lib"),
    };
    let err = Synchronizer::new(&provider, &inspector, &installer, &policy)
        .sync(dirs.project.path(), dirs.env.path(), &SyncOptions::default())
        .await
        .unwrap_err();
    let SyncError::Install(err) = err else {
        panic!("expected an install error, got {err:?}");
    };
    let applied: Vec<String> = err.applied.iter().map(|s| s.name().to_string()).collect();
    assert!(applied.contains(&"app".to_string()));
    assert_eq!(err.failed.len(), 1);
    assert_eq!(err.failed[0].0.name(), &name("lib"));

    let env_lock = dirs.env.path().join(ENV_LOCK_FILE);
    assert!(FileLock::try_acquire(&env_lock).unwrap().is_some());
}

#[tokio::test]
async fn contended_lockfile_fails_fast() {
    let dirs = dirs(&["app"]);
    let policy = ResolvedPolicy {
        lock_wait: LockWait::FailFast,
        ..policy()
    };
    let lock_path = sidecar_path(&dirs.project.path().join(LOCKFILE_NAME));
    let _held = FileLock::acquire(&lock_path).unwrap();

    let err = ops_lock::lock(dirs.project.path(), &provider(), &policy, &Cancellation::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::Resolve(ResolveError::ResolutionInProgress { .. })
    ));
}

#[tokio::test]
async fn relocking_keeps_versions_unless_upgrading() {
    let dirs = dirs(&["app"]);
    let mut provider = provider();
    ops_lock::lock(dirs.project.path(), &provider, &policy(), &Cancellation::new())
        .await
        .unwrap();

    provider.add_simple("lib", "1.5", &[]).unwrap();
    let kept = ops_lock::lock(dirs.project.path(), &provider, &policy(), &Cancellation::new())
        .await
        .unwrap();
    let lib = |lockfile: &Lockfile| {
        lockfile
            .solution
            .get(&name("lib"))
            .map(|p| p.version.to_string())
            .collect::<Vec<_>>()
    };
    assert_eq!(lib(&kept), ["1.0"]);

    let upgrade = ResolvedPolicy {
        upgrade: Upgrade::All,
        ..policy()
    };
    let upgraded = ops_lock::lock(dirs.project.path(), &provider, &upgrade, &Cancellation::new())
        .await
        .unwrap();
    assert_eq!(lib(&upgraded), ["1.5"]);
}

#[tokio::test]
async fn cancelled_resolution_writes_nothing() {
    let dirs = dirs(&["app"]);
    let cancel = Cancellation::new();
    cancel.cancel();
    let err = ops_lock::lock(dirs.project.path(), &provider(), &policy(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Resolve(ResolveError::Cancelled)));
    assert!(!dirs.project.path().join(LOCKFILE_NAME).exists());
}

#[tokio::test]
async fn held_environment_fails_fast() {
    let dirs = dirs(&["app"]);
    let policy = ResolvedPolicy {
        lock_wait: LockWait::FailFast,
        ..policy()
    };
    let _held = FileLock::acquire(&dirs.env.path().join(ENV_LOCK_FILE)).unwrap();

    let err = sync_with(&provider(), &policy, &dirs, &SyncOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Tern(TernError::Locked { .. })));
    assert!(inspector().snapshot(dirs.env.path()).unwrap().packages.is_empty());
}

#[tokio::test]
async fn second_sync_waits_for_the_environment() {
    let dirs = dirs(&["app"]);
    let provider = provider();
    let policy = policy();
    let held = FileLock::acquire(&dirs.env.path().join(ENV_LOCK_FILE)).unwrap();

    let options = SyncOptions::default();
    let sync = sync_with(&provider, &policy, &dirs, &options);
    tokio::pin!(sync);
    let waited = tokio::time::timeout(Duration::from_millis(200), &mut sync).await;
    assert!(waited.is_err());
    assert!(inspector().snapshot(dirs.env.path()).unwrap().packages.is_empty());

    drop(held);
    let report = sync.await.unwrap();
    assert!(report.applied);
    assert_eq!(report.plan.to_install.len(), 3);
}

fn write_bounded_manifest(root: &Path, requires_python: &str) {
    let text = format!(
        "[project]\nname = \"demo\"\nversion = \"0.1.0\"\nrequires-python = \"{requires_python}\"\ndependencies = [\"app\"]\n"
    );
    std::fs::write(root.join("pyproject.toml"), text).unwrap();
}

#[tokio::test]
async fn requires_python_refuses_other_interpreters() {
    let dirs = dirs(&["app"]);
    write_bounded_manifest(dirs.project.path(), ">=3.13");
    let err = sync_with(&provider(), &policy(), &dirs, &SyncOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::Resolve(ResolveError::UnsupportedPython { .. })
    ));
    assert!(!dirs.project.path().join(LOCKFILE_NAME).exists());

    write_bounded_manifest(dirs.project.path(), ">=3.12");
    ops_lock::lock(dirs.project.path(), &provider(), &policy(), &Cancellation::new())
        .await
        .unwrap();
    let old = RecordInspector::new(TargetEnvironment::host(&Version::new([3, 11])));
    let installer = RecordInstaller::new(dirs.env.path());
    let frozen = SyncOptions {
        mode: SyncMode::Frozen,
        ..SyncOptions::default()
    };
    let err = Synchronizer::new(&provider(), &old, &installer, &policy())
        .sync(dirs.project.path(), dirs.env.path(), &frozen)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::Resolve(ResolveError::UnsupportedPython { .. })
    ));
}
