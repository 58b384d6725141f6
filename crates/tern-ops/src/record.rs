//! File-backed environment: installed packages are recorded as JSON in the
//! environment root. Useful for offline dry runs and tests of the whole
//! lock/sync loop.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use tern_core::environment::TargetEnvironment;
use tern_core::name::PackageName;

use crate::environment::{EnvironmentInspector, EnvironmentState, InstalledPackage};
use crate::error::SyncError;
use crate::installer::{InstallError, Installer};
use crate::plan::{InstallPlan, PlanStep};

pub const RECORD_FILE: &str = "tern-installed.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct InstallRecord {
    #[serde(default)]
    packages: Vec<InstalledPackage>,
}

fn read_record(root: &Path) -> Result<BTreeMap<PackageName, InstalledPackage>, SyncError> {
    let path = root.join(RECORD_FILE);
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(e.into()),
    };
    let record: InstallRecord =
        serde_json::from_str(&text).map_err(|e| SyncError::Environment {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
    Ok(record
        .packages
        .into_iter()
        .map(|p| (p.name.clone(), p))
        .collect())
}

fn write_record(
    root: &Path,
    packages: &BTreeMap<PackageName, InstalledPackage>,
) -> Result<(), String> {
    let record = InstallRecord {
        packages: packages.values().cloned().collect(),
    };
    let json = serde_json::to_string_pretty(&record).map_err(|e| e.to_string())?;
    tern_util::fs::atomic_write(&root.join(RECORD_FILE), json.as_bytes()).map_err(|e| e.to_string())
}

/// Reads the record of an environment whose interpreter is `target`.
#[derive(Debug, Clone)]
pub struct RecordInspector {
    target: TargetEnvironment,
}

impl RecordInspector {
    pub fn new(target: TargetEnvironment) -> Self {
        Self { target }
    }
}

impl EnvironmentInspector for RecordInspector {
    fn snapshot(&self, root: &Path) -> Result<EnvironmentState, SyncError> {
        let mut state = EnvironmentState::empty(root, self.target.clone());
        state.packages = read_record(root)?;
        tracing::debug!(
            root = %root.display(),
            packages = state.packages.len(),
            "read environment record"
        );
        Ok(state)
    }
}

/// Applies plans by rewriting the record.
#[derive(Debug, Clone)]
pub struct RecordInstaller {
    root: PathBuf,
}

impl RecordInstaller {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

impl Installer for RecordInstaller {
    fn apply(&self, plan: &InstallPlan) -> Result<(), InstallError> {
        let steps = plan.steps();
        let mut packages = match read_record(&self.root) {
            Ok(packages) => packages,
            Err(e) => {
                let reason = e.to_string();
                return InstallError::collect(
                    steps.into_iter().map(|s| (s, Err(reason.clone()))).collect(),
                );
            }
        };

        let mut results = Vec::with_capacity(steps.len());
        for step in steps {
            let result = match &step {
                PlanStep::Remove(p) => match packages.remove(&p.name) {
                    Some(_) => Ok(()),
                    None => Err(format!("{} is not installed", p.name)),
                },
                PlanStep::Reinstall(p) | PlanStep::Install(p) => {
                    packages.insert(p.name.clone(), p.into());
                    Ok(())
                }
            };
            results.push((step, result));
        }

        if let Err(reason) = write_record(&self.root, &packages) {
            return InstallError::collect(
                results
                    .into_iter()
                    .map(|(step, _)| (step, Err(reason.clone())))
                    .collect(),
            );
        }
        InstallError::collect(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_core::environment::Platform;
    use tern_core::requirement::PackageSource;
    use tern_core::version::Version;

    use crate::plan::PlannedPackage;

    fn target() -> TargetEnvironment {
        TargetEnvironment::new(Platform::Linux, "x86_64", &Version::new([3, 12]))
    }

    fn planned(name: &str) -> PlannedPackage {
        PlannedPackage {
            name: PackageName::new(name).unwrap(),
            version: Version::new([1, 0]),
            source: PackageSource::registry("https://pypi.org/simple"),
        }
    }

    #[test]
    fn missing_record_is_an_empty_environment() {
        let dir = tempfile::tempdir().unwrap();
        let state = RecordInspector::new(target()).snapshot(dir.path()).unwrap();
        assert!(state.packages.is_empty());
    }

    #[test]
    fn applied_plan_is_visible_to_the_inspector() {
        let dir = tempfile::tempdir().unwrap();
        let plan = InstallPlan {
            to_install: vec![planned("a"), planned("b")],
            ..InstallPlan::default()
        };
        RecordInstaller::new(dir.path()).apply(&plan).unwrap();
        let state = RecordInspector::new(target()).snapshot(dir.path()).unwrap();
        assert_eq!(state.packages.len(), 2);
    }

    #[test]
    fn removing_an_absent_package_fails_that_step_only() {
        let dir = tempfile::tempdir().unwrap();
        let plan = InstallPlan {
            to_install: vec![planned("a")],
            to_remove: vec![(&planned("ghost")).into()],
            ..InstallPlan::default()
        };
        let err = RecordInstaller::new(dir.path()).apply(&plan).unwrap_err();
        assert_eq!(err.applied.len(), 1);
        assert_eq!(err.failed.len(), 1);
        assert_eq!(err.failed[0].0.name().as_str(), "ghost");
        let state = RecordInspector::new(target()).snapshot(dir.path()).unwrap();
        assert_eq!(state.packages.len(), 1);
    }

    #[test]
    fn corrupt_record_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(RECORD_FILE), "not json").unwrap();
        let err = RecordInspector::new(target()).snapshot(dir.path()).unwrap_err();
        assert!(matches!(err, SyncError::Environment { .. }));
    }
}
