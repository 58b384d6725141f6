//! What is currently installed in a target environment.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use tern_core::environment::TargetEnvironment;
use tern_core::name::PackageName;
use tern_core::requirement::PackageSource;
use tern_core::version::Version;

use crate::error::SyncError;

/// One installed distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPackage {
    pub name: PackageName,
    pub version: Version,
    pub source: PackageSource,
}

impl InstalledPackage {
    pub fn new(name: PackageName, version: Version, source: PackageSource) -> Self {
        Self {
            name,
            version,
            source,
        }
    }
}

impl std::fmt::Display for InstalledPackage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}=={}", self.name, self.version)
    }
}

/// Snapshot of an environment: the interpreter it runs and the packages in
/// it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentState {
    pub root: PathBuf,
    /// Marker values of the environment's interpreter.
    pub target: TargetEnvironment,
    pub packages: BTreeMap<PackageName, InstalledPackage>,
}

impl EnvironmentState {
    pub fn empty(root: &Path, target: TargetEnvironment) -> Self {
        Self {
            root: root.to_path_buf(),
            target,
            packages: BTreeMap::new(),
        }
    }

    pub fn get(&self, name: &PackageName) -> Option<&InstalledPackage> {
        self.packages.get(name)
    }

    pub fn insert(&mut self, package: InstalledPackage) {
        self.packages.insert(package.name.clone(), package);
    }
}

/// Reads environment state. Implemented outside the engine for real
/// interpreters; [`crate::record::RecordInspector`] is the file-backed one.
pub trait EnvironmentInspector {
    fn snapshot(&self, root: &Path) -> Result<EnvironmentState, SyncError>;
}
