use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::config::ConfigFragment;
use crate::error::ConstraintError;
use crate::name::ExtraName;
use crate::requirement::{Requirement, RequirementRoot};
use crate::specifier::VersionSpecifiers;

/// Project manifest file name.
pub const MANIFEST_NAME: &str = "pyproject.toml";

/// The parts of `pyproject.toml` tern reads. Unknown tables are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub project: Option<ProjectMetadata>,

    #[serde(default, rename = "dependency-groups")]
    pub dependency_groups: BTreeMap<String, Vec<GroupEntry>>,

    #[serde(default)]
    pub tool: ToolTables,
}

/// The `[project]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMetadata {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default, rename = "requires-python")]
    pub requires_python: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default, rename = "optional-dependencies")]
    pub optional_dependencies: BTreeMap<String, Vec<String>>,
}

/// One entry of a dependency group: a requirement, or another group pulled
/// in by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroupEntry {
    Requirement(String),
    Include {
        #[serde(rename = "include-group")]
        include_group: String,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolTables {
    #[serde(default)]
    pub tern: Option<ConfigFragment>,
}

impl Manifest {
    /// Load and parse a `pyproject.toml` file from the given path.
    pub fn from_path(path: &Path) -> miette::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            tern_util::errors::TernError::Manifest {
                message: format!("Failed to read {}: {e}", path.display()),
            }
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> miette::Result<Self> {
        toml::from_str(content).map_err(|e| {
            tern_util::errors::TernError::Manifest {
                message: format!("Failed to parse pyproject.toml: {e}"),
            }
            .into()
        })
    }

    /// Walk up from `start` to the nearest directory holding a manifest.
    pub fn find_root(start: &Path) -> Option<PathBuf> {
        tern_util::fs::find_ancestor_with(start, MANIFEST_NAME)
    }

    pub fn requires_python(&self) -> Result<VersionSpecifiers, ConstraintError> {
        match self.project.as_ref().and_then(|p| p.requires_python.as_deref()) {
            Some(raw) => VersionSpecifiers::parse(raw),
            None => Ok(VersionSpecifiers::any()),
        }
    }

    /// Every declared requirement, tagged with the root it belongs to.
    pub fn declarations(&self) -> Result<Vec<Requirement>, ConstraintError> {
        let mut out = Vec::new();
        if let Some(project) = &self.project {
            for raw in &project.dependencies {
                out.push(Requirement::parse(raw)?);
            }
            for (extra, reqs) in &project.optional_dependencies {
                let root = RequirementRoot::OptionalExtra(ExtraName::new(extra)?);
                for raw in reqs {
                    out.push(Requirement::parse(raw)?.with_origin(root.clone()));
                }
            }
        }
        for group in self.dependency_groups.keys() {
            let root = RequirementRoot::DevGroup(ExtraName::new(group)?);
            for req in self.expand_group(group, &mut BTreeSet::new())? {
                out.push(req.with_origin(root.clone()));
            }
        }
        Ok(out)
    }

    fn expand_group(
        &self,
        group: &str,
        visiting: &mut BTreeSet<ExtraName>,
    ) -> Result<Vec<Requirement>, ConstraintError> {
        let key = ExtraName::new(group)?;
        let entries = self
            .dependency_groups
            .iter()
            .find(|(name, _)| ExtraName::new(name).ok().as_ref() == Some(&key))
            .map(|(_, entries)| entries)
            .ok_or_else(|| ConstraintError::Requirement {
                input: group.to_string(),
                reason: "included dependency group does not exist".to_string(),
            })?;
        if !visiting.insert(key.clone()) {
            return Err(ConstraintError::Requirement {
                input: group.to_string(),
                reason: "dependency group includes itself".to_string(),
            });
        }
        let mut out = Vec::new();
        for entry in entries {
            match entry {
                GroupEntry::Requirement(raw) => out.push(Requirement::parse(raw)?),
                GroupEntry::Include { include_group } => {
                    out.extend(self.expand_group(include_group, visiting)?)
                }
            }
        }
        visiting.remove(&key);
        Ok(out)
    }
}
