use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

use crate::marker::MarkerTree;
use crate::requirement::{Requirement, RequirementRoot};
use crate::solution::{DependencyRef, ResolvedPackage, Solution};
use crate::specifier::VersionSpecifiers;

/// Lockfile name inside a project root.
pub const LOCKFILE_NAME: &str = "tern.lock";

/// Schema version written by this release. Older files are readable; newer
/// ones are rejected.
pub const FORMAT_VERSION: u32 = 1;

const HEADER: &str = "# This file is generated by tern. Do not edit it by hand.\n";

/// A persisted lockfile that could not be trusted.
#[derive(Debug, Error, Diagnostic)]
pub enum LockfileError {
    #[error("no lockfile at {path}")]
    #[diagnostic(help("Resolve the project without --frozen to create one"))]
    Missing { path: String },

    #[error("lockfile is corrupt: {message}")]
    #[diagnostic(help("Delete the lockfile and resolve again"))]
    Parse { message: String },

    #[error("lockfile format version {found} is not supported (this build reads up to {supported})")]
    #[diagnostic(help("Upgrade tern, or re-lock with this version"))]
    UnsupportedVersion { found: i64, supported: u32 },

    #[error("lockfile is stale: project requirements changed since it was written")]
    #[diagnostic(help("Re-lock the project, or drop --frozen to re-resolve automatically"))]
    Stale { expected: String, found: String },

    #[error("failed to serialize lockfile: {message}")]
    Encode { message: String },

    #[error("lockfile I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A [`Solution`] plus the metadata needed to decide whether it may be
/// trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lockfile {
    pub format_version: u32,
    pub requirement_hash: String,
    pub solution: Solution,
}

/// On-disk layout. Field order here is the order written to disk.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct LockfileDocument {
    format_version: u32,
    requirement_hash: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    regions: Vec<MarkerTree>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    roots: BTreeMap<RequirementRoot, Vec<DependencyRef>>,
    #[serde(default, rename = "package", skip_serializing_if = "Vec::is_empty")]
    packages: Vec<ResolvedPackage>,
}

impl Lockfile {
    pub fn new(requirement_hash: String, solution: Solution) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            requirement_hash,
            solution,
        }
    }

    /// Render as TOML in canonical order. Identical solutions always render
    /// to identical bytes.
    pub fn serialize(&self) -> Result<String, LockfileError> {
        let mut solution = self.solution.clone();
        solution.canonicalize();
        let doc = LockfileDocument {
            format_version: self.format_version,
            requirement_hash: self.requirement_hash.clone(),
            regions: solution.regions,
            roots: solution.roots,
            packages: solution.packages,
        };
        let body = toml::to_string(&doc).map_err(|e| LockfileError::Encode {
            message: e.to_string(),
        })?;
        Ok(format!("{HEADER}{body}"))
    }

    /// Parse lockfile text. Every version, marker and reference is
    /// validated; nothing is partially trusted.
    pub fn deserialize(text: &str) -> Result<Self, LockfileError> {
        let table: toml::Table = toml::from_str(text).map_err(|e| LockfileError::Parse {
            message: e.to_string(),
        })?;
        let found = table
            .get("format-version")
            .and_then(toml::Value::as_integer)
            .ok_or_else(|| LockfileError::Parse {
                message: "missing integer `format-version`".to_string(),
            })?;
        if found < 1 || found > i64::from(FORMAT_VERSION) {
            return Err(LockfileError::UnsupportedVersion {
                found,
                supported: FORMAT_VERSION,
            });
        }
        let doc: LockfileDocument =
            toml::Value::Table(table)
                .try_into()
                .map_err(|e: toml::de::Error| LockfileError::Parse {
                    message: e.to_string(),
                })?;
        Ok(Self {
            format_version: doc.format_version,
            requirement_hash: doc.requirement_hash,
            solution: Solution {
                regions: doc.regions,
                roots: doc.roots,
                packages: doc.packages,
            },
        })
    }

    pub fn load(path: &Path) -> Result<Self, LockfileError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LockfileError::Missing {
                    path: path.display().to_string(),
                })
            }
            Err(source) => {
                return Err(LockfileError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        let lockfile = Self::deserialize(&text)?;
        tracing::debug!(
            path = %path.display(),
            packages = lockfile.solution.packages.len(),
            "loaded lockfile"
        );
        Ok(lockfile)
    }

    /// Write atomically: readers see the old file or the new one, never a
    /// mix.
    pub fn write(&self, path: &Path) -> Result<(), LockfileError> {
        let text = self.serialize()?;
        tern_util::fs::atomic_write(path, text.as_bytes()).map_err(|source| {
            LockfileError::Io {
                path: path.display().to_string(),
                source,
            }
        })?;
        tracing::info!(path = %path.display(), "wrote lockfile");
        Ok(())
    }

    /// Fail with [`LockfileError::Stale`] unless the lockfile was produced
    /// from requirements hashing to `expected`.
    pub fn check_fresh(&self, expected: &str) -> Result<(), LockfileError> {
        if self.requirement_hash == expected {
            Ok(())
        } else {
            tracing::debug!(
                locked = %self.requirement_hash,
                current = %expected,
                "lockfile requirement hash mismatch"
            );
            Err(LockfileError::Stale {
                expected: expected.to_string(),
                found: self.requirement_hash.clone(),
            })
        }
    }
}

/// Content hash of the resolution inputs, used only to detect staleness.
///
/// Order of the inputs does not matter.
pub fn requirement_hash(
    declarations: &[Requirement],
    constraints: &[Requirement],
    overrides: &[Requirement],
    requires_python: &VersionSpecifiers,
) -> String {
    let mut lines: Vec<String> = declarations
        .iter()
        .map(|r| format!("root {} {r}", r.origin))
        .chain(constraints.iter().map(|r| format!("constraint {r}")))
        .chain(overrides.iter().map(|r| format!("override {r}")))
        .collect();
    if !requires_python.is_any() {
        lines.push(format!("requires-python {requires_python}"));
    }
    lines.sort();
    lines.dedup();
    tern_util::hash::sha256_lines(lines)
}
