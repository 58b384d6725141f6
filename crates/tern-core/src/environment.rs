//! Target environment descriptors: the fixed fact schema markers are
//! evaluated against.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ConstraintError;
use crate::version::Version;

/// Operating system family of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Macos,
    Windows,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Linux => "linux",
            Platform::Macos => "macos",
            Platform::Windows => "windows",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "linux" => Some(Platform::Linux),
            "macos" | "darwin" | "osx" => Some(Platform::Macos),
            "windows" | "win32" | "win" => Some(Platform::Windows),
            _ => None,
        }
    }
}

/// Concrete values for every marker key, describing one interpreter on one
/// platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetEnvironment {
    pub python_version: Version,
    pub python_full_version: Version,
    pub os_name: String,
    pub sys_platform: String,
    pub platform_system: String,
    pub platform_machine: String,
    pub implementation_name: String,
}

impl TargetEnvironment {
    /// A CPython target on `platform`/`machine` running `python` (`3.12` or
    /// `3.12.4`).
    pub fn new(platform: Platform, machine: &str, python: &Version) -> Self {
        let release = python.release();
        let major = release.first().copied().unwrap_or(3);
        let minor = release.get(1).copied().unwrap_or(0);
        let (os_name, sys_platform, platform_system) = match platform {
            Platform::Linux => ("posix", "linux", "Linux"),
            Platform::Macos => ("posix", "darwin", "Darwin"),
            Platform::Windows => ("nt", "win32", "Windows"),
        };
        let machine = match (platform, machine) {
            (Platform::Windows, "x86_64") => "AMD64",
            (Platform::Windows, "aarch64") => "ARM64",
            (Platform::Macos, "aarch64") => "arm64",
            _ => machine,
        };
        Self {
            python_version: Version::new([major, minor]),
            python_full_version: python.clone(),
            os_name: os_name.to_string(),
            sys_platform: sys_platform.to_string(),
            platform_system: platform_system.to_string(),
            platform_machine: machine.to_string(),
            implementation_name: "cpython".to_string(),
        }
    }

    /// Parse a `<platform>-<machine>` label such as `linux-x86_64`.
    pub fn from_label(label: &str, python: &Version) -> Result<Self, ConstraintError> {
        let err = || ConstraintError::Marker {
            input: label.to_string(),
            reason: "expected `<linux|macos|windows>-<machine>`".to_string(),
        };
        let (os, machine) = label.trim().split_once('-').ok_or_else(err)?;
        let platform = Platform::parse(&os.to_ascii_lowercase()).ok_or_else(err)?;
        if machine.is_empty() {
            return Err(err());
        }
        Ok(Self::new(platform, machine, python))
    }

    /// The host this process runs on.
    pub fn host(python: &Version) -> Self {
        let platform = match std::env::consts::OS {
            "macos" => Platform::Macos,
            "windows" => Platform::Windows,
            _ => Platform::Linux,
        };
        Self::new(platform, std::env::consts::ARCH, python)
    }

    /// The default universal target set.
    pub fn builtin_targets(python: &Version) -> Vec<Self> {
        vec![
            Self::new(Platform::Linux, "x86_64", python),
            Self::new(Platform::Linux, "aarch64", python),
            Self::new(Platform::Macos, "aarch64", python),
            Self::new(Platform::Macos, "x86_64", python),
            Self::new(Platform::Windows, "x86_64", python),
        ]
    }

    /// Stable label used for ordering and log output.
    pub fn label(&self) -> String {
        format!(
            "{}-{}-py{}",
            self.sys_platform, self.platform_machine, self.python_full_version
        )
    }
}

impl fmt::Display for TargetEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_facts() {
        let env = TargetEnvironment::new(Platform::Windows, "x86_64", &Version::new([3, 11, 2]));
        assert_eq!(env.os_name, "nt");
        assert_eq!(env.sys_platform, "win32");
        assert_eq!(env.platform_machine, "AMD64");
        assert_eq!(env.python_version, Version::new([3, 11]));
        assert_eq!(env.python_full_version.to_string(), "3.11.2");
    }

    #[test]
    fn label_parsing() {
        let py = Version::new([3, 12]);
        let env = TargetEnvironment::from_label("macos-aarch64", &py).unwrap();
        assert_eq!(env.sys_platform, "darwin");
        assert_eq!(env.platform_machine, "arm64");
        assert!(TargetEnvironment::from_label("beos-x86", &py).is_err());
        assert!(TargetEnvironment::from_label("linux", &py).is_err());
    }

    #[test]
    fn builtin_targets_are_distinct() {
        let targets = TargetEnvironment::builtin_targets(&Version::new([3, 12]));
        let labels: std::collections::BTreeSet<String> =
            targets.iter().map(TargetEnvironment::label).collect();
        assert_eq!(labels.len(), targets.len());
    }
}
