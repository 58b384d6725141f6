//! Requirements and the roots they hang from.
//!
//! A [`Requirement`] is immutable once built. Project declarations carry a
//! [`RequirementRoot`] tag so runtime, optional-extra and dev-group
//! requirements stay separable all the way to the synchronizer.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::environment::TargetEnvironment;
use crate::error::ConstraintError;
use crate::marker::MarkerTree;
use crate::name::{ExtraName, PackageName};
use crate::specifier::VersionSpecifiers;

/// Where a package's artifacts come from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PackageSource {
    Registry { index: String },
    Url { url: String },
    Path { path: String },
}

impl PackageSource {
    pub fn registry(index: &str) -> Self {
        PackageSource::Registry {
            index: index.trim_end_matches('/').to_string(),
        }
    }

    /// Interpret a direct reference: `file://` URLs become local paths.
    pub fn from_url(url: &str) -> Self {
        match url.strip_prefix("file://") {
            Some(path) => PackageSource::Path {
                path: path.to_string(),
            },
            None => PackageSource::Url {
                url: url.to_string(),
            },
        }
    }

    pub fn is_registry(&self) -> bool {
        matches!(self, PackageSource::Registry { .. })
    }

    fn direct_reference(&self) -> Option<String> {
        match self {
            PackageSource::Registry { .. } => None,
            PackageSource::Url { url } => Some(url.clone()),
            PackageSource::Path { path } => Some(format!("file://{path}")),
        }
    }
}

impl fmt::Display for PackageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageSource::Registry { index } => write!(f, "registry+{index}"),
            PackageSource::Url { url } => write!(f, "url+{url}"),
            PackageSource::Path { path } => write!(f, "path+{path}"),
        }
    }
}

impl FromStr for PackageSource {
    type Err = ConstraintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, rest) = s.split_once('+').ok_or_else(|| ConstraintError::Requirement {
            input: s.to_string(),
            reason: "source must look like `registry+<url>`, `url+<url>` or `path+<path>`"
                .to_string(),
        })?;
        match kind {
            "registry" => Ok(PackageSource::registry(rest)),
            "url" => Ok(PackageSource::Url {
                url: rest.to_string(),
            }),
            "path" => Ok(PackageSource::Path {
                path: rest.to_string(),
            }),
            other => Err(ConstraintError::Requirement {
                input: s.to_string(),
                reason: format!("unknown source kind `{other}`"),
            }),
        }
    }
}

/// Which project declaration a requirement came from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RequirementRoot {
    Runtime,
    OptionalExtra(ExtraName),
    DevGroup(ExtraName),
}

impl fmt::Display for RequirementRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequirementRoot::Runtime => f.write_str("runtime"),
            RequirementRoot::OptionalExtra(name) => write!(f, "extra:{name}"),
            RequirementRoot::DevGroup(name) => write!(f, "group:{name}"),
        }
    }
}

impl FromStr for RequirementRoot {
    type Err = ConstraintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            None if s == "runtime" => Ok(RequirementRoot::Runtime),
            Some(("extra", name)) => Ok(RequirementRoot::OptionalExtra(ExtraName::new(name)?)),
            Some(("group", name)) => Ok(RequirementRoot::DevGroup(ExtraName::new(name)?)),
            _ => Err(ConstraintError::Requirement {
                input: s.to_string(),
                reason: "expected `runtime`, `extra:<name>` or `group:<name>`".to_string(),
            }),
        }
    }
}

macro_rules! string_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

string_serde!(PackageSource);
string_serde!(RequirementRoot);
string_serde!(Requirement);

/// A constraint on one package: name, extras, versions, applicability and
/// source.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Requirement {
    pub name: PackageName,
    /// Sorted and deduplicated.
    pub extras: Vec<ExtraName>,
    pub specifier: VersionSpecifiers,
    /// `MarkerTree::True` when unconditional.
    pub marker: MarkerTree,
    /// `None` means the configured default index.
    pub source: Option<PackageSource>,
    pub origin: RequirementRoot,
}

impl Requirement {
    /// A runtime requirement on `name` with any version.
    pub fn new(name: PackageName) -> Self {
        Self {
            name,
            extras: Vec::new(),
            specifier: VersionSpecifiers::any(),
            marker: MarkerTree::True,
            source: None,
            origin: RequirementRoot::Runtime,
        }
    }

    /// Parse `name[extra,...] specifiers ; marker` or `name @ url ; marker`.
    pub fn parse(input: &str) -> Result<Self, ConstraintError> {
        let fail = |reason: &str| ConstraintError::Requirement {
            input: input.to_string(),
            reason: reason.to_string(),
        };
        let text = input.trim();
        let name_end = text
            .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
            .unwrap_or(text.len());
        if name_end == 0 {
            return Err(fail("missing package name"));
        }
        let name = PackageName::new(&text[..name_end])?;
        let mut rest = text[name_end..].trim_start();

        let mut extras = Vec::new();
        if let Some(after) = rest.strip_prefix('[') {
            let close = after.find(']').ok_or_else(|| fail("unterminated extras list"))?;
            for extra in after[..close].split(',').map(str::trim).filter(|e| !e.is_empty()) {
                extras.push(ExtraName::new(extra)?);
            }
            rest = after[close + 1..].trim_start();
        }
        extras.sort();
        extras.dedup();

        let mut requirement = Requirement {
            extras,
            ..Requirement::new(name)
        };

        let marker_text = if let Some(after) = rest.strip_prefix('@') {
            let after = after.trim_start();
            let url_end = after.find(char::is_whitespace).unwrap_or(after.len());
            let mut url = &after[..url_end];
            let mut tail = after[url_end..].trim_start();
            if let Some(stripped) = url.strip_suffix(';') {
                url = stripped;
                tail = &after[url_end - 1..];
            }
            if url.is_empty() {
                return Err(fail("missing URL after `@`"));
            }
            requirement.source = Some(PackageSource::from_url(url));
            match tail.strip_prefix(';') {
                Some(marker) => Some(marker),
                None if tail.is_empty() => None,
                None => return Err(fail("unexpected text after URL")),
            }
        } else {
            let (spec, marker) = match rest.split_once(';') {
                Some((spec, marker)) => (spec, Some(marker)),
                None => (rest, None),
            };
            let spec = spec.trim();
            let spec = match spec.strip_prefix('(') {
                Some(inner) => inner
                    .strip_suffix(')')
                    .ok_or_else(|| fail("unbalanced parentheses"))?,
                None => spec,
            };
            requirement.specifier = VersionSpecifiers::parse(spec)?;
            marker
        };

        if let Some(marker) = marker_text {
            requirement.marker = MarkerTree::parse(marker.trim())?;
        }
        Ok(requirement)
    }

    pub fn with_origin(mut self, origin: RequirementRoot) -> Self {
        self.origin = origin;
        self
    }

    /// Whether the requirement applies on `env` with `extras` active.
    pub fn applies_to(&self, env: &TargetEnvironment, extras: &[ExtraName]) -> bool {
        self.marker.evaluate(env, extras)
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name.as_str())?;
        if !self.extras.is_empty() {
            let extras: Vec<&str> = self.extras.iter().map(ExtraName::as_str).collect();
            write!(f, "[{}]", extras.join(","))?;
        }
        match self.source.as_ref().and_then(PackageSource::direct_reference) {
            Some(url) => {
                write!(f, " @ {url}")?;
                if !self.marker.is_true() {
                    f.write_str(" ")?;
                }
            }
            None => write!(f, "{}", self.specifier)?,
        }
        if !self.marker.is_true() {
            write!(f, "; {}", self.marker)?;
        }
        Ok(())
    }
}

impl FromStr for Requirement {
    type Err = ConstraintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Which optional roots take part in an operation. Runtime requirements
/// always do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootSelection {
    pub extras: BTreeSet<ExtraName>,
    pub groups: BTreeSet<ExtraName>,
}

impl RootSelection {
    pub fn runtime_only() -> Self {
        Self::default()
    }

    /// Every root named by `declarations`.
    pub fn all(declarations: &[Requirement]) -> Self {
        let mut selection = Self::default();
        for req in declarations {
            match &req.origin {
                RequirementRoot::Runtime => {}
                RequirementRoot::OptionalExtra(name) => {
                    selection.extras.insert(name.clone());
                }
                RequirementRoot::DevGroup(name) => {
                    selection.groups.insert(name.clone());
                }
            }
        }
        selection
    }

    pub fn includes(&self, root: &RequirementRoot) -> bool {
        match root {
            RequirementRoot::Runtime => true,
            RequirementRoot::OptionalExtra(name) => self.extras.contains(name),
            RequirementRoot::DevGroup(name) => self.groups.contains(name),
        }
    }
}

/// The requirements of every selected root, sorted and deduplicated.
pub fn collect_requirements(
    declarations: &[Requirement],
    selection: &RootSelection,
) -> Vec<Requirement> {
    let mut out: Vec<Requirement> = declarations
        .iter()
        .filter(|req| selection.includes(&req.origin))
        .cloned()
        .collect();
    out.sort();
    out.dedup();
    out
}
