//! Layered configuration.
//!
//! Fragments are merged in increasing precedence: built-in defaults, the
//! user-global `tern.toml`, the project's `[tool.tern]` table, `TERN_*`
//! environment variables, then call-time overrides. Scalars override by
//! key. Lists concatenate in precedence order unless a fragment writes
//! `{ values = [...], replace = true }`.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::environment::TargetEnvironment;
use crate::error::ConstraintError;
use crate::manifest::Manifest;
use crate::name::PackageName;
use crate::requirement::Requirement;
use crate::version::Version;
use crate::{DEFAULT_INDEX_URL, DEFAULT_PYTHON_VERSION};

/// File name of the user-global configuration.
pub const CONFIG_FILE_NAME: &str = "tern.toml";

const DEFAULT_FETCH_RETRIES: u32 = 3;
const DEFAULT_MAX_ITERATIONS: u64 = 100_000;
const DEFAULT_CONCURRENT_FETCHES: usize = 8;

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    #[diagnostic(help("Configuration keys are kebab-case, e.g. `index-url`"))]
    Parse { path: String, message: String },

    #[error("invalid value for `{key}`: {message}")]
    InvalidValue { key: String, message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Constraint(#[from] ConstraintError),
}

/// Whether synchronization may re-resolve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    /// A missing or stale lockfile is re-resolved and rewritten.
    #[default]
    Locked,
    /// The lockfile is installed exactly as written, or the sync fails.
    Frozen,
}

/// When pre-release versions are eligible.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrereleaseMode {
    Disallow,
    Allow,
    /// Only when no final release fits, or a specifier names a pre-release.
    #[default]
    IfNecessary,
    /// Only for packages whose specifiers name a pre-release.
    Explicit,
}

/// What to do when another process holds the lockfile lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LockWait {
    #[default]
    Wait,
    FailFast,
}

/// Which packages ignore versions pinned in an existing lockfile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Upgrade {
    #[default]
    None,
    All,
    Packages(BTreeSet<PackageName>),
}

impl Upgrade {
    pub fn allows(&self, name: &PackageName) -> bool {
        match self {
            Upgrade::None => false,
            Upgrade::All => true,
            Upgrade::Packages(names) => names.contains(name),
        }
    }
}

/// A list-valued setting: a bare list appends to lower layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ListSetting {
    Append(Vec<String>),
    Explicit {
        values: Vec<String>,
        #[serde(default)]
        replace: bool,
    },
}

impl ListSetting {
    pub fn replace(values: Vec<String>) -> Self {
        ListSetting::Explicit {
            values,
            replace: true,
        }
    }

    fn values(&self) -> &[String] {
        match self {
            ListSetting::Append(values) | ListSetting::Explicit { values, .. } => values,
        }
    }

    fn replaces(&self) -> bool {
        matches!(self, ListSetting::Explicit { replace: true, .. })
    }

    fn merge(lower: Option<Self>, higher: Option<Self>) -> Option<Self> {
        match (lower, higher) {
            (lower, None) => lower,
            (None, higher) => higher,
            (Some(_), Some(higher)) if higher.replaces() => Some(higher),
            (Some(lower), Some(higher)) => {
                let mut values = lower.values().to_vec();
                values.extend(higher.values().iter().cloned());
                Some(if lower.replaces() {
                    ListSetting::replace(values)
                } else {
                    ListSetting::Append(values)
                })
            }
        }
    }
}

/// One configuration layer. Every field is optional; absent fields defer to
/// lower layers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ConfigFragment {
    pub index_url: Option<String>,
    pub extra_index_urls: Option<ListSetting>,
    pub constraints: Option<ListSetting>,
    pub overrides: Option<ListSetting>,
    pub python: Option<String>,
    pub frozen: Option<bool>,
    pub prerelease: Option<PrereleaseMode>,
    pub universal: Option<bool>,
    pub environments: Option<ListSetting>,
    pub protected: Option<ListSetting>,
    pub fetch_retries: Option<u32>,
    pub max_iterations: Option<u64>,
    pub lock_wait: Option<LockWait>,
    pub concurrent_fetches: Option<usize>,
    pub upgrade: Option<bool>,
    pub upgrade_packages: Option<ListSetting>,
}

impl ConfigFragment {
    /// Parse a standalone config file. A missing file is an empty layer.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        let fragment = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        tracing::debug!(path = %path.display(), "loaded config layer");
        Ok(Some(fragment))
    }

    /// Build the environment-variable layer from `TERN_*` variables.
    pub fn from_env(vars: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        let mut fragment = Self::default();
        if let Some(url) = vars.get("TERN_INDEX_URL") {
            fragment.index_url = Some(url.clone());
        }
        if let Some(urls) = vars.get("TERN_EXTRA_INDEX_URL") {
            fragment.extra_index_urls = Some(ListSetting::Append(
                urls.split_whitespace().map(str::to_string).collect(),
            ));
        }
        if let Some(python) = vars.get("TERN_PYTHON") {
            fragment.python = Some(python.clone());
        }
        if let Some(raw) = vars.get("TERN_FROZEN") {
            fragment.frozen = Some(parse_flag("TERN_FROZEN", raw)?);
        }
        if let Some(raw) = vars.get("TERN_PRERELEASE") {
            fragment.prerelease = Some(parse_prerelease(raw)?);
        }
        if let Some(raw) = vars.get("TERN_CONCURRENT_FETCHES") {
            let n: usize = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "TERN_CONCURRENT_FETCHES".to_string(),
                message: format!("`{raw}` is not a positive integer"),
            })?;
            fragment.concurrent_fetches = Some(n);
        }
        Ok(fragment)
    }

    /// Layer `higher` over `self`.
    pub fn merge(self, higher: ConfigFragment) -> ConfigFragment {
        ConfigFragment {
            index_url: higher.index_url.or(self.index_url),
            extra_index_urls: ListSetting::merge(self.extra_index_urls, higher.extra_index_urls),
            constraints: ListSetting::merge(self.constraints, higher.constraints),
            overrides: ListSetting::merge(self.overrides, higher.overrides),
            python: higher.python.or(self.python),
            frozen: higher.frozen.or(self.frozen),
            prerelease: higher.prerelease.or(self.prerelease),
            universal: higher.universal.or(self.universal),
            environments: ListSetting::merge(self.environments, higher.environments),
            protected: ListSetting::merge(self.protected, higher.protected),
            fetch_retries: higher.fetch_retries.or(self.fetch_retries),
            max_iterations: higher.max_iterations.or(self.max_iterations),
            lock_wait: higher.lock_wait.or(self.lock_wait),
            concurrent_fetches: higher.concurrent_fetches.or(self.concurrent_fetches),
            upgrade: higher.upgrade.or(self.upgrade),
            upgrade_packages: ListSetting::merge(self.upgrade_packages, higher.upgrade_packages),
        }
    }

    /// Apply defaults and validate into a [`ResolvedPolicy`].
    pub fn into_policy(self) -> Result<ResolvedPolicy, ConfigError> {
        let list = |setting: &Option<ListSetting>| -> Vec<String> {
            setting
                .as_ref()
                .map(|s| s.values().to_vec())
                .unwrap_or_default()
        };
        let requirements = |key: &str, setting: &Option<ListSetting>| {
            list(setting)
                .iter()
                .map(|raw| Requirement::parse(raw))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: e.to_string(),
                })
        };

        let python_raw = self
            .python
            .clone()
            .unwrap_or_else(|| DEFAULT_PYTHON_VERSION.to_string());
        let python_version = Version::parse(&python_raw).map_err(|e| ConfigError::InvalidValue {
            key: "python".to_string(),
            message: e.to_string(),
        })?;

        let environments = match &self.environments {
            Some(setting) if !setting.values().is_empty() => setting
                .values()
                .iter()
                .map(|label| TargetEnvironment::from_label(label, &python_version))
                .collect::<Result<Vec<_>, _>>()?,
            _ => TargetEnvironment::builtin_targets(&python_version),
        };

        let mut protected = BTreeSet::new();
        protected.insert(PackageName::new("python")?);
        for name in list(&self.protected) {
            protected.insert(PackageName::new(&name)?);
        }

        let upgrade = if self.upgrade == Some(true) {
            Upgrade::All
        } else {
            let names = list(&self.upgrade_packages)
                .iter()
                .map(|n| PackageName::new(n))
                .collect::<Result<BTreeSet<_>, _>>()?;
            if names.is_empty() {
                Upgrade::None
            } else {
                Upgrade::Packages(names)
            }
        };

        let concurrent_fetches = self
            .concurrent_fetches
            .unwrap_or(DEFAULT_CONCURRENT_FETCHES);
        if concurrent_fetches == 0 {
            return Err(ConfigError::InvalidValue {
                key: "concurrent-fetches".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(ResolvedPolicy {
            index_url: self
                .index_url
                .clone()
                .unwrap_or_else(|| DEFAULT_INDEX_URL.to_string()),
            extra_index_urls: list(&self.extra_index_urls),
            constraints: requirements("constraints", &self.constraints)?,
            overrides: requirements("overrides", &self.overrides)?,
            python_version,
            mode: if self.frozen == Some(true) {
                SyncMode::Frozen
            } else {
                SyncMode::Locked
            },
            prerelease: self.prerelease.unwrap_or_default(),
            universal: self.universal.unwrap_or(true),
            environments,
            protected,
            fetch_retries: self.fetch_retries.unwrap_or(DEFAULT_FETCH_RETRIES),
            max_iterations: self.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS),
            lock_wait: self.lock_wait.unwrap_or_default(),
            concurrent_fetches,
            upgrade,
        })
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("`{raw}` is not a boolean"),
        }),
    }
}

fn parse_prerelease(raw: &str) -> Result<PrereleaseMode, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "disallow" => Ok(PrereleaseMode::Disallow),
        "allow" => Ok(PrereleaseMode::Allow),
        "if-necessary" => Ok(PrereleaseMode::IfNecessary),
        "explicit" => Ok(PrereleaseMode::Explicit),
        _ => Err(ConfigError::InvalidValue {
            key: "TERN_PRERELEASE".to_string(),
            message: format!(
                "`{raw}` is not one of disallow, allow, if-necessary, explicit"
            ),
        }),
    }
}

/// The single policy every engine stage reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPolicy {
    pub index_url: String,
    pub extra_index_urls: Vec<String>,
    /// Version restrictions applied only if the package is selected.
    pub constraints: Vec<Requirement>,
    /// Replace every declared requirement on the named package.
    pub overrides: Vec<Requirement>,
    pub python_version: Version,
    pub mode: SyncMode,
    pub prerelease: PrereleaseMode,
    pub universal: bool,
    /// Targets a universal lock must cover.
    pub environments: Vec<TargetEnvironment>,
    /// Never removed by synchronization.
    pub protected: BTreeSet<PackageName>,
    pub fetch_retries: u32,
    pub max_iterations: u64,
    pub lock_wait: LockWait,
    pub concurrent_fetches: usize,
    pub upgrade: Upgrade,
}

impl Default for ResolvedPolicy {
    fn default() -> Self {
        let mut protected = BTreeSet::new();
        protected.extend(PackageName::new("python"));
        let python_version = Version::new([3, 12]);
        Self {
            index_url: DEFAULT_INDEX_URL.to_string(),
            extra_index_urls: Vec::new(),
            constraints: Vec::new(),
            overrides: Vec::new(),
            environments: TargetEnvironment::builtin_targets(&python_version),
            python_version,
            mode: SyncMode::Locked,
            prerelease: PrereleaseMode::IfNecessary,
            universal: true,
            protected,
            fetch_retries: DEFAULT_FETCH_RETRIES,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            lock_wait: LockWait::Wait,
            concurrent_fetches: DEFAULT_CONCURRENT_FETCHES,
            upgrade: Upgrade::None,
        }
    }
}

/// Location of the user-global config file, from `XDG_CONFIG_HOME` or
/// `HOME` in `vars`.
pub fn user_config_path(vars: &BTreeMap<String, String>) -> Option<PathBuf> {
    if let Some(xdg) = vars.get("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Some(Path::new(xdg).join("tern").join(CONFIG_FILE_NAME));
    }
    vars.get("HOME")
        .or_else(|| vars.get("USERPROFILE"))
        .map(|home| Path::new(home).join(".config").join("tern").join(CONFIG_FILE_NAME))
}

/// Resolve the full layer stack into a policy.
///
/// `vars` stands in for the process environment so callers (and tests)
/// control exactly what is visible. `TERN_NO_CONFIG` skips the user-global
/// file.
pub fn resolve_policy<I>(
    manifest: Option<&Manifest>,
    vars: I,
    overrides: ConfigFragment,
) -> Result<ResolvedPolicy, ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    let vars: BTreeMap<String, String> = vars.into_iter().collect();
    let mut merged = ConfigFragment::default();

    let skip_user = match vars.get("TERN_NO_CONFIG") {
        Some(raw) => parse_flag("TERN_NO_CONFIG", raw)?,
        None => false,
    };
    if !skip_user {
        if let Some(path) = user_config_path(&vars) {
            if let Some(user) = ConfigFragment::load(&path)? {
                merged = merged.merge(user);
            }
        }
    }
    if let Some(project) = manifest.and_then(|m| m.tool.tern.clone()) {
        merged = merged.merge(project);
    }
    merged = merged.merge(ConfigFragment::from_env(&vars)?);
    merged = merged.merge(overrides);

    let policy = merged.into_policy()?;
    tracing::debug!(
        index = %policy.index_url,
        python = %policy.python_version,
        mode = ?policy.mode,
        universal = policy.universal,
        "resolved policy"
    );
    Ok(policy)
}
