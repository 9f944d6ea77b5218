//! Typed configuration sections

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use defman_remote::SourceKind;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub paths: PathsConfig,
    pub locks: LocksConfig,
    pub jobs: JobsConfig,
    pub backups: BackupsConfig,
    pub sources: Vec<SyncSource>,
    pub profiles: Vec<Profile>,
    pub default_profile: Option<String>,
    pub autoconfig: AutoconfigConfig,
}

impl EngineConfig {
    /// Reject configurations the engine cannot act on.
    pub fn validate(&self) -> Result<()> {
        let mut names = BTreeSet::new();
        for source in &self.sources {
            defman_fs::validate_identifier(&source.name, "Source name")?;
            if !names.insert(source.name.as_str()) {
                return Err(Error::config(format!("duplicate source '{}'", source.name)));
            }
            if source.url.trim().is_empty() {
                return Err(Error::config(format!("source '{}' has no url", source.name)));
            }
        }

        let mut profiles = BTreeSet::new();
        for profile in &self.profiles {
            if !profiles.insert(profile.name.as_str()) {
                return Err(Error::config(format!("duplicate profile '{}'", profile.name)));
            }
        }
        if let Some(default) = &self.default_profile
            && !profiles.contains(default.as_str())
        {
            return Err(Error::config(format!(
                "default profile '{default}' is not defined"
            )));
        }
        for profile in self.autoconfig.profiles.values() {
            if !profiles.contains(profile.as_str()) {
                return Err(Error::config(format!(
                    "autoconfig maps to undefined profile '{profile}'"
                )));
            }
        }
        Ok(())
    }

    pub fn source(&self, name: &str) -> Option<&SyncSource> {
        self.sources.iter().find(|s| s.name == name)
    }

    /// Look up a profile, falling back to `default_profile`, then to the
    /// empty profile.
    pub fn profile(&self, name: Option<&str>) -> Result<Profile> {
        match name.or(self.default_profile.as_deref()) {
            Some(name) => self
                .profiles
                .iter()
                .find(|p| p.name == name)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("profile '{name}'"))),
            None => Ok(Profile::default()),
        }
    }
}

/// Directory layout. Relative paths are taken from the project root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    /// Where definitions are deployed.
    pub target_dir: PathBuf,
    /// Cache, backups, journal and lock files.
    pub state_dir: PathBuf,
    /// Definitions shipped with the installation.
    pub bundled_dir: Option<PathBuf>,
    /// Per-user definitions; defaults to `<config_dir>/defman/definitions`.
    pub user_dir: Option<PathBuf>,
    pub project_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            target_dir: PathBuf::from(".claude/agents"),
            state_dir: PathBuf::from(".defman"),
            bundled_dir: None,
            user_dir: None,
            project_dir: PathBuf::from(".defman/definitions"),
        }
    }
}

/// Absolute directories derived from [`PathsConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    pub target_dir: PathBuf,
    pub state_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub backups_dir: PathBuf,
    pub journal_path: PathBuf,
    pub bundled_dir: Option<PathBuf>,
    pub user_dir: Option<PathBuf>,
    pub project_dir: PathBuf,
}

impl ResolvedPaths {
    pub fn new(paths: &PathsConfig, project_root: &Path) -> Self {
        let abs = |p: &Path| {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                project_root.join(p)
            }
        };
        let state_dir = abs(&paths.state_dir);
        Self {
            project_root: project_root.to_path_buf(),
            target_dir: abs(&paths.target_dir),
            cache_dir: state_dir.join("cache"),
            backups_dir: state_dir.join("backups"),
            journal_path: state_dir.join("journal.jsonl"),
            state_dir,
            bundled_dir: paths.bundled_dir.as_deref().map(abs),
            user_dir: paths
                .user_dir
                .as_deref()
                .map(abs)
                .or_else(|| dirs::config_dir().map(|d| d.join("defman").join("definitions"))),
            project_dir: abs(&paths.project_dir),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LocksConfig {
    pub timeout_ms: u64,
}

impl Default for LocksConfig {
    fn default() -> Self {
        Self { timeout_ms: 5_000 }
    }
}

impl LocksConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Job timeouts (seconds) and history retention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobsConfig {
    pub sync_timeout_secs: u64,
    pub deploy_timeout_secs: u64,
    pub autoconfig_timeout_secs: u64,
    pub retention_count: usize,
    pub retention_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            sync_timeout_secs: 120,
            deploy_timeout_secs: 60,
            autoconfig_timeout_secs: 300,
            retention_count: 100,
            retention_secs: 3_600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackupsConfig {
    pub retention_count: usize,
    pub retention_days: u64,
}

impl Default for BackupsConfig {
    fn default() -> Self {
        Self {
            retention_count: 20,
            retention_days: 30,
        }
    }
}

/// A remote definition source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncSource {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub kind: Option<SourceKind>,
    #[serde(default)]
    pub subdir: Option<String>,
    /// Breaks ties between sources offering the same id and version.
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    /// Last seen version tag. Persisted in the cache, never in config.
    #[serde(skip)]
    pub etag: Option<String>,
}

fn enabled_default() -> bool {
    true
}

impl SyncSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            kind: None,
            subdir: None,
            priority: 0,
            enabled: true,
            etag: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Configured kind, or the one inferred from the URL.
    pub fn effective_kind(&self) -> SourceKind {
        self.kind.unwrap_or_else(|| SourceKind::infer(&self.url))
    }
}

/// Id filter applied after resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    pub name: String,
    #[serde(default, alias = "exclude_ids")]
    pub exclude: BTreeSet<String>,
    /// Ids kept even when excluded.
    #[serde(default, alias = "include_overrides")]
    pub include: BTreeSet<String>,
}

impl Profile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn excluding<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn including<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Whether `id` is dropped by this profile.
    pub fn excludes(&self, id: &str) -> bool {
        self.exclude.contains(id) && !self.include.contains(id)
    }
}

/// Project marker to profile mapping, keyed by stack name
/// (`rust`, `node`, `python`, `go`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AutoconfigConfig {
    pub profiles: BTreeMap<String, String>,
}
