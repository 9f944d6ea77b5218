//! Definition records and front-matter parsing
//!
//! A definition file is Markdown with an optional YAML front-matter block:
//!
//! ```text
//! ---
//! name: code-reviewer
//! version: 1.2.0
//! ---
//! Review every change for...
//! ```
//!
//! Only `name` and `version` matter here; everything else in the front matter
//! belongs to the artifact and is ignored.

use std::fmt;
use std::path::{Path, PathBuf};

use defman_fs::{compute_checksum, validate_identifier};
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Precedence tiers, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tier {
    Bundled,
    CacheRemote,
    User,
    Project,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Bundled, Tier::CacheRemote, Tier::User, Tier::Project];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bundled => "bundled",
            Self::CacheRemote => "cache-remote",
            Self::User => "user",
            Self::Project => "project",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a record came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceRef {
    /// A local tier directory.
    File { path: PathBuf },
    /// A synced remote source, by name.
    Remote { source: String },
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File { path } => write!(f, "{}", path.display()),
            Self::Remote { source } => write!(f, "remote:{source}"),
        }
    }
}

/// One version of one artifact, as found in one tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionRecord {
    pub id: String,
    pub version: Version,
    pub tier: Tier,
    pub source_ref: SourceRef,
    /// Priority of the owning sync source; `0` for local tiers.
    pub source_priority: i32,
    /// `sha256:<hex>` of the raw file bytes.
    pub content_hash: String,
    pub raw_path: PathBuf,
}

impl DefinitionRecord {
    /// Parse a definition file's bytes into a record.
    pub fn parse(
        raw_path: &Path,
        content: &[u8],
        tier: Tier,
        source_ref: SourceRef,
        source_priority: i32,
    ) -> Result<Self> {
        let malformed = |reason: String| Error::MalformedDefinition {
            path: raw_path.to_path_buf(),
            reason,
        };

        let text = std::str::from_utf8(content).map_err(|e| malformed(e.to_string()))?;
        let front = parse_front_matter(text).map_err(malformed)?;

        let id = match front.name {
            Some(name) => name.trim().to_string(),
            None => raw_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        validate_identifier(&id, "Artifact id").map_err(|e| malformed(e.to_string()))?;

        let version = match front.version {
            Some(raw) => parse_version(&raw).map_err(malformed)?,
            None => Version::new(0, 0, 0),
        };

        Ok(Self {
            id,
            version,
            tier,
            source_ref,
            source_priority,
            content_hash: compute_checksum(content),
            raw_path: raw_path.to_path_buf(),
        })
    }

    /// File name the artifact is deployed under.
    pub fn file_name(&self) -> String {
        format!("{}.md", self.id)
    }
}

#[derive(Debug, Default, Deserialize)]
struct FrontMatter {
    name: Option<String>,
    #[serde(default, deserialize_with = "version_scalar")]
    version: Option<String>,
}

/// Accept `version: 1`, `version: 1.2` and `version: "1.2.3"` alike.
fn version_scalar<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_yaml::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_yaml::Value::Null) => None,
        Some(serde_yaml::Value::String(s)) => Some(s),
        Some(serde_yaml::Value::Number(n)) => Some(n.to_string()),
        Some(other) => Some(format!("{other:?}")),
    })
}

fn parse_front_matter(text: &str) -> std::result::Result<FrontMatter, String> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut lines = text.lines();
    if lines.next().map(str::trim_end) != Some("---") {
        return Ok(FrontMatter::default());
    }

    let mut block = Vec::new();
    for line in lines {
        if line.trim_end() == "---" {
            let yaml = block.join("\n");
            if yaml.trim().is_empty() {
                return Ok(FrontMatter::default());
            }
            let mut front: FrontMatter =
                serde_yaml::from_str(&yaml).map_err(|e| format!("front matter: {e}"))?;
            if front.version.is_some()
                && let Some(raw) = plain_scalar(&yaml, "version")
            {
                front.version = Some(raw.to_string());
            }
            return Ok(front);
        }
        block.push(line);
    }
    Err("front matter is not terminated".to_string())
}

/// Source text of an unquoted top-level `key: value` scalar. YAML reads
/// `1.10` as the float `1.1`, so numeric versions are taken as written.
fn plain_scalar<'a>(yaml: &'a str, key: &str) -> Option<&'a str> {
    yaml.lines().find_map(|line| {
        let value = line.strip_prefix(key)?.trim_start().strip_prefix(':')?;
        let value = value.split(" #").next().unwrap_or(value).trim();
        (!value.is_empty() && !value.starts_with(['"', '\''])).then_some(value)
    })
}

/// Parse a lenient semantic version: `1` and `1.2` are padded with zeros.
pub fn parse_version(raw: &str) -> std::result::Result<Version, String> {
    let raw = raw.trim().trim_start_matches('v');
    if let Ok(version) = Version::parse(raw) {
        return Ok(version);
    }

    let parts: Vec<&str> = raw.split('.').collect();
    let padded = match parts.len() {
        1 => format!("{raw}.0.0"),
        2 => format!("{raw}.0"),
        _ => raw.to_string(),
    };
    Version::parse(&padded).map_err(|e| format!("invalid version '{raw}': {e}"))
}
