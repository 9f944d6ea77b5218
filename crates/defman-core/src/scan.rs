//! Tier directory scanning
//!
//! Scans never fail because of a bad definition file; the file is logged and
//! reported as skipped instead. Scans take no locks: cache updates and deploys
//! only ever rename complete files into place.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::definition::{DefinitionRecord, SourceRef, Tier};
use crate::{Error, Result};

/// A file that was found but not turned into a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Every record found in one tier (or one remote source's cache).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierScan {
    pub tier: Tier,
    pub records: Vec<DefinitionRecord>,
    pub skipped: Vec<SkippedFile>,
}

impl TierScan {
    pub fn new(tier: Tier, records: Vec<DefinitionRecord>) -> Self {
        Self {
            tier,
            records,
            skipped: Vec::new(),
        }
    }

    pub fn empty(tier: Tier) -> Self {
        Self::new(tier, Vec::new())
    }
}

/// Scan `dir` for `*.md` definitions belonging to `tier`.
///
/// A missing directory is an empty tier. Hidden entries (staging
/// directories, lock files, etag sidecars) are ignored.
pub fn scan_dir(dir: &Path, tier: Tier, source: Option<(&str, i32)>) -> Result<TierScan> {
    let mut scan = TierScan::empty(tier);
    if !dir.is_dir() {
        tracing::debug!(dir = %dir.display(), %tier, "Tier directory absent");
        return Ok(scan);
    }

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| defman_fs::Error::io(dir, e))? {
        let entry = entry.map_err(|e| defman_fs::Error::io(dir, e))?;
        let path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if hidden || path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        let file_type = entry.file_type().map_err(|e| defman_fs::Error::io(&path, e))?;
        if file_type.is_symlink() {
            tracing::warn!(path = %path.display(), "Skipping symlinked definition");
            scan.skipped.push(SkippedFile {
                path,
                reason: "symbolic links are not followed".to_string(),
            });
            continue;
        }
        if file_type.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let (source_ref, priority) = match source {
        Some((name, priority)) => (
            SourceRef::Remote {
                source: name.to_string(),
            },
            priority,
        ),
        None => (
            SourceRef::File {
                path: dir.to_path_buf(),
            },
            0,
        ),
    };

    for path in paths {
        let parsed = std::fs::read(&path)
            .map_err(|e| Error::MalformedDefinition {
                path: path.clone(),
                reason: e.to_string(),
            })
            .and_then(|bytes| {
                DefinitionRecord::parse(&path, &bytes, tier, source_ref.clone(), priority)
            });

        match parsed {
            Ok(record) => {
                tracing::debug!(id = %record.id, version = %record.version, %tier, "Found definition");
                scan.records.push(record);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping malformed definition");
                scan.skipped.push(SkippedFile {
                    path,
                    reason: e.to_string(),
                });
            }
        }
    }

    Ok(scan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let scan = scan_dir(&dir.path().join("absent"), Tier::User, None).unwrap();
        assert!(scan.records.is_empty());
        assert!(scan.skipped.is_empty());
    }

    #[test]
    fn bad_files_are_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("good.md"), "---\nversion: 1.0.0\n---\n").unwrap();
        fs::write(dir.path().join("bad.md"), "---\nversion: nope\n---\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        fs::write(dir.path().join(".etag"), "\"v1\"").unwrap();

        let scan = scan_dir(dir.path(), Tier::Project, None).unwrap();

        assert_eq!(scan.records.len(), 1);
        assert_eq!(scan.records[0].id, "good");
        assert_eq!(scan.skipped.len(), 1);
        assert!(scan.skipped[0].path.ends_with("bad.md"));
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_definitions_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::NamedTempFile::new().unwrap();
        fs::write(outside.path(), "---\nversion: 9.0.0\n---\nsecret\n").unwrap();
        fs::write(dir.path().join("good.md"), "body").unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("leak.md")).unwrap();

        let scan = scan_dir(dir.path(), Tier::User, None).unwrap();

        let ids: Vec<&str> = scan.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["good"]);
        assert_eq!(scan.skipped.len(), 1);
        assert!(scan.skipped[0].path.ends_with("leak.md"));
    }

    #[test]
    fn remote_scans_carry_source_and_priority() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.md"), "body").unwrap();

        let scan = scan_dir(dir.path(), Tier::CacheRemote, Some(("upstream", 7))).unwrap();

        let record = &scan.records[0];
        assert_eq!(
            record.source_ref,
            SourceRef::Remote {
                source: "upstream".into()
            }
        );
        assert_eq!(record.source_priority, 7);
    }
}
