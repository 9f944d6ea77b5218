//! Batch backups
//!
//! One backup covers every path a deploy is about to touch. Each entry
//! remembers whether the file existed, so restoring puts back old content
//! and deletes files the batch created.
//!
//! ```text
//! <state>/backups/<backup-id>/
//! ├── metadata.toml
//! ├── 0000.bak
//! └── 0001.bak
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use defman_fs::{ConfigStore, FileSystem, RobustnessConfig, ensure_within, validate_identifier};
use serde::{Deserialize, Serialize};

use crate::config::BackupsConfig;
use crate::{Error, Result};

const METADATA_FILE: &str = "metadata.toml";

/// One path covered by a backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupEntry {
    pub path: PathBuf,
    pub existed: bool,
    /// Copy of the previous content, relative to the backup directory.
    pub stored: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub id: String,
    pub created: DateTime<Utc>,
    pub target_dir: PathBuf,
    pub entries: Vec<BackupEntry>,
}

impl BackupMetadata {
    pub fn affected_paths(&self) -> Vec<&Path> {
        self.entries.iter().map(|e| e.path.as_path()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backup {
    pub id: String,
    /// Directory holding the copies and metadata.
    pub path: PathBuf,
    pub metadata: BackupMetadata,
}

/// Creates, restores and prunes backups under one directory.
#[derive(Debug, Clone)]
pub struct BackupManager {
    backups_dir: PathBuf,
    robustness: RobustnessConfig,
}

impl BackupManager {
    pub fn new(backups_dir: impl Into<PathBuf>) -> Self {
        Self {
            backups_dir: backups_dir.into(),
            robustness: RobustnessConfig::default(),
        }
    }

    pub fn backups_dir(&self) -> &Path {
        &self.backups_dir
    }

    fn backup_dir(&self, id: &str) -> PathBuf {
        self.backups_dir.join(id)
    }

    /// Snapshot `paths` (all inside `target_dir`) before they change.
    ///
    /// Target files are read through `fs`; copies are written straight to the
    /// backups directory. The metadata file is written last, so a backup
    /// without one is incomplete and ignored.
    pub fn create(
        &self,
        target_fs: &dyn FileSystem,
        target_dir: &Path,
        paths: &[PathBuf],
    ) -> Result<Backup> {
        let created = Utc::now();
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let id = format!("{}-{}", created.format("%Y%m%dT%H%M%S%3fZ"), &suffix[..8]);
        let dir = self.backup_dir(&id);
        fs::create_dir_all(&dir).map_err(|e| defman_fs::Error::io(&dir, e))?;

        let mut entries = Vec::with_capacity(paths.len());
        for (index, path) in paths.iter().enumerate() {
            ensure_within(target_dir, path)?;
            if target_fs.exists(path) {
                let stored = format!("{index:04}.bak");
                let content = target_fs.read(path)?;
                defman_fs::io::write_atomic(&dir.join(&stored), &content, self.robustness)?;
                entries.push(BackupEntry {
                    path: path.clone(),
                    existed: true,
                    stored: Some(stored),
                });
            } else {
                entries.push(BackupEntry {
                    path: path.clone(),
                    existed: false,
                    stored: None,
                });
            }
        }

        let metadata = BackupMetadata {
            id: id.clone(),
            created,
            target_dir: target_dir.to_path_buf(),
            entries,
        };
        ConfigStore::with_robustness(self.robustness).save(&dir.join(METADATA_FILE), &metadata)?;

        tracing::debug!(backup = %id, paths = paths.len(), "Backup created");
        Ok(Backup {
            id,
            path: dir,
            metadata,
        })
    }

    pub fn get(&self, id: &str) -> Result<Option<Backup>> {
        validate_identifier(id, "Backup id")?;
        let dir = self.backup_dir(id);
        let metadata_path = dir.join(METADATA_FILE);
        if !metadata_path.is_file() {
            return Ok(None);
        }
        let metadata: BackupMetadata = ConfigStore::new().load(&metadata_path)?;
        Ok(Some(Backup {
            id: id.to_string(),
            path: dir,
            metadata,
        }))
    }

    /// Put every covered path back the way it was.
    pub fn restore(&self, target_fs: &dyn FileSystem, backup: &Backup) -> Result<Vec<PathBuf>> {
        let target_dir = &backup.metadata.target_dir;
        let mut restored = Vec::new();

        for entry in &backup.metadata.entries {
            let dest = ensure_within(target_dir, &entry.path)?;
            match (&entry.existed, &entry.stored) {
                (true, Some(stored)) => {
                    let source = backup.path.join(stored);
                    let content =
                        fs::read(&source).map_err(|e| defman_fs::Error::io(&source, e))?;
                    target_fs.write_atomic(&dest, &content)?;
                }
                (true, None) => {
                    return Err(Error::validation(format!(
                        "backup {} has no copy of {}",
                        backup.id,
                        entry.path.display()
                    )));
                }
                (false, _) => target_fs.remove_file(&dest)?,
            }
            restored.push(entry.path.clone());
        }

        tracing::info!(backup = %backup.id, files = restored.len(), "Backup restored");
        Ok(restored)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        validate_identifier(id, "Backup id")?;
        let dir = self.backup_dir(id);
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|e| defman_fs::Error::io(&dir, e))?;
        }
        Ok(())
    }

    /// All complete backups, oldest first.
    pub fn list(&self) -> Result<Vec<Backup>> {
        if !self.backups_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut backups = Vec::new();
        let entries =
            fs::read_dir(&self.backups_dir).map_err(|e| defman_fs::Error::io(&self.backups_dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| defman_fs::Error::io(&self.backups_dir, e))?;
            let path = entry.path();
            if path.is_dir()
                && let Some(id) = path.file_name().and_then(|n| n.to_str())
                && let Ok(Some(backup)) = self.get(id)
            {
                backups.push(backup);
            }
        }
        backups.sort_by(|a, b| a.metadata.created.cmp(&b.metadata.created));
        Ok(backups)
    }

    /// Drop backups beyond the retention count or older than the retention
    /// age. Ids in `keep` are never pruned. Returns the deleted ids.
    pub fn prune(&self, policy: &BackupsConfig, keep: &[String]) -> Result<Vec<String>> {
        let backups = self.list()?;
        let cutoff = Utc::now() - chrono::Duration::days(policy.retention_days as i64);
        let excess = backups.len().saturating_sub(policy.retention_count);

        let mut pruned = Vec::new();
        for (index, backup) in backups.iter().enumerate() {
            if keep.contains(&backup.id) {
                continue;
            }
            if index < excess || backup.metadata.created < cutoff {
                self.delete(&backup.id)?;
                pruned.push(backup.id.clone());
            }
        }
        if !pruned.is_empty() {
            tracing::debug!(count = pruned.len(), "Pruned backups");
        }
        Ok(pruned)
    }
}
