//! Transactional deployment
//!
//! A deploy applies a [`ResolutionPlan`] to a target directory in one
//! transaction:
//!
//! 1. validate every id and target path (no filesystem access before this)
//! 2. lock the target directory, in-process and across processes
//! 3. back up every path about to change, once for the whole batch
//! 4. journal `begun`, then write each artifact by temp-then-rename
//! 5. re-read every written file and compare its hash
//! 6. journal `committed`, or restore the backup and journal `rolled_back`
//!
//! A single-artifact deploy is a batch of one.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use defman_fs::{FileSystem, LockManager, compute_checksum, ensure_within, lock_file_beside, validate_identifier};
use serde::Serialize;

use crate::backup::{Backup, BackupManager};
use crate::config::BackupsConfig;
use crate::definition::DefinitionRecord;
use crate::events::Stage;
use crate::jobs::JobContext;
use crate::journal::{Journal, JournalEntry, JournalEvent, JournalWrite};
use crate::resolver::ResolutionPlan;
use crate::{Error, Result};

/// Outcome of a committed deploy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployResult {
    pub transaction_id: String,
    /// Absent when nothing needed writing.
    pub backup_id: Option<String>,
    pub written: Vec<String>,
    pub unchanged: Vec<String>,
}

impl DeployResult {
    pub fn summary(&self) -> String {
        format!(
            "{} written, {} unchanged",
            self.written.len(),
            self.unchanged.len()
        )
    }
}

/// A transaction the journal showed as unfinished, now rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveredTransaction {
    pub transaction_id: String,
    pub backup_id: String,
    pub restored: Vec<PathBuf>,
}

#[derive(Debug)]
struct PlannedWrite<'a> {
    record: &'a DefinitionRecord,
    path: PathBuf,
}

/// Applies plans to target directories.
#[derive(Debug, Clone)]
pub struct DeployEngine {
    fs: Arc<dyn FileSystem>,
    locks: Arc<LockManager>,
    backups: BackupManager,
    journal: Journal,
    lock_timeout: Duration,
    retention: BackupsConfig,
}

impl DeployEngine {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        locks: Arc<LockManager>,
        backups: BackupManager,
        journal: Journal,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            fs,
            locks,
            backups,
            journal,
            lock_timeout,
            retention: BackupsConfig::default(),
        }
    }

    pub fn with_retention(mut self, retention: BackupsConfig) -> Self {
        self.retention = retention;
        self
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Deploy every winner of `plan` into `target_dir`.
    pub fn deploy(&self, plan: &ResolutionPlan, target_dir: &Path, ctx: &JobContext) -> Result<DeployResult> {
        let planned = self.plan_writes(plan, target_dir)?;
        ctx.check_cancelled()?;
        ctx.emit(Stage::Progress, format!("deploying {} artifact(s)", planned.len()));

        let key = format!("deploy:{}", target_dir.display());
        let _guard = self
            .locks
            .acquire_with_file(&key, &lock_file_beside(target_dir), self.lock_timeout)?;

        self.fs.create_dir_all(target_dir)?;
        let transaction_id = uuid::Uuid::new_v4().to_string();

        let mut pending = Vec::new();
        let mut unchanged = Vec::new();
        for item in &planned {
            if self.fs.exists(&item.path)
                && compute_checksum(&self.fs.read(&item.path)?) == item.record.content_hash
            {
                unchanged.push(item.record.id.clone());
            } else {
                pending.push(item);
            }
        }

        if pending.is_empty() {
            tracing::info!(target = %target_dir.display(), "Target already up to date");
            return Ok(DeployResult {
                transaction_id,
                backup_id: None,
                written: Vec::new(),
                unchanged,
            });
        }

        let paths: Vec<PathBuf> = pending.iter().map(|p| p.path.clone()).collect();
        let backup = self.backups.create(self.fs.as_ref(), target_dir, &paths)?;
        self.journal.append(&JournalEntry::new(
            &transaction_id,
            JournalEvent::Begun {
                backup_id: backup.id.clone(),
                target_dir: target_dir.to_path_buf(),
                writes: pending
                    .iter()
                    .map(|p| JournalWrite {
                        id: p.record.id.clone(),
                        path: p.path.clone(),
                        content_hash: p.record.content_hash.clone(),
                    })
                    .collect(),
            },
        ))?;
        tracing::info!(tx = %transaction_id, backup = %backup.id, count = pending.len(), "Deploy transaction begun");

        let total = pending.len();
        for (index, item) in pending.iter().enumerate() {
            if ctx.is_cancelled() {
                self.roll_back(&transaction_id, &backup, "cancelled", Vec::new())?;
                return Err(Error::Cancelled);
            }

            let written = self
                .fs
                .read(&item.record.raw_path)
                .and_then(|content| self.fs.write_atomic(&item.path, &content));
            if let Err(e) = written {
                tracing::warn!(id = %item.record.id, error = %e, "Write failed");
                let failed = vec![item.record.id.clone()];
                self.roll_back(&transaction_id, &backup, &e.to_string(), failed.clone())?;
                return Err(failure(failed, total, None));
            }
            ctx.progress(index + 1, total, format!("wrote {}", item.record.id));
        }

        let mut mismatches = Vec::new();
        for item in &pending {
            let actual = self
                .fs
                .read(&item.path)
                .map(|bytes| compute_checksum(&bytes))
                .unwrap_or_else(|e| format!("unreadable: {e}"));
            if actual != item.record.content_hash {
                tracing::warn!(id = %item.record.id, expected = %item.record.content_hash, %actual, "Verification failed");
                mismatches.push((item.record.id.clone(), item.record.content_hash.clone(), actual));
            }
        }
        if !mismatches.is_empty() {
            let failed: Vec<String> = mismatches.iter().map(|(id, _, _)| id.clone()).collect();
            self.roll_back(&transaction_id, &backup, "verification failed", failed.clone())?;
            return Err(failure(failed, total, mismatches.into_iter().next()));
        }
        // A job that timed out mid-write must not commit.
        if ctx.is_cancelled() {
            self.roll_back(&transaction_id, &backup, "cancelled", Vec::new())?;
            return Err(Error::Cancelled);
        }

        let written: Vec<String> = pending.iter().map(|p| p.record.id.clone()).collect();
        let committed = self.journal.append(&JournalEntry::new(
            &transaction_id,
            JournalEvent::Committed {
                written: written.clone(),
                unchanged: unchanged.clone(),
            },
        ));
        if let Err(e) = committed {
            // Unjournaled commits would be reverted by a later recovery.
            tracing::error!(tx = %transaction_id, error = %e, "Could not journal commit");
            self.roll_back(&transaction_id, &backup, "commit not journaled", Vec::new())?;
            return Err(e);
        }
        tracing::info!(tx = %transaction_id, written = written.len(), "Deploy committed");

        if let Err(e) = self.prune_backups(&self.retention, Some(&backup.id)) {
            tracing::warn!(error = %e, "Backup pruning failed");
        }

        Ok(DeployResult {
            transaction_id,
            backup_id: Some(backup.id),
            written,
            unchanged,
        })
    }

    /// Validate ids and resolve target paths without touching the filesystem
    /// seam.
    fn plan_writes<'a>(&self, plan: &'a ResolutionPlan, target_dir: &Path) -> Result<Vec<PlannedWrite<'a>>> {
        let mut planned = Vec::with_capacity(plan.len());
        for (id, record) in &plan.winners {
            validate_identifier(id, "Artifact id")?;
            if record.id != *id {
                return Err(Error::validation(format!(
                    "plan entry '{id}' holds record '{}'",
                    record.id
                )));
            }
            let path = ensure_within(target_dir, &target_dir.join(record.file_name()))?;
            planned.push(PlannedWrite { record, path });
        }
        Ok(planned)
    }

    fn roll_back(&self, transaction_id: &str, backup: &Backup, reason: &str, failed: Vec<String>) -> Result<()> {
        tracing::warn!(tx = %transaction_id, %reason, "Rolling back deploy");
        if let Err(e) = self.backups.restore(self.fs.as_ref(), backup) {
            // No terminal entry: recovery will retry this backup.
            tracing::error!(tx = %transaction_id, error = %e, "Rollback failed");
            return Err(Error::RollbackFailed {
                transaction_id: transaction_id.to_string(),
                message: e.to_string(),
            });
        }
        self.journal.append(&JournalEntry::new(
            transaction_id,
            JournalEvent::RolledBack {
                reason: reason.to_string(),
                failed,
            },
        ))
    }

    /// Prune backups by `policy`, sparing `keep` and every backup an
    /// unfinished transaction still needs.
    pub fn prune_backups(&self, policy: &BackupsConfig, keep: Option<&str>) -> Result<Vec<String>> {
        let mut protected: Vec<String> = self
            .journal
            .unfinished()?
            .into_iter()
            .filter_map(|entry| match entry.event {
                JournalEvent::Begun { backup_id, .. } => Some(backup_id),
                _ => None,
            })
            .collect();
        protected.extend(keep.map(str::to_string));
        self.backups.prune(policy, &protected)
    }

    /// Roll back every transaction the journal shows as unfinished.
    ///
    /// Newest first, so the oldest backup on a target is restored last.
    pub fn recover(&self) -> Result<Vec<RecoveredTransaction>> {
        let mut recovered = Vec::new();
        for entry in self.journal.unfinished()?.into_iter().rev() {
            let JournalEvent::Begun {
                backup_id,
                target_dir,
                ..
            } = &entry.event
            else {
                continue;
            };

            let key = format!("deploy:{}", target_dir.display());
            let _guard = self
                .locks
                .acquire_with_file(&key, &lock_file_beside(target_dir), self.lock_timeout)?;

            let Some(backup) = self.backups.get(backup_id)? else {
                tracing::error!(tx = %entry.transaction_id, backup = %backup_id, "Backup missing, cannot restore");
                self.journal.append(&JournalEntry::new(
                    &entry.transaction_id,
                    JournalEvent::RolledBack {
                        reason: format!("backup {backup_id} missing"),
                        failed: Vec::new(),
                    },
                ))?;
                continue;
            };
            let restored = self.backups.restore(self.fs.as_ref(), &backup)?;
            self.journal.append(&JournalEntry::new(
                &entry.transaction_id,
                JournalEvent::RolledBack {
                    reason: "recovered after interruption".to_string(),
                    failed: Vec::new(),
                },
            ))?;
            tracing::info!(tx = %entry.transaction_id, backup = %backup_id, "Recovered unfinished deploy");
            recovered.push(RecoveredTransaction {
                transaction_id: entry.transaction_id.clone(),
                backup_id: backup_id.clone(),
                restored,
            });
        }
        Ok(recovered)
    }
}

fn failure(failed: Vec<String>, total: usize, mismatch: Option<(String, String, String)>) -> Error {
    match mismatch {
        Some((id, expected, actual)) if total == 1 => Error::VerificationFailure {
            id,
            expected,
            actual,
        },
        _ => Error::PartialFailure {
            failed_count: failed.len(),
            failed,
            total,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{SourceRef, Tier};
    use crate::events::{MemorySink, NullSink};
    use crate::jobs::JobKind;
    use defman_fs::OsFileSystem;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        source: PathBuf,
        target: PathBuf,
        engine: DeployEngine,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("defs");
        let target = temp.path().join("target");
        fs::create_dir_all(&source).unwrap();
        let engine = DeployEngine::new(
            Arc::new(OsFileSystem::default()),
            Arc::new(LockManager::new()),
            BackupManager::new(temp.path().join("state/backups")),
            Journal::new(temp.path().join("state/journal.jsonl")),
            Duration::from_millis(200),
        );
        Fixture {
            _temp: temp,
            source,
            target,
            engine,
        }
    }

    fn write_def(fx: &Fixture, id: &str, body: &str) -> DefinitionRecord {
        let path = fx.source.join(format!("{id}.md"));
        fs::write(&path, body).unwrap();
        DefinitionRecord::parse(
            &path,
            body.as_bytes(),
            Tier::Project,
            SourceRef::File {
                path: fx.source.clone(),
            },
            0,
        )
        .unwrap()
    }

    fn plan_of(records: Vec<DefinitionRecord>) -> ResolutionPlan {
        ResolutionPlan {
            winners: records.into_iter().map(|r| (r.id.clone(), r)).collect::<BTreeMap<_, _>>(),
            ..ResolutionPlan::default()
        }
    }

    fn ctx() -> JobContext {
        JobContext::detached(JobKind::Deploy, Arc::new(NullSink))
    }

    #[test]
    fn deploy_writes_and_commits() {
        let fx = fixture();
        let plan = plan_of(vec![write_def(&fx, "a", "alpha"), write_def(&fx, "b", "beta")]);

        let result = fx.engine.deploy(&plan, &fx.target, &ctx()).unwrap();

        assert_eq!(result.written, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(fs::read_to_string(fx.target.join("a.md")).unwrap(), "alpha");
        let events = fx.engine.journal().entries().unwrap();
        assert!(matches!(events.last().unwrap().event, JournalEvent::Committed { .. }));
    }

    #[test]
    fn redeploy_is_unchanged() {
        let fx = fixture();
        let plan = plan_of(vec![write_def(&fx, "a", "alpha")]);
        fx.engine.deploy(&plan, &fx.target, &ctx()).unwrap();

        let second = fx.engine.deploy(&plan, &fx.target, &ctx()).unwrap();

        assert!(second.written.is_empty());
        assert_eq!(second.unchanged, vec!["a".to_string()]);
        assert_eq!(second.backup_id, None);
    }

    #[test]
    fn single_item_verification_failure_rolls_back() {
        let fx = fixture();
        let mut record = write_def(&fx, "a", "alpha");
        record.content_hash = compute_checksum(b"something else");
        fs::create_dir_all(&fx.target).unwrap();
        fs::write(fx.target.join("a.md"), "previous").unwrap();

        let err = fx
            .engine
            .deploy(&plan_of(vec![record]), &fx.target, &ctx())
            .unwrap_err();

        assert!(matches!(err, Error::VerificationFailure { .. }));
        assert_eq!(fs::read_to_string(fx.target.join("a.md")).unwrap(), "previous");
    }

    #[test]
    fn cancelled_before_start_touches_nothing() {
        let fx = fixture();
        let plan = plan_of(vec![write_def(&fx, "a", "alpha")]);
        let ctx = ctx();
        ctx.token().cancel();

        let err = fx.engine.deploy(&plan, &fx.target, &ctx).unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert!(!fx.target.exists());
    }

    #[test]
    fn mismatched_plan_key_is_rejected() {
        let fx = fixture();
        let record = write_def(&fx, "a", "alpha");
        let plan = ResolutionPlan {
            winners: BTreeMap::from([("b".to_string(), record)]),
            ..ResolutionPlan::default()
        };
        let err = fx.engine.deploy(&plan, &fx.target, &ctx()).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Validation);
    }

    #[test]
    fn recover_restores_unfinished_transaction() {
        let fx = fixture();
        fs::create_dir_all(&fx.target).unwrap();
        let path = fx.target.join("a.md");
        fs::write(&path, "before").unwrap();

        let fs_impl = OsFileSystem::default();
        let backup = fx
            .engine
            .backups()
            .create(&fs_impl, &fx.target, &[path.clone()])
            .unwrap();
        fx.engine
            .journal()
            .append(&JournalEntry::new(
                "tx-crashed",
                JournalEvent::Begun {
                    backup_id: backup.id.clone(),
                    target_dir: fx.target.clone(),
                    writes: Vec::new(),
                },
            ))
            .unwrap();
        fs::write(&path, "half-deployed").unwrap();

        let recovered = fx.engine.recover().unwrap();

        assert_eq!(recovered.len(), 1);
        assert_eq!(fs::read_to_string(&path).unwrap(), "before");
        assert!(fx.engine.recover().unwrap().is_empty());
    }

    /// Back up `a.md`, journal `begun`, then leave `content` behind as if the
    /// process died mid-write.
    fn crash_writing(fx: &Fixture, tx: &str, content: &str) -> String {
        let path = fx.target.join("a.md");
        let backup = fx
            .engine
            .backups()
            .create(&OsFileSystem::default(), &fx.target, &[path.clone()])
            .unwrap();
        fx.engine
            .journal()
            .append(&JournalEntry::new(
                tx,
                JournalEvent::Begun {
                    backup_id: backup.id.clone(),
                    target_dir: fx.target.clone(),
                    writes: Vec::new(),
                },
            ))
            .unwrap();
        fs::write(&path, content).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        backup.id
    }

    #[test]
    fn recover_unwinds_stacked_transactions_newest_first() {
        let fx = fixture();
        fs::create_dir_all(&fx.target).unwrap();
        fs::write(fx.target.join("a.md"), "original").unwrap();
        crash_writing(&fx, "tx1", "half-of-tx1");
        crash_writing(&fx, "tx2", "half-of-tx2");

        let recovered = fx.engine.recover().unwrap();

        let order: Vec<&str> = recovered.iter().map(|r| r.transaction_id.as_str()).collect();
        assert_eq!(order, vec!["tx2", "tx1"]);
        assert_eq!(fs::read_to_string(fx.target.join("a.md")).unwrap(), "original");
    }

    #[test]
    fn pruning_after_commit_spares_unfinished_backups() {
        let fx = fixture();
        let engine = fx.engine.clone().with_retention(BackupsConfig {
            retention_count: 1,
            retention_days: 30,
        });
        fs::create_dir_all(&fx.target).unwrap();
        fs::write(fx.target.join("a.md"), "original").unwrap();
        let crashed = crash_writing(&fx, "tx1", "half-of-tx1");

        let plan = plan_of(vec![write_def(&fx, "b", "beta")]);
        engine.deploy(&plan, &fx.target, &ctx()).unwrap();

        assert!(engine.backups().get(&crashed).unwrap().is_some());
        let recovered = engine.recover().unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(fs::read_to_string(fx.target.join("a.md")).unwrap(), "original");
    }

    #[test]
    fn recover_skips_missing_backup_and_continues() {
        let fx = fixture();
        fs::create_dir_all(&fx.target).unwrap();
        fs::write(fx.target.join("a.md"), "original").unwrap();
        crash_writing(&fx, "tx1", "half-of-tx1");
        let lost = crash_writing(&fx, "tx2", "half-of-tx2");
        fx.engine.backups().delete(&lost).unwrap();

        let recovered = fx.engine.recover().unwrap();

        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].transaction_id, "tx1");
        assert_eq!(fs::read_to_string(fx.target.join("a.md")).unwrap(), "original");
        assert!(fx.engine.journal().unfinished().unwrap().is_empty());
    }

    /// Swaps the journal file for a directory during the first artifact
    /// write, so every later journal append fails.
    #[derive(Debug)]
    struct JournalBreakingFs {
        inner: OsFileSystem,
        journal: PathBuf,
    }

    impl FileSystem for JournalBreakingFs {
        fn read(&self, path: &Path) -> defman_fs::Result<Vec<u8>> {
            self.inner.read(path)
        }

        fn exists(&self, path: &Path) -> bool {
            self.inner.exists(path)
        }

        fn write_atomic(&self, path: &Path, content: &[u8]) -> defman_fs::Result<()> {
            if self.journal.is_file() {
                fs::remove_file(&self.journal).unwrap();
                fs::create_dir(&self.journal).unwrap();
            }
            self.inner.write_atomic(path, content)
        }

        fn remove_file(&self, path: &Path) -> defman_fs::Result<()> {
            self.inner.remove_file(path)
        }

        fn create_dir_all(&self, path: &Path) -> defman_fs::Result<()> {
            self.inner.create_dir_all(path)
        }
    }

    #[test]
    fn unjournaled_commit_rolls_back() {
        let fx = fixture();
        fs::create_dir_all(&fx.target).unwrap();
        fs::write(fx.target.join("a.md"), "previous").unwrap();
        let journal = fx.engine.journal().clone();
        let engine = DeployEngine::new(
            Arc::new(JournalBreakingFs {
                inner: OsFileSystem::default(),
                journal: journal.path().to_path_buf(),
            }),
            Arc::new(LockManager::new()),
            fx.engine.backups().clone(),
            journal,
            Duration::from_millis(200),
        );
        let plan = plan_of(vec![write_def(&fx, "a", "alpha")]);

        assert!(engine.deploy(&plan, &fx.target, &ctx()).is_err());
        assert_eq!(fs::read_to_string(fx.target.join("a.md")).unwrap(), "previous");
    }

    #[test]
    fn progress_events_are_emitted() {
        let fx = fixture();
        let sink = Arc::new(MemorySink::new());
        let ctx = JobContext::detached(JobKind::Deploy, sink.clone());
        let plan = plan_of(vec![write_def(&fx, "a", "alpha"), write_def(&fx, "b", "beta")]);

        fx.engine.deploy(&plan, &fx.target, &ctx).unwrap();

        let progress = sink
            .events()
            .into_iter()
            .filter(|e| e.phase == "deploy.progress" && e.progress.is_some())
            .count();
        assert_eq!(progress, 2);
    }
}
