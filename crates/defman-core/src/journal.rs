//! Append-only deploy journal
//!
//! `journal.jsonl` holds one JSON object per line. A transaction writes a
//! `begun` entry before its first write and a `committed` or `rolled_back`
//! entry when it ends. A `begun` without a terminal entry marks a deploy
//! that died mid-flight; recovery restores its backup.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::Result;

/// One artifact write planned by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalWrite {
    pub id: String,
    pub path: PathBuf,
    pub content_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JournalEvent {
    Begun {
        backup_id: String,
        target_dir: PathBuf,
        writes: Vec<JournalWrite>,
    },
    Committed {
        written: Vec<String>,
        unchanged: Vec<String>,
    },
    RolledBack {
        reason: String,
        failed: Vec<String>,
    },
}

impl JournalEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Begun { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub transaction_id: String,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: JournalEvent,
}

impl JournalEntry {
    pub fn new(transaction_id: impl Into<String>, event: JournalEvent) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            at: Utc::now(),
            event,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry under an exclusive lock and flush it to disk.
    pub fn append(&self, entry: &JournalEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| defman_fs::Error::io(parent, e))?;
        }
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| defman_fs::Error::io(&self.path, e))?;
        file.lock_exclusive()
            .map_err(|e| defman_fs::Error::io(&self.path, e))?;
        let written = terminate_torn_line(&mut file)
            .and_then(|()| file.write_all(line.as_bytes()))
            .and_then(|()| file.sync_data());
        let _ = FileExt::unlock(&file);
        written.map_err(|e| defman_fs::Error::io(&self.path, e))?;
        Ok(())
    }

    /// Every readable entry, in file order.
    ///
    /// A torn trailing line from a crash is skipped with a warning.
    pub fn entries(&self) -> Result<Vec<JournalEntry>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(defman_fs::Error::io(&self.path, e).into()),
        };
        file.lock_shared()
            .map_err(|e| defman_fs::Error::io(&self.path, e))?;

        let mut entries = Vec::new();
        for (number, line) in BufReader::new(&file).lines().enumerate() {
            let line = line.map_err(|e| defman_fs::Error::io(&self.path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!(
                    path = %self.path.display(),
                    line = number + 1,
                    error = %e,
                    "Skipping unreadable journal line"
                ),
            }
        }
        let _ = FileExt::unlock(&file);
        Ok(entries)
    }

    /// `begun` entries of transactions that never reached a terminal entry.
    pub fn unfinished(&self) -> Result<Vec<JournalEntry>> {
        let entries = self.entries()?;
        let finished: HashSet<&str> = entries
            .iter()
            .filter(|e| e.event.is_terminal())
            .map(|e| e.transaction_id.as_str())
            .collect();
        Ok(entries
            .iter()
            .filter(|e| !e.event.is_terminal() && !finished.contains(e.transaction_id.as_str()))
            .cloned()
            .collect())
    }
}

/// A crash can leave the last line without its newline; start a fresh line
/// so the next entry is not glued onto it.
fn terminate_torn_line(file: &mut File) -> std::io::Result<()> {
    if file.metadata()?.len() == 0 {
        return Ok(());
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    if last[0] != b'\n' {
        file.write_all(b"\n")?;
    }
    Ok(())
}
