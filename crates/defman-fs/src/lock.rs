//! Advisory locking keyed on logical resources
//!
//! Two layers guard every mutation:
//!
//! - an in-process registry (one slot per key, created on first use) that
//!   serializes threads and tasks of the same process, and
//! - an optional OS-level advisory lock on a lock file beside the guarded
//!   resource, which serializes independent processes (CLI vs. server).
//!
//! Acquisition always has a deadline. Running out of time yields
//! [`Error::LockContention`], never a deadlock. Lock files are left in place
//! after release; they carry no state.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use backoff::ExponentialBackoffBuilder;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::Serialize;

use crate::{Error, Result};

/// Snapshot of a live lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockInfo {
    pub key: String,
    pub holder_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Held {
    generation: u64,
    info: LockInfo,
    lease_deadline: Option<Instant>,
}

impl Held {
    fn is_expired(&self, now: Instant) -> bool {
        self.lease_deadline.is_some_and(|deadline| now >= deadline)
    }
}

#[derive(Debug, Default)]
struct Slot {
    state: Mutex<Option<Held>>,
    released: Condvar,
}

fn lock_state(slot: &Slot) -> MutexGuard<'_, Option<Held>> {
    slot.state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Process-wide registry of advisory locks.
#[derive(Debug, Default)]
pub struct LockManager {
    slots: Mutex<HashMap<String, Arc<Slot>>>,
    generation: AtomicU64,
    lease: Option<Duration>,
}

impl LockManager {
    /// Create a lock manager whose locks never expire.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a lock manager that grants leases of `lease` length.
    ///
    /// A waiter may take over a lock whose lease has run out.
    pub fn with_lease(lease: Duration) -> Self {
        Self {
            lease: Some(lease),
            ..Self::default()
        }
    }

    /// Acquire the in-process lock for `key`, waiting at most `timeout`.
    pub fn acquire(&self, key: &str, timeout: Duration) -> Result<LockGuard> {
        let started = Instant::now();
        let slot = self.slot(key);
        let deadline = started + timeout;

        let mut state = lock_state(&slot);
        loop {
            let now = Instant::now();
            let wait = match state.as_ref() {
                None => break,
                Some(held) if held.is_expired(now) => {
                    tracing::warn!(
                        key,
                        holder = %held.info.holder_id,
                        "Lease expired, taking over lock"
                    );
                    break;
                }
                Some(held) => {
                    if now >= deadline {
                        tracing::debug!(key, holder = %held.info.holder_id, "Lock contended");
                        return Err(Error::LockContention {
                            key: key.to_string(),
                            waited: started.elapsed(),
                        });
                    }
                    let until_deadline = deadline - now;
                    match held.lease_deadline {
                        Some(lease) => until_deadline.min(lease.saturating_duration_since(now)),
                        None => until_deadline,
                    }
                }
            };
            state = slot
                .released
                .wait_timeout(state, wait)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let acquired_at = Utc::now();
        let info = LockInfo {
            key: key.to_string(),
            holder_id: format!("{}:{}", std::process::id(), uuid::Uuid::new_v4()),
            acquired_at,
            expires_at: self
                .lease
                .and_then(|lease| chrono::Duration::from_std(lease).ok())
                .map(|lease| acquired_at + lease),
        };
        *state = Some(Held {
            generation,
            info: info.clone(),
            lease_deadline: self.lease.map(|lease| Instant::now() + lease),
        });
        drop(state);

        tracing::debug!(key, holder = %info.holder_id, "Lock acquired");
        Ok(LockGuard {
            slot,
            generation,
            info,
            file: None,
        })
    }

    /// Acquire `key` in-process and then the OS lock on `lock_file`.
    ///
    /// Both layers share the same `timeout` budget. The lock file and its
    /// parent directory are created if needed.
    pub fn acquire_with_file(
        &self,
        key: &str,
        lock_file: &Path,
        timeout: Duration,
    ) -> Result<LockGuard> {
        let started = Instant::now();
        let mut guard = self.acquire(key, timeout)?;
        let remaining = timeout.saturating_sub(started.elapsed());

        if let Some(parent) = lock_file.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_file)
            .map_err(|e| Error::io(lock_file, e))?;

        // On failure `guard` drops here and frees the in-process slot.
        lock_file_exclusive(&file, key, lock_file, remaining, started)?;
        guard.file = Some(file);
        Ok(guard)
    }

    /// Release a lock. Equivalent to dropping the guard.
    pub fn release(&self, guard: LockGuard) {
        drop(guard);
    }

    /// Locks currently held in this process.
    pub fn held(&self) -> Vec<LockInfo> {
        let slots: Vec<Arc<Slot>> = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let now = Instant::now();
        let mut held: Vec<LockInfo> = slots
            .iter()
            .filter_map(|slot| {
                lock_state(slot)
                    .as_ref()
                    .filter(|h| !h.is_expired(now))
                    .map(|h| h.info.clone())
            })
            .collect();
        held.sort_by(|a, b| a.key.cmp(&b.key));
        held
    }

    fn slot(&self, key: &str) -> Arc<Slot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(key.to_string()).or_default().clone()
    }
}

fn lock_file_exclusive(
    file: &File,
    key: &str,
    lock_file: &Path,
    timeout: Duration,
    started: Instant,
) -> Result<()> {
    let contended = || Error::LockContention {
        key: key.to_string(),
        waited: started.elapsed(),
    };
    let classify = |e: std::io::Error| {
        if is_contended(&e) {
            backoff::Error::transient(e)
        } else {
            backoff::Error::permanent(e)
        }
    };

    match file.try_lock_exclusive() {
        Ok(()) => return Ok(()),
        Err(e) if !is_contended(&e) => {
            return Err(Error::LockFailed {
                path: lock_file.to_path_buf(),
            });
        }
        Err(_) if timeout.is_zero() => return Err(contended()),
        Err(_) => {}
    }

    let policy = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(5))
        .with_max_interval(Duration::from_millis(100))
        .with_max_elapsed_time(Some(timeout))
        .build();

    backoff::retry(policy, || file.try_lock_exclusive().map_err(classify)).map_err(|e| match e {
        backoff::Error::Permanent(_) => Error::LockFailed {
            path: lock_file.to_path_buf(),
        },
        backoff::Error::Transient { .. } => contended(),
    })
}

fn is_contended(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Lock file path for a guarded resource: `.<name>.lock` in the same directory.
pub fn lock_file_beside(resource: &Path) -> PathBuf {
    let name = resource
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "root".to_string());
    resource.with_file_name(format!(".{name}.lock"))
}

/// A held lock. Dropping it releases both layers.
#[derive(Debug)]
pub struct LockGuard {
    slot: Arc<Slot>,
    generation: u64,
    info: LockInfo,
    file: Option<File>,
}

impl LockGuard {
    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    pub fn key(&self) -> &str {
        &self.info.key
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = FileExt::unlock(&file);
        }

        let mut state = lock_state(&self.slot);
        // A holder that lost its lease must not release the new owner.
        if state.as_ref().is_some_and(|h| h.generation == self.generation) {
            *state = None;
            tracing::debug!(key = %self.info.key, "Lock released");
        }
        drop(state);
        self.slot.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_timeout_fails_fast_when_held() {
        let locks = LockManager::new();
        let _held = locks.acquire("target", Duration::from_secs(1)).unwrap();

        let started = Instant::now();
        let err = locks.acquire("target", Duration::ZERO).unwrap_err();
        assert!(matches!(err, Error::LockContention { .. }));
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn reacquire_after_release() {
        let locks = LockManager::new();
        let guard = locks.acquire("target", Duration::ZERO).unwrap();
        locks.release(guard);
        assert!(locks.acquire("target", Duration::ZERO).is_ok());
    }

    #[test]
    fn different_keys_do_not_contend() {
        let locks = LockManager::new();
        let _a = locks.acquire("a", Duration::ZERO).unwrap();
        assert!(locks.acquire("b", Duration::ZERO).is_ok());
    }

    #[test]
    fn held_lists_live_locks() {
        let locks = LockManager::new();
        let _a = locks.acquire("b-key", Duration::ZERO).unwrap();
        let _b = locks.acquire("a-key", Duration::ZERO).unwrap();
        let keys: Vec<String> = locks.held().into_iter().map(|i| i.key).collect();
        assert_eq!(keys, vec!["a-key".to_string(), "b-key".to_string()]);
    }

    #[test]
    fn expired_lease_can_be_taken_over() {
        let locks = LockManager::with_lease(Duration::from_millis(200));
        let stale = locks.acquire("target", Duration::ZERO).unwrap();

        let fresh = locks.acquire("target", Duration::from_secs(1)).unwrap();
        assert_ne!(stale.info().holder_id, fresh.info().holder_id);

        // The stale holder releasing must not free the new owner.
        drop(stale);
        assert!(locks.acquire("target", Duration::ZERO).is_err());
    }

    #[test]
    fn file_lock_is_left_behind_and_reusable() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = lock_file_beside(&dir.path().join("agents"));
        let locks = LockManager::new();

        let guard = locks
            .acquire_with_file("agents", &lock_path, Duration::ZERO)
            .unwrap();
        drop(guard);
        assert!(lock_path.exists());

        assert!(
            locks
                .acquire_with_file("agents", &lock_path, Duration::ZERO)
                .is_ok()
        );
    }

    #[test]
    fn lock_file_beside_is_hidden_sibling() {
        let path = lock_file_beside(Path::new("/srv/state/agents"));
        assert_eq!(path, PathBuf::from("/srv/state/.agents.lock"));
    }
}
