//! File system doubles for the deployment seam.
//!
//! Both wrap [`OsFileSystem`], so the bytes on disk stay real and tests can
//! inspect the target directory afterwards.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use defman_fs::{Error, FileSystem, OsFileSystem, Result};

/// One call made through the [`FileSystem`] seam.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsCall {
    Read(PathBuf),
    Exists(PathBuf),
    WriteAtomic(PathBuf),
    RemoveFile(PathBuf),
    CreateDirAll(PathBuf),
}

impl FsCall {
    pub fn path(&self) -> &Path {
        match self {
            Self::Read(p)
            | Self::Exists(p)
            | Self::WriteAtomic(p)
            | Self::RemoveFile(p)
            | Self::CreateDirAll(p) => p,
        }
    }

    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::WriteAtomic(_) | Self::RemoveFile(_) | Self::CreateDirAll(_)
        )
    }
}

/// Records every call, then delegates to the real file system.
#[derive(Debug, Default)]
pub struct RecordingFs {
    inner: OsFileSystem,
    calls: Mutex<Vec<FsCall>>,
}

impl RecordingFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<FsCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn mutations(&self) -> Vec<FsCall> {
        self.calls().into_iter().filter(FsCall::is_mutation).collect()
    }

    fn record(&self, call: FsCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl FileSystem for RecordingFs {
    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.record(FsCall::Read(path.to_path_buf()));
        self.inner.read(path)
    }

    fn exists(&self, path: &Path) -> bool {
        self.record(FsCall::Exists(path.to_path_buf()));
        self.inner.exists(path)
    }

    fn write_atomic(&self, path: &Path, content: &[u8]) -> Result<()> {
        self.record(FsCall::WriteAtomic(path.to_path_buf()));
        self.inner.write_atomic(path, content)
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        self.record(FsCall::RemoveFile(path.to_path_buf()));
        self.inner.remove_file(path)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.record(FsCall::CreateDirAll(path.to_path_buf()));
        self.inner.create_dir_all(path)
    }
}

/// Injects faults into writes whose file name matches.
///
/// - `corrupting`: the write succeeds but lands different bytes, so the
///   post-write hash check fails
/// - `failing`: the write returns an I/O error
/// - `with_write_delay`: every write sleeps first, for timeout tests
#[derive(Debug, Default)]
pub struct FaultyFs {
    inner: OsFileSystem,
    corrupt: BTreeSet<String>,
    fail: BTreeSet<String>,
    write_delay: Option<Duration>,
}

impl FaultyFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn corrupting(mut self, file_name: &str) -> Self {
        self.corrupt.insert(file_name.to_string());
        self
    }

    pub fn failing(mut self, file_name: &str) -> Self {
        self.fail.insert(file_name.to_string());
        self
    }

    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    fn matches(set: &BTreeSet<String>, path: &Path) -> bool {
        path.file_name()
            .is_some_and(|name| set.contains(name.to_string_lossy().as_ref()))
    }
}

impl FileSystem for FaultyFs {
    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.inner.read(path)
    }

    fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path)
    }

    fn write_atomic(&self, path: &Path, content: &[u8]) -> Result<()> {
        if let Some(delay) = self.write_delay {
            std::thread::sleep(delay);
        }
        if Self::matches(&self.fail, path) {
            return Err(Error::io(
                path,
                std::io::Error::other("injected write failure"),
            ));
        }
        if Self::matches(&self.corrupt, path) {
            let mut damaged = content.to_vec();
            damaged.extend_from_slice(b"\n<corrupted>");
            return self.inner.write_atomic(path, &damaged);
        }
        self.inner.write_atomic(path, content)
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        self.inner.remove_file(path)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.inner.create_dir_all(path)
    }
}
