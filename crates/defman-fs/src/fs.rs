//! Filesystem seam used by the deployment engine
//!
//! Everything that mutates a deployment target goes through [`FileSystem`], so
//! tests can substitute a recording implementation and assert that rejected
//! requests never reach the disk.

use std::fmt::Debug;
use std::fs;
use std::path::Path;

use crate::io::{self, RobustnessConfig};
use crate::{Error, Result};

/// Filesystem operations needed by transactional deploys and backups.
pub trait FileSystem: Send + Sync + Debug {
    /// Read a whole file.
    fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Whether a file exists at `path`.
    fn exists(&self, path: &Path) -> bool;

    /// Replace `path` with `content` by temp-then-rename.
    fn write_atomic(&self, path: &Path, content: &[u8]) -> Result<()>;

    /// Remove a file. Missing files are not an error.
    fn remove_file(&self, path: &Path) -> Result<()>;

    /// Create a directory and its parents.
    fn create_dir_all(&self, path: &Path) -> Result<()>;
}

/// The real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFileSystem {
    robustness: RobustnessConfig,
}

impl OsFileSystem {
    pub fn new(robustness: RobustnessConfig) -> Self {
        Self { robustness }
    }
}

impl FileSystem for OsFileSystem {
    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        io::read_bytes(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn write_atomic(&self, path: &Path, content: &[u8]) -> Result<()> {
        io::write_atomic(path, content, self.robustness)
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(path, e)),
        }
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).map_err(|e| Error::io(path, e))
    }
}
