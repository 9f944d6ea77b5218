//! Filesystem layer for defman
//!
//! Provides identifier validation, root containment, atomic I/O,
//! content checksums, format-agnostic config loading and the advisory
//! [`LockManager`] shared by every mutating operation.

pub mod checksum;
pub mod config;
pub mod error;
pub mod fs;
pub mod io;
pub mod lock;
pub mod path;

pub use checksum::compute_checksum;
pub use config::ConfigStore;
pub use error::{Error, Result};
pub use fs::{FileSystem, OsFileSystem};
pub use io::RobustnessConfig;
pub use lock::{LockGuard, LockInfo, LockManager, lock_file_beside};
pub use path::{ensure_within, validate_identifier};
