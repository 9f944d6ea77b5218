//! [`TestTree`]: a temporary project laid out the way the engine expects.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::definition;

/// A temporary project root.
///
/// Default layout (matching the engine's default paths):
///
/// ```text
/// <root>/
/// ├── defman.toml
/// ├── .defman/definitions/   project tier
/// ├── user-defs/             user tier (set via config)
/// ├── bundled-defs/          bundled tier (set via config)
/// └── .claude/agents/        deploy target
/// ```
pub struct TestTree {
    temp_dir: TempDir,
}

impl Default for TestTree {
    fn default() -> Self {
        Self::new()
    }
}

impl TestTree {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root().join(relative)
    }

    pub fn project_dir(&self) -> PathBuf {
        self.path(".defman/definitions")
    }

    pub fn user_dir(&self) -> PathBuf {
        self.path("user-defs")
    }

    pub fn bundled_dir(&self) -> PathBuf {
        self.path("bundled-defs")
    }

    pub fn target_dir(&self) -> PathBuf {
        self.path(".claude/agents")
    }

    /// Write `<dir>/<id>.md` with front matter; returns its path.
    pub fn write_definition(&self, dir: &Path, id: &str, version: &str, body: &str) -> PathBuf {
        fs::create_dir_all(dir).unwrap();
        let path = dir.join(format!("{id}.md"));
        fs::write(&path, definition(id, version, body)).unwrap();
        path
    }

    /// Write a file relative to the root, creating parents.
    pub fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    /// Write `defman.toml`. The user and bundled tiers are pointed inside the
    /// tree so tests never read the real user config directory.
    pub fn write_config(&self, extra: &str) {
        let config = format!(
            "{extra}\n\n[paths]\nuser_dir = \"user-defs\"\nbundled_dir = \"bundled-defs\"\n"
        );
        fs::write(self.path("defman.toml"), config).unwrap();
    }

    /// Every file under `dir` with its bytes, keyed by relative path.
    pub fn snapshot(&self, dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
        let mut files = BTreeMap::new();
        collect(dir, dir, &mut files);
        files
    }

    pub fn assert_file_exists(&self, relative: &str) {
        let full_path = self.path(relative);
        assert!(
            full_path.exists(),
            "Expected file to exist: {}",
            full_path.display()
        );
    }

    pub fn assert_file_not_exists(&self, relative: &str) {
        let full_path = self.path(relative);
        assert!(
            !full_path.exists(),
            "Expected file NOT to exist: {}",
            full_path.display()
        );
    }

    pub fn assert_file_contains(&self, relative: &str, content: &str) {
        let full_path = self.path(relative);
        let file_content = fs::read_to_string(&full_path)
            .unwrap_or_else(|_| panic!("Could not read file: {}", full_path.display()));
        assert!(
            file_content.contains(content),
            "File {} does not contain expected content.\nExpected: {}\nActual: {}",
            full_path.display(),
            content,
            file_content
        );
    }
}

fn collect(base: &Path, dir: &Path, files: &mut BTreeMap<PathBuf, Vec<u8>>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect(base, &path, files);
        } else {
            let relative = path.strip_prefix(base).unwrap().to_path_buf();
            files.insert(relative, fs::read(&path).unwrap());
        }
    }
}
