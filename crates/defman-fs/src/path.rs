//! Identifier validation and root containment

use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::{Error, Result};

/// Longest identifier accepted for artifact ids and source names.
pub const MAX_IDENTIFIER_LEN: usize = 128;

static IDENTIFIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]+$").expect("identifier pattern is valid")
});

/// Validate that `value` is safe to use as a single path component.
///
/// Only ASCII alphanumerics, `-` and `_` are accepted. `kind` names the value
/// in the error message ("Artifact id", "Source name", ...).
pub fn validate_identifier(value: &str, kind: &str) -> Result<()> {
    let reject = |reason: &str| {
        Err(Error::InvalidIdentifier {
            kind: kind.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        })
    };

    if value.is_empty() {
        return reject("must not be empty");
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return reject("is too long");
    }
    if value.contains("..") {
        return reject("must not contain '..'");
    }
    if value.contains('/') || value.contains('\\') {
        return reject("must not contain path separators");
    }
    if !IDENTIFIER_RE.is_match(value) {
        return reject("may only contain letters, digits, '-' and '_'");
    }
    Ok(())
}

/// Resolve `candidate` and confirm it stays inside `root`.
///
/// The check is lexical first (so it works before `root` exists), then repeated
/// on the canonical form of the deepest existing ancestor so a symlinked
/// directory cannot redirect a write outside the root.
pub fn ensure_within(root: &Path, candidate: &Path) -> Result<PathBuf> {
    let root_abs = lexical_absolute(root)?;
    let candidate_abs = lexical_absolute(candidate)?;

    let escape = || Error::PathEscape {
        path: candidate.to_path_buf(),
        root: root.to_path_buf(),
    };

    if candidate_abs == root_abs || !candidate_abs.starts_with(&root_abs) {
        return Err(escape());
    }

    if let Ok(real_root) = dunce::canonicalize(&root_abs) {
        let mut ancestor = candidate_abs.parent();
        while let Some(dir) = ancestor {
            if dir.exists() {
                let real_dir = dunce::canonicalize(dir).map_err(|e| Error::io(dir, e))?;
                if !real_dir.starts_with(&real_root) {
                    return Err(escape());
                }
                break;
            }
            ancestor = dir.parent();
        }
    }

    Ok(candidate_abs)
}

fn lexical_absolute(path: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(path).map_err(|e| Error::io(path, e))?;
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    Ok(out)
}
