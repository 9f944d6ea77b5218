//! Git repositories holding definition files.
//!
//! Built with `git2` only, so tests need no `git` binary on the PATH.

use std::fs;
use std::path::Path;

use git2::{Repository, Signature};

/// Initialises a repository at `path` and commits `files` under `subdir`.
///
/// Returns the repository and the commit id, which is also the etag a
/// `GitFetcher` reports for it.
///
/// # Panics
/// Panics if any git or filesystem operation fails.
pub fn definitions_repo(
    path: &Path,
    subdir: &str,
    files: &[(&str, &str)],
) -> (Repository, String) {
    let repo = Repository::init(path).unwrap_or_else(|e| {
        panic!(
            "definitions_repo: failed to init repository at {}: {e}",
            path.display()
        )
    });
    let head = commit_definitions(&repo, subdir, files, "Add definitions");
    (repo, head)
}

/// Writes `files` under `subdir` and commits everything in the worktree.
///
/// # Panics
/// Panics if any git or filesystem operation fails.
pub fn commit_definitions(
    repo: &Repository,
    subdir: &str,
    files: &[(&str, &str)],
    message: &str,
) -> String {
    let workdir = repo
        .workdir()
        .unwrap_or_else(|| panic!("commit_definitions: repository is bare"));
    let dir = workdir.join(subdir);
    fs::create_dir_all(&dir)
        .unwrap_or_else(|e| panic!("commit_definitions: failed to create {subdir}: {e}"));
    for (name, content) in files {
        fs::write(dir.join(name), content)
            .unwrap_or_else(|e| panic!("commit_definitions: failed to write {name}: {e}"));
    }

    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = Signature::now("Test User", "test@test.com").unwrap();
    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
        .unwrap_or_else(|e| panic!("commit_definitions: commit failed: {e}"))
        .to_string()
}
