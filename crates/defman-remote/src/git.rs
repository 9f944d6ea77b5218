//! Git transport: `*.md` files at the remote HEAD, keyed on the commit id

use std::path::{Component, Path};

use async_trait::async_trait;
use git2::{Direction, Remote, build::RepoBuilder};

use crate::{Error, FetchRequest, FetchResponse, Fetcher, RemoteArtifact, Result, SourceKind};

/// Fetches definitions from a git repository.
///
/// The etag is the HEAD commit id, checked with a ref listing before any
/// clone. A changed HEAD triggers a fresh clone into a
/// throwaway directory.
#[derive(Debug, Clone, Default)]
pub struct GitFetcher;

impl GitFetcher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Fetcher for GitFetcher {
    fn kind(&self) -> SourceKind {
        SourceKind::Git
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
        let request = request.clone();
        tokio::task::spawn_blocking(move || fetch_blocking(&request))
            .await
            .map_err(|e| Error::Task(e.to_string()))?
    }
}

fn fetch_blocking(request: &FetchRequest) -> Result<FetchResponse> {
    if let Some(subdir) = &request.subdir {
        validate_subdir(subdir)?;
    }

    let head = remote_head(&request.url)?;
    if request.etag.as_deref() == Some(head.as_str()) {
        tracing::debug!(url = %request.url, head = %head, "Remote HEAD unchanged");
        return Ok(FetchResponse::NotModified);
    }

    let checkout = tempfile::tempdir().map_err(|e| Error::io(std::env::temp_dir(), e))?;
    tracing::debug!(url = %request.url, head = %head, "Cloning remote");
    let repo = RepoBuilder::new().clone(&request.url, checkout.path())?;
    let cloned_head = repo
        .head()?
        .target()
        .map(|oid| oid.to_string())
        .unwrap_or(head);

    let dir = match &request.subdir {
        Some(subdir) => checkout.path().join(subdir),
        None => checkout.path().to_path_buf(),
    };
    // A committed symlink must not lead the subdir out of the checkout.
    let inside = dir
        .canonicalize()
        .ok()
        .zip(checkout.path().canonicalize().ok())
        .is_some_and(|(dir, root)| dir.starts_with(root));
    if !inside {
        return Err(Error::InvalidSubdir {
            subdir: request.subdir.clone().unwrap_or_default(),
        });
    }
    let artifacts = collect_markdown(&dir)?;

    Ok(FetchResponse::Modified {
        etag: Some(cloned_head),
        artifacts,
    })
}

fn remote_head(url: &str) -> Result<String> {
    let mut remote = Remote::create_detached(url)?;
    remote.connect(Direction::Fetch)?;
    let head = remote
        .list()?
        .iter()
        .find(|h| h.name() == "HEAD")
        .map(|h| h.oid().to_string());
    let _ = remote.disconnect();
    head.ok_or_else(|| Error::NoHead {
        url: url.to_string(),
    })
}

fn validate_subdir(subdir: &str) -> Result<()> {
    let path = Path::new(subdir);
    let safe = !subdir.is_empty() && path.components().all(|c| matches!(c, Component::Normal(_)));
    if safe {
        Ok(())
    } else {
        Err(Error::InvalidSubdir {
            subdir: subdir.to_string(),
        })
    }
}

fn collect_markdown(dir: &Path) -> Result<Vec<RemoteArtifact>> {
    if !dir.is_dir() {
        return Err(Error::InvalidSubdir {
            subdir: dir.display().to_string(),
        });
    }

    let mut artifacts = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| Error::io(dir, e))? {
        let entry = entry.map_err(|e| Error::io(dir, e))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        let file_type = entry.file_type().map_err(|e| Error::io(&path, e))?;
        if file_type.is_symlink() {
            tracing::warn!(path = %path.display(), "Skipping symlinked definition");
            continue;
        }
        if !file_type.is_file() {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let content = std::fs::read(&path).map_err(|e| Error::io(&path, e))?;
        artifacts.push(RemoteArtifact {
            name: name.to_string(),
            content,
        });
    }
    artifacts.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(artifacts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{Repository, Signature};
    use rstest::rstest;

    fn commit_all(repo: &Repository, message: &str) -> String {
        let mut index = repo.index().unwrap();
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = Signature::now("Test", "test@example.com").unwrap();
        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .unwrap()
            .to_string()
    }

    fn seeded_repo() -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        std::fs::create_dir_all(dir.path().join("agents")).unwrap();
        std::fs::write(
            dir.path().join("agents/reviewer.md"),
            "---\nversion: 1.0.0\n---\nReview code.\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("agents/notes.txt"), "ignored").unwrap();
        std::fs::write(dir.path().join("top.md"), "top level").unwrap();
        let head = commit_all(&repo, "initial");
        (dir, head)
    }

    #[tokio::test]
    async fn fetches_markdown_from_subdir() {
        let (repo_dir, head) = seeded_repo();
        let request = FetchRequest::new(repo_dir.path().to_string_lossy())
            .with_subdir(Some("agents".to_string()));

        let response = GitFetcher::new().fetch(&request).await.unwrap();

        match response {
            FetchResponse::Modified { etag, artifacts } => {
                assert_eq!(etag, Some(head));
                let names: Vec<&str> = artifacts.iter().map(|a| a.name.as_str()).collect();
                assert_eq!(names, vec!["reviewer"]);
            }
            FetchResponse::NotModified => panic!("first fetch must be modified"),
        }
    }

    #[tokio::test]
    async fn unchanged_head_is_not_modified() {
        let (repo_dir, head) = seeded_repo();
        let request =
            FetchRequest::new(repo_dir.path().to_string_lossy()).with_etag(Some(head));

        let response = GitFetcher::new().fetch(&request).await.unwrap();
        assert_eq!(response, FetchResponse::NotModified);
    }

    #[rstest]
    #[case("../outside")]
    #[case("/etc")]
    #[case("")]
    fn rejects_escaping_subdirs(#[case] subdir: &str) {
        assert!(matches!(
            validate_subdir(subdir),
            Err(Error::InvalidSubdir { .. })
        ));
    }
}
