use std::time::Duration;

use defman_remote::{
    Error, FetchRequest, FetchResponse, Fetcher, GitFetcher, HttpFetcher, SourceKind,
};

#[tokio::test]
async fn unreachable_http_source_is_retryable() {
    let fetcher = HttpFetcher::new(Duration::from_secs(2)).unwrap();
    let request = FetchRequest::new("http://127.0.0.1:1/definitions.json");

    let err = fetcher.fetch(&request).await.unwrap_err();

    assert!(matches!(err, Error::Http(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn missing_git_repository_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let request = FetchRequest::new(dir.path().join("nope").to_string_lossy());

    let err = GitFetcher::new().fetch(&request).await.unwrap_err();
    assert!(matches!(err, Error::Git(_)));
}

#[test]
fn fetchers_report_their_kind() {
    let http = HttpFetcher::with_client(reqwest::Client::new());
    assert_eq!(http.kind(), SourceKind::Http);
    assert_eq!(GitFetcher::new().kind(), SourceKind::Git);
}

fn commit_all(repo: &git2::Repository) {
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = git2::Signature::now("Test", "test@example.com").unwrap();
    repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
        .unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn committed_symlinks_are_not_followed() {
    let secret = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(secret.path(), "local secret").unwrap();
    let dir = tempfile::tempdir().unwrap();
    let repo = git2::Repository::init(dir.path()).unwrap();
    std::fs::write(dir.path().join("reviewer.md"), "Review code.\n").unwrap();
    std::os::unix::fs::symlink(secret.path(), dir.path().join("leak.md")).unwrap();
    commit_all(&repo);

    let request = FetchRequest::new(dir.path().to_string_lossy());
    let response = GitFetcher::new().fetch(&request).await.unwrap();

    let FetchResponse::Modified { artifacts, .. } = response else {
        panic!("first fetch must be modified");
    };
    let names: Vec<&str> = artifacts.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["reviewer"]);
}

#[cfg(unix)]
#[tokio::test]
async fn symlinked_subdir_is_rejected() {
    let outside = tempfile::tempdir().unwrap();
    std::fs::write(outside.path().join("stolen.md"), "local").unwrap();
    let dir = tempfile::tempdir().unwrap();
    let repo = git2::Repository::init(dir.path()).unwrap();
    std::fs::write(dir.path().join("README.md"), "defs\n").unwrap();
    std::os::unix::fs::symlink(outside.path(), dir.path().join("agents")).unwrap();
    commit_all(&repo);

    let request = FetchRequest::new(dir.path().to_string_lossy())
        .with_subdir(Some("agents".to_string()));
    let err = GitFetcher::new().fetch(&request).await.unwrap_err();

    assert!(matches!(err, Error::InvalidSubdir { .. }));
}
