//! Remote sync scenarios over HTTP-shaped and git sources.

mod support;

use std::sync::Arc;

use defman_core::{ErrorKind, JobKind, Tier};
use defman_remote::SourceKind;
use defman_test_utils::{StaticFetcher, TestTree, commit_definitions, definition, definitions_repo};
use pretty_assertions::assert_eq;
use support::{ServiceSetup, deploy_now};

const TEAM_SOURCE: &str = r#"
[[sources]]
name = "team"
url = "https://defs.example.com/bundle.json"
"#;

fn team_fetcher() -> Arc<StaticFetcher> {
    Arc::new(StaticFetcher::new(
        "\"rev-1\"",
        &[("reviewer", &definition("reviewer", "2.0.0", "Remote reviewer."))],
    ))
}

#[tokio::test(flavor = "multi_thread")]
async fn second_sync_is_not_modified_and_writes_nothing() {
    let tree = TestTree::new();
    tree.write_config(TEAM_SOURCE);
    let fetcher = team_fetcher();
    let svc = ServiceSetup::new(&tree).fetcher(fetcher.clone()).build();
    let ctx = svc.detached_context(JobKind::Sync);

    let first = svc.sync(Some("team"), &ctx).await.unwrap();
    assert!(first[0].as_ref().unwrap().updated);
    let cache = tree.path(".defman/cache");
    let before = tree.snapshot(&cache);

    let second = svc.sync(Some("team"), &ctx).await.unwrap();
    let result = second[0].as_ref().unwrap();

    assert!(!result.updated);
    assert_eq!(result.etag.as_deref(), Some("\"rev-1\""));
    assert_eq!(tree.snapshot(&cache), before);
    assert_eq!(fetcher.fetch_count(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn synced_definitions_outrank_bundled_ones() {
    let tree = TestTree::new();
    tree.write_config(TEAM_SOURCE);
    tree.write_definition(&tree.bundled_dir(), "reviewer", "1.0.0", "Bundled reviewer.");
    let svc = ServiceSetup::new(&tree).fetcher(team_fetcher()).build();

    svc.sync(None, &svc.detached_context(JobKind::Sync)).await.unwrap();
    let plan = svc.plan(None).unwrap();

    let winner = plan.get("reviewer").unwrap();
    assert_eq!(winner.tier, Tier::CacheRemote);
    assert_eq!(winner.version.to_string(), "2.0.0");
    assert_eq!(plan.conflicts.len(), 1);
    assert!(!plan.conflicts[0].ambiguous);

    let svc2 = svc.clone();
    tokio::task::spawn_blocking(move || deploy_now(&svc2, &["reviewer"]))
        .await
        .unwrap()
        .unwrap();
    tree.assert_file_contains(".claude/agents/reviewer.md", "Remote reviewer.");
}

#[tokio::test(flavor = "multi_thread")]
async fn new_revision_replaces_the_cache() {
    let tree = TestTree::new();
    tree.write_config(TEAM_SOURCE);
    let fetcher = team_fetcher();
    let svc = ServiceSetup::new(&tree).fetcher(fetcher.clone()).build();
    let ctx = svc.detached_context(JobKind::Sync);
    svc.sync(None, &ctx).await.unwrap();

    fetcher.publish(
        "\"rev-2\"",
        &[("planner", &definition("planner", "1.0.0", "Plans work."))],
    );
    let results = svc.sync(None, &ctx).await.unwrap();

    assert!(results[0].as_ref().unwrap().updated);
    let plan = svc.plan(None).unwrap();
    assert!(plan.get("planner").is_some());
    assert!(plan.get("reviewer").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_remote_keeps_the_previous_cache() {
    let tree = TestTree::new();
    tree.write_config(TEAM_SOURCE);
    let fetcher = team_fetcher();
    let svc = ServiceSetup::new(&tree).fetcher(fetcher.clone()).build();
    let ctx = svc.detached_context(JobKind::Sync);
    svc.sync(None, &ctx).await.unwrap();
    let before = tree.snapshot(&tree.path(".defman/cache"));

    fetcher.fail_with_status(404);
    let results = svc.sync(None, &ctx).await.unwrap();

    let err = results[0].as_ref().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(tree.snapshot(&tree.path(".defman/cache")), before);
}

#[tokio::test(flavor = "multi_thread")]
async fn git_source_syncs_and_tracks_head() {
    let tree = TestTree::new();
    let remote = tree.path("remote-defs");
    let (repo, head) = definitions_repo(
        &remote,
        "agents",
        &[("planner.md", &definition("planner", "1.0.0", "Plans work."))],
    );
    tree.write_config(&format!(
        "[[sources]]\nname = \"git-team\"\nurl = \"file://{}\"\nsubdir = \"agents\"\n",
        remote.display()
    ));
    let svc = ServiceSetup::new(&tree).build();
    let ctx = svc.detached_context(JobKind::Sync);

    let first = svc.sync(None, &ctx).await.unwrap();
    let first = first[0].as_ref().unwrap();
    assert!(first.updated);
    assert_eq!(first.etag.as_deref(), Some(head.as_str()));
    assert_eq!(svc.plan(None).unwrap().get("planner").unwrap().tier, Tier::CacheRemote);

    let unchanged = svc.sync(None, &ctx).await.unwrap();
    assert!(!unchanged[0].as_ref().unwrap().updated);

    let next = commit_definitions(
        &repo,
        "agents",
        &[("tester.md", &definition("tester", "1.0.0", "Writes tests."))],
        "Add tester",
    );
    let updated = svc.sync(None, &ctx).await.unwrap();
    assert_eq!(updated[0].as_ref().unwrap().etag.as_deref(), Some(next.as_str()));
    assert!(svc.plan(None).unwrap().get("tester").is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn explicit_fetcher_kind_is_respected() {
    let tree = TestTree::new();
    tree.write_config(
        "[[sources]]\nname = \"mirror\"\nurl = \"https://git.example.com/defs\"\nkind = \"git\"\n",
    );
    let fetcher = Arc::new(
        StaticFetcher::new("abc123", &[("planner", &definition("planner", "1.0.0", "x"))])
            .with_kind(SourceKind::Git),
    );
    let svc = ServiceSetup::new(&tree).fetcher(fetcher.clone()).build();

    svc.sync(None, &svc.detached_context(JobKind::Sync)).await.unwrap();

    assert_eq!(fetcher.fetch_count(), 1);
}
