//! Supervised job scenarios: timeouts, cancellation, conflicts and
//! retention.

mod support;

use std::sync::Arc;
use std::time::Duration;

use defman_core::{ErrorKind, JobFilter, JobKind, JobSpec, JobStatus, JournalEvent};
use defman_test_utils::{FaultyFs, StaticFetcher, TestTree, definition};
use pretty_assertions::assert_eq;
use support::{ServiceSetup, project, service};

#[tokio::test(flavor = "multi_thread")]
async fn timed_out_deploy_leaves_nothing_behind() {
    let tree = project("");
    let svc = ServiceSetup::new(&tree)
        .fs(Arc::new(FaultyFs::new().with_write_delay(Duration::from_secs(3))))
        .build();

    let spec = JobSpec::new(JobKind::Deploy, svc.deploy_target()).with_timeout(Duration::from_secs(1));
    let id = svc.submit_deploy_with(spec, Vec::new(), None).unwrap();
    let job = svc.jobs().wait(id).await.unwrap();

    assert_eq!(job.status, JobStatus::TimedOut);
    assert_eq!(job.error_kind, Some(ErrorKind::Timeout));
    assert!(!svc.jobs().is_target_active(&svc.deploy_target()));
    // No artifacts and no temp files.
    assert!(tree.snapshot(&tree.target_dir()).is_empty());
    let last = svc.engine().journal().entries().unwrap().pop().unwrap();
    assert!(matches!(last.event, JournalEvent::RolledBack { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelled_deploy_rolls_back() {
    let tree = project("");
    tree.write(".claude/agents/a.md", "old a");
    let before = tree.snapshot(&tree.target_dir());
    let svc = ServiceSetup::new(&tree)
        .fs(Arc::new(FaultyFs::new().with_write_delay(Duration::from_millis(300))))
        .build();

    let id = svc.submit_deploy(Vec::new(), None).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(svc.jobs().cancel(id));
    let job = svc.jobs().wait(id).await.unwrap();

    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(tree.snapshot(&tree.target_dir()), before);
    assert!(!svc.jobs().cancel(id));
}

#[tokio::test(flavor = "multi_thread")]
async fn one_active_job_per_target() {
    let tree = project("");
    let svc = ServiceSetup::new(&tree)
        .fs(Arc::new(FaultyFs::new().with_write_delay(Duration::from_millis(200))))
        .build();

    let first = svc.submit_deploy(Vec::new(), None).unwrap();
    let err = svc.submit_deploy(vec!["a".to_string()], None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    // Autoconfig shares the deploy slot.
    let err = svc.submit_autoconfig().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let job = svc.jobs().wait(first).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.summary.as_deref(), Some("3 written, 0 unchanged"));

    let again = svc.submit_deploy(Vec::new(), None).unwrap();
    let job = svc.jobs().wait(again).await.unwrap();
    assert_eq!(job.summary.as_deref(), Some("0 written, 3 unchanged"));
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_jobs_share_one_slot() {
    let tree = project(
        r#"
[[sources]]
name = "team"
url = "https://defs.example.com/bundle.json"
"#,
    );
    let fetcher = Arc::new(
        StaticFetcher::new(
            "\"v1\"",
            &[("reviewer", &definition("reviewer", "1.0.0", "Reviews."))],
        )
        .with_delay(Duration::from_millis(300)),
    );
    let svc = ServiceSetup::new(&tree).fetcher(fetcher).build();

    let full = svc.submit_sync(None).unwrap();
    let err = svc.submit_sync(Some("team".to_string())).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    let err = svc.submit_autoconfig().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(svc.jobs().wait(full).await.unwrap().status, JobStatus::Completed);

    // Autoconfig syncs too, so it holds the sync slot while it runs.
    let auto = svc.submit_autoconfig().unwrap();
    let err = svc.submit_sync(Some("team".to_string())).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    svc.jobs().wait(auto).await.unwrap();
    assert!(!svc.jobs().is_target_active(defman_core::SYNC_TARGET));
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_ids_are_rejected_before_a_job_exists() {
    let tree = project("");
    let svc = service(&tree);

    let err = svc.submit_deploy(vec!["../x".to_string()], None).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(svc.jobs().list(JobFilter::default()).is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_deploy_job_reports_its_failed_ids() {
    let tree = project("");
    let svc = ServiceSetup::new(&tree)
        .fs(Arc::new(FaultyFs::new().corrupting("c.md")))
        .build();

    let id = svc.submit_deploy(Vec::new(), None).unwrap();
    let job = svc.jobs().wait(id).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_kind, Some(ErrorKind::PartialFailure));
    assert_eq!(job.failed_ids, vec!["c".to_string()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_job_names_the_failing_source() {
    let tree = TestTree::new();
    tree.write_config(
        r#"
[[sources]]
name = "good"
url = "https://good.example.com/bundle.json"

[[sources]]
name = "bad"
url = "file:///nonexistent/defman-test-remote.git"
"#,
    );
    let fetcher = Arc::new(StaticFetcher::new(
        "\"v1\"",
        &[("reviewer", &definition("reviewer", "1.0.0", "Reviews."))],
    ));
    let svc = ServiceSetup::new(&tree).fetcher(fetcher).build();

    let id = svc.submit_sync(None).unwrap();
    let job = svc.jobs().wait(id).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.failed_ids, vec!["bad".to_string()]);
    assert!(svc.plan(None).unwrap().get("reviewer").is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn finished_jobs_are_retained_up_to_the_limit() {
    let tree = TestTree::new();
    tree.write_config("[jobs]\nretention_count = 2\n");
    let svc = service(&tree);

    let mut ids = Vec::new();
    for _ in 0..3 {
        let id = svc.submit_sync(None).unwrap();
        svc.jobs().wait(id).await.unwrap();
        ids.push(id);
    }

    let jobs = svc.jobs().list(JobFilter::default());
    assert!(jobs.len() <= 2);
    assert!(svc.jobs().status(ids[0]).is_none());
    assert!(svc.jobs().status(ids[2]).is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn filters_select_jobs_by_kind_and_status() {
    let tree = project("");
    let svc = service(&tree);

    let sync = svc.submit_sync(None).unwrap();
    svc.jobs().wait(sync).await.unwrap();
    let deploy = svc.submit_deploy(Vec::new(), None).unwrap();
    svc.jobs().wait(deploy).await.unwrap();

    let deploys = svc.jobs().list(JobFilter {
        kind: Some(JobKind::Deploy),
        ..JobFilter::default()
    });
    assert_eq!(deploys.len(), 1);
    assert_eq!(deploys[0].job_id, deploy);

    let active = svc.jobs().list(JobFilter {
        active_only: true,
        ..JobFilter::default()
    });
    assert!(active.is_empty());
}
