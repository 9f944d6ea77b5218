//! Deploy transaction scenarios: rollback, partial failure, validation
//! ordering, cross-process locking and crash recovery.

mod support;

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use defman_core::{ErrorKind, JournalEntry, JournalEvent};
use defman_fs::LockManager;
use defman_test_utils::{FaultyFs, FsCall, RecordingFs};
use pretty_assertions::assert_eq;
use support::{ServiceSetup, deploy_now, project, service};

fn last_event(service: &defman_core::DeployService) -> JournalEvent {
    service
        .engine()
        .journal()
        .entries()
        .unwrap()
        .pop()
        .map(|entry| entry.event)
        .unwrap()
}

#[test]
fn failed_batch_leaves_target_byte_identical() {
    let tree = project("");
    tree.write(".claude/agents/a.md", "old a");
    tree.write(".claude/agents/c.md", "old c");
    tree.write(".claude/agents/notes.txt", "kept by hand");
    let before = tree.snapshot(&tree.target_dir());

    let svc = ServiceSetup::new(&tree)
        .fs(Arc::new(FaultyFs::new().corrupting("b.md")))
        .build();
    let err = deploy_now(&svc, &[]).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PartialFailure);
    assert_eq!(err.failed_ids(), vec!["b".to_string()]);
    assert_eq!(err.to_string(), "1 of 3 failed: b");
    assert_eq!(tree.snapshot(&tree.target_dir()), before);
    assert!(matches!(last_event(&svc), JournalEvent::RolledBack { .. }));
}

#[test]
fn failed_batch_takes_exactly_one_backup() {
    let tree = project("");
    let svc = ServiceSetup::new(&tree)
        .fs(Arc::new(FaultyFs::new().corrupting("b.md")))
        .build();

    deploy_now(&svc, &[]).unwrap_err();

    let backups = svc.engine().backups().list().unwrap();
    assert_eq!(backups.len(), 1);
    assert_eq!(backups[0].metadata.entries.len(), 3);
    tree.assert_file_not_exists(".claude/agents/a.md");
    tree.assert_file_not_exists(".claude/agents/b.md");
}

#[test]
fn write_error_rolls_back_earlier_writes() {
    let tree = project("");
    tree.write(".claude/agents/a.md", "old a");
    let before = tree.snapshot(&tree.target_dir());
    let svc = ServiceSetup::new(&tree)
        .fs(Arc::new(FaultyFs::new().failing("c.md")))
        .build();

    let err = deploy_now(&svc, &[]).unwrap_err();

    assert_eq!(err.failed_ids(), vec!["c".to_string()]);
    assert_eq!(tree.snapshot(&tree.target_dir()), before);
}

#[test]
fn single_artifact_mismatch_is_a_verification_failure() {
    let tree = project("");
    let svc = ServiceSetup::new(&tree)
        .fs(Arc::new(FaultyFs::new().corrupting("a.md")))
        .build();

    let err = deploy_now(&svc, &["a"]).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::VerificationFailure);
    tree.assert_file_not_exists(".claude/agents/a.md");
}

#[test]
fn invalid_ids_never_reach_the_file_system() {
    let tree = project("");
    let recording = Arc::new(RecordingFs::new());
    let svc = ServiceSetup::new(&tree).fs(recording.clone()).build();

    for bad in ["../../etc/passwd", "a/b", "", "..", "C:\\evil"] {
        let err = deploy_now(&svc, &[bad]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation, "id {bad:?}");
    }

    assert_eq!(recording.calls(), Vec::new());
    assert!(!tree.target_dir().exists());
}

#[test]
fn successful_deploy_commits_and_redeploy_is_a_no_op() {
    let tree = project("");
    let svc = service(&tree);

    let first = deploy_now(&svc, &[]).unwrap();
    assert_eq!(first.written.len(), 3);
    tree.assert_file_contains(".claude/agents/b.md", "Definition b.");
    assert!(matches!(last_event(&svc), JournalEvent::Committed { .. }));

    let recording = Arc::new(RecordingFs::new());
    let again = ServiceSetup::new(&tree).fs(recording.clone()).build();
    let second = deploy_now(&again, &[]).unwrap();

    assert!(second.written.is_empty());
    assert_eq!(second.unchanged.len(), 3);
    assert!(
        recording
            .mutations()
            .iter()
            .all(|call| matches!(call, FsCall::CreateDirAll(_))),
        "unchanged artifacts must not be rewritten"
    );
}

#[test]
fn concurrent_processes_contend_for_the_target() {
    let tree = project("[locks]\ntimeout_ms = 100\n");
    let slow = ServiceSetup::new(&tree)
        .fs(Arc::new(FaultyFs::new().with_write_delay(Duration::from_millis(400))))
        .locks(Arc::new(LockManager::new()))
        .build();
    let fast = ServiceSetup::new(&tree)
        .locks(Arc::new(LockManager::new()))
        .build();

    let holder = {
        let slow = slow.clone();
        thread::spawn(move || deploy_now(&slow, &[]))
    };
    thread::sleep(Duration::from_millis(150));
    let err = deploy_now(&fast, &[]).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::LockContention);
    assert_eq!(holder.join().unwrap().unwrap().written.len(), 3);
}

#[test]
fn concurrent_processes_serialize_when_the_wait_is_long_enough() {
    let tree = project("[locks]\ntimeout_ms = 10000\n");
    let slow = ServiceSetup::new(&tree)
        .fs(Arc::new(FaultyFs::new().with_write_delay(Duration::from_millis(200))))
        .locks(Arc::new(LockManager::new()))
        .build();
    let fast = ServiceSetup::new(&tree)
        .locks(Arc::new(LockManager::new()))
        .build();

    let holder = {
        let slow = slow.clone();
        thread::spawn(move || deploy_now(&slow, &[]))
    };
    thread::sleep(Duration::from_millis(100));
    let second = deploy_now(&fast, &[]).unwrap();
    let first = holder.join().unwrap().unwrap();

    assert_eq!(first.written.len(), 3);
    assert_eq!(second.unchanged.len(), 3);
}

#[test]
fn recovery_restores_an_interrupted_deploy() {
    let tree = project("");
    tree.write(".claude/agents/a.md", "before crash");
    let svc = service(&tree);
    let target = tree.target_dir();
    let path = target.join("a.md");

    let backup = svc
        .engine()
        .backups()
        .create(svc.file_system().as_ref(), &target, &[path.clone(), target.join("b.md")])
        .unwrap();
    svc.engine()
        .journal()
        .append(&JournalEntry::new(
            "tx-interrupted",
            JournalEvent::Begun {
                backup_id: backup.id.clone(),
                target_dir: target.clone(),
                writes: Vec::new(),
            },
        ))
        .unwrap();
    fs::write(&path, "half written").unwrap();
    fs::write(target.join("b.md"), "half written").unwrap();

    // A fresh service stands in for the restarted process.
    let restarted = service(&tree);
    let recovered = restarted.recover().unwrap();

    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].backup_id, backup.id);
    assert_eq!(fs::read_to_string(&path).unwrap(), "before crash");
    tree.assert_file_not_exists(".claude/agents/b.md");
    assert!(restarted.recover().unwrap().is_empty());
}

#[test]
fn excluded_ids_are_not_deployed() {
    let tree = project(
        "default_profile = \"lean\"\n\n[[profiles]]\nname = \"lean\"\nexclude = [\"b\"]\n",
    );
    let svc = service(&tree);

    let result = deploy_now(&svc, &[]).unwrap();

    assert_eq!(result.written, vec!["a".to_string(), "c".to_string()]);
    tree.assert_file_not_exists(".claude/agents/b.md");
    let err = deploy_now(&svc, &["b"]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}
