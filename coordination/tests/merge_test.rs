//! Merge controller integration tests: serialized merges, conflict
//! detection, verified rollback and the persisted ledger.

mod common;

use common::{commit_file, TestRepo};
use coordination::config::ReviewConfig;
use coordination::consensus::{aggregate, ConsensusResult, ReviewOutput, ReviewerReport};
use coordination::merge::{MergeController, MergeError, MergeLedger, MergeOutcome, MergeState};
use coordination::reviewer::{ReviewDomain, ReviewerProfile};
use coordination::task::{Complexity, Task};
use coordination::workspace::{Workspace, WorkspaceManager};

fn consensus(task_id: &str, score: f64) -> ConsensusResult {
    let reviewers = vec![ReviewerProfile::new("r1", ReviewDomain::Correctness, 1.0)];
    let reports = vec![ReviewerReport {
        reviewer_id: "r1".to_string(),
        outcome: Ok(ReviewOutput::new(score)),
    }];
    aggregate(task_id, &reviewers, reports, &ReviewConfig::default())
}

fn task_with_commit(manager: &WorkspaceManager, id: &str, file: &str, content: &str) -> Workspace {
    let ws = manager.provision(&Task::new(id, Complexity::S)).unwrap();
    commit_file(&ws.path, file, content, &format!("{id}: change {file}"));
    ws
}

fn controller(repo: &TestRepo) -> MergeController {
    let ledger = MergeLedger::open(repo.ledger_path()).unwrap();
    MergeController::new(repo.path(), "main", ledger)
}

fn merged(outcome: Option<MergeOutcome>) -> coordination::merge::MergeRecord {
    match outcome {
        Some(MergeOutcome::Merged(record)) => record,
        other => panic!("expected a merge, got {other:?}"),
    }
}

#[test]
fn test_disjoint_tasks_merge_sequentially_in_queue_order() {
    let repo = TestRepo::new();
    let manager = WorkspaceManager::new(repo.path(), repo.workspace_config()).unwrap();
    let a = task_with_commit(&manager, "TASK-A", "src/a.rs", "a\n");
    let b = task_with_commit(&manager, "TASK-B", "src/b.rs", "b\n");
    let base = repo.head();

    let mut merges = controller(&repo);
    merges.enqueue(a, &consensus("TASK-A", 9.0)).unwrap();
    merges.enqueue(b, &consensus("TASK-B", 8.0)).unwrap();
    assert_eq!(merges.queued_tasks(), vec!["TASK-A", "TASK-B"]);

    let first = merged(merges.merge_next().unwrap());
    assert_eq!(first.task_id, "TASK-A");
    assert!(first.fast_forward);
    assert_eq!(first.pre_merge_sha, base);
    assert_eq!(first.files, vec!["src/a.rs".to_string()]);

    let second = merged(merges.merge_next().unwrap());
    assert_eq!(second.task_id, "TASK-B");
    assert!(!second.fast_forward, "rebased onto the first merge");
    assert_eq!(second.pre_merge_sha, first.merge_commit_sha);
    assert_eq!(second.files, vec!["src/b.rs".to_string()]);
    assert!(second.started_at >= first.timestamp, "never concurrent");

    assert!(merges.merge_next().unwrap().is_none());
    assert_eq!(repo.head(), second.merge_commit_sha);
    assert_eq!(repo.file("src/a.rs").as_deref(), Some("a\n"));
    assert_eq!(repo.file("src/b.rs").as_deref(), Some("b\n"));
    assert_eq!(merges.ledger().merges().count(), 2);
    assert_ne!(first.id, second.id);
}

#[test]
fn test_overlapping_change_is_a_conflict_and_main_is_untouched() {
    let repo = TestRepo::new();
    let manager = WorkspaceManager::new(repo.path(), repo.workspace_config()).unwrap();
    let a = task_with_commit(&manager, "TASK-A", "shared.rs", "from a\n");
    let b = task_with_commit(&manager, "TASK-B", "shared.rs", "from b\n");

    let mut merges = controller(&repo);
    merges.enqueue(a, &consensus("TASK-A", 9.0)).unwrap();
    merges.enqueue(b, &consensus("TASK-B", 9.0)).unwrap();
    let first = merged(merges.merge_next().unwrap());

    match merges.merge_next().unwrap() {
        Some(MergeOutcome::Conflict { task_id, paths, .. }) => {
            assert_eq!(task_id, "TASK-B");
            assert_eq!(paths, vec!["shared.rs".to_string()]);
        }
        other => panic!("expected conflict, got {other:?}"),
    }
    assert_eq!(repo.head(), first.merge_commit_sha);
    assert_eq!(repo.file("shared.rs").as_deref(), Some("from a\n"));
    assert_eq!(merges.state("TASK-B"), Some(MergeState::Conflict));
    assert_eq!(merges.ledger().merges().count(), 1);
}

#[test]
fn test_rollback_restores_pre_merge_state_and_persists() {
    let repo = TestRepo::new();
    let manager = WorkspaceManager::new(repo.path(), repo.workspace_config()).unwrap();
    let a = task_with_commit(&manager, "TASK-A", "src/a.rs", "a\n");

    let mut merges = controller(&repo);
    merges.enqueue(a, &consensus("TASK-A", 9.0)).unwrap();
    let record = merged(merges.merge_next().unwrap());
    assert!(repo.file("src/a.rs").is_some());

    let rollback = merges.rollback(record.id, "post-merge tests failed").unwrap();
    assert_eq!(rollback.merge_record_id, record.id);
    assert_eq!(rollback.verified_paths, vec!["src/a.rs".to_string()]);
    assert!(repo.file("src/a.rs").is_none());
    assert_eq!(repo.head(), rollback.revert_commit_sha);
    assert_ne!(rollback.revert_commit_sha, record.pre_merge_sha, "history is kept");

    assert!(matches!(
        merges.rollback(record.id, "again"),
        Err(MergeError::AlreadyRolledBack { .. })
    ));
    assert!(matches!(
        merges.rollback_task("TASK-A", "again"),
        Err(MergeError::NothingToRollBack { .. })
    ));

    let reopened = controller(&repo);
    assert_eq!(reopened.state("TASK-A"), Some(MergeState::RolledBack));
    assert!(reopened.ledger().is_rolled_back(record.id));
    assert!(reopened.ledger().active_merge_for("TASK-A").is_none());
}

#[test]
fn test_gatekeeping_and_halt() {
    let repo = TestRepo::new();
    let manager = WorkspaceManager::new(repo.path(), repo.workspace_config()).unwrap();
    let a = task_with_commit(&manager, "TASK-A", "src/a.rs", "a\n");

    let mut merges = controller(&repo);
    assert!(matches!(
        merges.enqueue(a.clone(), &consensus("TASK-A", 3.0)),
        Err(MergeError::NotApproved { .. })
    ));
    assert!(matches!(
        merges.enqueue(a.clone(), &consensus("TASK-Z", 9.0)),
        Err(MergeError::ConsensusMismatch { .. })
    ));
    merges.enqueue(a.clone(), &consensus("TASK-A", 9.0)).unwrap();
    assert!(matches!(
        merges.enqueue(a, &consensus("TASK-A", 9.0)),
        Err(MergeError::AlreadyQueued { .. })
    ));

    merges.halt("operator freeze");
    assert!(matches!(merges.merge_next(), Err(MergeError::Halted { .. })));
    assert_eq!(merges.queue_depth(), 1);

    merges.resume();
    std::fs::write(repo.path().join("stray.txt"), "x").unwrap();
    assert!(matches!(
        merges.merge_next(),
        Err(MergeError::IntegrationDirty { changes: 1 })
    ));
    assert_eq!(merges.queue_depth(), 1, "nothing dequeued on a dirty checkout");

    std::fs::remove_file(repo.path().join("stray.txt")).unwrap();
    merged(merges.merge_next().unwrap());
    merges.mark_stable("TASK-A").unwrap();
    assert_eq!(merges.state("TASK-A"), Some(MergeState::Stable));
}
