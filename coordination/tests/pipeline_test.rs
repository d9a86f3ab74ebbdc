//! End-to-end pipeline runs against a real repository with a deterministic
//! committing worker and scripted reviewers.

mod common;

use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{CommittingWorker, ScriptedReviewers, TestRepo};
use coordination::config::PipelineConfig;
use coordination::merge::{MergeLedger, MergeRecord};
use coordination::pipeline::{Pipeline, PostMergeCheck};
use coordination::reviewer::ReviewerRegistry;
use coordination::scheduler::FailureStage;
use coordination::task::{Complexity, Task, TaskGraph, TaskState};

fn graph() -> TaskGraph {
    TaskGraph::from_tasks(vec![
        Task::new("TASK-1", Complexity::S),
        Task::new("TASK-2", Complexity::M).with_dependency("TASK-1"),
        Task::new("TASK-3", Complexity::M),
    ])
    .unwrap()
}

fn pipeline(
    repo: &TestRepo,
    config: PipelineConfig,
    graph: TaskGraph,
    worker: Arc<CommittingWorker>,
    reviewers: ScriptedReviewers,
) -> Pipeline {
    Pipeline::new(
        repo.path(),
        config,
        graph,
        Arc::new(ReviewerRegistry::builtin()),
        worker,
        Arc::new(reviewers),
    )
    .unwrap()
}

struct FailFor(&'static str);

#[async_trait]
impl PostMergeCheck for FailFor {
    async fn verify(&self, record: &MergeRecord, _repo_root: &Path) -> anyhow::Result<()> {
        if record.task_id == self.0 {
            anyhow::bail!("integration tests failed after {}", record.task_id);
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_graph_lands_on_main_in_dependency_order() {
    let repo = TestRepo::new();
    let worker = Arc::new(CommittingWorker::default());
    let mut pipeline = pipeline(
        &repo,
        repo.pipeline_config(),
        graph(),
        Arc::clone(&worker),
        ScriptedReviewers::approving(),
    );
    let snapshots = pipeline.subscribe();

    let summary = pipeline.run().await.unwrap();

    assert!(summary.is_success(), "{summary:?}");
    assert_eq!(summary.merged, vec!["TASK-1", "TASK-2", "TASK-3"]);
    assert_eq!(summary.merges.len(), 3);
    assert_eq!(summary.consensus_runs, 3);
    let order: Vec<&str> = summary.merges.iter().map(|m| m.task_id.as_str()).collect();
    let pos = |id: &str| order.iter().position(|t| *t == id).unwrap();
    assert!(pos("TASK-1") < pos("TASK-2"));

    for file in ["src/task-1.txt", "src/task-2.txt", "src/task-3.txt"] {
        assert!(repo.file(file).is_some(), "{file} merged");
    }
    assert!(pipeline.workspaces().list().is_empty(), "merged workspaces destroyed");
    assert_eq!(pipeline.history().total(), 3);

    let ledger = MergeLedger::open(repo.ledger_path()).unwrap();
    assert_eq!(ledger.merges().count(), 3);

    let last = snapshots.borrow().clone();
    assert_eq!(last.merged.len(), 3);
    assert!(last.running.is_empty());
    assert_eq!(last.recent_merges.len(), 3);
}

#[tokio::test]
async fn test_rejected_task_retries_then_fails_and_blocks_dependent() {
    let repo = TestRepo::new();
    let worker = Arc::new(CommittingWorker::default());
    let reviewers = ScriptedReviewers {
        reject_tasks: vec!["TASK-1".to_string()],
        ..ScriptedReviewers::approving()
    };
    let mut pipeline = pipeline(&repo, repo.pipeline_config(), graph(), Arc::clone(&worker), reviewers);

    let summary = pipeline.run().await.unwrap();

    assert!(!summary.is_success());
    assert_eq!(summary.merged, vec!["TASK-3"]);
    assert_eq!(summary.failed.len(), 1);
    let failure = &summary.failed[0];
    assert_eq!(failure.task_id, "TASK-1");
    assert_eq!(failure.stage, FailureStage::Review);
    assert_eq!(failure.attempts, 2);
    assert!(failure.last_consensus.as_ref().is_some_and(|c| !c.passed));

    assert_eq!(summary.blocked.len(), 1);
    assert_eq!(summary.blocked[0].task_id, "TASK-2");
    assert_eq!(summary.blocked[0].blocked_by, vec!["TASK-1".to_string()]);

    let seen = worker.attempts_seen.lock().unwrap().clone();
    assert!(seen.contains(&("TASK-1".to_string(), 2)), "retried: {seen:?}");
    assert!(!seen.iter().any(|(id, _)| id == "TASK-2"));
    assert_eq!(pipeline.history().for_task("TASK-1").len(), 2);
    assert_eq!(pipeline.scheduler().state("TASK-1"), Some(TaskState::Failed));
}

#[tokio::test]
async fn test_executor_errors_count_against_the_retry_budget() {
    let repo = TestRepo::new();
    let worker = Arc::new(CommittingWorker {
        failing: vec!["TASK-3".to_string()],
        ..CommittingWorker::default()
    });
    let mut pipeline = pipeline(
        &repo,
        repo.pipeline_config(),
        graph(),
        Arc::clone(&worker),
        ScriptedReviewers::approving(),
    );

    let summary = pipeline.run().await.unwrap();

    let failure = summary.failed.iter().find(|f| f.task_id == "TASK-3").unwrap();
    assert_eq!(failure.stage, FailureStage::Execute);
    assert_eq!(failure.attempts, 2);
    assert!(failure.detail.contains("executor could not complete"));
    assert_eq!(summary.merged, vec!["TASK-1", "TASK-2"]);
}

#[tokio::test]
async fn test_task_timeout_fails_without_retry() {
    let repo = TestRepo::new();
    let mut config = repo.pipeline_config();
    config.scheduler.task_timeout_secs = 1;
    let worker = Arc::new(CommittingWorker {
        hanging: vec!["TASK-3".to_string()],
        ..CommittingWorker::default()
    });
    let mut pipeline = pipeline(&repo, config, graph(), Arc::clone(&worker), ScriptedReviewers::approving());

    let summary = pipeline.run().await.unwrap();

    let failure = summary.failed.iter().find(|f| f.task_id == "TASK-3").unwrap();
    assert_eq!(failure.stage, FailureStage::Timeout);
    assert_eq!(failure.attempts, 1);
    assert!(pipeline.workspaces().get("TASK-3").is_none(), "timed-out workspace discarded");
    assert_eq!(summary.merged, vec!["TASK-1", "TASK-2"]);
}

#[tokio::test]
async fn test_failed_post_merge_check_rolls_back() {
    let repo = TestRepo::new();
    let graph = TaskGraph::from_tasks(vec![
        Task::new("TASK-1", Complexity::S),
        Task::new("TASK-2", Complexity::S).with_dependency("TASK-1"),
    ])
    .unwrap();
    let mut pipeline = pipeline(
        &repo,
        repo.pipeline_config(),
        graph,
        Arc::new(CommittingWorker::default()),
        ScriptedReviewers::approving(),
    )
    .with_post_merge_check(Arc::new(FailFor("TASK-1")));

    let summary = pipeline.run().await.unwrap();

    assert_eq!(summary.rolled_back, vec!["TASK-1"]);
    assert!(summary.merged.is_empty());
    assert!(repo.file("src/task-1.txt").is_none(), "merge reverted");
    assert_eq!(pipeline.scheduler().state("TASK-1"), Some(TaskState::RolledBack));
    assert_eq!(summary.failed[0].stage, FailureStage::PostMerge);
    assert_eq!(summary.blocked[0].task_id, "TASK-2");
    assert!(summary.halted.is_none());

    let ledger = MergeLedger::open(repo.ledger_path()).unwrap();
    assert_eq!(ledger.rollbacks().count(), 1);
}

#[tokio::test]
async fn test_restart_skips_tasks_merged_by_an_earlier_run() {
    let repo = TestRepo::new();
    let first = Arc::new(CommittingWorker::default());
    let summary = pipeline(
        &repo,
        repo.pipeline_config(),
        graph(),
        Arc::clone(&first),
        ScriptedReviewers::approving(),
    )
    .run()
    .await
    .unwrap();
    assert_eq!(summary.merged.len(), 3);

    let second = Arc::new(CommittingWorker::default());
    let mut rerun = pipeline(
        &repo,
        repo.pipeline_config(),
        graph(),
        Arc::clone(&second),
        ScriptedReviewers::approving(),
    );
    assert_eq!(rerun.scheduler().state("TASK-2"), Some(TaskState::Merged));
    let summary = rerun.run().await.unwrap();

    assert_eq!(summary.merged.len(), 3);
    assert!(summary.merges.is_empty());
    assert_eq!(second.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancellation_stops_in_flight_work() {
    let repo = TestRepo::new();
    let graph = TaskGraph::from_tasks(vec![Task::new("SLOW", Complexity::S)]).unwrap();
    let worker = Arc::new(CommittingWorker {
        hanging: vec!["SLOW".to_string()],
        ..CommittingWorker::default()
    });
    let mut pipeline = pipeline(&repo, repo.pipeline_config(), graph, Arc::clone(&worker), ScriptedReviewers::approving());

    let cancel = pipeline.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();
    });
    let summary = tokio::time::timeout(Duration::from_secs(20), pipeline.run())
        .await
        .expect("cancelled run returns promptly")
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].stage, FailureStage::Cancelled);
    assert!(
        pipeline.workspaces().get("SLOW").is_some(),
        "cancelled workspace kept for adoption"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_merges_chain_one_after_another_from_a_spawned_run() {
    let repo = TestRepo::new();
    let graph = TaskGraph::from_tasks(
        (1..=5)
            .map(|i| Task::new(format!("TASK-{i}"), Complexity::S))
            .collect(),
    )
    .unwrap();
    let mut pipeline = pipeline(
        &repo,
        repo.pipeline_config(),
        graph,
        Arc::new(CommittingWorker::default()),
        ScriptedReviewers::approving(),
    );

    let summary = tokio::spawn(async move { pipeline.run().await })
        .await
        .unwrap()
        .unwrap();

    assert!(summary.is_success(), "{summary:?}");
    assert_eq!(summary.merges.len(), 5);
    for pair in summary.merges.windows(2) {
        assert_eq!(pair[1].pre_merge_sha, pair[0].merge_commit_sha);
        assert!(pair[1].started_at >= pair[0].timestamp);
    }
    assert_eq!(repo.head(), summary.merges[4].merge_commit_sha);
}
