//! Command-backed executor, reviewer and post-merge adapters driving a real
//! pipeline run.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use coordination::consensus::{ReviewRequest, ReviewerBackend, ReviewerError};
use coordination::reviewer::{ReviewDomain, ReviewerProfile, ReviewerRegistry};
use coordination::task::{Complexity, Task, TaskGraph};
use coordination::workspace::ChangeSet;
use coordination::Pipeline;
use mergeguard::{CommandCheck, CommandLine, CommandReviewer, CommandWorker, MergeguardConfig};
use tempfile::TempDir;

const EXECUTOR: &str = r#"sh -c 'cat > "input-$MERGEGUARD_TASK_ID.json" && git add -A && git commit -q -m "$MERGEGUARD_TASK_ID: work"'"#;
const APPROVE: &str = r#"sh -c 'cat > /dev/null; echo "{\"score\": 8.5, \"findings\": []}"'"#;

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git should be installed");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn init_repo() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    git(dir.path(), &["init", "-q"]);
    git(dir.path(), &["symbolic-ref", "HEAD", "refs/heads/main"]);
    git(dir.path(), &["config", "user.email", "test@test.com"]);
    git(dir.path(), &["config", "user.name", "Test User"]);
    git(dir.path(), &["config", "commit.gpgsign", "false"]);
    std::fs::write(dir.path().join("README.md"), "# Test Project\n").unwrap();
    git(dir.path(), &["add", "."]);
    git(dir.path(), &["commit", "-q", "-m", "Initial commit"]);
    dir
}

fn config(worktrees: &Path, ledger: &Path, post_merge: Option<&str>) -> MergeguardConfig {
    let mut config = MergeguardConfig::default();
    config.pipeline.workspace.base_dir = Some(worktrees.to_path_buf());
    config.pipeline.merge.ledger_path = Some(ledger.join("ledger.json"));
    config.pipeline.review.reviewer_count = 2;
    config.pipeline.scheduler.task_timeout_secs = 60;
    config.executor.command = Some(EXECUTOR.to_string());
    config.reviewers.command = Some(APPROVE.to_string());
    config.post_merge.command = post_merge.map(str::to_string);
    config
}

async fn run(repo: &Path, config: MergeguardConfig, graph: TaskGraph) -> coordination::RunSummary {
    let worker = Arc::new(CommandWorker::new(config.executor_command().unwrap()));
    let reviewers = Arc::new(CommandReviewer::new(config.reviewer_command().unwrap()));
    let post_merge = config.post_merge_command().unwrap();
    let mut pipeline = Pipeline::new(
        repo,
        config.pipeline,
        graph,
        Arc::new(ReviewerRegistry::builtin()),
        worker,
        reviewers,
    )
    .unwrap();
    if let Some(command) = post_merge {
        pipeline = pipeline.with_post_merge_check(Arc::new(CommandCheck::new(command)));
    }
    pipeline.run().await.unwrap()
}

#[tokio::test]
async fn test_external_commands_carry_a_task_to_main() {
    let repo = init_repo();
    let worktrees = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    let graph = TaskGraph::from_tasks(vec![
        Task::new("TASK-1", Complexity::S).with_description("add input capture"),
    ])
    .unwrap();

    let summary = run(
        repo.path(),
        config(worktrees.path(), state.path(), Some("git diff --quiet HEAD~1 -- README.md")),
        graph,
    )
    .await;

    assert!(summary.is_success(), "{summary:?}");
    let captured = std::fs::read_to_string(repo.path().join("input-TASK-1.json")).unwrap();
    let input: serde_json::Value = serde_json::from_str(&captured).unwrap();
    assert_eq!(input["task"]["id"], "TASK-1");
    assert_eq!(input["attempt"], 1);
    assert_eq!(input["workspace"]["branch_name"], "mergeguard/TASK-1");
}

#[tokio::test]
async fn test_failing_post_merge_command_reverts() {
    let repo = init_repo();
    let worktrees = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    let graph = TaskGraph::from_tasks(vec![Task::new("TASK-1", Complexity::S)]).unwrap();

    let summary = run(
        repo.path(),
        config(worktrees.path(), state.path(), Some("sh -c 'exit 1'")),
        graph,
    )
    .await;

    assert_eq!(summary.rolled_back, vec!["TASK-1"]);
    assert!(!repo.path().join("input-TASK-1.json").exists());
}

#[tokio::test]
async fn test_malformed_reviewer_output_is_classified() {
    let dir = tempfile::tempdir().unwrap();
    let reviewer = ReviewerProfile::new("r1", ReviewDomain::Security, 1.0);
    let request = ReviewRequest {
        task: Task::new("T", Complexity::S),
        workspace_path: dir.path().to_path_buf(),
        change_set: ChangeSet::default(),
        attempt: 1,
    };

    let garbled = CommandReviewer::new(CommandLine::parse("echo not-json").unwrap());
    let err = garbled.review(&reviewer, &request).await.unwrap_err();
    assert!(matches!(
        err.downcast::<ReviewerError>(),
        Ok(ReviewerError::Malformed { .. })
    ));

    let out_of_range = CommandReviewer::new(
        CommandLine::parse(r#"echo '{"score": 14, "findings": []}'"#).unwrap(),
    );
    let err = out_of_range.review(&reviewer, &request).await.unwrap_err();
    assert!(matches!(
        err.downcast::<ReviewerError>(),
        Ok(ReviewerError::Malformed { .. })
    ));

    let crashing = CommandReviewer::new(CommandLine::parse("sh -c 'exit 2'").unwrap());
    let err = crashing.review(&reviewer, &request).await.unwrap_err();
    assert!(matches!(
        err.downcast::<ReviewerError>(),
        Ok(ReviewerError::Failed { .. })
    ));
}
