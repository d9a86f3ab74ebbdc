//! Shared fixtures: throwaway git repositories, fake workers and fake
//! reviewer backends.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use coordination::config::{PipelineConfig, WorkspaceConfig};
use coordination::consensus::{Finding, ReviewOutput, ReviewRequest, ReviewerBackend};
use coordination::pipeline::{WorkOrder, Worker};
use coordination::reviewer::ReviewerProfile;
use coordination::workspace::Workspace;
use tempfile::TempDir;

/// Run git in `dir`, panicking with stderr on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
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

pub fn configure_identity(dir: &Path) {
    git(dir, &["config", "user.email", "test@test.com"]);
    git(dir, &["config", "user.name", "Test User"]);
    git(dir, &["config", "commit.gpgsign", "false"]);
}

pub fn commit_file(dir: &Path, rel: &str, content: &str, message: &str) -> String {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    git(dir, &["add", rel]);
    git(dir, &["commit", "-q", "-m", message]);
    git(dir, &["rev-parse", "HEAD"])
}

/// A repository on `main` with one commit, plus separate scratch
/// directories for worktrees and the merge ledger.
pub struct TestRepo {
    pub repo: TempDir,
    pub worktrees: TempDir,
    pub state: TempDir,
}

impl TestRepo {
    pub fn new() -> Self {
        let repo = tempfile::tempdir().unwrap();
        git(repo.path(), &["init", "-q"]);
        git(repo.path(), &["symbolic-ref", "HEAD", "refs/heads/main"]);
        configure_identity(repo.path());
        commit_file(repo.path(), "README.md", "# Test Project\n", "Initial commit");
        Self {
            repo,
            worktrees: tempfile::tempdir().unwrap(),
            state: tempfile::tempdir().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.repo.path()
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.state.path().join("ledger.json")
    }

    pub fn workspace_config(&self) -> WorkspaceConfig {
        WorkspaceConfig {
            base_dir: Some(self.worktrees.path().to_path_buf()),
            provision_retries: 1,
            ..WorkspaceConfig::default()
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.workspace = self.workspace_config();
        config.merge.ledger_path = Some(self.ledger_path());
        config.review.reviewer_count = 3;
        config.review.reviewer_timeout_secs = 5;
        config.scheduler.task_timeout_secs = 30;
        config
    }

    pub fn head(&self) -> String {
        git(self.path(), &["rev-parse", "main"])
    }

    pub fn file(&self, rel: &str) -> Option<String> {
        std::fs::read_to_string(self.path().join(rel)).ok()
    }
}

/// Worker that commits one file per task, named after the task id.
#[derive(Default)]
pub struct CommittingWorker {
    /// Per-task file override, to provoke overlapping edits.
    pub files: HashMap<String, String>,
    /// Tasks whose executor always errors.
    pub failing: Vec<String>,
    /// Tasks whose executor never returns.
    pub hanging: Vec<String>,
    pub calls: AtomicUsize,
    pub attempts_seen: Mutex<Vec<(String, u32)>>,
}

impl CommittingWorker {
    pub fn file_for(&self, task_id: &str) -> String {
        self.files
            .get(task_id)
            .cloned()
            .unwrap_or_else(|| format!("src/{}.txt", task_id.to_lowercase()))
    }
}

#[async_trait]
impl Worker for CommittingWorker {
    async fn execute(&self, workspace: &Workspace, order: &WorkOrder) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.attempts_seen
            .lock()
            .unwrap()
            .push((order.task.id.clone(), order.attempt));
        if self.failing.contains(&order.task.id) {
            anyhow::bail!("executor could not complete {}", order.task.id);
        }
        if self.hanging.contains(&order.task.id) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        commit_file(
            &workspace.path,
            &self.file_for(&order.task.id),
            &format!("{} attempt {}\n", order.task.id, order.attempt),
            &format!("{}: implement", order.task.id),
        );
        Ok(())
    }
}

/// Reviewer backend with scripted per-reviewer behaviour.
#[derive(Default)]
pub struct ScriptedReviewers {
    pub default_score: f64,
    pub scores: HashMap<String, f64>,
    pub findings: HashMap<String, Vec<Finding>>,
    /// Reviewers that sleep past any sensible timeout.
    pub slow: Vec<String>,
    /// Task ids every reviewer scores 2.0.
    pub reject_tasks: Vec<String>,
    pub calls: AtomicUsize,
}

impl ScriptedReviewers {
    pub fn approving() -> Self {
        Self {
            default_score: 9.0,
            ..Self::default()
        }
    }
}

#[async_trait]
impl ReviewerBackend for ScriptedReviewers {
    async fn review(
        &self,
        reviewer: &ReviewerProfile,
        request: &ReviewRequest,
    ) -> anyhow::Result<ReviewOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.slow.contains(&reviewer.id) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.reject_tasks.contains(&request.task.id) {
            return Ok(ReviewOutput::new(2.0));
        }
        let score = self
            .scores
            .get(&reviewer.id)
            .copied()
            .unwrap_or(self.default_score);
        let mut output = ReviewOutput::new(score);
        for finding in self.findings.get(&reviewer.id).into_iter().flatten() {
            output = output.with_finding(finding.clone());
        }
        Ok(output)
    }
}
