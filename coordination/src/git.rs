//! Git process runner
//!
//! Thin wrapper over the `git` binary shared by the workspace manager and
//! the merge controller. Transient failures (lock contention, timeouts)
//! are retried with exponential backoff.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

/// Default number of retry attempts for transient failures
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base delay between retries in milliseconds
const RETRY_BASE_DELAY_MS: u64 = 100;

/// A git invocation that failed.
#[derive(Debug, Clone, Error)]
#[error("Git operation failed: {operation} - {message}")]
pub struct GitError {
    pub operation: String,
    pub message: String,
}

impl GitError {
    pub fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Check if this failure might succeed on retry
    pub fn is_retryable(&self) -> bool {
        let lower = self.message.to_lowercase();
        lower.contains("index.lock")
            || lower.contains("could not lock")
            || lower.contains("unable to lock")
            || lower.contains("another git process")
            || lower.contains("timeout")
            || lower.contains("timed out")
    }

    /// Operator-facing hint for this failure
    pub fn recovery_suggestion(&self) -> &'static str {
        let lower = self.message.to_lowercase();
        if lower.contains("lock") || lower.contains("another git process") {
            "Git lock file conflict. Wait a moment and retry, or remove the stale lock file."
        } else if lower.contains("not a git repository") {
            "The configured repository root is not a git repository."
        } else if lower.contains("conflict") {
            "Resolve the conflicting paths on the branch, then re-run the task."
        } else {
            "Check `git status` and `git worktree list` in the repository root."
        }
    }
}

pub type GitResult<T> = Result<T, GitError>;

/// Runs git commands in a fixed working directory.
#[derive(Debug, Clone)]
pub struct GitRunner {
    working_dir: PathBuf,
    max_retries: u32,
}

impl GitRunner {
    pub fn new(working_dir: impl AsRef<Path>) -> Self {
        Self {
            working_dir: working_dir.as_ref().to_path_buf(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Create runner with custom retry settings
    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Runner for another directory sharing this runner's retry policy.
    pub fn at(&self, dir: impl AsRef<Path>) -> Self {
        Self {
            working_dir: dir.as_ref().to_path_buf(),
            max_retries: self.max_retries,
        }
    }

    /// Run git command and return trimmed stdout
    pub fn run(&self, args: &[&str]) -> GitResult<String> {
        Ok(self.run_raw(args)?.trim().to_string())
    }

    /// Run git command and return stdout exactly as printed
    pub fn run_raw(&self, args: &[&str]) -> GitResult<String> {
        debug!(dir = %self.working_dir.display(), args = %args.join(" "), "git");
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.working_dir)
            .output()
            .map_err(|e| GitError::new("execute", e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let message = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(GitError::new(args.join(" "), message));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run a command whose exit status is the answer (e.g. `merge-base --is-ancestor`).
    pub fn succeeds(&self, args: &[&str]) -> GitResult<bool> {
        let status = Command::new("git")
            .args(args)
            .current_dir(&self.working_dir)
            .output()
            .map_err(|e| GitError::new("execute", e.to_string()))?
            .status;
        Ok(status.success())
    }

    /// Run git command with automatic retry for transient failures
    ///
    /// Uses exponential backoff: 100ms, 200ms, 400ms, etc.
    pub fn run_with_retry(&self, args: &[&str]) -> GitResult<String> {
        let mut attempt = 0;
        loop {
            match self.run(args) {
                Ok(output) => return Ok(output),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = RETRY_BASE_DELAY_MS * (1 << attempt);
                    debug!(attempt, delay_ms = delay, error = %e, "retrying git command");
                    std::thread::sleep(Duration::from_millis(delay));
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Full commit id of a revision
    pub fn rev_parse(&self, rev: &str) -> GitResult<String> {
        self.run(&["rev-parse", "--verify", &format!("{rev}^{{commit}}")])
    }

    pub fn current_branch(&self) -> GitResult<String> {
        self.run(&["rev-parse", "--abbrev-ref", "HEAD"])
    }

    /// Working tree status (empty when clean)
    pub fn status_entries(&self) -> GitResult<Vec<StatusEntry>> {
        let out = self.run_raw(&["status", "--porcelain", "-z", "--untracked-files=all"])?;
        Ok(parse_status_z(&out))
    }

    pub fn is_clean(&self) -> GitResult<bool> {
        Ok(self.status_entries()?.is_empty())
    }

    /// Whether `ancestor` is reachable from `descendant`
    pub fn is_ancestor(&self, ancestor: &str, descendant: &str) -> GitResult<bool> {
        self.succeeds(&["merge-base", "--is-ancestor", ancestor, descendant])
    }

    pub fn merge_base(&self, a: &str, b: &str) -> GitResult<String> {
        self.run(&["merge-base", a, b])
    }

    /// Paths changed between two revisions, sorted and deduplicated
    pub fn changed_files(&self, from: &str, to: &str) -> GitResult<Vec<String>> {
        let out = self.run(&["diff", "--name-only", &format!("{from}..{to}")])?;
        let mut files: Vec<String> = out
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect();
        files.sort();
        files.dedup();
        Ok(files)
    }

    /// Count commits reachable from `to` but not from `from`
    pub fn commits_between(&self, from: &str, to: &str) -> GitResult<usize> {
        let output = self.run(&["rev-list", "--count", &format!("{from}..{to}")])?;
        output
            .parse()
            .map_err(|_| GitError::new("count", "Failed to parse commit count"))
    }

    pub fn branch_exists(&self, branch: &str) -> GitResult<bool> {
        self.succeeds(&[
            "show-ref",
            "--verify",
            "--quiet",
            &format!("refs/heads/{branch}"),
        ])
    }
}

/// One entry of `git status --porcelain -z`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// Two-column `XY` code, e.g. ` M`, `??`, `R `.
    pub code: String,
    pub path: String,
    /// Source of a rename or copy.
    pub orig_path: Option<String>,
}

/// Records are `XY path\0`; renames and copies carry the source path as
/// an extra NUL-terminated field.
fn parse_status_z(out: &str) -> Vec<StatusEntry> {
    let mut fields = out.split('\0').filter(|f| !f.is_empty());
    let mut entries = Vec::new();
    while let Some(record) = fields.next() {
        let (Some(code), Some(path)) = (record.get(..2), record.get(3..)) else {
            continue;
        };
        let orig_path = if code.contains(['R', 'C']) {
            fields.next().map(str::to_string)
        } else {
            None
        };
        entries.push(StatusEntry {
            code: code.to_string(),
            path: path.to_string(),
            orig_path,
        });
    }
    entries
}
