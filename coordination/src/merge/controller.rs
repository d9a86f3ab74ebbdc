//! Merge controller: the single writer of the integration branch.
//!
//! # State machine (per task)
//!
//! ```text
//! Approved ──► Merging ──► Merged ──► Stable
//!                 │           │
//!                 │           └──► RolledBack
//!                 ├──► Conflict     (changed-file sets intersect; retry on a fresh workspace)
//!                 └──► MergeFailed  (integration branch reset to its pre-merge commit)
//! ```
//!
//! Merges are popped from a strict FIFO queue one at a time. A failed
//! rollback verification halts the queue until an operator resumes it.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::consensus::ConsensusResult;
use crate::git::{GitError, GitRunner};
use crate::merge::error::{MergeError, MergeResult};
use crate::merge::ledger::{LedgerEntry, MergeLedger, MergeRecord, RollbackRecord};
use crate::workspace::Workspace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeState {
    Approved,
    Merging,
    Merged,
    Conflict,
    MergeFailed,
    Stable,
    RolledBack,
}

impl std::fmt::Display for MergeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Approved => "approved",
            Self::Merging => "merging",
            Self::Merged => "merged",
            Self::Conflict => "conflict",
            Self::MergeFailed => "merge_failed",
            Self::Stable => "stable",
            Self::RolledBack => "rolled_back",
        };
        f.write_str(s)
    }
}

/// An approved task waiting for integration.
#[derive(Debug, Clone)]
pub struct QueuedMerge {
    pub workspace: Workspace,
    pub consensus_id: Uuid,
    pub consensus_score: f64,
    pub enqueued_at: DateTime<Utc>,
}

/// Result of one `merge_next` call.
#[derive(Debug, Clone)]
pub enum MergeOutcome {
    Merged(MergeRecord),
    /// Refused; the task must be re-provisioned against the new tip.
    Conflict {
        task_id: String,
        paths: Vec<String>,
        detail: String,
    },
    /// Aborted; the integration branch is back at `pre_merge_sha`.
    Failed {
        task_id: String,
        pre_merge_sha: String,
        error: GitError,
    },
}

impl MergeOutcome {
    pub fn task_id(&self) -> &str {
        match self {
            Self::Merged(record) => &record.task_id,
            Self::Conflict { task_id, .. } | Self::Failed { task_id, .. } => task_id,
        }
    }
}

enum Integration {
    Landed { fast_forward: bool },
    Conflict { paths: Vec<String>, detail: String },
}

pub struct MergeController {
    git: GitRunner,
    integration_branch: String,
    queue: VecDeque<QueuedMerge>,
    states: BTreeMap<String, MergeState>,
    ledger: MergeLedger,
    halted: Option<String>,
}

impl MergeController {
    /// Controller over the checkout at `repo_root`; task states are rebuilt
    /// from the ledger.
    pub fn new(
        repo_root: impl AsRef<Path>,
        integration_branch: impl Into<String>,
        ledger: MergeLedger,
    ) -> Self {
        let mut states = BTreeMap::new();
        for entry in ledger.entries() {
            let state = match entry {
                LedgerEntry::Merge(_) => MergeState::Merged,
                LedgerEntry::Stable { .. } => MergeState::Stable,
                LedgerEntry::Rollback(_) => MergeState::RolledBack,
            };
            states.insert(entry.task_id().to_string(), state);
        }
        Self {
            git: GitRunner::new(repo_root),
            integration_branch: integration_branch.into(),
            queue: VecDeque::new(),
            states,
            ledger,
            halted: None,
        }
    }

    /// Queue an approved task. Only a passing consensus result is accepted.
    pub fn enqueue(&mut self, workspace: Workspace, consensus: &ConsensusResult) -> MergeResult<()> {
        let task_id = workspace.task_id.clone();
        if consensus.task_id != task_id {
            return Err(MergeError::ConsensusMismatch {
                task_id,
                consensus_task: consensus.task_id.clone(),
            });
        }
        if !consensus.passed {
            return Err(MergeError::NotApproved { task_id });
        }
        if self.queue.iter().any(|q| q.workspace.task_id == task_id) {
            return Err(MergeError::AlreadyQueued { task_id });
        }

        self.queue.push_back(QueuedMerge {
            workspace,
            consensus_id: consensus.id,
            consensus_score: consensus.score,
            enqueued_at: Utc::now(),
        });
        self.states.insert(task_id.clone(), MergeState::Approved);
        info!(task_id = %task_id, queue_depth = self.queue.len(), "enqueued for merge");
        Ok(())
    }

    /// Integrate the task at the head of the queue. `Ok(None)` when empty.
    pub fn merge_next(&mut self) -> MergeResult<Option<MergeOutcome>> {
        if let Some(reason) = &self.halted {
            return Err(MergeError::Halted {
                reason: reason.clone(),
            });
        }
        if self.queue.is_empty() {
            return Ok(None);
        }
        self.check_integration_checkout()?;
        let pre_merge_sha = self.git.rev_parse(&self.integration_branch)?;
        let Some(item) = self.queue.pop_front() else {
            return Ok(None);
        };

        let task_id = item.workspace.task_id.clone();
        let started_at = Utc::now();
        self.states.insert(task_id.clone(), MergeState::Merging);

        let integration = match self.integrate(&item.workspace, &pre_merge_sha) {
            Ok(integration) => integration,
            Err(e) => {
                self.restore(&pre_merge_sha);
                self.states.insert(task_id.clone(), MergeState::MergeFailed);
                warn!(task_id = %task_id, error = %e, "merge aborted; integration branch restored");
                return Ok(Some(MergeOutcome::Failed {
                    task_id,
                    pre_merge_sha,
                    error: e,
                }));
            }
        };

        let fast_forward = match integration {
            Integration::Landed { fast_forward } => fast_forward,
            Integration::Conflict { paths, detail } => {
                self.states.insert(task_id.clone(), MergeState::Conflict);
                warn!(task_id = %task_id, paths = ?paths, detail = %detail, "merge conflict; task needs a fresh workspace");
                return Ok(Some(MergeOutcome::Conflict {
                    task_id,
                    paths,
                    detail,
                }));
            }
        };

        let merge_commit_sha = self.git.rev_parse("HEAD")?;
        let files = self.git.changed_files(&pre_merge_sha, &merge_commit_sha)?;
        let record = MergeRecord {
            id: Uuid::new_v4(),
            task_id: task_id.clone(),
            branch: item.workspace.branch_name.clone(),
            merge_commit_sha,
            pre_merge_sha,
            files,
            consensus_id: item.consensus_id,
            consensus_score: item.consensus_score,
            fast_forward,
            started_at,
            timestamp: Utc::now(),
        };
        self.states.insert(task_id.clone(), MergeState::Merged);
        self.append(LedgerEntry::Merge(record.clone()))?;
        info!(
            task_id = %task_id,
            sha = %record.merge_commit_sha,
            files = record.files.len(),
            fast_forward,
            "merged into {}",
            self.integration_branch
        );
        Ok(Some(MergeOutcome::Merged(record)))
    }

    fn integrate(&self, workspace: &Workspace, tip: &str) -> Result<Integration, GitError> {
        let branch = workspace.branch_name.as_str();
        let branch_tip = self.git.rev_parse(branch)?;

        if self.git.is_ancestor(tip, &branch_tip)? {
            self.git.run_with_retry(&["merge", "--ff-only", branch])?;
            return Ok(Integration::Landed { fast_forward: true });
        }

        let base = self.git.merge_base(tip, &branch_tip)?;
        let incoming: BTreeSet<String> = self.git.changed_files(&base, &branch_tip)?.into_iter().collect();
        let advanced: BTreeSet<String> = self.git.changed_files(&base, tip)?.into_iter().collect();
        let overlap: Vec<String> = incoming.intersection(&advanced).cloned().collect();
        if !overlap.is_empty() {
            return Ok(Integration::Conflict {
                detail: format!(
                    "{} path(s) changed both on {} and on the integration branch since {}",
                    overlap.len(),
                    branch,
                    short(&base)
                ),
                paths: overlap,
            });
        }

        let worktree = self.git.at(&workspace.path);
        if let Err(e) = worktree.run(&["rebase", tip]) {
            let _ = worktree.run(&["rebase", "--abort"]);
            return Ok(Integration::Conflict {
                paths: Vec::new(),
                detail: format!("automatic rebase onto {} failed: {}", short(tip), e.message),
            });
        }
        self.git.run_with_retry(&["merge", "--ff-only", branch])?;
        Ok(Integration::Landed { fast_forward: false })
    }

    /// Revert exactly the commits of one merge, verify the touched paths
    /// match the pre-merge state, and record a rollback entry.
    pub fn rollback(&mut self, record_id: Uuid, reason: &str) -> MergeResult<RollbackRecord> {
        let record = self
            .ledger
            .find_merge(record_id)
            .cloned()
            .ok_or_else(|| MergeError::UnknownRecord {
                record_id: record_id.to_string(),
            })?;
        if self.ledger.is_rolled_back(record_id) {
            return Err(MergeError::AlreadyRolledBack { record_id });
        }
        self.check_integration_checkout()?;

        let tip_before = self.git.rev_parse("HEAD")?;
        let range = format!("{}..{}", record.pre_merge_sha, record.merge_commit_sha);
        let message = format!(
            "Revert {} ({})\n\n{}\nReverts {}",
            record.task_id, record.branch, reason, range
        );

        let reverted = self
            .git
            .run(&["revert", "--no-commit", &range])
            .and_then(|_| self.git.run(&["commit", "--allow-empty", "-m", &message]));
        if let Err(e) = reverted {
            let _ = self.git.run(&["revert", "--abort"]);
            self.restore(&tip_before);
            return Err(self.halt_on_rollback(record_id, format!("revert failed: {}", e.message)));
        }

        if !record.files.is_empty() {
            let mut args = vec!["diff", "--name-only", record.pre_merge_sha.as_str(), "HEAD", "--"];
            args.extend(record.files.iter().map(String::as_str));
            let diverged = self.git.run(&args)?;
            if !diverged.trim().is_empty() {
                let paths: Vec<&str> = diverged.lines().collect();
                self.restore(&tip_before);
                return Err(self.halt_on_rollback(
                    record_id,
                    format!("paths differ from pre-merge state: {}", paths.join(", ")),
                ));
            }
        }

        let rollback = RollbackRecord {
            id: Uuid::new_v4(),
            merge_record_id: record.id,
            task_id: record.task_id.clone(),
            revert_commit_sha: self.git.rev_parse("HEAD")?,
            verified_paths: record.files.clone(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        };
        self.states
            .insert(record.task_id.clone(), MergeState::RolledBack);
        self.append(LedgerEntry::Rollback(rollback.clone()))?;
        info!(
            task_id = %record.task_id,
            merge = %record.id,
            revert = %rollback.revert_commit_sha,
            "rolled back merge"
        );
        Ok(rollback)
    }

    /// Roll back the latest un-reverted merge of `task_id`.
    pub fn rollback_task(&mut self, task_id: &str, reason: &str) -> MergeResult<RollbackRecord> {
        let record_id = self
            .ledger
            .active_merge_for(task_id)
            .map(|m| m.id)
            .ok_or_else(|| MergeError::NothingToRollBack {
                task_id: task_id.to_string(),
            })?;
        self.rollback(record_id, reason)
    }

    /// Post-merge checks passed for the task's latest merge.
    pub fn mark_stable(&mut self, task_id: &str) -> MergeResult<()> {
        let record_id = self
            .ledger
            .active_merge_for(task_id)
            .map(|m| m.id)
            .ok_or_else(|| MergeError::NothingToRollBack {
                task_id: task_id.to_string(),
            })?;
        self.append(LedgerEntry::Stable {
            merge_record_id: record_id,
            task_id: task_id.to_string(),
            timestamp: Utc::now(),
        })?;
        self.states.insert(task_id.to_string(), MergeState::Stable);
        Ok(())
    }

    pub fn halt(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        error!(reason = %reason, queue_depth = self.queue.len(), "merge queue halted");
        self.halted = Some(reason);
    }

    /// Operator acknowledgement after a halt.
    pub fn resume(&mut self) {
        if let Some(reason) = self.halted.take() {
            info!(previous_reason = %reason, "merge queue resumed");
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    pub fn halt_reason(&self) -> Option<&str> {
        self.halted.as_deref()
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    pub fn queued_tasks(&self) -> Vec<String> {
        self.queue
            .iter()
            .map(|q| q.workspace.task_id.clone())
            .collect()
    }

    pub fn state(&self, task_id: &str) -> Option<MergeState> {
        self.states.get(task_id).copied()
    }

    pub fn recent_merges(&self, n: usize) -> Vec<MergeRecord> {
        self.ledger.recent_merges(n).into_iter().cloned().collect()
    }

    pub fn ledger(&self) -> &MergeLedger {
        &self.ledger
    }

    pub fn integration_branch(&self) -> &str {
        &self.integration_branch
    }

    fn check_integration_checkout(&self) -> MergeResult<()> {
        let actual = self.git.current_branch()?;
        if actual != self.integration_branch {
            return Err(MergeError::WrongBranch {
                expected: self.integration_branch.clone(),
                actual,
            });
        }
        let changes = self.git.status_entries()?.len();
        if changes > 0 {
            return Err(MergeError::IntegrationDirty { changes });
        }
        Ok(())
    }

    fn append(&mut self, entry: LedgerEntry) -> MergeResult<()> {
        if let Err(e) = self.ledger.append(entry) {
            self.halt(format!("ledger write failed: {e}"));
            return Err(e);
        }
        Ok(())
    }

    fn restore(&self, sha: &str) {
        if let Err(e) = self.git.run(&["reset", "--hard", sha]) {
            error!(sha, error = %e, "failed to reset integration branch");
        }
    }

    fn halt_on_rollback(&mut self, record_id: Uuid, detail: String) -> MergeError {
        error!(merge = %record_id, detail = %detail, "rollback verification failed");
        self.halt(format!("rollback of {record_id} unverified: {detail}"));
        MergeError::RollbackVerification { record_id, detail }
    }
}

fn short(sha: &str) -> &str {
    sha.get(..8).unwrap_or(sha)
}
