use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use crate::git::GitError;

pub type MergeResult<T> = Result<T, MergeError>;

#[derive(Debug, Clone, Error)]
pub enum MergeError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error("Task {task_id} has no passing consensus result; refusing to enqueue")]
    NotApproved { task_id: String },

    #[error("Task {task_id} is already in the merge queue")]
    AlreadyQueued { task_id: String },

    #[error("Consensus result belongs to {consensus_task}, not {task_id}")]
    ConsensusMismatch {
        task_id: String,
        consensus_task: String,
    },

    #[error("Merge queue is halted: {reason}")]
    Halted { reason: String },

    #[error("Repository root is on {actual}, expected integration branch {expected}")]
    WrongBranch { expected: String, actual: String },

    #[error("Integration checkout has {changes} uncommitted change(s)")]
    IntegrationDirty { changes: usize },

    #[error("Rollback of merge {record_id} could not be verified: {detail}")]
    RollbackVerification { record_id: Uuid, detail: String },

    #[error("No merge record {record_id}")]
    UnknownRecord { record_id: String },

    #[error("No merged, un-reverted record for task {task_id}")]
    NothingToRollBack { task_id: String },

    #[error("Merge {record_id} was already rolled back")]
    AlreadyRolledBack { record_id: Uuid },

    #[error("Merge ledger {path}: {message}")]
    Ledger { path: PathBuf, message: String },
}

impl MergeError {
    /// Errors that leave the queue halted until an operator resumes it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::RollbackVerification { .. } | Self::Ledger { .. })
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            Self::Git(e) => e.recovery_suggestion(),
            Self::NotApproved { .. } => "Re-run review; only passing consensus results can merge.",
            Self::AlreadyQueued { .. } => "Wait for the queued merge to finish.",
            Self::ConsensusMismatch { .. } => "Enqueue the task with its own consensus result.",
            Self::Halted { .. } => {
                "Inspect the integration branch, fix it by hand, then resume the merge queue."
            }
            Self::WrongBranch { .. } => "Check out the integration branch in the repository root.",
            Self::IntegrationDirty { .. } => {
                "Commit or discard changes in the repository root; merges need a clean checkout."
            }
            Self::RollbackVerification { .. } => {
                "The integration branch may diverge from its pre-merge state. Compare it with the \
                 recorded pre-merge commit, repair by hand, then resume the queue."
            }
            Self::UnknownRecord { .. } | Self::NothingToRollBack { .. } => {
                "List the ledger to find a merged record id."
            }
            Self::AlreadyRolledBack { .. } => "Nothing to do; the ledger already has a rollback entry.",
            Self::Ledger { .. } => "Check the ledger path is writable and holds valid JSON.",
        }
    }
}
