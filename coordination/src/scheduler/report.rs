//! Failure and blocking reports surfaced to operators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::consensus::ConsensusResult;

/// Pipeline stage a task failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Provision,
    Execute,
    Timeout,
    Review,
    Merge,
    PostMerge,
    Cancelled,
}

impl std::fmt::Display for FailureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Provision => "provision",
            Self::Execute => "execute",
            Self::Timeout => "timeout",
            Self::Review => "review",
            Self::Merge => "merge",
            Self::PostMerge => "post_merge",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Enough context to re-run only the failed branch of the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    pub task_id: String,
    pub stage: FailureStage,
    pub detail: String,
    /// Dispatches so far, including the failing one.
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_consensus: Option<ConsensusResult>,
    pub at: DateTime<Utc>,
}

impl FailureReport {
    pub fn new(task_id: impl Into<String>, stage: FailureStage, detail: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            stage,
            detail: detail.into(),
            attempts: 0,
            last_consensus: None,
            at: Utc::now(),
        }
    }

    pub fn with_consensus(mut self, consensus: ConsensusResult) -> Self {
        self.last_consensus = Some(consensus);
        self
    }
}

impl std::fmt::Display for FailureReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} failed at {} after {} attempt(s): {}",
            self.task_id, self.stage, self.attempts, self.detail
        )?;
        if let Some(consensus) = &self.last_consensus {
            write!(f, " [{}]", consensus.summary())?;
        }
        Ok(())
    }
}

/// A task that cannot run until an operator deals with its failed ancestors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedTask {
    pub task_id: String,
    pub blocked_by: Vec<String>,
}

/// What the scheduler did with a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Back to Ready for another attempt.
    Retry { next_attempt: u32 },
    /// Permanently failed; dependents stay blocked.
    Failed,
}
