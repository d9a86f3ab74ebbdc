//! Seams towards the external collaborators of a pipeline run.

use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;

use crate::consensus::ConsensusResult;
use crate::merge::MergeRecord;
use crate::task::Task;
use crate::workspace::Workspace;

/// What the executor is asked to do for one attempt.
#[derive(Debug, Clone, Serialize)]
pub struct WorkOrder {
    pub task: Task,
    /// 1-based dispatch attempt.
    pub attempt: u32,
    /// Consensus of the previous attempt when it was rejected, for fix-up passes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prior_review: Option<ConsensusResult>,
}

/// External executor that fills a workspace with committed work.
///
/// On success the workspace must be clean with at least one commit on top
/// of its base ref.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn execute(&self, workspace: &Workspace, order: &WorkOrder) -> anyhow::Result<()>;
}

/// Verification run against the integration branch right after a merge.
/// An error triggers the rollback path.
#[async_trait]
pub trait PostMergeCheck: Send + Sync {
    async fn verify(&self, record: &MergeRecord, repo_root: &Path) -> anyhow::Result<()>;
}
