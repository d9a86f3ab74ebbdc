use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An isolated worktree exclusively owned by one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub task_id: String,
    pub path: PathBuf,
    pub branch_name: String,
    /// Integration-branch commit the workspace was provisioned from.
    pub base_ref: String,
    pub created_at: DateTime<Utc>,
    /// Allow-listed files copied in at provisioning; ignored by `status`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub copied_files: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum WorkspaceStatus {
    Clean,
    Dirty { changes: usize },
}

impl WorkspaceStatus {
    pub fn is_clean(self) -> bool {
        matches!(self, Self::Clean)
    }
}

/// Operator view of a live workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceListing {
    pub workspace: Workspace,
    /// Held by a task that has not released it yet.
    pub leased: bool,
}

/// Diff material handed to reviewers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    pub base_ref: String,
    pub head: String,
    pub commits: usize,
    pub files: Vec<String>,
    pub diff: String,
}
