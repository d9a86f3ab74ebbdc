use std::path::PathBuf;

use thiserror::Error;

use crate::git::GitError;

pub type WorkspaceResult<T> = Result<T, WorkspaceError>;

/// Provisioning and teardown failures.
#[derive(Debug, Clone, Error)]
pub enum WorkspaceError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error("IO error on {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error(
        "Workspace for {task_id} has {changes} uncommitted change(s); refusing to destroy without force"
    )]
    Dirty { task_id: String, changes: usize },

    #[error("Refusing to use protected branch {branch} for a workspace")]
    ProtectedBranch { branch: String },

    #[error("Path {path} is occupied by something other than the workspace for {task_id}")]
    PathConflict { task_id: String, path: PathBuf },

    #[error("Not a git repository: {path}")]
    NotARepository { path: PathBuf },

    #[error("Allow-listed file {path} escapes the repository root")]
    UnsafeCopyPath { path: String },
}

impl WorkspaceError {
    pub(crate) fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Failures that no amount of retrying will fix.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::ProtectedBranch { .. }
                | Self::PathConflict { .. }
                | Self::NotARepository { .. }
                | Self::UnsafeCopyPath { .. }
        )
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            Self::Git(e) => e.recovery_suggestion(),
            Self::Io { .. } => "Check disk space and permissions on the worktree base directory.",
            Self::Dirty { .. } => {
                "Commit or discard the changes in the workspace, or destroy it with force."
            }
            Self::ProtectedBranch { .. } => {
                "Change workspace.branch_prefix so task branches never match a protected branch."
            }
            Self::PathConflict { .. } => {
                "Move the conflicting directory away or run `git worktree prune` in the repository."
            }
            Self::NotARepository { .. } => "Point the repository root at a git checkout.",
            Self::UnsafeCopyPath { .. } => {
                "Allow-list entries must be relative paths inside the repository."
            }
        }
    }
}
