//! Per-task isolated git worktrees.

pub mod error;
pub mod manager;
pub mod types;

pub use error::{WorkspaceError, WorkspaceResult};
pub use manager::{looks_like_secret, workspace_slug, WorkspaceManager};
pub use types::{ChangeSet, Workspace, WorkspaceListing, WorkspaceStatus};
