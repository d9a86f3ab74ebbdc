//! Umbrella error for callers driving the whole pipeline.

use thiserror::Error;

use crate::config::ConfigError;
use crate::consensus::ReviewerError;
use crate::merge::MergeError;
use crate::reviewer::{RegistryError, SelectionError};
use crate::scheduler::SchedulerError;
use crate::task::GraphError;
use crate::workspace::WorkspaceError;

#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Reviewer(#[from] ReviewerError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("Background job failed: {0}")]
    Background(String),
}

impl PipelineError {
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            Self::Config(_) => "Fix the configuration file or MERGEGUARD_* environment overrides.",
            Self::Graph(e) => e.recovery_suggestion(),
            Self::Registry(e) => e.recovery_suggestion(),
            Self::Selection(e) => e.recovery_suggestion(),
            Self::Workspace(e) => e.recovery_suggestion(),
            Self::Reviewer(e) => e.recovery_suggestion(),
            Self::Merge(e) => e.recovery_suggestion(),
            Self::Scheduler(e) => e.recovery_suggestion(),
            Self::Background(_) => {
                "A blocking git job panicked; inspect the integration branch and the merge ledger before re-running."
            }
        }
    }
}
