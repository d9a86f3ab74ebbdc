//! MergeGuard coordination library
//!
//! Drives a graph of code-change tasks from dispatch to the integration
//! branch:
//! - [`scheduler`]: dependency-aware dispatch with retry budgets
//! - [`workspace`]: one isolated git worktree per task
//! - [`reviewer`]: persona catalog and relevance/diversity-based selection
//! - [`consensus`]: parallel multi-reviewer scoring with veto and dedup
//! - [`merge`]: serialized merges, a persistent ledger, and verified rollback
//! - [`pipeline`]: the async runner composing all of the above
//!
//! # Usage
//!
//! ```ignore
//! let graph = TaskGraph::load(Path::new("tasks.yaml"))?;
//! let mut pipeline = Pipeline::new(repo, config, graph, registry, worker, reviewers)?;
//! let summary = pipeline.run().await?;
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod consensus;
pub mod document;
pub mod error;
pub mod git;
pub mod merge;
pub mod pipeline;
pub mod reviewer;
pub mod scheduler;
pub mod task;
pub mod workspace;

pub use config::{ConfigError, PipelineConfig};
pub use consensus::{ConsensusEngine, ConsensusResult, Finding, ReviewOutput, ReviewerBackend};
pub use error::PipelineError;
pub use merge::{MergeController, MergeLedger, MergeOutcome, MergeRecord};
pub use pipeline::{Pipeline, PipelineSnapshot, PostMergeCheck, RunSummary, WorkOrder, Worker};
pub use reviewer::{PersonaSelector, ReviewerProfile, ReviewerRegistry};
pub use scheduler::{FailureReport, TaskScheduler};
pub use task::{Task, TaskGraph, TaskState};
pub use workspace::{Workspace, WorkspaceManager};
