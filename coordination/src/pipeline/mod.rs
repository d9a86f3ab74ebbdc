//! End-to-end orchestration of a task graph into the integration branch.

pub mod runner;
pub mod snapshot;
pub mod traits;

pub use runner::{Pipeline, RunSummary};
pub use snapshot::{PipelineSnapshot, RunningTask};
pub use traits::{PostMergeCheck, WorkOrder, Worker};
