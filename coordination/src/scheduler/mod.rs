//! Dependency-aware dispatch of tasks.

pub mod dispatch;
pub mod report;

pub use dispatch::{SchedulerError, TaskScheduler};
pub use report::{BlockedTask, Disposition, FailureReport, FailureStage};
