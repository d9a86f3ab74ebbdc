//! Read-only operator view of scheduler and merge queue state.

use serde::Serialize;

use crate::merge::{MergeController, MergeRecord};
use crate::scheduler::{BlockedTask, FailureReport, TaskScheduler};
use crate::task::TaskState;

#[derive(Debug, Clone, Serialize)]
pub struct RunningTask {
    pub task_id: String,
    pub state: TaskState,
    pub attempt: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineSnapshot {
    pub ready: Vec<String>,
    pub running: Vec<RunningTask>,
    pub failed: Vec<FailureReport>,
    pub blocked: Vec<BlockedTask>,
    pub merged: Vec<String>,
    pub merge_queue_depth: usize,
    /// Newest first.
    pub recent_merges: Vec<MergeRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halted: Option<String>,
}

impl PipelineSnapshot {
    pub fn capture(scheduler: &TaskScheduler, merges: &MergeController, recent: usize) -> Self {
        Self {
            ready: scheduler.ready_set().iter().map(|t| t.id.clone()).collect(),
            running: scheduler
                .running()
                .into_iter()
                .map(|(task_id, state)| RunningTask {
                    attempt: scheduler.attempts(&task_id),
                    task_id,
                    state,
                })
                .collect(),
            failed: scheduler.failures().into_iter().cloned().collect(),
            blocked: scheduler.blocked_tasks(),
            merged: scheduler.tasks_in(TaskState::Merged),
            merge_queue_depth: merges.queue_depth(),
            recent_merges: merges.recent_merges(recent),
            halted: merges.halt_reason().map(str::to_string),
        }
    }
}
