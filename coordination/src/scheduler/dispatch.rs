//! Task scheduler: ready-set computation and bounded dispatch.
//!
//! ```text
//! ready set = { Pending tasks whose dependencies are all Merged }
//! dispatch  = ready set ordered by (complexity, id), up to free capacity
//! ```
//!
//! The scheduler owns no file-level state; it only tracks lifecycles.
//! Failed tasks and everything downstream of them stay visible until an
//! operator retries or excises them.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::scheduler::report::{BlockedTask, Disposition, FailureReport};
use crate::task::{GraphError, IllegalTransition, Lifecycle, Task, TaskGraph, TaskState};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Transition(#[from] IllegalTransition),

    #[error("Unknown task: {id}")]
    UnknownTask { id: String },

    #[error("Task {id} is {state}; only failed or rolled-back tasks can be retried")]
    NotRetryable { id: String, state: TaskState },

    #[error("Task {id} is {state}; wait for it to finish before excising it")]
    InFlight { id: String, state: TaskState },
}

impl SchedulerError {
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            Self::Graph(e) => e.recovery_suggestion(),
            Self::Transition(_) => "Internal ordering bug; report it with the task's transition log.",
            Self::UnknownTask { .. } => "Check the task id against the loaded graph.",
            Self::NotRetryable { .. } => "Only failed or rolled-back tasks can be retried.",
            Self::InFlight { .. } => "Wait for the task to finish or fail, then excise it.",
        }
    }
}

#[derive(Debug, Clone)]
struct TaskEntry {
    lifecycle: Lifecycle,
    attempts: u32,
    last_failure: Option<FailureReport>,
}

impl TaskEntry {
    fn new(id: &str) -> Self {
        Self {
            lifecycle: Lifecycle::new(id),
            attempts: 0,
            last_failure: None,
        }
    }

    fn state(&self) -> TaskState {
        self.lifecycle.current()
    }
}

pub struct TaskScheduler {
    graph: TaskGraph,
    entries: BTreeMap<String, TaskEntry>,
    max_concurrency: usize,
    retry_budget: u32,
}

impl TaskScheduler {
    pub fn new(graph: TaskGraph, config: &SchedulerConfig) -> Self {
        let entries = graph
            .tasks()
            .map(|t| (t.id.clone(), TaskEntry::new(&t.id)))
            .collect();
        let mut scheduler = Self {
            graph,
            entries,
            max_concurrency: config.max_concurrency.max(1),
            retry_budget: config.retry_budget,
        };
        scheduler.refresh();
        info!(
            tasks = scheduler.graph.len(),
            ready = scheduler.ready_set().len(),
            max_concurrency = scheduler.max_concurrency,
            "scheduler initialised"
        );
        scheduler
    }

    /// Load and validate a task graph document. A cyclic graph fails here,
    /// before anything is provisioned.
    pub fn load(path: &Path, config: &SchedulerConfig) -> Result<Self, SchedulerError> {
        Ok(Self::new(TaskGraph::load(path)?, config))
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn state(&self, id: &str) -> Option<TaskState> {
        self.entries.get(id).map(TaskEntry::state)
    }

    pub fn lifecycle(&self, id: &str) -> Option<&Lifecycle> {
        self.entries.get(id).map(|e| &e.lifecycle)
    }

    pub fn attempts(&self, id: &str) -> u32 {
        self.entries.get(id).map_or(0, |e| e.attempts)
    }

    pub fn last_failure(&self, id: &str) -> Option<&FailureReport> {
        self.entries.get(id).and_then(|e| e.last_failure.as_ref())
    }

    fn deps_merged(&self, task: &Task) -> bool {
        task.dependencies
            .iter()
            .all(|d| self.state(d) == Some(TaskState::Merged))
    }

    /// Promote Pending tasks whose dependencies all merged; demote Ready
    /// tasks whose dependency was reverted. Returns newly ready ids.
    pub fn refresh(&mut self) -> Vec<String> {
        let mut promote = Vec::new();
        let mut demote = Vec::new();
        for task in self.graph.tasks() {
            match (self.state(&task.id), self.deps_merged(task)) {
                (Some(TaskState::Pending), true) => promote.push(task.id.clone()),
                (Some(TaskState::Ready), false) => demote.push(task.id.clone()),
                _ => {}
            }
        }

        for id in &demote {
            if let Some(entry) = self.entries.get_mut(id) {
                let _ = entry
                    .lifecycle
                    .advance(TaskState::Pending, Some("dependency no longer merged"));
                debug!(task_id = %id, "demoted to pending");
            }
        }
        for id in &promote {
            if let Some(entry) = self.entries.get_mut(id) {
                let _ = entry
                    .lifecycle
                    .advance(TaskState::Ready, Some("dependencies merged"));
            }
        }
        promote
    }

    /// Ready tasks in dispatch order: ascending complexity, then id.
    pub fn ready_set(&self) -> Vec<&Task> {
        let mut ready: Vec<&Task> = self
            .graph
            .tasks()
            .filter(|t| self.state(&t.id) == Some(TaskState::Ready))
            .collect();
        ready.sort_by(|a, b| a.complexity.cmp(&b.complexity).then_with(|| a.id.cmp(&b.id)));
        ready
    }

    pub fn in_flight(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.state().is_in_flight())
            .count()
    }

    pub fn capacity(&self) -> usize {
        self.max_concurrency.saturating_sub(self.in_flight())
    }

    /// Move as many ready tasks to Running as capacity allows.
    pub fn dispatch(&mut self) -> Vec<Task> {
        self.refresh();
        let capacity = self.capacity();
        let picked: Vec<Task> = self
            .ready_set()
            .into_iter()
            .take(capacity)
            .cloned()
            .collect();

        for task in &picked {
            if let Some(entry) = self.entries.get_mut(&task.id) {
                entry.attempts += 1;
                let reason = format!("dispatch attempt {}", entry.attempts);
                let _ = entry.lifecycle.advance(TaskState::Running, Some(&reason));
                info!(task_id = %task.id, attempt = entry.attempts, "dispatched task");
            }
        }
        picked
    }

    /// Apply a lifecycle transition.
    pub fn advance(
        &mut self,
        id: &str,
        to: TaskState,
        reason: Option<&str>,
    ) -> Result<(), SchedulerError> {
        let entry = self.entry_mut(id)?;
        entry.lifecycle.advance(to, reason)?;
        Ok(())
    }

    /// Record a failed attempt. Retryable failures go back to Ready while the
    /// retry budget lasts; everything else is permanent.
    pub fn record_failure(
        &mut self,
        mut report: FailureReport,
        retryable: bool,
    ) -> Result<Disposition, SchedulerError> {
        let retry_budget = self.retry_budget;
        let id = report.task_id.clone();
        let entry = self.entry_mut(&id)?;
        report.attempts = entry.attempts;
        let reason = report.to_string();

        let disposition = if retryable && entry.attempts <= retry_budget {
            entry.lifecycle.advance(TaskState::Ready, Some(&reason))?;
            info!(
                task_id = %id,
                stage = %report.stage,
                attempt = entry.attempts,
                retry_budget,
                detail = %report.detail,
                "retrying task"
            );
            Disposition::Retry {
                next_attempt: entry.attempts + 1,
            }
        } else {
            entry.lifecycle.advance(TaskState::Failed, Some(&reason))?;
            Disposition::Failed
        };
        entry.last_failure = Some(report);

        if disposition == Disposition::Failed {
            let blocked = self.graph.transitive_dependents(&id);
            warn!(
                task_id = %id,
                blocked = ?blocked,
                "task permanently failed; dependents blocked until retried or excised"
            );
        }
        Ok(disposition)
    }

    /// The task's merge landed; promotes dependents.
    pub fn mark_merged(&mut self, id: &str) -> Result<Vec<String>, SchedulerError> {
        self.advance(id, TaskState::Merged, Some("merged"))?;
        Ok(self.refresh())
    }

    /// Mark a Ready task as merged by an earlier run (from the merge ledger).
    pub fn restore_merged(&mut self, id: &str) -> Result<(), SchedulerError> {
        let entry = self.entry_mut(id)?;
        for to in [
            TaskState::Running,
            TaskState::Reviewing,
            TaskState::Merging,
            TaskState::Merged,
        ] {
            entry.lifecycle.advance(to, Some("restored from merge ledger"))?;
        }
        debug!(task_id = %id, "restored merged task");
        self.refresh();
        Ok(())
    }

    /// The task's merge was reverted. Dependents that already merged are
    /// reported but left alone.
    pub fn mark_rolled_back(&mut self, mut report: FailureReport) -> Result<(), SchedulerError> {
        let id = report.task_id.clone();
        let entry = self.entry_mut(&id)?;
        report.attempts = entry.attempts;
        entry
            .lifecycle
            .advance(TaskState::RolledBack, Some(&report.to_string()))?;
        entry.last_failure = Some(report);

        let landed: Vec<String> = self
            .graph
            .transitive_dependents(&id)
            .into_iter()
            .filter(|d| self.state(d) == Some(TaskState::Merged))
            .collect();
        if !landed.is_empty() {
            warn!(task_id = %id, dependents = ?landed, "rolled back task has merged dependents");
        }
        self.refresh();
        Ok(())
    }

    /// Operator retry: back to Pending with a fresh retry budget.
    pub fn retry_task(&mut self, id: &str) -> Result<(), SchedulerError> {
        let entry = self.entry_mut(id)?;
        let state = entry.state();
        if !state.blocks_dependents() {
            return Err(SchedulerError::NotRetryable {
                id: id.to_string(),
                state,
            });
        }
        entry
            .lifecycle
            .advance(TaskState::Pending, Some("operator retry"))?;
        entry.attempts = 0;
        entry.last_failure = None;
        info!(task_id = %id, "operator retry");
        self.refresh();
        Ok(())
    }

    /// Operator excision: drop the task from the graph and unblock dependents.
    pub fn excise_task(&mut self, id: &str) -> Result<Task, SchedulerError> {
        let state = self.state(id).ok_or_else(|| SchedulerError::UnknownTask {
            id: id.to_string(),
        })?;
        if state.is_in_flight() {
            return Err(SchedulerError::InFlight {
                id: id.to_string(),
                state,
            });
        }
        let task = self.graph.excise(id)?;
        self.entries.remove(id);
        info!(task_id = %id, previous_state = %state, "excised task from graph");
        self.refresh();
        Ok(task)
    }

    /// Pending tasks with failed or rolled-back ancestors, and which.
    pub fn blocked_tasks(&self) -> Vec<BlockedTask> {
        let mut blocked: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (id, entry) in &self.entries {
            if !entry.state().blocks_dependents() {
                continue;
            }
            for dependent in self.graph.transitive_dependents(id) {
                if self.state(&dependent) == Some(TaskState::Pending) {
                    blocked.entry(dependent).or_default().insert(id.clone());
                }
            }
        }
        blocked
            .into_iter()
            .map(|(task_id, by)| BlockedTask {
                task_id,
                blocked_by: by.into_iter().collect(),
            })
            .collect()
    }

    /// Ids in `state`, sorted.
    pub fn tasks_in(&self, state: TaskState) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, e)| e.state() == state)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// In-flight task ids with their current state.
    pub fn running(&self) -> Vec<(String, TaskState)> {
        self.entries
            .iter()
            .filter(|(_, e)| e.state().is_in_flight())
            .map(|(id, e)| (id.clone(), e.state()))
            .collect()
    }

    /// Reports for tasks currently Failed or RolledBack.
    pub fn failures(&self) -> Vec<&FailureReport> {
        self.entries
            .values()
            .filter(|e| e.state().blocks_dependents())
            .filter_map(|e| e.last_failure.as_ref())
            .collect()
    }

    /// Nothing is ready and nothing is in flight.
    pub fn is_finished(&self) -> bool {
        self.in_flight() == 0
            && !self.graph.tasks().any(|t| {
                let state = self.state(&t.id);
                state == Some(TaskState::Ready)
                    || (state == Some(TaskState::Pending) && self.deps_merged(t))
            })
    }

    fn entry_mut(&mut self, id: &str) -> Result<&mut TaskEntry, SchedulerError> {
        self.entries
            .get_mut(id)
            .ok_or_else(|| SchedulerError::UnknownTask { id: id.to_string() })
    }
}
