//! Task lifecycle: explicit states and legal transition guards.
//!
//! Every task owns a `Lifecycle` that validates each transition against the
//! table below and keeps a log of all transitions for diagnostics:
//!
//! ```text
//! Pending   → Ready
//! Ready     → Running | Pending          (dependency rolled back)
//! Running   → Reviewing | Ready | Failed (Ready = retry)
//! Reviewing → Merging | Ready | Failed
//! Merging   → Merged | Ready | Failed    (Ready = conflict, re-provision)
//! Merged    → RolledBack
//! Failed    → Pending                    (operator retry)
//! RolledBack→ Pending                    (operator retry)
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::types::TaskState;

fn is_legal_transition(from: TaskState, to: TaskState) -> bool {
    use TaskState::*;

    matches!(
        (from, to),
        (Pending, Ready)
            | (Ready, Running)
            | (Ready, Pending)
            | (Running, Reviewing)
            | (Running, Ready)
            | (Running, Failed)
            | (Reviewing, Merging)
            | (Reviewing, Ready)
            | (Reviewing, Failed)
            | (Merging, Merged)
            | (Merging, Ready)
            | (Merging, Failed)
            | (Merged, RolledBack)
            | (Failed, Pending)
            | (RolledBack, Pending)
    )
}

/// A single recorded state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: TaskState,
    pub to: TaskState,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalTransition {
    pub task_id: String,
    pub from: TaskState,
    pub to: TaskState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Illegal state transition for {}: {} → {}",
            self.task_id, self.from, self.to
        )
    }
}

impl std::error::Error for IllegalTransition {}

/// Per-task state with an auditable transition log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lifecycle {
    task_id: String,
    current: TaskState,
    transitions: Vec<TransitionRecord>,
}

impl Lifecycle {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            current: TaskState::Pending,
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> TaskState {
        self.current
    }

    /// Attempt to move to `to`, recording the transition when legal.
    pub fn advance(&mut self, to: TaskState, reason: Option<&str>) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                task_id: self.task_id.clone(),
                from: self.current,
                to,
            });
        }

        tracing::debug!(task_id = %self.task_id, from = %self.current, to = %to, "task transition");

        self.transitions.push(TransitionRecord {
            from: self.current,
            to,
            at: Utc::now(),
            reason: reason.map(String::from),
        });
        self.current = to;
        Ok(())
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// Compact history, e.g. `pending → ready → running`.
    pub fn summary(&self) -> String {
        let mut states = vec![TaskState::Pending.to_string()];
        states.extend(self.transitions.iter().map(|t| t.to.to_string()));
        states.join(" → ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut lc = Lifecycle::new("t");
        for to in [
            TaskState::Ready,
            TaskState::Running,
            TaskState::Reviewing,
            TaskState::Merging,
            TaskState::Merged,
        ] {
            lc.advance(to, None).unwrap();
        }
        assert_eq!(lc.current(), TaskState::Merged);
        assert_eq!(lc.transitions().len(), 5);
        assert_eq!(
            lc.summary(),
            "pending → ready → running → reviewing → merging → merged"
        );
    }

    #[test]
    fn test_cannot_skip_review() {
        let mut lc = Lifecycle::new("t");
        lc.advance(TaskState::Ready, None).unwrap();
        lc.advance(TaskState::Running, None).unwrap();
        let err = lc.advance(TaskState::Merged, None).unwrap_err();
        assert_eq!(err.from, TaskState::Running);
        assert_eq!(lc.current(), TaskState::Running);
    }

    #[test]
    fn test_retry_and_operator_reset() {
        let mut lc = Lifecycle::new("t");
        lc.advance(TaskState::Ready, None).unwrap();
        lc.advance(TaskState::Running, None).unwrap();
        lc.advance(TaskState::Reviewing, None).unwrap();
        lc.advance(TaskState::Ready, Some("consensus failed")).unwrap();
        lc.advance(TaskState::Running, None).unwrap();
        lc.advance(TaskState::Failed, Some("budget exhausted")).unwrap();
        assert!(lc.advance(TaskState::Ready, None).is_err());
        lc.advance(TaskState::Pending, Some("operator retry")).unwrap();
        assert_eq!(
            lc.transitions()[3].reason.as_deref(),
            Some("consensus failed")
        );
    }

    #[test]
    fn test_merged_only_leaves_via_rollback() {
        let mut lc = Lifecycle::new("t");
        for to in [
            TaskState::Ready,
            TaskState::Running,
            TaskState::Reviewing,
            TaskState::Merging,
            TaskState::Merged,
        ] {
            lc.advance(to, None).unwrap();
        }
        assert!(lc.advance(TaskState::Failed, None).is_err());
        lc.advance(TaskState::RolledBack, None).unwrap();
    }
}
