//! Append-only audit of every consensus result, per task.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::consensus::types::ConsensusResult;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsensusHistory {
    by_task: BTreeMap<String, Vec<ConsensusResult>>,
}

impl ConsensusHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a result. Earlier results for the task are kept.
    pub fn record(&mut self, result: ConsensusResult) {
        self.by_task
            .entry(result.task_id.clone())
            .or_default()
            .push(result);
    }

    pub fn for_task(&self, task_id: &str) -> &[ConsensusResult] {
        self.by_task.get(task_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn latest(&self, task_id: &str) -> Option<&ConsensusResult> {
        self.for_task(task_id).last()
    }

    pub fn total(&self) -> usize {
        self.by_task.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReviewConfig;
    use crate::consensus::engine::aggregate;
    use crate::consensus::types::{ReviewOutput, ReviewerReport};
    use crate::reviewer::{ReviewDomain, ReviewerProfile};

    fn result(score: f64) -> ConsensusResult {
        aggregate(
            "T-1",
            &[ReviewerProfile::new("r", ReviewDomain::Correctness, 1.0)],
            vec![ReviewerReport {
                reviewer_id: "r".into(),
                outcome: Ok(ReviewOutput::new(score)),
            }],
            &ReviewConfig::default(),
        )
    }

    #[test]
    fn test_rereview_appends() {
        let mut history = ConsensusHistory::new();
        let first = result(5.0);
        let second = result(8.0);
        history.record(first.clone());
        history.record(second.clone());

        assert_eq!(history.for_task("T-1").len(), 2);
        assert_eq!(history.for_task("T-1")[0], first);
        assert_eq!(history.latest("T-1").map(|r| r.id), Some(second.id));
        assert!(history.for_task("other").is_empty());
        assert_eq!(history.total(), 2);
    }
}
