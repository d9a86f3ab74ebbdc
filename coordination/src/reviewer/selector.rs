//! Persona selection: relevance-ranked, domain-diverse reviewer subsets.
//!
//! ```text
//! relevance = w_p·|properties ∩ task| + w_t·|tags ∩ task| + w_c·[complexity in range]
//! order     = relevance desc, weight desc, id asc
//! ```
//!
//! Greedy pick with at most `max_per_domain` per domain; the cap is relaxed
//! (and logged) only when the target cannot otherwise be reached. A manual
//! override list replaces automatic selection entirely.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{ReviewConfig, SelectionWeights};
use crate::reviewer::profile::{ReviewDomain, ReviewerProfile};
use crate::reviewer::registry::ReviewerRegistry;
use crate::task::Task;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("Manual override for task {task_id} names unknown reviewer {reviewer}")]
    UnknownReviewer { task_id: String, reviewer: String },
}

impl SelectionError {
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            Self::UnknownReviewer { .. } => {
                "Fix the task's reviewers list or add the persona to the catalog."
            }
        }
    }
}

/// Outcome of a selection with the reasoning kept for audit.
#[derive(Debug, Clone, Serialize)]
pub struct Selection {
    pub reviewers: Vec<ReviewerProfile>,
    /// Relevance per chosen reviewer, in selection order.
    pub relevance: Vec<(String, f64)>,
    /// Chosen from a manual override list.
    pub manual: bool,
    /// The per-domain cap had to be exceeded to reach the target.
    pub relaxed_diversity: bool,
}

impl Selection {
    pub fn ids(&self) -> Vec<&str> {
        self.reviewers.iter().map(|r| r.id.as_str()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct PersonaSelector {
    weights: SelectionWeights,
    max_per_domain: usize,
}

impl Default for PersonaSelector {
    fn default() -> Self {
        Self::from_config(&ReviewConfig::default())
    }
}

impl PersonaSelector {
    pub fn new(weights: SelectionWeights, max_per_domain: usize) -> Self {
        Self {
            weights,
            max_per_domain: max_per_domain.max(1),
        }
    }

    pub fn from_config(config: &ReviewConfig) -> Self {
        Self::new(config.selection_weights.clone(), config.max_per_domain)
    }

    pub fn relevance(&self, task: &Task, profile: &ReviewerProfile) -> f64 {
        let app = &profile.applicability;
        self.weights.property_overlap * app.property_overlap(task) as f64
            + self.weights.tag_overlap * app.tag_overlap(task, &profile.domain) as f64
            + if app.fits_complexity(task) {
                self.weights.complexity_fit
            } else {
                0.0
            }
    }

    /// Ordered reviewer list for `task`.
    pub fn select(
        &self,
        task: &Task,
        registry: &ReviewerRegistry,
        target_count: usize,
    ) -> Result<Vec<ReviewerProfile>, SelectionError> {
        Ok(self.select_detailed(task, registry, target_count, &[])?.reviewers)
    }

    /// Selection with audit detail. `overrides` (or, if empty, the task's own
    /// `reviewers` list) bypasses scoring entirely.
    pub fn select_detailed(
        &self,
        task: &Task,
        registry: &ReviewerRegistry,
        target_count: usize,
        overrides: &[String],
    ) -> Result<Selection, SelectionError> {
        let manual_ids = if overrides.is_empty() {
            task.reviewers.as_slice()
        } else {
            overrides
        };
        if !manual_ids.is_empty() {
            return self.manual(task, registry, manual_ids);
        }

        let mut ranked: Vec<(f64, &ReviewerProfile)> = registry
            .profiles()
            .iter()
            .map(|p| (self.relevance(task, p), p))
            .collect();
        ranked.sort_by(|(ra, a), (rb, b)| {
            rb.total_cmp(ra)
                .then_with(|| b.weight.total_cmp(&a.weight))
                .then_with(|| a.id.cmp(&b.id))
        });

        let target = target_count.min(ranked.len());
        let mut chosen: Vec<usize> = Vec::with_capacity(target);
        let mut per_domain: BTreeMap<&ReviewDomain, usize> = BTreeMap::new();

        for (index, (_, profile)) in ranked.iter().enumerate() {
            if chosen.len() == target {
                break;
            }
            let count = per_domain.entry(&profile.domain).or_default();
            if *count < self.max_per_domain {
                *count += 1;
                chosen.push(index);
            }
        }

        let mut relaxed_diversity = false;
        if chosen.len() < target {
            relaxed_diversity = true;
            let shortfall = target - chosen.len();
            warn!(
                task_id = %task.id,
                target,
                shortfall,
                max_per_domain = self.max_per_domain,
                "relaxing reviewer diversity constraint to reach target count"
            );
            let taken: HashSet<usize> = chosen.iter().copied().collect();
            let extra: Vec<usize> = (0..ranked.len())
                .filter(|i| !taken.contains(i))
                .take(shortfall)
                .collect();
            chosen.extend(extra);
            chosen.sort_unstable();
        }

        let selection = Selection {
            reviewers: chosen.iter().map(|&i| ranked[i].1.clone()).collect(),
            relevance: chosen
                .iter()
                .map(|&i| (ranked[i].1.id.clone(), ranked[i].0))
                .collect(),
            manual: false,
            relaxed_diversity,
        };
        debug!(task_id = %task.id, reviewers = ?selection.ids(), "selected reviewers");
        Ok(selection)
    }

    fn manual(
        &self,
        task: &Task,
        registry: &ReviewerRegistry,
        ids: &[String],
    ) -> Result<Selection, SelectionError> {
        let mut seen = HashSet::new();
        let mut reviewers = Vec::new();
        let mut relevance = Vec::new();
        for id in ids {
            if !seen.insert(id.as_str()) {
                continue;
            }
            let profile = registry
                .get(id)
                .ok_or_else(|| SelectionError::UnknownReviewer {
                    task_id: task.id.clone(),
                    reviewer: id.clone(),
                })?;
            relevance.push((id.clone(), self.relevance(task, profile)));
            reviewers.push(profile.clone());
        }
        debug!(task_id = %task.id, reviewers = ?ids, "using manual reviewer override");
        Ok(Selection {
            reviewers,
            relevance,
            manual: true,
            relaxed_diversity: false,
        })
    }
}
