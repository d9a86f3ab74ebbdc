//! Consensus engine: concurrent independent reviews reduced to one verdict.
//!
//! ```text
//! score  = Σ(score_i × weight_i) / Σ(weight_i)      over participating reviewers
//! passed = score >= pass_threshold
//!          AND no finding with severity >= critical_severity
//!          AND no explicit veto from a can_veto reviewer
//! ```
//!
//! A reviewer that errors, times out, panics or returns malformed output is
//! excluded from both numerator and denominator. With no participating
//! weight the review fails closed.

use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ReviewConfig;
use crate::consensus::dedup::deduplicate;
use crate::consensus::types::{
    ConsensusResult, DivergentView, ExtendedAnalysis, Finding, ReviewOutput, ReviewerError,
    ReviewerReport,
};
use crate::reviewer::ReviewerProfile;
use crate::task::Task;
use crate::workspace::ChangeSet;

/// Everything a reviewer sees. Identical for every reviewer in a run.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewRequest {
    pub task: Task,
    pub workspace_path: PathBuf,
    pub change_set: ChangeSet,
    pub attempt: u32,
}

/// External scoring call for one reviewer persona.
///
/// Implementations may return a [`ReviewerError`] inside the `anyhow` error
/// to classify the failure; anything else counts as `Failed`.
#[async_trait]
pub trait ReviewerBackend: Send + Sync {
    async fn review(
        &self,
        reviewer: &ReviewerProfile,
        request: &ReviewRequest,
    ) -> anyhow::Result<ReviewOutput>;
}

pub struct ConsensusEngine {
    backend: Arc<dyn ReviewerBackend>,
    config: ReviewConfig,
}

impl ConsensusEngine {
    pub fn new(backend: Arc<dyn ReviewerBackend>, config: ReviewConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &ReviewConfig {
        &self.config
    }

    /// Invoke every reviewer concurrently, each bounded by the reviewer
    /// timeout, then aggregate.
    pub async fn evaluate(
        &self,
        request: ReviewRequest,
        reviewers: &[ReviewerProfile],
    ) -> ConsensusResult {
        let task_id = request.task.id.clone();
        let request = Arc::new(request);
        let timeout = self.config.reviewer_timeout();
        let mut join_set = JoinSet::new();

        for profile in reviewers {
            let backend = Arc::clone(&self.backend);
            let request = Arc::clone(&request);
            let profile = profile.clone();
            join_set.spawn(async move {
                let id = profile.id.clone();
                let call = AssertUnwindSafe(backend.review(&profile, &request)).catch_unwind();
                let outcome = match tokio::time::timeout(timeout, call).await {
                    Err(_) => Err(ReviewerError::Timeout {
                        reviewer: id.clone(),
                        timeout_secs: timeout.as_secs(),
                    }),
                    Ok(Err(_panic)) => Err(ReviewerError::Failed {
                        reviewer: id.clone(),
                        message: "reviewer panicked".to_string(),
                    }),
                    Ok(Ok(Err(e))) => Err(match e.downcast::<ReviewerError>() {
                        Ok(classified) => classified,
                        Err(other) => ReviewerError::Failed {
                            reviewer: id.clone(),
                            message: format!("{other:#}"),
                        },
                    }),
                    Ok(Ok(Ok(output))) => output.validate(&id).map(|()| output),
                };
                ReviewerReport {
                    reviewer_id: id,
                    outcome,
                }
            });
        }

        let mut reports = Vec::with_capacity(reviewers.len());
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => warn!(task_id = %task_id, error = %e, "reviewer task aborted"),
            }
        }

        // A reviewer whose task vanished entirely is still non-participating.
        for profile in reviewers {
            if !reports.iter().any(|r| r.reviewer_id == profile.id) {
                reports.push(ReviewerReport {
                    reviewer_id: profile.id.clone(),
                    outcome: Err(ReviewerError::Failed {
                        reviewer: profile.id.clone(),
                        message: "reviewer task aborted".to_string(),
                    }),
                });
            }
        }

        aggregate(&task_id, reviewers, reports, &self.config)
    }
}

/// Reduce reviewer reports to a [`ConsensusResult`]. Deterministic for a
/// given set of reports regardless of arrival order (apart from the result
/// id and timestamp).
pub fn aggregate(
    task_id: &str,
    reviewers: &[ReviewerProfile],
    mut reports: Vec<ReviewerReport>,
    config: &ReviewConfig,
) -> ConsensusResult {
    reports.sort_by(|a, b| a.reviewer_id.cmp(&b.reviewer_id));
    let profiles: HashMap<&str, &ReviewerProfile> =
        reviewers.iter().map(|p| (p.id.as_str(), p)).collect();

    let input_digest = input_digest(task_id, reviewers, &reports, config);

    let mut per_reviewer_scores = BTreeMap::new();
    let mut non_participants = BTreeMap::new();
    let mut raw_findings: Vec<Finding> = Vec::new();
    let mut veto_reasons = Vec::new();
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;

    for report in &reports {
        let Some(profile) = profiles.get(report.reviewer_id.as_str()) else {
            warn!(task_id, reviewer = %report.reviewer_id, "report from unselected reviewer ignored");
            continue;
        };
        match &report.outcome {
            Ok(output) => {
                per_reviewer_scores.insert(report.reviewer_id.clone(), output.score);
                weighted_sum += output.score * profile.weight;
                weight_total += profile.weight;
                if output.veto {
                    if profile.can_veto {
                        veto_reasons.push(format!("explicit veto from {}", profile.id));
                    } else {
                        debug!(task_id, reviewer = %profile.id, "veto ignored; reviewer cannot veto");
                    }
                }
                raw_findings.extend(output.findings.iter().cloned().map(|mut f| {
                    f.reviewers.insert(report.reviewer_id.clone());
                    f
                }));
            }
            Err(e) => {
                warn!(
                    task_id,
                    reviewer = %report.reviewer_id,
                    error = %e,
                    "degraded consensus: reviewer not participating"
                );
                non_participants.insert(report.reviewer_id.clone(), e.to_string());
            }
        }
    }

    let findings = deduplicate(raw_findings, config.dedup_similarity);
    for finding in findings
        .iter()
        .filter(|f| f.severity >= config.critical_severity)
    {
        veto_reasons.push(format!(
            "critical finding (severity {}) at {}: {}",
            finding.severity, finding.location, finding.description
        ));
    }

    let score = if weight_total > 0.0 {
        weighted_sum / weight_total
    } else {
        warn!(task_id, "no participating reviewer weight; failing closed");
        0.0
    };
    let vetoed = !veto_reasons.is_empty();
    let passed = weight_total > 0.0 && score >= config.pass_threshold && !vetoed;

    let analysis = config
        .analysis_depth
        .is_extended(per_reviewer_scores.len())
        .then(|| extended_analysis(&findings, &per_reviewer_scores, score, config));

    let result = ConsensusResult {
        id: Uuid::new_v4(),
        task_id: task_id.to_string(),
        created_at: Utc::now(),
        score,
        passed,
        vetoed,
        veto_reasons,
        pass_threshold: config.pass_threshold,
        per_reviewer_scores,
        non_participants,
        findings,
        analysis,
        input_digest,
    };
    info!(
        task_id,
        score = result.score,
        passed = result.passed,
        vetoed = result.vetoed,
        degraded = result.is_degraded(),
        "consensus reached"
    );
    result
}

fn extended_analysis(
    findings: &[Finding],
    scores: &BTreeMap<String, f64>,
    aggregate: f64,
    config: &ReviewConfig,
) -> ExtendedAnalysis {
    let (consensus_areas, unique_insights): (Vec<Finding>, Vec<Finding>) = findings
        .iter()
        .cloned()
        .partition(|f| f.reviewers.len() >= 2);
    let divergent_views = scores
        .iter()
        .filter_map(|(reviewer, &score)| {
            let deviation = (score - aggregate).abs();
            (deviation >= config.divergence_threshold).then(|| DivergentView {
                reviewer: reviewer.clone(),
                score,
                deviation,
            })
        })
        .collect();
    ExtendedAnalysis {
        consensus_areas,
        unique_insights,
        divergent_views,
    }
}

/// blake3 over a canonical rendering of everything that determines the verdict.
fn input_digest(
    task_id: &str,
    reviewers: &[ReviewerProfile],
    sorted_reports: &[ReviewerReport],
    config: &ReviewConfig,
) -> String {
    let mut hasher = blake3::Hasher::new();
    let mut feed = |part: &str| {
        hasher.update(part.as_bytes());
        hasher.update(&[0]);
    };

    feed(task_id);
    feed(&format!(
        "threshold={};critical={};dedup={};depth={:?};divergence={}",
        config.pass_threshold,
        config.critical_severity,
        config.dedup_similarity,
        config.analysis_depth,
        config.divergence_threshold
    ));

    let mut profiles: Vec<&ReviewerProfile> = reviewers.iter().collect();
    profiles.sort_by(|a, b| a.id.cmp(&b.id));
    for profile in profiles {
        feed(&format!("{}|{}|{}", profile.id, profile.weight, profile.can_veto));
    }

    for report in sorted_reports {
        feed(&report.reviewer_id);
        match &report.outcome {
            Ok(output) => feed(&serde_json::to_string(output).unwrap_or_default()),
            Err(e) => feed(&format!("absent:{e}")),
        }
    }
    hasher.finalize().to_hex().to_string()
}
