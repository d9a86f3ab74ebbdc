//! Reviewer wire contract and consensus outcome types.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// File and inclusive line range a finding points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    #[serde(default)]
    pub line_start: u32,
    #[serde(default)]
    pub line_end: u32,
}

impl Location {
    pub fn overlaps(&self, other: &Location) -> bool {
        self.file == other.file
            && self.line_start <= other.line_end
            && other.line_start <= self.line_end
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.line_start == self.line_end {
            write!(f, "{}:{}", self.file, self.line_start)
        } else {
            write!(f, "{}:{}-{}", self.file, self.line_start, self.line_end)
        }
    }
}

/// One structured observation. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// 1-10
    pub severity: u8,
    /// 1-10
    pub confidence: u8,
    pub domain: String,
    #[serde(flatten)]
    pub location: Location,
    pub description: String,
    /// Reviewers that raised this finding (after deduplication, possibly several).
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub reviewers: BTreeSet<String>,
}

impl Finding {
    pub fn new(
        severity: u8,
        domain: impl Into<String>,
        file: impl Into<String>,
        lines: (u32, u32),
        description: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            confidence: 5,
            domain: domain.into(),
            location: Location {
                file: file.into(),
                line_start: lines.0,
                line_end: lines.1,
            },
            description: description.into(),
            reviewers: BTreeSet::new(),
        }
    }

    pub fn with_confidence(mut self, confidence: u8) -> Self {
        self.confidence = confidence;
        self
    }
}

/// What a reviewer call returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewOutput {
    /// 0-10
    pub score: f64,
    #[serde(default)]
    pub findings: Vec<Finding>,
    /// Explicit block, honoured only for profiles with `can_veto`.
    #[serde(default)]
    pub veto: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl ReviewOutput {
    pub fn new(score: f64) -> Self {
        Self {
            score,
            findings: Vec::new(),
            veto: false,
            summary: None,
        }
    }

    pub fn with_finding(mut self, finding: Finding) -> Self {
        self.findings.push(finding);
        self
    }

    pub fn with_veto(mut self) -> Self {
        self.veto = true;
        self
    }

    /// Parse and validate the JSON wire form.
    pub fn from_json(reviewer: &str, raw: &str) -> Result<Self, ReviewerError> {
        let output: Self = serde_json::from_str(raw.trim()).map_err(|e| {
            ReviewerError::Malformed {
                reviewer: reviewer.to_string(),
                message: e.to_string(),
            }
        })?;
        output.validate(reviewer)?;
        Ok(output)
    }

    /// Range checks on score and findings.
    pub fn validate(&self, reviewer: &str) -> Result<(), ReviewerError> {
        let malformed = |message: String| ReviewerError::Malformed {
            reviewer: reviewer.to_string(),
            message,
        };
        if !self.score.is_finite() || !(0.0..=10.0).contains(&self.score) {
            return Err(malformed(format!("score {} outside 0-10", self.score)));
        }
        for finding in &self.findings {
            if !(1..=10).contains(&finding.severity) {
                return Err(malformed(format!(
                    "severity {} outside 1-10 at {}",
                    finding.severity, finding.location
                )));
            }
            if !(1..=10).contains(&finding.confidence) {
                return Err(malformed(format!(
                    "confidence {} outside 1-10 at {}",
                    finding.confidence, finding.location
                )));
            }
            if finding.location.line_start > finding.location.line_end {
                return Err(malformed(format!(
                    "inverted line range at {}",
                    finding.location.file
                )));
            }
        }
        Ok(())
    }
}

/// Why a reviewer did not participate. Never fatal to a run.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ReviewerError {
    #[error("Reviewer {reviewer} timed out after {timeout_secs}s")]
    Timeout { reviewer: String, timeout_secs: u64 },

    #[error("Reviewer {reviewer} failed: {message}")]
    Failed { reviewer: String, message: String },

    #[error("Reviewer {reviewer} returned malformed output: {message}")]
    Malformed { reviewer: String, message: String },
}

impl ReviewerError {
    pub fn reviewer(&self) -> &str {
        match self {
            Self::Timeout { reviewer, .. }
            | Self::Failed { reviewer, .. }
            | Self::Malformed { reviewer, .. } => reviewer,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "Raise review.reviewer_timeout_secs or check the reviewer backend.",
            Self::Failed { .. } => "Check the reviewer backend logs; the review continued without it.",
            Self::Malformed { .. } => {
                "The reviewer must return {score, findings[]} with values in range."
            }
        }
    }
}

/// One reviewer's result as fed to aggregation.
#[derive(Debug, Clone)]
pub struct ReviewerReport {
    pub reviewer_id: String,
    pub outcome: Result<ReviewOutput, ReviewerError>,
}

/// Reviewer whose score sits far from the aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DivergentView {
    pub reviewer: String,
    pub score: f64,
    pub deviation: f64,
}

/// Cross-reviewer analysis computed at extended depth.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtendedAnalysis {
    /// Findings raised independently by two or more reviewers.
    pub consensus_areas: Vec<Finding>,
    /// Findings only one reviewer raised.
    pub unique_insights: Vec<Finding>,
    pub divergent_views: Vec<DivergentView>,
}

/// Outcome of one review attempt. A re-review produces a new result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub id: Uuid,
    pub task_id: String,
    pub created_at: DateTime<Utc>,
    /// Weighted aggregate over participating reviewers, 0-10.
    pub score: f64,
    pub passed: bool,
    pub vetoed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub veto_reasons: Vec<String>,
    pub pass_threshold: f64,
    /// Participating reviewers only.
    pub per_reviewer_scores: BTreeMap<String, f64>,
    /// Reviewer id to the reason it was excluded.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub non_participants: BTreeMap<String, String>,
    pub findings: Vec<Finding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<ExtendedAnalysis>,
    /// blake3 of the canonicalised inputs.
    pub input_digest: String,
}

impl ConsensusResult {
    /// At least one selected reviewer did not participate.
    pub fn is_degraded(&self) -> bool {
        !self.non_participants.is_empty()
    }

    pub fn max_severity(&self) -> Option<u8> {
        self.findings.iter().map(|f| f.severity).max()
    }

    /// One-line operator summary.
    pub fn summary(&self) -> String {
        let verdict = match (self.passed, self.vetoed) {
            (true, _) => "passed",
            (false, true) => "vetoed",
            (false, false) => "failed",
        };
        format!(
            "{verdict}: score {:.2}/{:.1} from {} reviewer(s), {} finding(s){}",
            self.score,
            self.pass_threshold,
            self.per_reviewer_scores.len(),
            self.findings.len(),
            if self.is_degraded() {
                format!(", {} non-participating", self.non_participants.len())
            } else {
                String::new()
            }
        )
    }
}
