//! Reviewer profiles: static persona records.
//!
//! A persona is data: domain, weight and an applicability predicate over
//! task metadata. The prompt a reviewer runs is injected by the backend at
//! call time and never seen here.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::task::{Complexity, Task};

/// Review perspective a persona covers.
///
/// Catalogs may name any domain; the well-known ones get their own variant
/// and everything else is carried as `Other`, still usable as a grouping key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ReviewDomain {
    Security,
    Performance,
    Correctness,
    Maintainability,
    Reliability,
    Architecture,
    Testing,
    Other(String),
}

impl ReviewDomain {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Security => "security",
            Self::Performance => "performance",
            Self::Correctness => "correctness",
            Self::Maintainability => "maintainability",
            Self::Reliability => "reliability",
            Self::Architecture => "architecture",
            Self::Testing => "testing",
            Self::Other(tag) => tag,
        }
    }
}

impl From<String> for ReviewDomain {
    fn from(tag: String) -> Self {
        let tag = tag.trim().to_ascii_lowercase();
        match tag.as_str() {
            "security" => Self::Security,
            "performance" => Self::Performance,
            "correctness" => Self::Correctness,
            "maintainability" => Self::Maintainability,
            "reliability" => Self::Reliability,
            "architecture" => Self::Architecture,
            "testing" => Self::Testing,
            _ => Self::Other(tag),
        }
    }
}

impl From<&str> for ReviewDomain {
    fn from(tag: &str) -> Self {
        Self::from(tag.to_string())
    }
}

impl From<ReviewDomain> for String {
    fn from(domain: ReviewDomain) -> Self {
        match domain {
            ReviewDomain::Other(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for ReviewDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive complexity window a persona is suited for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplexityRange {
    #[serde(default = "min_complexity")]
    pub min: Complexity,
    #[serde(default = "max_complexity")]
    pub max: Complexity,
}

fn min_complexity() -> Complexity {
    Complexity::S
}

fn max_complexity() -> Complexity {
    Complexity::XL
}

impl Default for ComplexityRange {
    fn default() -> Self {
        Self {
            min: Complexity::S,
            max: Complexity::XL,
        }
    }
}

impl ComplexityRange {
    pub fn contains(&self, complexity: Complexity) -> bool {
        self.min <= complexity && complexity <= self.max
    }
}

/// Task metadata a persona is relevant to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Applicability {
    /// Technology / domain tags.
    pub tags: BTreeSet<String>,
    /// Formal property ids this persona knows how to check.
    pub properties: BTreeSet<String>,
    pub complexity: ComplexityRange,
}

impl Applicability {
    /// Number of task properties this persona covers.
    pub fn property_overlap(&self, task: &Task) -> usize {
        self.properties
            .intersection(&task.declared_properties)
            .count()
    }

    /// Number of task tags matched, counting the persona's own domain as a tag.
    pub fn tag_overlap(&self, task: &Task, domain: &ReviewDomain) -> usize {
        let own = task.tags.intersection(&self.tags).count();
        let domain_tag = usize::from(
            task.tags.contains(domain.as_str()) && !self.tags.contains(domain.as_str()),
        );
        own + domain_tag
    }

    pub fn fits_complexity(&self, task: &Task) -> bool {
        self.complexity.contains(task.complexity)
    }
}

fn default_can_veto() -> bool {
    true
}

/// One reviewer persona in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewerProfile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub domain: ReviewDomain,
    /// Relative influence on the aggregate score.
    pub weight: f64,
    #[serde(default)]
    pub applicability: Applicability,
    /// Whether an explicit `veto` from this reviewer fails the review.
    #[serde(default = "default_can_veto")]
    pub can_veto: bool,
}

impl ReviewerProfile {
    pub fn new(id: impl Into<String>, domain: ReviewDomain, weight: f64) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            domain,
            weight,
            applicability: Applicability::default(),
            can_veto: true,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.applicability
            .tags
            .extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_properties<I, S>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.applicability
            .properties
            .extend(properties.into_iter().map(Into::into));
        self
    }

    pub fn with_complexity(mut self, min: Complexity, max: Complexity) -> Self {
        self.applicability.complexity = ComplexityRange { min, max };
        self
    }

    pub fn without_veto(mut self) -> Self {
        self.can_veto = false;
        self
    }
}
