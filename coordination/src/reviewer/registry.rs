//! Reviewer registry: indexed, read-only catalog of personas.
//!
//! Loaded once (from a catalog document or the built-in set) and shared
//! behind an `Arc` without locking. Adding a reviewer means adding a
//! catalog entry.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::document::DocumentFormat;
use crate::reviewer::profile::{ReviewDomain, ReviewerProfile};
use crate::task::Complexity;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Duplicate reviewer id: {id}")]
    DuplicateReviewer { id: String },

    #[error("Reviewer {id} has invalid weight {weight}")]
    InvalidWeight { id: String, weight: String },

    #[error("Reviewer catalog is empty")]
    Empty,

    #[error("Failed to parse reviewer catalog ({format}): {message}")]
    Parse { format: String, message: String },

    #[error("Failed to read reviewer catalog {path}: {message}")]
    Io { path: String, message: String },

    #[error("Unrecognised catalog extension for {path} (expected .json, .yaml, .yml or .toml)")]
    UnknownFormat { path: String },
}

impl RegistryError {
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            Self::DuplicateReviewer { .. } => "Give every catalog entry a unique id.",
            Self::InvalidWeight { .. } => "Reviewer weights must be finite and non-negative.",
            Self::Empty => "Add at least one reviewer, or omit the catalog to use the built-in set.",
            Self::Parse { .. } => "Fix the catalog syntax; each entry needs id, domain and weight.",
            Self::Io { .. } | Self::UnknownFormat { .. } => {
                "Check the catalog path and extension."
            }
        }
    }
}

/// On-disk catalog shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewerCatalogDocument {
    #[serde(default)]
    pub reviewers: Vec<ReviewerProfile>,
}

#[derive(Debug, Clone)]
pub struct ReviewerRegistry {
    profiles: Vec<ReviewerProfile>,
    by_id: HashMap<String, usize>,
    by_domain: BTreeMap<ReviewDomain, Vec<usize>>,
}

impl ReviewerRegistry {
    pub fn new(profiles: Vec<ReviewerProfile>) -> Result<Self, RegistryError> {
        if profiles.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut by_id = HashMap::with_capacity(profiles.len());
        let mut by_domain: BTreeMap<ReviewDomain, Vec<usize>> = BTreeMap::new();
        for (index, profile) in profiles.iter().enumerate() {
            if !profile.weight.is_finite() || profile.weight < 0.0 {
                return Err(RegistryError::InvalidWeight {
                    id: profile.id.clone(),
                    weight: profile.weight.to_string(),
                });
            }
            if by_id.insert(profile.id.clone(), index).is_some() {
                return Err(RegistryError::DuplicateReviewer {
                    id: profile.id.clone(),
                });
            }
            by_domain.entry(profile.domain.clone()).or_default().push(index);
        }

        Ok(Self {
            profiles,
            by_id,
            by_domain,
        })
    }

    pub fn parse(content: &str, format: DocumentFormat) -> Result<Self, RegistryError> {
        let doc: ReviewerCatalogDocument =
            format.parse(content).map_err(|message| RegistryError::Parse {
                format: format.to_string(),
                message,
            })?;
        Self::new(doc.reviewers)
    }

    /// Load a catalog file, format chosen by extension.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let format = DocumentFormat::from_path(path).ok_or_else(|| RegistryError::UnknownFormat {
            path: path.display().to_string(),
        })?;
        let content = std::fs::read_to_string(path).map_err(|e| RegistryError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let registry = Self::parse(&content, format)?;
        info!(path = %path.display(), reviewers = registry.len(), "loaded reviewer catalog");
        Ok(registry)
    }

    /// Default persona catalog.
    pub fn builtin() -> Self {
        let profiles = vec![
            ReviewerProfile::new("security-auditor", ReviewDomain::Security, 1.5)
                .with_name("Security auditor")
                .with_tags(["auth", "crypto", "input-validation", "secrets", "network"])
                .with_properties(["no-injection", "authz-enforced", "secrets-not-logged"]),
            ReviewerProfile::new("unsafe-auditor", ReviewDomain::Security, 1.2)
                .with_name("Memory safety auditor")
                .with_tags(["unsafe", "ffi", "parsing"])
                .with_properties(["memory-safe", "no-undefined-behavior"])
                .with_complexity(Complexity::M, Complexity::XL),
            ReviewerProfile::new("performance-engineer", ReviewDomain::Performance, 1.0)
                .with_name("Performance engineer")
                .with_tags(["hot-path", "database", "cache", "io", "allocation"])
                .with_properties(["bounded-latency", "no-n-plus-one"]),
            ReviewerProfile::new("correctness-checker", ReviewDomain::Correctness, 1.3)
                .with_name("Correctness checker")
                .with_tags(["algorithm", "parsing", "state-machine", "concurrency"])
                .with_properties(["idempotent", "deterministic", "total-ordering"]),
            ReviewerProfile::new("api-contract", ReviewDomain::Correctness, 1.0)
                .with_name("API contract reviewer")
                .with_tags(["api", "serialization", "compatibility"])
                .with_properties(["backward-compatible"]),
            ReviewerProfile::new("reliability-engineer", ReviewDomain::Reliability, 1.1)
                .with_name("Reliability engineer")
                .with_tags(["error-handling", "retry", "timeout", "concurrency", "network"])
                .with_properties(["fail-closed", "no-data-loss", "graceful-degradation"]),
            ReviewerProfile::new("maintainability-reviewer", ReviewDomain::Maintainability, 0.8)
                .with_name("Maintainability reviewer")
                .with_tags(["refactor", "docs", "style"])
                .without_veto(),
            ReviewerProfile::new("architect", ReviewDomain::Architecture, 1.0)
                .with_name("Architect")
                .with_tags(["api", "module-boundaries", "dependencies"])
                .with_complexity(Complexity::L, Complexity::XL),
            ReviewerProfile::new("test-engineer", ReviewDomain::Testing, 0.9)
                .with_name("Test engineer")
                .with_tags(["tests", "fixtures", "ci"])
                .with_properties(["regression-covered"]),
        ];
        Self {
            by_id: profiles
                .iter()
                .enumerate()
                .map(|(i, p)| (p.id.clone(), i))
                .collect(),
            by_domain: profiles.iter().enumerate().fold(
                BTreeMap::new(),
                |mut acc: BTreeMap<ReviewDomain, Vec<usize>>, (i, p)| {
                    acc.entry(p.domain.clone()).or_default().push(i);
                    acc
                },
            ),
            profiles,
        }
    }

    pub fn get(&self, id: &str) -> Option<&ReviewerProfile> {
        self.by_id.get(id).map(|&i| &self.profiles[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn by_domain(&self, domain: &ReviewDomain) -> impl Iterator<Item = &ReviewerProfile> {
        self.by_domain
            .get(domain)
            .into_iter()
            .flatten()
            .map(|&i| &self.profiles[i])
    }

    pub fn domains(&self) -> impl Iterator<Item = &ReviewDomain> {
        self.by_domain.keys()
    }

    pub fn profiles(&self) -> &[ReviewerProfile] {
        &self.profiles
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_is_valid() {
        let builtin = ReviewerRegistry::builtin();
        let revalidated = ReviewerRegistry::new(builtin.profiles().to_vec()).unwrap();
        assert_eq!(revalidated.len(), builtin.len());
        assert!(builtin.domains().count() >= 5);
        assert_eq!(builtin.by_domain(&ReviewDomain::Security).count(), 2);
    }

    #[test]
    fn test_rejects_duplicates_and_bad_weights() {
        let dup = ReviewerRegistry::new(vec![
            ReviewerProfile::new("a", ReviewDomain::Security, 1.0),
            ReviewerProfile::new("a", ReviewDomain::Testing, 1.0),
        ]);
        assert!(matches!(dup, Err(RegistryError::DuplicateReviewer { .. })));

        let neg = ReviewerRegistry::new(vec![ReviewerProfile::new(
            "a",
            ReviewDomain::Security,
            -1.0,
        )]);
        assert!(matches!(neg, Err(RegistryError::InvalidWeight { .. })));

        assert!(matches!(
            ReviewerRegistry::new(Vec::new()),
            Err(RegistryError::Empty)
        ));
    }

    #[test]
    fn test_parse_yaml_catalog() {
        let yaml = r#"
reviewers:
  - id: sec
    domain: security
    weight: 2.0
    applicability:
      tags: [auth]
      complexity: { min: M }
  - id: docs
    domain: maintainability
    weight: 0.5
    can_veto: false
"#;
        let registry = ReviewerRegistry::parse(yaml, DocumentFormat::Yaml).unwrap();
        let sec = registry.get("sec").unwrap();
        assert_eq!(sec.applicability.complexity.min, Complexity::M);
        assert_eq!(sec.applicability.complexity.max, Complexity::XL);
        assert!(!registry.get("docs").unwrap().can_veto);
    }

    #[test]
    fn test_catalog_accepts_unlisted_domain() {
        let yaml = "reviewers:\n  - id: a11y\n    domain: accessibility\n    weight: 1.0\n";
        let registry = ReviewerRegistry::parse(yaml, DocumentFormat::Yaml).unwrap();
        let a11y = ReviewDomain::from("accessibility");
        assert_eq!(registry.by_domain(&a11y).count(), 1);
        assert_eq!(registry.domains().collect::<Vec<_>>(), vec![&a11y]);
    }
}
