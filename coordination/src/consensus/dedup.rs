//! Cross-reviewer finding deduplication.
//!
//! Two findings merge when they come from different reviewers, point at the
//! same file with overlapping line ranges, and their normalised descriptions
//! have a token Jaccard similarity at or above the threshold. The merged
//! finding keeps the highest severity and the union of reviewers.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::consensus::types::Finding;

static TOKEN_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("TOKEN_SPLIT_RE regex should compile"));

/// Lowercased alphanumeric tokens of a description.
pub fn normalized_tokens(text: &str) -> BTreeSet<String> {
    TOKEN_SPLIT_RE
        .split(&text.to_lowercase())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Token Jaccard similarity in [0, 1]. Two empty descriptions are identical.
pub fn similarity(a: &str, b: &str) -> f64 {
    let ta = normalized_tokens(a);
    let tb = normalized_tokens(b);
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    let shared = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    shared / union
}

/// Merge duplicate findings. Each input finding must carry the reviewer(s)
/// that raised it. Output order is by location, then severity descending.
pub fn deduplicate(mut findings: Vec<Finding>, threshold: f64) -> Vec<Finding> {
    findings.sort_by(|a, b| {
        a.location
            .cmp(&b.location)
            .then_with(|| a.reviewers.cmp(&b.reviewers))
            .then_with(|| b.severity.cmp(&a.severity))
            .then_with(|| a.description.cmp(&b.description))
    });

    let mut merged: Vec<Finding> = Vec::with_capacity(findings.len());
    for finding in findings {
        let target = merged.iter_mut().find(|existing| {
            existing.location.overlaps(&finding.location)
                && existing.reviewers.is_disjoint(&finding.reviewers)
                && similarity(&existing.description, &finding.description) >= threshold
        });
        match target {
            Some(existing) => absorb(existing, finding),
            None => merged.push(finding),
        }
    }

    merged.sort_by(|a, b| {
        a.location
            .cmp(&b.location)
            .then_with(|| b.severity.cmp(&a.severity))
            .then_with(|| a.description.cmp(&b.description))
    });
    merged
}

fn absorb(existing: &mut Finding, incoming: Finding) {
    existing.location.line_start = existing.location.line_start.min(incoming.location.line_start);
    existing.location.line_end = existing.location.line_end.max(incoming.location.line_end);
    existing.confidence = existing.confidence.max(incoming.confidence);
    existing.reviewers.extend(incoming.reviewers);
    if incoming.severity > existing.severity {
        existing.severity = incoming.severity;
        existing.domain = incoming.domain;
        existing.description = incoming.description;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn by(reviewer: &str, finding: Finding) -> Finding {
        let mut finding = finding;
        finding.reviewers.insert(reviewer.to_string());
        finding
    }

    #[test]
    fn test_similarity_normalises() {
        assert_eq!(similarity("SQL injection in query()", "sql injection: in QUERY"), 1.0);
        assert!(similarity("unbounded retry loop", "missing index on users") < 0.2);
    }

    #[test]
    fn test_merges_across_reviewers() {
        let findings = vec![
            by(
                "sec",
                Finding::new(6, "security", "src/db.rs", (10, 12), "SQL injection in user query"),
            ),
            by(
                "correct",
                Finding::new(8, "correctness", "src/db.rs", (11, 15), "possible SQL injection in user query"),
            ),
        ];
        let out = deduplicate(findings, 0.6);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].severity, 8);
        assert_eq!(out[0].location.line_start, 10);
        assert_eq!(out[0].location.line_end, 15);
        assert_eq!(out[0].reviewers.len(), 2);
    }

    #[test]
    fn test_keeps_distinct_findings() {
        let findings = vec![
            by("sec", Finding::new(6, "security", "src/db.rs", (10, 12), "SQL injection")),
            by("perf", Finding::new(5, "performance", "src/db.rs", (40, 42), "SQL injection")),
            by("perf", Finding::new(5, "performance", "src/db.rs", (10, 12), "N+1 query in loop")),
            by("sec", Finding::new(4, "security", "src/db.rs", (10, 12), "SQL injection risk")),
        ];
        let out = deduplicate(findings, 0.6);
        // Same-reviewer findings never merge with each other; "SQL injection risk"
        // has no cross-reviewer partner at that location.
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn test_order_independent() {
        let a = by("a", Finding::new(5, "x", "f.rs", (1, 3), "leaked file handle"));
        let b = by("b", Finding::new(7, "y", "f.rs", (2, 4), "file handle leaked"));
        let c = by("c", Finding::new(3, "z", "g.rs", (1, 1), "typo"));
        let forward = deduplicate(vec![a.clone(), b.clone(), c.clone()], 0.6);
        let backward = deduplicate(vec![c, b, a], 0.6);
        assert_eq!(forward, backward);
    }
}
