//! Pipeline configuration
//!
//! Loaded from TOML with per-field defaults, then overridden from
//! `MERGEGUARD_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {message}")]
    Io { path: String, message: String },

    #[error("Invalid config TOML: {0}")]
    Parse(String),

    #[error("Invalid value for {field}: {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Dispatch limits and retry budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum tasks in flight at once.
    pub max_concurrency: usize,
    /// Extra attempts after a review, merge or execution failure.
    pub retry_budget: u32,
    /// Wall-clock budget for one task attempt.
    pub task_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            retry_budget: 1,
            task_timeout_secs: 3600,
        }
    }
}

impl SchedulerConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

/// Isolated workspace provisioning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Parent directory for worktrees. Defaults to `mergeguard-worktrees`
    /// inside the repository's common git dir.
    pub base_dir: Option<PathBuf>,
    /// Prefix for per-task branch names.
    pub branch_prefix: String,
    /// Branch approved work is merged into.
    pub integration_branch: String,
    /// Branches never written outside the merge path. `name/*` matches a prefix.
    pub protected_branches: Vec<String>,
    /// Repo-relative files copied into each new workspace.
    pub env_allow_list: Vec<String>,
    /// Permit copying allow-listed files that look like secrets.
    pub allow_secret_files: bool,
    /// Clean, idle workspaces older than this are reaped.
    pub reap_max_age_secs: u64,
    /// Provisioning attempts before a task is failed.
    pub provision_retries: u32,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            base_dir: None,
            branch_prefix: "mergeguard/".to_string(),
            integration_branch: "main".to_string(),
            protected_branches: vec![
                "main".to_string(),
                "master".to_string(),
                "release/*".to_string(),
            ],
            env_allow_list: Vec::new(),
            allow_secret_files: false,
            reap_max_age_secs: 24 * 60 * 60,
            provision_retries: 3,
        }
    }
}

impl WorkspaceConfig {
    /// Worktree parent for a repository whose common git dir is `git_dir`.
    pub fn resolved_base_dir(&self, git_dir: &Path) -> PathBuf {
        self.base_dir
            .clone()
            .unwrap_or_else(|| git_dir.join("mergeguard-worktrees"))
    }

    /// Whether `branch` is the integration branch or matches a protected pattern.
    pub fn is_protected(&self, branch: &str) -> bool {
        branch == self.integration_branch
            || self.protected_branches.iter().any(|pattern| {
                match pattern.strip_suffix("/*") {
                    Some(prefix) => branch
                        .strip_prefix(prefix)
                        .is_some_and(|rest| rest.starts_with('/')),
                    None => pattern == branch,
                }
            })
    }

    pub fn reap_max_age(&self) -> Duration {
        Duration::from_secs(self.reap_max_age_secs)
    }
}

/// How much post-aggregation analysis a consensus run produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum AnalysisDepth {
    /// Score, veto and findings only.
    Basic,
    /// Always add consensus areas, unique insights and divergent views.
    Extended,
    /// Extended once at least `min_reviewers` reviewers participated.
    Auto { min_reviewers: usize },
}

impl Default for AnalysisDepth {
    fn default() -> Self {
        Self::Auto { min_reviewers: 4 }
    }
}

impl AnalysisDepth {
    pub fn is_extended(self, participants: usize) -> bool {
        match self {
            Self::Basic => false,
            Self::Extended => true,
            Self::Auto { min_reviewers } => participants >= min_reviewers,
        }
    }
}

/// Relative importance of each relevance signal in persona selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionWeights {
    pub property_overlap: f64,
    pub tag_overlap: f64,
    pub complexity_fit: f64,
}

impl Default for SelectionWeights {
    fn default() -> Self {
        Self {
            property_overlap: 3.0,
            tag_overlap: 2.0,
            complexity_fit: 1.0,
        }
    }
}

/// Reviewer selection and consensus scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    pub reviewer_count: usize,
    pub max_per_domain: usize,
    pub pass_threshold: f64,
    /// Any finding at or above this severity vetoes the review.
    pub critical_severity: u8,
    pub reviewer_timeout_secs: u64,
    /// Normalised description similarity at which findings merge.
    pub dedup_similarity: f64,
    pub analysis_depth: AnalysisDepth,
    /// Score deviation from the aggregate that counts as a divergent view.
    pub divergence_threshold: f64,
    pub selection_weights: SelectionWeights,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            reviewer_count: 5,
            max_per_domain: 2,
            pass_threshold: 7.0,
            critical_severity: 9,
            reviewer_timeout_secs: 300,
            dedup_similarity: 0.6,
            analysis_depth: AnalysisDepth::default(),
            divergence_threshold: 3.0,
            selection_weights: SelectionWeights::default(),
        }
    }
}

impl ReviewConfig {
    pub fn reviewer_timeout(&self) -> Duration {
        Duration::from_secs(self.reviewer_timeout_secs)
    }
}

/// Merge queue settings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// JSON file the merge ledger is persisted to.
    pub ledger_path: Option<PathBuf>,
    /// Number of recent merge records in operator snapshots.
    pub recent_records: Option<usize>,
}

impl MergeConfig {
    pub fn recent_records(&self) -> usize {
        self.recent_records.unwrap_or(10)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub scheduler: SchedulerConfig,
    pub workspace: WorkspaceConfig,
    pub review: ReviewConfig,
    pub merge: MergeConfig,
}

impl PipelineConfig {
    /// Load from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply `MERGEGUARD_*` environment overrides.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (env in production, a map in tests).
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        fn parsed<T: std::str::FromStr>(key: &str, raw: String) -> Result<T, ConfigError> {
            raw.trim()
                .parse()
                .map_err(|_| ConfigError::invalid(key, format!("cannot parse {raw:?}")))
        }

        if let Some(v) = lookup("MERGEGUARD_MAX_CONCURRENCY") {
            self.scheduler.max_concurrency = parsed("MERGEGUARD_MAX_CONCURRENCY", v)?;
        }
        if let Some(v) = lookup("MERGEGUARD_RETRY_BUDGET") {
            self.scheduler.retry_budget = parsed("MERGEGUARD_RETRY_BUDGET", v)?;
        }
        if let Some(v) = lookup("MERGEGUARD_TASK_TIMEOUT_SECS") {
            self.scheduler.task_timeout_secs = parsed("MERGEGUARD_TASK_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = lookup("MERGEGUARD_WORKTREE_DIR") {
            self.workspace.base_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("MERGEGUARD_INTEGRATION_BRANCH") {
            self.workspace.integration_branch = v;
        }
        if let Some(v) = lookup("MERGEGUARD_REVIEWER_COUNT") {
            self.review.reviewer_count = parsed("MERGEGUARD_REVIEWER_COUNT", v)?;
        }
        if let Some(v) = lookup("MERGEGUARD_PASS_THRESHOLD") {
            self.review.pass_threshold = parsed("MERGEGUARD_PASS_THRESHOLD", v)?;
        }
        if let Some(v) = lookup("MERGEGUARD_REVIEWER_TIMEOUT_SECS") {
            self.review.reviewer_timeout_secs = parsed("MERGEGUARD_REVIEWER_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = lookup("MERGEGUARD_LEDGER_PATH") {
            self.merge.ledger_path = Some(PathBuf::from(v));
        }
        Ok(self)
    }

    /// Reject inconsistent settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.max_concurrency == 0 {
            return Err(ConfigError::invalid(
                "scheduler.max_concurrency",
                "must be at least 1",
            ));
        }
        if self.scheduler.task_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "scheduler.task_timeout_secs",
                "must be positive",
            ));
        }
        if self.workspace.integration_branch.trim().is_empty() {
            return Err(ConfigError::invalid(
                "workspace.integration_branch",
                "must not be empty",
            ));
        }
        // A prefix like `release/` only matches `release/*` once a task
        // name follows it.
        let prefix = &self.workspace.branch_prefix;
        if prefix.trim().is_empty()
            || self.workspace.is_protected(prefix.trim_end_matches('/'))
            || self.workspace.is_protected(&format!("{prefix}task"))
        {
            return Err(ConfigError::invalid(
                "workspace.branch_prefix",
                "must be non-empty and outside the protected branches",
            ));
        }
        let review = &self.review;
        if review.reviewer_count == 0 {
            return Err(ConfigError::invalid("review.reviewer_count", "must be at least 1"));
        }
        if review.max_per_domain == 0 {
            return Err(ConfigError::invalid("review.max_per_domain", "must be at least 1"));
        }
        if !(0.0..=10.0).contains(&review.pass_threshold) {
            return Err(ConfigError::invalid("review.pass_threshold", "must be within 0-10"));
        }
        if !(1..=10).contains(&review.critical_severity) {
            return Err(ConfigError::invalid(
                "review.critical_severity",
                "must be within 1-10",
            ));
        }
        if !(0.0..=1.0).contains(&review.dedup_similarity) {
            return Err(ConfigError::invalid("review.dedup_similarity", "must be within 0-1"));
        }
        if review.reviewer_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "review.reviewer_timeout_secs",
                "must be positive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_validate() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.scheduler.retry_budget, 1);
        assert_eq!(config.review.critical_severity, 9);
        assert_eq!(config.review.pass_threshold, 7.0);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml(
            r#"
[scheduler]
max_concurrency = 8

[review]
pass_threshold = 8.0
analysis_depth = { mode = "extended" }
"#,
        )
        .unwrap();
        assert_eq!(config.scheduler.max_concurrency, 8);
        assert_eq!(config.scheduler.retry_budget, 1);
        assert_eq!(config.review.pass_threshold, 8.0);
        assert_eq!(config.review.analysis_depth, AnalysisDepth::Extended);
        assert_eq!(config.workspace.integration_branch, "main");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("MERGEGUARD_MAX_CONCURRENCY", "2"),
            ("MERGEGUARD_INTEGRATION_BRANCH", "trunk"),
        ]);
        let config = PipelineConfig::default()
            .with_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.scheduler.max_concurrency, 2);
        assert_eq!(config.workspace.integration_branch, "trunk");

        let bad = PipelineConfig::default()
            .with_overrides(|k| (k == "MERGEGUARD_RETRY_BUDGET").then(|| "lots".to_string()));
        assert!(matches!(bad, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_protected_branch_patterns() {
        let ws = WorkspaceConfig::default();
        assert!(ws.is_protected("main"));
        assert!(ws.is_protected("release/1.2"));
        assert!(!ws.is_protected("release"));
        assert!(!ws.is_protected("mergeguard/task-1"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = PipelineConfig::default();
        config.scheduler.max_concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.review.critical_severity = 11;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.workspace.branch_prefix = "release/".to_string();
        config.workspace.protected_branches = vec!["release".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_prefix_inside_protected_pattern() {
        let mut config = PipelineConfig::default();
        config.workspace.branch_prefix = "release/".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { .. })
        ));

        config.workspace.branch_prefix = "release-candidates/".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_worktree_dir_lives_in_git_dir() {
        let ws = WorkspaceConfig::default();
        assert_eq!(
            ws.resolved_base_dir(Path::new("/repo/.git")),
            Path::new("/repo/.git/mergeguard-worktrees")
        );
        let pinned = WorkspaceConfig {
            base_dir: Some(PathBuf::from("/scratch/wt")),
            ..WorkspaceConfig::default()
        };
        assert_eq!(pinned.resolved_base_dir(Path::new("/repo/.git")), Path::new("/scratch/wt"));
    }

    #[test]
    fn test_analysis_depth_auto() {
        let depth = AnalysisDepth::default();
        assert!(!depth.is_extended(3));
        assert!(depth.is_extended(4));
        assert!(!AnalysisDepth::Basic.is_extended(10));
    }
}
