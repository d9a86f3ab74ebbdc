//! `mergeguard.toml`: the pipeline sections plus the external commands.
//!
//! ```toml
//! [scheduler]
//! max_concurrency = 4
//!
//! [executor]
//! command = "my-agent --task-from-stdin"
//!
//! [reviewers]
//! command = "my-reviewer"
//! catalog = "reviewers.yaml"
//!
//! [post_merge]
//! command = "cargo test --workspace"
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use coordination::PipelineConfig;
use serde::{Deserialize, Serialize};

use crate::command::CommandLine;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub command: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewersConfig {
    pub command: Option<String>,
    /// Catalog file; the built-in catalog is used when unset.
    pub catalog: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostMergeConfig {
    pub command: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeguardConfig {
    #[serde(flatten)]
    pub pipeline: PipelineConfig,
    pub executor: ExecutorConfig,
    pub reviewers: ReviewersConfig,
    pub post_merge: PostMergeConfig,
}

impl MergeguardConfig {
    /// Load `path` (defaults when `None`), then apply `MERGEGUARD_*` overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                Self::from_toml(&content)
                    .with_context(|| format!("invalid config {}", path.display()))?
            }
            None => Self::default(),
        };
        config.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        self.pipeline = self.pipeline.with_overrides(&lookup)?;
        if let Some(v) = lookup("MERGEGUARD_EXECUTOR_CMD") {
            self.executor.command = Some(v);
        }
        if let Some(v) = lookup("MERGEGUARD_REVIEWER_CMD") {
            self.reviewers.command = Some(v);
        }
        if let Some(v) = lookup("MERGEGUARD_REVIEWER_CATALOG") {
            self.reviewers.catalog = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("MERGEGUARD_POST_MERGE_CMD") {
            self.post_merge.command = Some(v);
        }
        Ok(self)
    }

    pub fn executor_command(&self) -> Result<CommandLine> {
        let raw = self
            .executor
            .command
            .as_deref()
            .context("no executor command: set [executor] command or MERGEGUARD_EXECUTOR_CMD")?;
        CommandLine::parse(raw).context("invalid executor command")
    }

    pub fn reviewer_command(&self) -> Result<CommandLine> {
        let raw = self
            .reviewers
            .command
            .as_deref()
            .context("no reviewer command: set [reviewers] command or MERGEGUARD_REVIEWER_CMD")?;
        CommandLine::parse(raw).context("invalid reviewer command")
    }

    pub fn post_merge_command(&self) -> Result<Option<CommandLine>> {
        self.post_merge
            .command
            .as_deref()
            .map(|raw| CommandLine::parse(raw).context("invalid post-merge command"))
            .transpose()
    }
}
