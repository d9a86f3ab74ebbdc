//! Task data model

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Ordinal size estimate of a task. Ordering is S < M < L < XL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Complexity {
    #[serde(alias = "s", alias = "small")]
    S,
    #[serde(alias = "m", alias = "medium")]
    M,
    #[serde(alias = "l", alias = "large")]
    L,
    #[serde(alias = "xl", alias = "x-large")]
    XL,
}

impl Default for Complexity {
    fn default() -> Self {
        Self::M
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::S => write!(f, "S"),
            Self::M => write!(f, "M"),
            Self::L => write!(f, "L"),
            Self::XL => write!(f, "XL"),
        }
    }
}

/// A named invariant a task is expected to uphold. Opaque to the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Property {
    pub id: String,
    #[serde(default)]
    pub description: String,
}

/// A unit of work from the task graph document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub complexity: Complexity,
    #[serde(default, alias = "deps")]
    pub dependencies: BTreeSet<String>,
    /// Formal property ids the task must satisfy.
    #[serde(default, alias = "properties")]
    pub declared_properties: BTreeSet<String>,
    /// Hint set of file globs the task is expected to touch.
    #[serde(default, alias = "files")]
    pub affected_paths: Vec<String>,
    /// Technology / domain tags used for reviewer relevance.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub description: String,
    /// Manual reviewer override; replaces automatic selection when non-empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reviewers: Vec<String>,
}

impl Task {
    pub fn new(id: impl Into<String>, complexity: Complexity) -> Self {
        Self {
            id: id.into(),
            complexity,
            dependencies: BTreeSet::new(),
            declared_properties: BTreeSet::new(),
            affected_paths: Vec::new(),
            tags: BTreeSet::new(),
            description: String::new(),
            reviewers: Vec::new(),
        }
    }

    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.dependencies.insert(id.into());
        self
    }

    pub fn with_property(mut self, id: impl Into<String>) -> Self {
        self.declared_properties.insert(id.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_path(mut self, glob: impl Into<String>) -> Self {
        self.affected_paths.push(glob.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Lifecycle state of a task inside the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting on dependencies.
    Pending,
    /// All dependencies merged; eligible for dispatch.
    Ready,
    /// Workspace provisioned, executor working.
    Running,
    /// Consensus review in progress.
    Reviewing,
    /// Approved and waiting in (or going through) the merge queue.
    Merging,
    /// Integrated into the shared branch.
    Merged,
    /// Permanently failed; dependents stay blocked.
    Failed,
    /// Merge was reverted after integration.
    RolledBack,
}

impl TaskState {
    /// States that hold a worker slot.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Running | Self::Reviewing | Self::Merging)
    }

    /// States that block dependents until an operator intervenes.
    pub fn blocks_dependents(self) -> bool {
        matches!(self, Self::Failed | Self::RolledBack)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Ready => write!(f, "ready"),
            Self::Running => write!(f, "running"),
            Self::Reviewing => write!(f, "reviewing"),
            Self::Merging => write!(f, "merging"),
            Self::Merged => write!(f, "merged"),
            Self::Failed => write!(f, "failed"),
            Self::RolledBack => write!(f, "rolled_back"),
        }
    }
}
