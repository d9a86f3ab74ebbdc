//! Append-only merge ledger with optional JSON persistence.
//!
//! Entries are never edited or removed; a rollback is a new entry pointing
//! at the merge it reverted.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::merge::error::{MergeError, MergeResult};

/// One integration of a task branch into the integration branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeRecord {
    pub id: Uuid,
    pub task_id: String,
    pub branch: String,
    pub merge_commit_sha: String,
    /// Integration tip immediately before this merge.
    pub pre_merge_sha: String,
    /// Paths changed between `pre_merge_sha` and `merge_commit_sha`.
    pub files: Vec<String>,
    pub consensus_id: Uuid,
    pub consensus_score: f64,
    pub fast_forward: bool,
    pub started_at: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackRecord {
    pub id: Uuid,
    pub merge_record_id: Uuid,
    pub task_id: String,
    pub revert_commit_sha: String,
    /// Paths verified to match the pre-merge state.
    pub verified_paths: Vec<String>,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum LedgerEntry {
    Merge(MergeRecord),
    /// Post-merge checks passed.
    Stable {
        merge_record_id: Uuid,
        task_id: String,
        timestamp: DateTime<Utc>,
    },
    Rollback(RollbackRecord),
}

impl LedgerEntry {
    pub fn task_id(&self) -> &str {
        match self {
            Self::Merge(m) => &m.task_id,
            Self::Stable { task_id, .. } => task_id,
            Self::Rollback(r) => &r.task_id,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MergeLedger {
    entries: Vec<LedgerEntry>,
    path: Option<PathBuf>,
}

impl MergeLedger {
    /// In-memory ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger persisted at `path`, loading existing entries if the file exists.
    pub fn open(path: impl Into<PathBuf>) -> MergeResult<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| ledger_err(&path, e))?;
            serde_json::from_str(&content).map_err(|e| ledger_err(&path, e))?
        } else {
            Vec::new()
        };
        debug!(path = %path.display(), entries = entries.len(), "opened merge ledger");
        Ok(Self {
            entries,
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append and, when persistent, flush the whole ledger.
    pub fn append(&mut self, entry: LedgerEntry) -> MergeResult<()> {
        self.entries.push(entry);
        self.save()
    }

    /// Write to a temp file and rename over the ledger.
    pub fn save(&self) -> MergeResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ledger_err(path, e))?;
        }
        let json = serde_json::to_string_pretty(&self.entries).map_err(|e| ledger_err(path, e))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| ledger_err(path, e))?;
        std::fs::rename(&tmp, path).map_err(|e| ledger_err(path, e))?;
        Ok(())
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn merges(&self) -> impl Iterator<Item = &MergeRecord> {
        self.entries.iter().filter_map(|e| match e {
            LedgerEntry::Merge(m) => Some(m),
            _ => None,
        })
    }

    pub fn rollbacks(&self) -> impl Iterator<Item = &RollbackRecord> {
        self.entries.iter().filter_map(|e| match e {
            LedgerEntry::Rollback(r) => Some(r),
            _ => None,
        })
    }

    pub fn find_merge(&self, id: Uuid) -> Option<&MergeRecord> {
        self.merges().find(|m| m.id == id)
    }

    pub fn rollback_for(&self, merge_id: Uuid) -> Option<&RollbackRecord> {
        self.rollbacks().find(|r| r.merge_record_id == merge_id)
    }

    pub fn is_rolled_back(&self, merge_id: Uuid) -> bool {
        self.rollback_for(merge_id).is_some()
    }

    /// Most recent merge of `task_id` that has not been reverted.
    pub fn active_merge_for(&self, task_id: &str) -> Option<&MergeRecord> {
        self.merges()
            .filter(|m| m.task_id == task_id && !self.is_rolled_back(m.id))
            .last()
    }

    /// Newest first.
    pub fn recent_merges(&self, n: usize) -> Vec<&MergeRecord> {
        let mut merges: Vec<&MergeRecord> = self.merges().collect();
        merges.reverse();
        merges.truncate(n);
        merges
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn ledger_err(path: &Path, err: impl std::fmt::Display) -> MergeError {
    MergeError::Ledger {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merge(task: &str) -> MergeRecord {
        MergeRecord {
            id: Uuid::new_v4(),
            task_id: task.to_string(),
            branch: format!("mergeguard/{task}"),
            merge_commit_sha: "b".repeat(40),
            pre_merge_sha: "a".repeat(40),
            files: vec!["src/lib.rs".into()],
            consensus_id: Uuid::new_v4(),
            consensus_score: 8.0,
            fast_forward: true,
            started_at: Utc::now(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_rollback_does_not_remove_merge() {
        let mut ledger = MergeLedger::new();
        let record = merge("T-1");
        ledger.append(LedgerEntry::Merge(record.clone())).unwrap();
        assert_eq!(ledger.active_merge_for("T-1").map(|m| m.id), Some(record.id));

        ledger
            .append(LedgerEntry::Rollback(RollbackRecord {
                id: Uuid::new_v4(),
                merge_record_id: record.id,
                task_id: "T-1".into(),
                revert_commit_sha: "c".repeat(40),
                verified_paths: record.files.clone(),
                reason: "post-merge check failed".into(),
                timestamp: Utc::now(),
            }))
            .unwrap();

        assert_eq!(ledger.len(), 2);
        assert!(ledger.find_merge(record.id).is_some());
        assert!(ledger.is_rolled_back(record.id));
        assert!(ledger.active_merge_for("T-1").is_none());
    }

    #[test]
    fn test_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("ledger.json");

        let mut ledger = MergeLedger::open(&path).unwrap();
        assert!(ledger.is_empty());
        ledger.append(LedgerEntry::Merge(merge("T-1"))).unwrap();
        ledger.append(LedgerEntry::Merge(merge("T-2"))).unwrap();

        let reloaded = MergeLedger::open(&path).unwrap();
        assert_eq!(reloaded.entries(), ledger.entries());
        assert_eq!(reloaded.recent_merges(1)[0].task_id, "T-2");
    }

    #[test]
    fn test_corrupt_ledger_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            MergeLedger::open(&path),
            Err(MergeError::Ledger { .. })
        ));
    }
}
