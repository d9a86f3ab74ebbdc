//! `PostMergeCheck` backed by an external command run on the integration
//! checkout, e.g. the project's test suite.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use coordination::{MergeRecord, PostMergeCheck};
use tracing::info;

use crate::command::CommandLine;

pub struct CommandCheck {
    command: CommandLine,
}

impl CommandCheck {
    pub fn new(command: CommandLine) -> Self {
        Self { command }
    }
}

#[async_trait]
impl PostMergeCheck for CommandCheck {
    async fn verify(&self, record: &MergeRecord, repo_root: &Path) -> Result<()> {
        let payload = serde_json::to_vec(record).context("failed to encode merge record")?;
        let envs = [
            ("MERGEGUARD_TASK_ID", record.task_id.clone()),
            ("MERGEGUARD_MERGE_SHA", record.merge_commit_sha.clone()),
            ("MERGEGUARD_PRE_MERGE_SHA", record.pre_merge_sha.clone()),
        ];
        info!(task_id = %record.task_id, command = %self.command, "running post-merge check");
        self.command.run(repo_root, &envs, &payload).await?;
        Ok(())
    }
}
