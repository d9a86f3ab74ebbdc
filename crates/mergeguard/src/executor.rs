//! `Worker` backed by an external command.
//!
//! The command runs inside the task's worktree with the work order as JSON
//! on stdin. It must leave its changes committed on the task branch.

use anyhow::{Context, Result};
use async_trait::async_trait;
use coordination::{WorkOrder, Worker, Workspace};
use serde::Serialize;
use tracing::{debug, info};

use crate::command::CommandLine;

#[derive(Serialize)]
struct ExecutorInput<'a> {
    workspace: &'a Workspace,
    #[serde(flatten)]
    order: &'a WorkOrder,
}

pub struct CommandWorker {
    command: CommandLine,
}

impl CommandWorker {
    pub fn new(command: CommandLine) -> Self {
        Self { command }
    }
}

#[async_trait]
impl Worker for CommandWorker {
    async fn execute(&self, workspace: &Workspace, order: &WorkOrder) -> Result<()> {
        let payload = serde_json::to_vec(&ExecutorInput { workspace, order })
            .context("failed to encode work order")?;
        let envs = [
            ("MERGEGUARD_TASK_ID", order.task.id.clone()),
            ("MERGEGUARD_ATTEMPT", order.attempt.to_string()),
            ("MERGEGUARD_BRANCH", workspace.branch_name.clone()),
            ("MERGEGUARD_BASE_REF", workspace.base_ref.clone()),
        ];

        info!(task_id = %order.task.id, attempt = order.attempt, command = %self.command, "running executor");
        let stdout = self
            .command
            .run(&workspace.path, &envs, &payload)
            .await
            .with_context(|| format!("executor failed for {}", order.task.id))?;
        debug!(task_id = %order.task.id, output_bytes = stdout.len(), "executor finished");
        Ok(())
    }
}
