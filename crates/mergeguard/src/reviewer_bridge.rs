//! `ReviewerBackend` backed by an external command.
//!
//! One command serves every persona: it receives the persona and the change
//! set as JSON on stdin and prints `{score, findings, veto?, summary?}` on
//! stdout.

use anyhow::Result;
use async_trait::async_trait;
use coordination::consensus::{ReviewOutput, ReviewRequest, ReviewerBackend, ReviewerError};
use coordination::ReviewerProfile;
use serde::Serialize;
use tracing::debug;

use crate::command::CommandLine;

#[derive(Serialize)]
struct ReviewerInput<'a> {
    reviewer: &'a ReviewerProfile,
    #[serde(flatten)]
    request: &'a ReviewRequest,
}

pub struct CommandReviewer {
    command: CommandLine,
}

impl CommandReviewer {
    pub fn new(command: CommandLine) -> Self {
        Self { command }
    }
}

#[async_trait]
impl ReviewerBackend for CommandReviewer {
    async fn review(&self, reviewer: &ReviewerProfile, request: &ReviewRequest) -> Result<ReviewOutput> {
        let failed = |message: String| ReviewerError::Failed {
            reviewer: reviewer.id.clone(),
            message,
        };

        let payload = serde_json::to_vec(&ReviewerInput { reviewer, request })
            .map_err(|e| failed(format!("failed to encode review request: {e}")))?;
        let envs = [
            ("MERGEGUARD_TASK_ID", request.task.id.clone()),
            ("MERGEGUARD_REVIEWER", reviewer.id.clone()),
            ("MERGEGUARD_REVIEW_DOMAIN", reviewer.domain.to_string()),
        ];

        let stdout = self
            .command
            .run(&request.workspace_path, &envs, &payload)
            .await
            .map_err(|e| failed(format!("{e:#}")))?;
        debug!(reviewer = %reviewer.id, task_id = %request.task.id, "reviewer replied");
        Ok(ReviewOutput::from_json(&reviewer.id, &stdout)?)
    }
}
