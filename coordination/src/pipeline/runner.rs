//! Pipeline runner: composes scheduler, workspaces, consensus and merges.
//!
//! # Flow per task
//!
//! ```text
//! dispatch ─► provision (backoff) ─► Worker::execute (timeout) ─► clean + new commits?
//!    ─► select reviewers ─► ConsensusEngine::evaluate ─► enqueue ─► merge_next
//!    ─► PostMergeCheck ─► Stable | rollback
//! ```
//!
//! Task jobs run concurrently in a `JoinSet` bounded by the scheduler's
//! capacity. Everything that touches the integration branch is driven from
//! the runner's own loop, one awaited merge-controller call at a time; the
//! git work itself runs on the blocking pool.

use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::consensus::{ConsensusEngine, ConsensusHistory, ConsensusResult, ReviewRequest, ReviewerBackend};
use crate::error::PipelineError;
use crate::merge::{MergeController, MergeLedger, MergeOutcome, MergeRecord};
use crate::pipeline::snapshot::PipelineSnapshot;
use crate::pipeline::traits::{PostMergeCheck, WorkOrder, Worker};
use crate::reviewer::{PersonaSelector, ReviewerRegistry};
use crate::scheduler::{BlockedTask, Disposition, FailureReport, FailureStage, TaskScheduler};
use crate::task::{Task, TaskGraph, TaskState};
use crate::workspace::{Workspace, WorkspaceError, WorkspaceManager, WorkspaceStatus};

/// Base delay for workspace provisioning retries.
const PROVISION_BACKOFF_MS: u64 = 100;

/// What one pipeline run did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// All tasks in the Merged state at the end of the run.
    pub merged: Vec<String>,
    /// Merges made during this run, in order.
    pub merges: Vec<MergeRecord>,
    pub rolled_back: Vec<String>,
    pub failed: Vec<FailureReport>,
    pub blocked: Vec<BlockedTask>,
    pub consensus_runs: usize,
    pub reaped_workspaces: Vec<String>,
    pub cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halted: Option<String>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.blocked.is_empty() && self.halted.is_none() && !self.cancelled
    }
}

// ── Job side ─────────────────────────────────────────────────────────────────

enum Progress {
    Reviewing { task_id: String },
}

/// What happens to a failed attempt's workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Teardown {
    /// Keep it for the next run to adopt.
    Release,
    /// Keep it for a retry; destroy (never forced) once the task is Failed.
    DestroyIfFailed,
    /// Discard it even if dirty.
    Force,
}

enum JobOutcome {
    Approved {
        workspace: Workspace,
        consensus: ConsensusResult,
    },
    Rejected {
        workspace: Workspace,
        consensus: ConsensusResult,
    },
    Failed {
        report: FailureReport,
        retryable: bool,
        workspace: Option<Workspace>,
        teardown: Teardown,
    },
}

impl JobOutcome {
    fn failed(
        task_id: &str,
        stage: FailureStage,
        detail: impl Into<String>,
        retryable: bool,
        workspace: Option<Workspace>,
        teardown: Teardown,
    ) -> Self {
        Self::Failed {
            report: FailureReport::new(task_id, stage, detail),
            retryable,
            workspace,
            teardown,
        }
    }
}

/// Shared handles every job gets a clone of.
#[derive(Clone)]
struct JobContext {
    workspaces: Arc<WorkspaceManager>,
    worker: Arc<dyn Worker>,
    engine: Arc<ConsensusEngine>,
    registry: Arc<ReviewerRegistry>,
    selector: PersonaSelector,
    reviewer_count: usize,
    task_timeout: Duration,
    provision_attempts: u32,
    progress: mpsc::UnboundedSender<Progress>,
}

async fn blocking<T, F>(f: F) -> Result<T, String>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, WorkspaceError> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(format!("{e} ({})", e.recovery_suggestion())),
        Err(e) => Err(format!("blocking workspace call failed: {e}")),
    }
}

async fn provision_with_backoff(ctx: &JobContext, task: &Task) -> Result<Workspace, String> {
    let mut attempt = 0;
    loop {
        let workspaces = Arc::clone(&ctx.workspaces);
        let owned = task.clone();
        let result = tokio::task::spawn_blocking(move || workspaces.provision(&owned)).await;
        match result {
            Ok(Ok(workspace)) => return Ok(workspace),
            Ok(Err(e)) if e.is_permanent() || attempt + 1 >= ctx.provision_attempts => {
                return Err(format!("{e} ({})", e.recovery_suggestion()));
            }
            Ok(Err(e)) => {
                let delay = PROVISION_BACKOFF_MS * (1 << attempt);
                warn!(task_id = %task.id, attempt, delay_ms = delay, error = %e, "provisioning failed; backing off");
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
            }
            Err(e) => return Err(format!("provisioning task failed: {e}")),
        }
    }
}

async fn run_job(
    ctx: JobContext,
    task: Task,
    attempt: u32,
    prior_review: Option<ConsensusResult>,
) -> JobOutcome {
    let id = task.id.clone();

    let workspace = match provision_with_backoff(&ctx, &task).await {
        Ok(workspace) => workspace,
        Err(detail) => {
            return JobOutcome::failed(&id, FailureStage::Provision, detail, false, None, Teardown::Release)
        }
    };

    let order = WorkOrder {
        task: task.clone(),
        attempt,
        prior_review,
    };
    match tokio::time::timeout(ctx.task_timeout, ctx.worker.execute(&workspace, &order)).await {
        Err(_) => {
            return JobOutcome::failed(
                &id,
                FailureStage::Timeout,
                format!("exceeded the {}s task budget", ctx.task_timeout.as_secs()),
                false,
                Some(workspace),
                Teardown::Force,
            )
        }
        Ok(Err(e)) => {
            return JobOutcome::failed(
                &id,
                FailureStage::Execute,
                format!("{e:#}"),
                true,
                Some(workspace),
                Teardown::DestroyIfFailed,
            )
        }
        Ok(Ok(())) => {}
    }

    let checked = {
        let workspaces = Arc::clone(&ctx.workspaces);
        let ws = workspace.clone();
        blocking(move || Ok((workspaces.status(&ws)?, workspaces.new_commits(&ws)?))).await
    };
    let contract_breach = match checked {
        Err(detail) => Some(detail),
        Ok((WorkspaceStatus::Dirty { changes }, _)) => {
            Some(format!("executor left {changes} uncommitted change(s)"))
        }
        Ok((WorkspaceStatus::Clean, 0)) => Some("executor produced no new commits".to_string()),
        Ok((WorkspaceStatus::Clean, _)) => None,
    };
    if let Some(detail) = contract_breach {
        return JobOutcome::failed(
            &id,
            FailureStage::Execute,
            detail,
            true,
            Some(workspace),
            Teardown::DestroyIfFailed,
        );
    }

    let _ = ctx.progress.send(Progress::Reviewing { task_id: id.clone() });

    let change_set = {
        let workspaces = Arc::clone(&ctx.workspaces);
        let ws = workspace.clone();
        match blocking(move || workspaces.change_set(&ws)).await {
            Ok(change_set) => change_set,
            Err(detail) => {
                return JobOutcome::failed(
                    &id,
                    FailureStage::Review,
                    detail,
                    true,
                    Some(workspace),
                    Teardown::DestroyIfFailed,
                )
            }
        }
    };

    let selection = match ctx
        .selector
        .select_detailed(&task, &ctx.registry, ctx.reviewer_count, &[])
    {
        Ok(selection) => selection,
        Err(e) => {
            return JobOutcome::failed(
                &id,
                FailureStage::Review,
                e.to_string(),
                false,
                Some(workspace),
                Teardown::DestroyIfFailed,
            )
        }
    };
    debug!(task_id = %id, reviewers = ?selection.ids(), relaxed = selection.relaxed_diversity, "reviewing");

    let request = ReviewRequest {
        task,
        workspace_path: workspace.path.clone(),
        change_set,
        attempt,
    };
    let consensus = ctx.engine.evaluate(request, &selection.reviewers).await;
    if consensus.passed {
        JobOutcome::Approved {
            workspace,
            consensus,
        }
    } else {
        JobOutcome::Rejected {
            workspace,
            consensus,
        }
    }
}

// ── Runner side ──────────────────────────────────────────────────────────────

pub struct Pipeline {
    config: PipelineConfig,
    scheduler: TaskScheduler,
    workspaces: Arc<WorkspaceManager>,
    registry: Arc<ReviewerRegistry>,
    selector: PersonaSelector,
    engine: Arc<ConsensusEngine>,
    merges: Arc<Mutex<MergeController>>,
    history: ConsensusHistory,
    worker: Arc<dyn Worker>,
    post_merge: Option<Arc<dyn PostMergeCheck>>,
    cancel: CancellationToken,
    snapshots: watch::Sender<PipelineSnapshot>,
}

impl Pipeline {
    /// Wire up a pipeline over the repository at `repo_root`. Tasks already
    /// merged according to the ledger are not run again.
    pub fn new(
        repo_root: impl AsRef<Path>,
        config: PipelineConfig,
        graph: TaskGraph,
        registry: Arc<ReviewerRegistry>,
        worker: Arc<dyn Worker>,
        reviewers: Arc<dyn ReviewerBackend>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let repo_root = repo_root.as_ref();

        let workspaces = Arc::new(WorkspaceManager::new(repo_root, config.workspace.clone())?);
        let ledger = match &config.merge.ledger_path {
            Some(path) => MergeLedger::open(path)?,
            None => MergeLedger::new(),
        };
        let merges = MergeController::new(
            repo_root,
            config.workspace.integration_branch.clone(),
            ledger,
        );

        let order = graph.topological_order().to_vec();
        let mut scheduler = TaskScheduler::new(graph, &config.scheduler);
        for id in order {
            if merges.ledger().active_merge_for(&id).is_none() {
                continue;
            }
            if scheduler.state(&id) == Some(TaskState::Ready) {
                scheduler.restore_merged(&id)?;
            } else {
                warn!(task_id = %id, "ledger has a merge for a task whose dependencies are not merged");
            }
        }

        let engine = Arc::new(ConsensusEngine::new(reviewers, config.review.clone()));
        let selector = PersonaSelector::from_config(&config.review);
        let (snapshots, _) = watch::channel(PipelineSnapshot::default());

        Ok(Self {
            config,
            scheduler,
            workspaces,
            registry,
            selector,
            engine,
            merges: Arc::new(Mutex::new(merges)),
            history: ConsensusHistory::new(),
            worker,
            post_merge: None,
            cancel: CancellationToken::new(),
            snapshots,
        })
    }

    pub fn with_post_merge_check(mut self, check: Arc<dyn PostMergeCheck>) -> Self {
        self.post_merge = Some(check);
        self
    }

    /// Cancelling the token stops dispatch and aborts in-flight tasks.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Live snapshots, published after every scheduling event.
    pub fn subscribe(&self) -> watch::Receiver<PipelineSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot::capture(
            &self.scheduler,
            &lock(&self.merges),
            self.config.merge.recent_records(),
        )
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    pub fn merges(&self) -> MutexGuard<'_, MergeController> {
        lock(&self.merges)
    }

    pub fn history(&self) -> &ConsensusHistory {
        &self.history
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    pub fn retry_task(&mut self, id: &str) -> Result<(), PipelineError> {
        Ok(self.scheduler.retry_task(id)?)
    }

    pub fn excise_task(&mut self, id: &str) -> Result<Task, PipelineError> {
        Ok(self.scheduler.excise_task(id)?)
    }

    /// Operator acknowledgement of a halted merge queue.
    pub fn resume_merges(&mut self) {
        lock(&self.merges).resume();
    }

    /// Drive the graph until nothing more can progress.
    pub async fn run(&mut self) -> Result<RunSummary, PipelineError> {
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let ctx = JobContext {
            workspaces: Arc::clone(&self.workspaces),
            worker: Arc::clone(&self.worker),
            engine: Arc::clone(&self.engine),
            registry: Arc::clone(&self.registry),
            selector: self.selector.clone(),
            reviewer_count: self.config.review.reviewer_count,
            task_timeout: self.config.scheduler.task_timeout(),
            provision_attempts: self.config.workspace.provision_retries.max(1),
            progress: progress_tx,
        };
        let cancel = self.cancel.clone();
        let mut join_set: JoinSet<JobOutcome> = JoinSet::new();
        let mut summary = RunSummary::default();
        let mut cancelled = false;

        info!(
            tasks = self.scheduler.graph().len(),
            max_concurrency = self.config.scheduler.max_concurrency,
            "pipeline run started"
        );

        loop {
            if cancel.is_cancelled() && !cancelled {
                cancelled = true;
                join_set.abort_all();
            }
            if !cancelled && !lock(&self.merges).is_halted() {
                for task in self.scheduler.dispatch() {
                    let attempt = self.scheduler.attempts(&task.id);
                    let prior_review = self
                        .history
                        .latest(&task.id)
                        .filter(|c| !c.passed)
                        .cloned();
                    join_set.spawn(isolated_job(ctx.clone(), task, attempt, prior_review));
                }
            }
            self.publish();
            if join_set.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled(), if !cancelled => {
                    warn!(in_flight = join_set.len(), "pipeline cancelled; aborting in-flight tasks");
                    cancelled = true;
                    join_set.abort_all();
                }
                Some(progress) = progress_rx.recv() => self.on_progress(progress),
                Some(joined) = join_set.join_next() => match joined {
                    Ok(outcome) => self.on_outcome(outcome, cancelled, &mut summary).await?,
                    Err(e) if e.is_cancelled() => {}
                    Err(e) => error!(error = %e, "task job failed to join"),
                },
            }
        }

        // Whatever is still in flight was aborted.
        for (task_id, _) in self.scheduler.running() {
            let report = FailureReport::new(&task_id, FailureStage::Cancelled, "run cancelled");
            self.fail(report, false, None, Teardown::Release).await?;
        }

        let workspaces = Arc::clone(&self.workspaces);
        let max_age = self.config.workspace.reap_max_age();
        summary.reaped_workspaces = tokio::task::spawn_blocking(move || workspaces.reap(max_age))
            .await
            .unwrap_or_default();

        summary.merged = self.scheduler.tasks_in(TaskState::Merged);
        summary.failed = self.scheduler.failures().into_iter().cloned().collect();
        summary.blocked = self.scheduler.blocked_tasks();
        summary.cancelled = cancelled;
        summary.halted = lock(&self.merges).halt_reason().map(str::to_string);
        self.publish();

        info!(
            merged = summary.merged.len(),
            failed = summary.failed.len(),
            blocked = summary.blocked.len(),
            rolled_back = summary.rolled_back.len(),
            halted = summary.halted.is_some(),
            "pipeline run finished"
        );
        Ok(summary)
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.snapshot());
    }

    fn on_progress(&mut self, progress: Progress) {
        match progress {
            Progress::Reviewing { task_id } => self.ensure_reviewing(&task_id),
        }
    }

    fn ensure_reviewing(&mut self, task_id: &str) {
        if self.scheduler.state(task_id) == Some(TaskState::Running) {
            if let Err(e) = self.scheduler.advance(task_id, TaskState::Reviewing, None) {
                warn!(task_id, error = %e, "could not mark task as reviewing");
            }
        }
    }

    async fn on_outcome(
        &mut self,
        outcome: JobOutcome,
        cancelled: bool,
        summary: &mut RunSummary,
    ) -> Result<(), PipelineError> {
        match outcome {
            JobOutcome::Approved {
                workspace,
                consensus,
            } => {
                let task_id = workspace.task_id.clone();
                self.history.record(consensus.clone());
                summary.consensus_runs += 1;
                self.ensure_reviewing(&task_id);

                if cancelled {
                    let report = FailureReport::new(&task_id, FailureStage::Cancelled, "approved but run cancelled before merge")
                        .with_consensus(consensus);
                    self.fail(report, false, Some(workspace), Teardown::Release).await?;
                    return Ok(());
                }

                self.scheduler
                    .advance(&task_id, TaskState::Merging, Some(&consensus.summary()))?;
                let queued = {
                    let workspace = workspace.clone();
                    let consensus = consensus.clone();
                    self.on_merges(move |merges| merges.enqueue(workspace, &consensus))
                        .await?
                };
                if let Err(e) = queued {
                    let report = FailureReport::new(&task_id, FailureStage::Merge, e.to_string())
                        .with_consensus(consensus);
                    self.fail(report, false, Some(workspace), Teardown::DestroyIfFailed).await?;
                    return Ok(());
                }
                self.drain_merge_queue(summary).await
            }
            JobOutcome::Rejected {
                workspace,
                consensus,
            } => {
                let task_id = workspace.task_id.clone();
                self.history.record(consensus.clone());
                summary.consensus_runs += 1;
                self.ensure_reviewing(&task_id);

                let report = FailureReport::new(&task_id, FailureStage::Review, consensus.summary())
                    .with_consensus(consensus);
                self.fail(report, true, Some(workspace), Teardown::DestroyIfFailed).await?;
                Ok(())
            }
            JobOutcome::Failed {
                report,
                retryable,
                workspace,
                teardown,
            } => {
                self.fail(report, retryable, workspace, teardown).await?;
                Ok(())
            }
        }
    }

    async fn drain_merge_queue(&mut self, summary: &mut RunSummary) -> Result<(), PipelineError> {
        loop {
            let outcome = match self.on_merges(|merges| merges.merge_next()).await? {
                Ok(Some(outcome)) => outcome,
                Ok(None) => return Ok(()),
                Err(e) => {
                    let mut merges = lock(&self.merges);
                    if !merges.is_halted() {
                        merges.halt(e.to_string());
                    }
                    drop(merges);
                    self.cancel.cancel();
                    return Ok(());
                }
            };

            match outcome {
                MergeOutcome::Merged(record) => {
                    let workspace = self.workspaces.get(&record.task_id);
                    self.scheduler.mark_merged(&record.task_id)?;
                    if let Some(workspace) = workspace {
                        self.teardown(workspace, false).await;
                    }
                    summary.merges.push(record.clone());
                    self.post_merge(&record, summary).await?;
                }
                MergeOutcome::Conflict {
                    task_id, detail, ..
                } => {
                    let report = self.merge_failure(&task_id, format!("merge conflict: {detail}"));
                    self.fail(report, true, None, Teardown::Force).await?;
                }
                MergeOutcome::Failed { task_id, error, .. } => {
                    let report = self.merge_failure(&task_id, format!("merge aborted: {error}"));
                    self.fail(report, true, None, Teardown::Force).await?;
                }
            }
        }
    }

    fn merge_failure(&self, task_id: &str, detail: String) -> FailureReport {
        let report = FailureReport::new(task_id, FailureStage::Merge, detail);
        match self.history.latest(task_id) {
            Some(consensus) => report.with_consensus(consensus.clone()),
            None => report,
        }
    }

    async fn post_merge(
        &mut self,
        record: &MergeRecord,
        summary: &mut RunSummary,
    ) -> Result<(), PipelineError> {
        let Some(check) = self.post_merge.clone() else {
            return Ok(());
        };
        let repo_root = self.workspaces.repo_root().to_path_buf();
        let verdict = tokio::time::timeout(
            self.config.scheduler.task_timeout(),
            check.verify(record, &repo_root),
        )
        .await;
        let failure = match verdict {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("post-merge check failed: {e:#}")),
            Err(_) => Some("post-merge check timed out".to_string()),
        };

        let Some(reason) = failure else {
            let task_id = record.task_id.clone();
            if let Err(e) = self.on_merges(move |merges| merges.mark_stable(&task_id)).await? {
                error!(task_id = %record.task_id, error = %e, "could not record stable merge");
                self.cancel.cancel();
            }
            return Ok(());
        };

        warn!(task_id = %record.task_id, reason = %reason, "rolling back merge");
        let rollback = {
            let (record_id, reason) = (record.id, reason.clone());
            self.on_merges(move |merges| merges.rollback(record_id, &reason))
                .await?
        };
        match rollback {
            Ok(_) => {
                let mut report = FailureReport::new(&record.task_id, FailureStage::PostMerge, reason);
                if let Some(consensus) = self.history.latest(&record.task_id) {
                    report = report.with_consensus(consensus.clone());
                }
                self.scheduler.mark_rolled_back(report)?;
                summary.rolled_back.push(record.task_id.clone());
            }
            Err(e) => {
                error!(task_id = %record.task_id, error = %e, "rollback failed; stopping the run");
                self.cancel.cancel();
            }
        }
        Ok(())
    }

    async fn fail(
        &mut self,
        report: FailureReport,
        retryable: bool,
        workspace: Option<Workspace>,
        teardown: Teardown,
    ) -> Result<Disposition, PipelineError> {
        let task_id = report.task_id.clone();
        let workspace = workspace.or_else(|| self.workspaces.get(&task_id));
        let disposition = self.scheduler.record_failure(report, retryable)?;

        if let Some(workspace) = workspace {
            match (teardown, disposition) {
                (Teardown::Force, _) => self.teardown(workspace, true).await,
                (Teardown::DestroyIfFailed, Disposition::Failed) => {
                    self.teardown(workspace, false).await
                }
                _ => self.workspaces.release(&task_id),
            }
        }
        Ok(disposition)
    }

    async fn teardown(&self, workspace: Workspace, force: bool) {
        let task_id = workspace.task_id.clone();
        let workspaces = Arc::clone(&self.workspaces);
        let destroyed =
            tokio::task::spawn_blocking(move || workspaces.destroy(&workspace, force)).await;
        match destroyed {
            Ok(Ok(())) => {}
            Ok(Err(WorkspaceError::Dirty { .. })) => self.workspaces.release(&task_id),
            Ok(Err(e)) => {
                warn!(task_id = %task_id, error = %e, "workspace teardown failed");
                self.workspaces.release(&task_id);
            }
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "workspace teardown did not finish");
                self.workspaces.release(&task_id);
            }
        }
    }

    /// Run `f` against the merge controller on the blocking pool. Every call
    /// is awaited before the next one, so the integration branch keeps a
    /// single writer.
    async fn on_merges<T, F>(&self, f: F) -> Result<T, PipelineError>
    where
        T: Send + 'static,
        F: FnOnce(&mut MergeController) -> T + Send + 'static,
    {
        let merges = Arc::clone(&self.merges);
        tokio::task::spawn_blocking(move || f(&mut lock(&merges)))
            .await
            .map_err(|e| PipelineError::Background(format!("merge controller call failed: {e}")))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Runs a job with panics turned into an ordinary failure of that task.
async fn isolated_job(
    ctx: JobContext,
    task: Task,
    attempt: u32,
    prior_review: Option<ConsensusResult>,
) -> JobOutcome {
    let task_id = task.id.clone();
    match AssertUnwindSafe(run_job(ctx, task, attempt, prior_review))
        .catch_unwind()
        .await
    {
        Ok(outcome) => outcome,
        Err(_) => {
            error!(task_id = %task_id, "task job panicked");
            JobOutcome::failed(
                &task_id,
                FailureStage::Execute,
                "task job panicked",
                false,
                None,
                Teardown::DestroyIfFailed,
            )
        }
    }
}
