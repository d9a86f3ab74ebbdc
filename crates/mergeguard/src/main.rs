use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use coordination::merge::MergeController;
use coordination::{
    MergeLedger, Pipeline, PersonaSelector, ReviewerRegistry, TaskGraph, WorkspaceManager,
};
use mergeguard::{CommandCheck, CommandReviewer, CommandWorker, MergeguardConfig};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Schedule, review and merge parallel code-change tasks", long_about = None)]
struct Cli {
    /// Path to mergeguard.toml (MERGEGUARD_* variables override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Repository holding the integration branch
    #[arg(long, global = true, default_value = ".")]
    repo: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check the config, the task graph and the reviewer catalog
    Validate {
        #[arg(long)]
        tasks: PathBuf,
    },
    /// Print the dispatch order of a task graph, grouped into waves
    Plan {
        #[arg(long)]
        tasks: PathBuf,
    },
    /// Show which reviewers a task would get
    Select {
        #[arg(long)]
        tasks: PathBuf,
        #[arg(long)]
        task: String,
        /// Overrides review.reviewer_count
        #[arg(long)]
        count: Option<usize>,
        /// Explicit reviewer ids, bypassing scoring
        #[arg(long = "reviewer")]
        reviewers: Vec<String>,
    },
    /// Drive the task graph into the integration branch
    Run {
        #[arg(long)]
        tasks: PathBuf,
    },
    /// List task worktrees on disk
    Workspaces,
    /// Remove clean task worktrees older than the configured age
    Reap {
        /// Overrides workspace.reap_max_age_secs
        #[arg(long)]
        max_age_hours: Option<u64>,
    },
    /// Print the most recent merge records
    Ledger {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Revert a recorded merge on the integration branch
    Rollback {
        /// Merge record id
        #[arg(long, conflicts_with = "task", required_unless_present = "task")]
        record: Option<String>,
        /// Roll back the task's latest active merge
        #[arg(long)]
        task: Option<String>,
        #[arg(long, default_value = "operator rollback")]
        reason: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            if let Some(pe) = e.downcast_ref::<coordination::PipelineError>() {
                eprintln!("error: {e:#}\nhint: {}", pe.recovery_suggestion());
            } else {
                eprintln!("error: {e:#}");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = MergeguardConfig::load(cli.config.as_deref())?;
    config.pipeline.validate()?;

    match cli.command {
        Command::Validate { tasks } => {
            let graph = TaskGraph::load(&tasks)?;
            let registry = load_registry(&config)?;
            println!(
                "ok: {} task(s), {} reviewer(s) across {} domain(s)",
                graph.len(),
                registry.len(),
                registry.domains().count()
            );
        }
        Command::Plan { tasks } => {
            let graph = TaskGraph::load(&tasks)?;
            for (wave, ids) in waves(&graph) {
                println!("wave {wave}: {}", ids.join(", "));
            }
        }
        Command::Select {
            tasks,
            task,
            count,
            reviewers,
        } => {
            let graph = TaskGraph::load(&tasks)?;
            let registry = load_registry(&config)?;
            let task = graph
                .get(&task)
                .with_context(|| format!("no task {task} in {}", tasks.display()))?;
            let selector = PersonaSelector::from_config(&config.pipeline.review);
            let selection = selector.select_detailed(
                task,
                &registry,
                count.unwrap_or(config.pipeline.review.reviewer_count),
                &reviewers,
            )?;
            println!("{}", serde_json::to_string_pretty(&selection)?);
        }
        Command::Run { tasks } => return run_pipeline(&cli.repo, config, &tasks).await,
        Command::Workspaces => {
            let manager = WorkspaceManager::new(&cli.repo, config.pipeline.workspace.clone())?;
            manager.discover()?;
            for listing in manager.list() {
                let ws = &listing.workspace;
                println!(
                    "{}\t{}\t{}\tsince {}",
                    ws.task_id,
                    ws.branch_name,
                    ws.path.display(),
                    ws.created_at.to_rfc3339()
                );
            }
        }
        Command::Reap { max_age_hours } => {
            let manager = WorkspaceManager::new(&cli.repo, config.pipeline.workspace.clone())?;
            manager.discover()?;
            let max_age = max_age_hours
                .map(|h| Duration::from_secs(h * 3600))
                .unwrap_or_else(|| config.pipeline.workspace.reap_max_age());
            let reaped = manager.reap(max_age);
            println!("reaped {} workspace(s)", reaped.len());
        }
        Command::Ledger { limit } => {
            let ledger = open_ledger(&config)?;
            let limit = limit.unwrap_or(config.pipeline.merge.recent_records());
            for record in ledger.recent_merges(limit) {
                let state = if ledger.is_rolled_back(record.id) {
                    "rolled back"
                } else {
                    "active"
                };
                println!(
                    "{}\t{}\t{}\t{:.2}\t{}",
                    record.id, record.task_id, record.merge_commit_sha, record.consensus_score, state
                );
            }
        }
        Command::Rollback {
            record,
            task,
            reason,
        } => {
            let ledger = open_ledger(&config)?;
            let mut merges = MergeController::new(
                &cli.repo,
                config.pipeline.workspace.integration_branch.clone(),
                ledger,
            );
            let rollback = match (record, task) {
                (Some(record), _) => {
                    let id = merges
                        .ledger()
                        .merges()
                        .find(|m| m.id.to_string() == record)
                        .map(|m| m.id)
                        .with_context(|| format!("no merge record {record} in the ledger"))?;
                    merges.rollback(id, &reason)?
                }
                (None, Some(task)) => merges.rollback_task(&task, &reason)?,
                (None, None) => bail!("pass --record or --task"),
            };
            println!(
                "reverted {} with {}",
                rollback.task_id, rollback.revert_commit_sha
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_pipeline(repo: &Path, config: MergeguardConfig, tasks: &Path) -> Result<ExitCode> {
    let graph = TaskGraph::load(tasks)?;
    let registry = Arc::new(load_registry(&config)?);
    let worker = Arc::new(CommandWorker::new(config.executor_command()?));
    let reviewers = Arc::new(CommandReviewer::new(config.reviewer_command()?));
    let post_merge = config.post_merge_command()?;

    let mut pipeline = Pipeline::new(repo, config.pipeline, graph, registry, worker, reviewers)?;
    if let Some(command) = post_merge {
        pipeline = pipeline.with_post_merge_check(Arc::new(CommandCheck::new(command)));
    }

    let cancel = pipeline.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling run");
            cancel.cancel();
        }
    });

    let summary = pipeline.run().await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    info!(success = summary.is_success(), "done");
    Ok(if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn load_registry(config: &MergeguardConfig) -> Result<ReviewerRegistry> {
    match &config.reviewers.catalog {
        Some(path) => ReviewerRegistry::load(path)
            .with_context(|| format!("failed to load reviewer catalog {}", path.display())),
        None => Ok(ReviewerRegistry::builtin()),
    }
}

fn open_ledger(config: &MergeguardConfig) -> Result<MergeLedger> {
    let path = config
        .pipeline
        .merge
        .ledger_path
        .as_ref()
        .context("no ledger: set [merge] ledger_path or MERGEGUARD_LEDGER_PATH")?;
    Ok(MergeLedger::open(path)?)
}

/// Tasks grouped by dependency depth; every task in a wave can run in parallel.
fn waves(graph: &TaskGraph) -> BTreeMap<usize, Vec<String>> {
    let mut depth: BTreeMap<&str, usize> = BTreeMap::new();
    let mut waves: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    for id in graph.topological_order() {
        let Some(task) = graph.get(id) else { continue };
        let d = task
            .dependencies
            .iter()
            .filter_map(|dep| depth.get(dep.as_str()))
            .map(|d| d + 1)
            .max()
            .unwrap_or(0);
        depth.insert(id.as_str(), d);
        waves.entry(d).or_default().push(id.clone());
    }
    waves
}
