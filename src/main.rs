//! Demo composition root.
//!
//! Loads engine config, reads a task backlog from a JSON file, and drives a
//! `ParallelExecutor` over it. The `Tracker`/`AgentPlugin` collaborators are
//! real integrations the operator plugs in; this binary wires up the
//! in-memory mocks so the engine can be exercised against a real git repo
//! without a live tracker or agent backend.

use std::sync::Arc;

use anyhow::{Context, Result};
use ralph_engine::{
    ConfigLoader, EngineEvent, ExecuteOutcome, MockAgentPlugin, MockTracker, ParallelExecutor, Task,
};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let mut repo_dir = None;
    let mut tasks_path = "tasks.json".to_string();
    let mut config_path = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            config_path = Some(args.next().context("--config requires a path")?);
        } else if repo_dir.is_none() {
            repo_dir = Some(arg);
        } else {
            tasks_path = arg;
        }
    }
    let repo_dir = repo_dir.context("usage: ralph-engine <repo_dir> [tasks.json] [--config <path>]")?;

    let config = match config_path {
        Some(path) => ConfigLoader::load_from_file(&path).with_context(|| format!("failed to load config from {path}"))?,
        None => ConfigLoader::load().context("failed to load engine configuration")?,
    };

    let tasks_json = std::fs::read_to_string(&tasks_path)
        .with_context(|| format!("failed to read task backlog at {tasks_path}"))?;
    let tasks: Vec<Task> = serde_json::from_str(&tasks_json).context("failed to parse task backlog")?;

    let base_ref = ralph_engine::adapters::git_cli::current_branch(&repo_dir)
        .await
        .context("failed to determine base branch")?;

    let tracker = Arc::new(MockTracker::new(tasks));
    let agent = Arc::new(MockAgentPlugin::new());

    let (tx, mut rx) = mpsc::channel::<EngineEvent>(256);
    let executor = ParallelExecutor::new(config, repo_dir, base_ref, tracker, agent).with_event_sink(tx);

    let listener = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            tracing::info!(?event, "engine event");
        }
    });

    let outcome = executor.execute().await.context("execution run failed")?;
    drop(executor);
    listener.await.ok();

    match outcome {
        ExecuteOutcome::Ran(summary) => {
            tracing::info!(
                completed = summary.tasks_completed,
                failed = summary.tasks_failed,
                state = ?summary.state,
                "run finished"
            );
            if !summary.is_complete() {
                anyhow::bail!("run finished incomplete: {summary:?}");
            }
        }
        ExecuteOutcome::FallBackToSequential => {
            tracing::info!("too few actionable tasks for a parallel run; fall back to sequential execution");
        }
    }

    Ok(())
}
