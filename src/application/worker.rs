//! One execution of the single-task iteration engine against one worktree
//! (§4.5).
//!
//! Grounded on `services/worktree_service.rs`'s per-task lifecycle for the
//! worktree handling, and `domain::ports::substrate::Substrate`'s streamed
//! execution for draining an `AgentPlugin`; the iteration loop, stop/pause
//! flags, and per-iteration event emission are built fresh against §4.5
//! since the teacher has no iterate-to-completion loop of its own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::adapters::git_cli;
use crate::domain::error::EngineError;
use crate::domain::models::config::EngineConfig;
use crate::domain::models::worker::{WorkerEvent, WorkerResult};
use crate::domain::models::worktree::Worktree;
use crate::domain::ports::agent::{AgentPlugin, ExecuteOptions};

/// Shared cooperative-cancellation flags for one worker, handed out
/// separately from the `Worker` itself so the executor can signal a worker
/// it is not currently polling.
#[derive(Clone)]
pub struct WorkerHandle {
    stop: Arc<AtomicBool>,
    pause: Arc<AtomicBool>,
}

impl WorkerHandle {
    fn new() -> Self {
        Self {
            stop: Arc::new(AtomicBool::new(false)),
            pause: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request a cooperative stop. Takes effect after the current iteration.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn pause(&self) {
        self.pause.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.pause.store(false, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn is_paused(&self) -> bool {
        self.pause.load(Ordering::SeqCst)
    }
}

/// Runs one agent, one iteration at a time, against one worktree, until the
/// agent signals completion, the iteration cap is hit, or it is stopped.
pub struct Worker {
    worker_id: String,
    task_id: String,
    task_title: String,
    worktree: Worktree,
    agent: Arc<dyn AgentPlugin>,
    max_iterations: usize,
    iteration_delay_ms: u64,
    handle: WorkerHandle,
    events: Option<mpsc::Sender<WorkerEvent>>,
}

impl Worker {
    #[must_use]
    pub fn new(
        worker_id: impl Into<String>,
        task_id: impl Into<String>,
        task_title: impl Into<String>,
        worktree: Worktree,
        agent: Arc<dyn AgentPlugin>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            task_id: task_id.into(),
            task_title: task_title.into(),
            worktree,
            agent,
            max_iterations: config.max_iterations_per_worker,
            iteration_delay_ms: config.iteration_delay_ms,
            handle: WorkerHandle::new(),
            events: None,
        }
    }

    #[must_use]
    pub fn handle(&self) -> WorkerHandle {
        self.handle.clone()
    }

    /// Subscribe to this worker's lifecycle events before calling `start`.
    #[must_use]
    pub fn with_event_sink(mut self, tx: mpsc::Sender<WorkerEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    async fn emit(&self, event: WorkerEvent) {
        if let Some(tx) = &self.events {
            // Listener errors must not stall the executor (§4.6, "Scheduling model").
            if tx.send(event).await.is_err() {
                debug!(worker_id = %self.worker_id, "worker event listener dropped");
            }
        }
    }

    /// Run the iteration loop to completion and return its result. Never
    /// returns `Err` — failures before or during iteration are captured in
    /// the returned `WorkerResult` so a batch's `AllSettled` semantics hold
    /// without the executor needing to catch a panic or rejection (§4.6).
    pub async fn start(&self) -> WorkerResult {
        let start = Instant::now();
        self.emit(WorkerEvent::Started {
            worker_id: self.worker_id.clone(),
            task_id: self.task_id.clone(),
        })
        .await;

        let prompt = format!("Work on task {}: {}", self.task_id, self.task_title);
        let mut iterations_run = 0;
        let mut task_completed = false;
        let mut last_error: Option<String> = None;

        for iteration in 0..self.max_iterations {
            if self.handle.is_stopped() {
                info!(worker_id = %self.worker_id, iteration, "worker stopped before iteration");
                break;
            }
            while self.handle.is_paused() {
                if self.handle.is_stopped() {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }

            self.emit(WorkerEvent::IterationStart {
                worker_id: self.worker_id.clone(),
                iteration,
            })
            .await;

            let opts = ExecuteOptions {
                working_dir: self.worktree.path.clone(),
                timeout_ms: None,
            };

            let run_result = self.agent.execute(&prompt, &[], &opts).await;
            iterations_run += 1;

            match run_result {
                Ok(mut execution) => {
                    let mut signaled_done = false;
                    while let Some(event) = execution.events.recv().await {
                        match event {
                            crate::domain::ports::agent::AgentEvent::Completion { signaled_done: done } => {
                                signaled_done = done;
                            }
                            crate::domain::ports::agent::AgentEvent::Stderr(message) => {
                                last_error = Some(message);
                            }
                            _ => {}
                        }
                    }
                    if signaled_done {
                        task_completed = true;
                    }
                }
                Err(err) => {
                    warn!(worker_id = %self.worker_id, %err, "agent execution failed");
                    last_error = Some(err.to_string());
                }
            }

            self.emit(WorkerEvent::IterationEnd {
                worker_id: self.worker_id.clone(),
                iteration,
            })
            .await;

            if task_completed {
                break;
            }
            if self.iteration_delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(self.iteration_delay_ms)).await;
            }
        }

        let commit_count = git_cli::commit_count_since(&self.worktree.path, &self.worktree.base_ref)
            .await
            .unwrap_or_else(|err| {
                warn!(worker_id = %self.worker_id, %err, "failed to count worktree commits");
                0
            });

        let success = last_error.is_none();
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        let mut result = WorkerResult::new(
            self.worker_id.clone(),
            self.task_id.clone(),
            success,
            task_completed,
            iterations_run,
            duration_ms,
            self.worktree.branch.clone(),
            commit_count,
            self.worktree.path.clone(),
        );
        if let Some(error) = last_error {
            result = result.with_error(error);
        }

        if success {
            self.emit(WorkerEvent::Completed {
                worker_id: self.worker_id.clone(),
                result: result.clone(),
            })
            .await;
        } else {
            self.emit(WorkerEvent::Failed {
                worker_id: self.worker_id.clone(),
                error: result.error.clone().unwrap_or_default(),
            })
            .await;
        }

        if self.handle.is_stopped() {
            self.emit(WorkerEvent::Stopped {
                worker_id: self.worker_id.clone(),
            })
            .await;
        }

        result
    }
}
