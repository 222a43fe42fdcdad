//! Top-level orchestrator: drives the whole of §4.6's `Execute()` flow by
//! composing the analyzer, worktree pool, merge engine, conflict resolver,
//! and workers.
//!
//! Grounded on `services/merge_queue.rs` and `services/worktree_service.rs`
//! for the batch/await-all idiom around a shared queue, generalized to the
//! full group-by-group, two-phase-merge flow §4.6 describes; no single
//! teacher file plays this role end to end.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, RwLock};
use tracing::warn;
use uuid::Uuid;

use crate::application::conflict_resolver::ConflictResolver;
use crate::application::merge_engine::MergeEngine;
use crate::application::task_graph_analyzer;
use crate::application::worker::Worker;
use crate::application::worktree_manager::WorktreeManager;
use crate::domain::error::EngineError;
use crate::domain::models::config::EngineConfig;
use crate::domain::models::task::{Task, TaskStatus};
use crate::domain::models::worker::{WorkerEvent, WorkerResult};
use crate::domain::ports::agent::AgentPlugin;
use crate::domain::ports::tracker::{TaskFilter, Tracker};

/// Observable state of one `ParallelExecutor` run (§4.6, "State machine").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Idle,
    Analyzing,
    Executing,
    Merging,
    Interrupted,
    Completed,
    Failed,
}

/// Events fanned out to listeners over the course of one `execute()` call.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    SessionBranchCreated { branch: String },
    GroupStarted { depth: usize, task_ids: Vec<String> },
    BatchStarted { task_ids: Vec<String> },
    Worker(WorkerEvent),
    TaskCompleted { task_id: String },
    TaskRequeued { task_id: String },
    TaskFailed { task_id: String },
    ConflictPending { task_id: String },
    Completed,
    Interrupted,
    Failed { detail: String },
}

/// Result of one `execute()` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionSummary {
    pub state: ExecutorState,
    pub actionable_task_count: usize,
    pub tasks_completed: usize,
    pub tasks_failed: usize,
}

impl ExecutionSummary {
    /// §4.6, "Completion flag".
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.tasks_completed >= self.actionable_task_count && self.tasks_failed == 0
    }
}

/// Whether a run went parallel or deferred to the caller's sequential path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecuteOutcome {
    Ran(ExecutionSummary),
    FallBackToSequential,
}

/// Drives one end-to-end parallel execution run.
pub struct ParallelExecutor {
    config: EngineConfig,
    repo_dir: String,
    tracker: Arc<dyn Tracker>,
    agent: Arc<dyn AgentPlugin>,
    worktree_manager: WorktreeManager,
    merge_engine: MergeEngine,
    conflict_resolver: ConflictResolver,
    state: RwLock<ExecutorState>,
    stop_flag: Arc<AtomicBool>,
    active_handles: RwLock<Vec<crate::application::worker::WorkerHandle>>,
    pending_conflicts: RwLock<HashMap<String, WorkerResult>>,
    requeue_counts: RwLock<HashMap<String, u32>>,
    events: Option<mpsc::Sender<EngineEvent>>,
}

impl ParallelExecutor {
    #[must_use]
    pub fn new(
        config: EngineConfig,
        repo_dir: impl Into<String>,
        base_ref: impl Into<String>,
        tracker: Arc<dyn Tracker>,
        agent: Arc<dyn AgentPlugin>,
    ) -> Self {
        let repo_dir = repo_dir.into();
        let base_ref = base_ref.into();
        let session_id = Uuid::new_v4().simple().to_string()[..8].to_string();
        let worktree_manager = WorktreeManager::new(&config, repo_dir.clone(), base_ref);
        let merge_engine = MergeEngine::new(&config, repo_dir.clone(), tracker.clone(), session_id);
        let conflict_resolver = ConflictResolver::new(config.confidence_threshold, config.ai_conflict_resolution);

        Self {
            config,
            repo_dir,
            tracker,
            agent,
            worktree_manager,
            merge_engine,
            conflict_resolver,
            state: RwLock::new(ExecutorState::Idle),
            stop_flag: Arc::new(AtomicBool::new(false)),
            active_handles: RwLock::new(Vec::new()),
            pending_conflicts: RwLock::new(HashMap::new()),
            requeue_counts: RwLock::new(HashMap::new()),
            events: None,
        }
    }

    #[must_use]
    pub fn with_event_sink(mut self, tx: mpsc::Sender<EngineEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub async fn state(&self) -> ExecutorState {
        *self.state.read().await
    }

    /// Request cooperative cancellation: sets the shared stop flag and
    /// signals every worker currently running (§5, "Cancellation & timeouts").
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Ok(handles) = self.active_handles.try_read() {
            for handle in handles.iter() {
                handle.stop();
            }
        }
    }

    fn is_stopped(&self) -> bool {
        self.stop_flag.load(Ordering::SeqCst)
    }

    async fn emit(&self, event: EngineEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }

    pub async fn has_pending_conflict(&self, task_id: &str) -> bool {
        self.pending_conflicts.read().await.contains_key(task_id)
    }

    /// Abandon a pending conflict: the task stays incomplete for this run
    /// (§4.6, "Conflict retry/skip surface").
    pub async fn skip_failed_conflict(&self, task_id: &str) {
        self.pending_conflicts.write().await.remove(task_id);
    }

    /// Re-run the merge and conflict resolver for a previously pending
    /// conflict. Returns `true` if the task is now merged and completed.
    ///
    /// # Errors
    /// Returns an error on unexpected VCS/filesystem failure.
    pub async fn retry_conflict_resolution(&self, task_id: &str) -> Result<bool, EngineError> {
        let Some(result) = self.pending_conflicts.read().await.get(task_id).cloned() else {
            return Ok(false);
        };

        self.merge_engine.enqueue(result.clone()).await;
        let Some(outcome) = self.merge_engine.process_next().await? else {
            return Ok(false);
        };

        if !outcome.had_conflicts {
            if outcome.success {
                let _ = self.tracker.complete_task(task_id, None).await;
                self.pending_conflicts.write().await.remove(task_id);
                return Ok(true);
            }
            return Ok(false);
        }

        let file_results = self.conflict_resolver.resolve_conflicts(&self.repo_dir).await?;
        if file_results.iter().all(|r| r.applied) {
            let finalized = self.merge_engine.finalize_conflicted_merge(&outcome.operation_id).await?;
            if finalized.success {
                let _ = self.tracker.complete_task(task_id, None).await;
                self.pending_conflicts.write().await.remove(task_id);
                return Ok(true);
            }
        } else {
            self.merge_engine.abort_conflicted_merge(&outcome.operation_id).await;
        }
        Ok(false)
    }

    /// Run one full parallel-execution pass per §4.6.
    ///
    /// # Errors
    /// Returns an error only for a failure the engine cannot route around
    /// (e.g. the session branch could not be created); per-task failures are
    /// captured in the returned summary instead.
    pub async fn execute(&self) -> Result<ExecuteOutcome, EngineError> {
        *self.state.write().await = ExecutorState::Analyzing;

        let filter = TaskFilter {
            status_in: vec![TaskStatus::Open, TaskStatus::InProgress],
            ..Default::default()
        };
        let mut tasks = self.tracker.get_tasks(&filter).await?;
        if let Some(ids) = &self.config.filtered_task_ids {
            tasks.retain(|t| ids.contains(&t.id));
        }

        let analysis = task_graph_analyzer::analyze(&tasks);
        if !analysis.should_run_parallel {
            *self.state.write().await = ExecutorState::Idle;
            return Ok(ExecuteOutcome::FallBackToSequential);
        }

        *self.state.write().await = ExecutorState::Executing;
        self.merge_engine.start().await?;
        self.emit(EngineEvent::SessionBranchCreated {
            branch: self.merge_engine.target_branch().await,
        })
        .await;

        let tasks_by_id: HashMap<String, Task> = tasks.into_iter().map(|t| (t.id.clone(), t)).collect();
        let mut tasks_completed = 0usize;
        let mut tasks_failed = 0usize;
        let mut touched: HashSet<String> = HashSet::new();
        let mut stopped_early = false;

        'groups: for group in &analysis.groups {
            if self.is_stopped() {
                stopped_early = true;
                break;
            }
            self.emit(EngineEvent::GroupStarted {
                depth: group.depth,
                task_ids: group.task_ids.clone(),
            })
            .await;

            for batch in group.task_ids.chunks(self.config.max_workers.max(1)) {
                if self.is_stopped() {
                    stopped_early = true;
                    break 'groups;
                }
                self.emit(EngineEvent::BatchStarted {
                    task_ids: batch.to_vec(),
                })
                .await;

                let batch_results = self.run_batch(batch, &tasks_by_id).await;
                let outcome = self
                    .settle_batch(&batch_results, &tasks_by_id)
                    .await?;
                tasks_completed += outcome.completed;
                tasks_failed += outcome.failed;
                touched.extend(batch.iter().cloned());
            }
        }

        if stopped_early || self.is_stopped() {
            for task in tasks_by_id.values() {
                if !touched.contains(&task.id) {
                    let _ = self.tracker.update_task_status(&task.id, TaskStatus::Open).await;
                }
            }
        }

        self.worktree_manager.cleanup_all().await;
        self.merge_engine.cleanup().await;

        let final_state = if stopped_early || self.is_stopped() {
            ExecutorState::Interrupted
        } else if tasks_completed >= analysis.actionable_task_count && tasks_failed == 0 {
            ExecutorState::Completed
        } else {
            ExecutorState::Interrupted
        };
        *self.state.write().await = final_state;

        match final_state {
            ExecutorState::Completed => self.emit(EngineEvent::Completed).await,
            ExecutorState::Interrupted => self.emit(EngineEvent::Interrupted).await,
            _ => {}
        }

        Ok(ExecuteOutcome::Ran(ExecutionSummary {
            state: final_state,
            actionable_task_count: analysis.actionable_task_count,
            tasks_completed,
            tasks_failed,
        }))
    }

    /// Spawn phase plus await-all for one batch (§4.6, step 5a).
    async fn run_batch(&self, batch: &[String], tasks_by_id: &HashMap<String, Task>) -> Vec<WorkerResult> {
        let mut handles = Vec::new();
        let mut futures = Vec::new();
        let mut immediate = Vec::new();

        for task_id in batch {
            let Some(task) = tasks_by_id.get(task_id) else {
                continue;
            };
            let worker_id = format!("worker-{task_id}");

            match self.worktree_manager.acquire(&worker_id, task_id).await {
                Ok(worktree) => {
                    let _ = self.tracker.update_task_status(task_id, TaskStatus::InProgress).await;
                    self.worktree_manager.mark_in_use(&worktree.id).await;

                    let worker = Worker::new(
                        worker_id,
                        task_id.clone(),
                        task.title.clone(),
                        worktree,
                        self.agent.clone(),
                        &self.config,
                    );
                    handles.push(worker.handle());

                    let engine_events = self.events.clone();
                    futures.push(async move {
                        let (tx, mut rx) = mpsc::channel(64);
                        let worker = worker.with_event_sink(tx);
                        let forward = async {
                            while let Some(event) = rx.recv().await {
                                if let Some(engine_events) = &engine_events {
                                    let _ = engine_events.send(EngineEvent::Worker(event)).await;
                                }
                            }
                        };
                        let (result, ()) = tokio::join!(worker.start(), forward);
                        result
                    });
                }
                Err(err) => {
                    warn!(task_id, %err, "worktree acquisition failed, worker will not run");
                    immediate.push(WorkerResult::failed_before_start(worker_id, task_id.clone(), err.to_string()));
                }
            }
        }

        self.active_handles.write().await.extend(handles);
        let spawned = futures::future::join_all(futures).await;
        self.active_handles.write().await.clear();

        let mut results = immediate;
        results.extend(spawned);
        results
    }

    /// Merge phase for one batch, applying the two-phase rule: straight
    /// merges first, then conflict resolution over whatever is left
    /// (§4.6, "Two-phase merge rule"). A conflicted merge must be resolved
    /// or aborted before the next queued merge can start — git allows only
    /// one merge in progress — so resolution happens as each conflict is
    /// hit rather than strictly after the whole batch drains.
    async fn settle_batch(
        &self,
        batch_results: &[WorkerResult],
        tasks_by_id: &HashMap<String, Task>,
    ) -> Result<BatchOutcome, EngineError> {
        *self.state.write().await = ExecutorState::Merging;
        let mut outcome = BatchOutcome::default();

        for result in batch_results {
            self.merge_engine.enqueue(result.clone()).await;
            let merge_result = self.merge_engine.process_next().await?;
            let Some(merge_result) = merge_result else {
                continue;
            };

            let merge_succeeded = if merge_result.had_conflicts {
                self.emit(EngineEvent::ConflictPending {
                    task_id: result.task_id.clone(),
                })
                .await;
                self.resolve_pending(&merge_result.operation_id, result).await?
            } else {
                merge_result.success
            };

            if merge_succeeded {
                if let Some(task) = tasks_by_id.get(&result.task_id) {
                    self.append_progress(task, &result.worktree_path).await;
                }
            }

            self.apply_completion(result, merge_succeeded, &mut outcome).await;
            self.worktree_manager.release(&format!("{}:{}", result.worker_id, result.task_id)).await;
        }

        *self.state.write().await = ExecutorState::Executing;
        Ok(outcome)
    }

    async fn resolve_pending(&self, operation_id: &str, result: &WorkerResult) -> Result<bool, EngineError> {
        let file_results = self.conflict_resolver.resolve_conflicts(&self.repo_dir).await?;

        if file_results.iter().all(|r| r.applied) {
            let finalized = self.merge_engine.finalize_conflicted_merge(operation_id).await?;
            Ok(finalized.success)
        } else {
            self.merge_engine.abort_conflicted_merge(operation_id).await;
            self.pending_conflicts
                .write()
                .await
                .insert(result.task_id.clone(), result.clone());
            Ok(false)
        }
    }

    async fn apply_completion(&self, result: &WorkerResult, merge_succeeded: bool, outcome: &mut BatchOutcome) {
        if result.success && result.task_completed && merge_succeeded {
            let _ = self.tracker.complete_task(&result.task_id, None).await;
            outcome.completed += 1;
            self.emit(EngineEvent::TaskCompleted {
                task_id: result.task_id.clone(),
            })
            .await;
        } else if result.success && result.task_completed {
            let mut counts = self.requeue_counts.write().await;
            let count = counts.entry(result.task_id.clone()).or_insert(0);
            *count += 1;
            if *count <= self.config.max_requeue_count {
                let _ = self.tracker.update_task_status(&result.task_id, TaskStatus::Open).await;
                self.emit(EngineEvent::TaskRequeued {
                    task_id: result.task_id.clone(),
                })
                .await;
            } else {
                outcome.failed += 1;
                self.emit(EngineEvent::TaskFailed {
                    task_id: result.task_id.clone(),
                })
                .await;
            }
        } else {
            let _ = self.tracker.update_task_status(&result.task_id, TaskStatus::Open).await;
            outcome.failed += 1;
            self.emit(EngineEvent::TaskFailed {
                task_id: result.task_id.clone(),
            })
            .await;
        }
    }

    /// Append a worker's progress notes to the repo-level progress file
    /// (§4.6, "Progress fan-out"). Silently ignores a missing source file.
    async fn append_progress(&self, task: &Task, worktree_path: &str) {
        let source = format!("{worktree_path}/.{}/progress.md", self.config.namespace);
        let Ok(notes) = tokio::fs::read_to_string(&source).await else {
            return;
        };

        let target_dir = format!("{}/.{}", self.repo_dir, self.config.namespace);
        if tokio::fs::create_dir_all(&target_dir).await.is_err() {
            return;
        }
        let target = format!("{target_dir}/progress.md");
        let heading = format!("\n## Parallel Task: {} ({})\n{}\n", task.title, task.id, notes);

        match tokio::fs::OpenOptions::new().create(true).append(true).open(&target).await {
            Ok(mut file) => {
                if let Err(err) = file.write_all(heading.as_bytes()).await {
                    warn!(%err, "failed to append progress notes");
                }
            }
            Err(err) => warn!(%err, "failed to open repo-level progress file"),
        }
    }
}

#[derive(Debug, Default)]
struct BatchOutcome {
    completed: usize,
    failed: usize,
}
