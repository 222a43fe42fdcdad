//! Worker result and lifecycle event domain model.
//!
//! Produced by `application::worker::Worker::start`, one per (worker, task)
//! pair, and consumed by `application::merge_engine` (§3, §4.5).

use serde::{Deserialize, Serialize};

/// Outcome of one worker's run against one task in one worktree.
///
/// Immutable once produced. `success` and `task_completed` are independent
/// axes: a worker can run to completion (`success=true`) without the agent
/// signaling the task done (`task_completed=false`), and vice versa is not
/// possible (the engine never considers a task completed mid-failure).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResult {
    pub worker_id: String,
    pub task_id: String,
    pub success: bool,
    pub task_completed: bool,
    pub iterations_run: usize,
    pub duration_ms: u64,
    pub branch_name: String,
    /// Commits made in the worktree. 0 means nothing to merge.
    pub commit_count: usize,
    pub worktree_path: String,
    pub error: Option<String>,
}

impl WorkerResult {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker_id: impl Into<String>,
        task_id: impl Into<String>,
        success: bool,
        task_completed: bool,
        iterations_run: usize,
        duration_ms: u64,
        branch_name: impl Into<String>,
        commit_count: usize,
        worktree_path: impl Into<String>,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            task_id: task_id.into(),
            success,
            task_completed,
            iterations_run,
            duration_ms,
            branch_name: branch_name.into(),
            commit_count,
            worktree_path: worktree_path.into(),
            error: None,
        }
    }

    /// Build a failure result with zero iterations, for errors that occur
    /// before the iteration loop starts (e.g. worktree acquisition failure).
    #[must_use]
    pub fn failed_before_start(
        worker_id: impl Into<String>,
        task_id: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            task_id: task_id.into(),
            success: false,
            task_completed: false,
            iterations_run: 0,
            duration_ms: 0,
            branch_name: String::new(),
            commit_count: 0,
            worktree_path: String::new(),
            error: Some(error.into()),
        }
    }

    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Whether this result has anything for the merge queue to act on.
    #[must_use]
    pub const fn has_mergeable_work(&self) -> bool {
        self.success && self.commit_count > 0
    }
}

/// Lifecycle events a `Worker` streams to its listener while running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerEvent {
    Started { worker_id: String, task_id: String },
    IterationStart { worker_id: String, iteration: usize },
    IterationEnd { worker_id: String, iteration: usize },
    Completed { worker_id: String, result: WorkerResult },
    Failed { worker_id: String, error: String },
    Stopped { worker_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mergeable_requires_success_and_commits() {
        let r = WorkerResult::new("w1", "t1", true, true, 1, 5, "worktree/t1", 0, "/tmp/w1");
        assert!(!r.has_mergeable_work());

        let r = WorkerResult::new("w1", "t1", true, true, 1, 5, "worktree/t1", 3, "/tmp/w1");
        assert!(r.has_mergeable_work());

        let r = WorkerResult::new("w1", "t1", false, false, 1, 5, "worktree/t1", 3, "/tmp/w1");
        assert!(!r.has_mergeable_work());
    }

    #[test]
    fn failed_before_start_has_no_worktree() {
        let r = WorkerResult::failed_before_start("w1", "t1", "pool exhausted");
        assert!(!r.success);
        assert_eq!(r.iterations_run, 0);
        assert_eq!(r.error.as_deref(), Some("pool exhausted"));
    }
}
