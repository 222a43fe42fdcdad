//! Error taxonomy for the parallel execution engine.
//!
//! Each error surfaced by the engine's public API is a variant of [`EngineError`].
//! Variants carry enough context to reconstruct a structured `WorkerResult.error`
//! or event payload without re-deriving it from a wrapped `anyhow::Error`.

use thiserror::Error;

/// Top-level error type returned by engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("task graph contains a cycle involving {0:?}")]
    TaskGraphCycle(Vec<String>),

    #[error("worktree pool exhausted: {in_use}/{capacity} in use")]
    WorktreePoolExhausted { in_use: usize, capacity: usize },

    #[error("insufficient free memory: {available_mb}MB available, {required_mb}MB required")]
    InsufficientMemory { available_mb: u64, required_mb: u64 },

    #[error("host CPU overloaded: {current:.1}% in use, ceiling is {ceiling:.1}%")]
    CpuOverloaded { current: f32, ceiling: f32 },

    #[error("git command failed: {command}: {detail}")]
    VcsError { command: String, detail: String },

    #[error("filesystem error at {path}: {source}")]
    FilesystemError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("worker for task {task_id} failed: {detail}")]
    WorkerFailure { task_id: String, detail: String },

    #[error("merge of branch {branch} into {target} failed: {detail}")]
    MergeFailure {
        branch: String,
        target: String,
        detail: String,
    },

    #[error("conflict resolution for operation {operation_id} failed: {detail}")]
    ConflictResolutionFailure {
        operation_id: String,
        detail: String,
    },

    #[error("tracker update for task {task_id} failed: {detail}")]
    TrackerUpdateFailure { task_id: String, detail: String },

    #[error("cleanup step failed: {detail}")]
    CleanupFailure { detail: String },

    #[error("invalid branch name {0:?}")]
    InvalidBranchName(String),

    #[error("fatal engine error: {0}")]
    Fatal(String),
}

impl EngineError {
    /// Whether a fresh attempt might succeed without operator intervention.
    ///
    /// Used by `ParallelExecutor` to decide whether a failure is worth a
    /// requeue versus leaving the task `open` with no further attempts.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::WorktreePoolExhausted { .. }
                | Self::InsufficientMemory { .. }
                | Self::CpuOverloaded { .. }
                | Self::MergeFailure { .. }
                | Self::TrackerUpdateFailure { .. }
        )
    }

    /// Whether retrying this run would not help — the caller should give up
    /// on the task for the remainder of the run.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::TaskGraphCycle(_) | Self::InvalidBranchName(_) | Self::Fatal(_)
        )
    }
}

/// Errors from the task-graph analyzer's own structural checks.
///
/// Note: per the analyzer's contract, a cycle is *not* an error — cyclic
/// tasks are reported via `AnalysisResult::cyclic_task_ids` and excluded from
/// scheduling. `GraphError` exists for inputs that are malformed in a way the
/// analyzer cannot silently route around.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum GraphError {
    #[error("dependency edge references unknown task {0}")]
    MissingDependency(String),

    #[error("task graph contains a cycle involving {0:?}")]
    CycleDetected(Vec<String>),
}

/// Errors from loading and validating [`crate::domain::models::config::EngineConfig`].
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("max_workers must be at least 1, got {0}")]
    InvalidMaxWorkers(usize),

    #[error("confidence_threshold must be in [0,1], got {0}")]
    InvalidConfidenceThreshold(f64),

    #[error("max_cpu_utilization must be in (0,100], got {0}")]
    InvalidCpuCeiling(f32),

    #[error("max_requeue_count must be at most {max}, got {got}")]
    InvalidRequeueCount { got: u32, max: u32 },

    #[error("figment configuration error: {0}")]
    Figment(#[from] figment::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worktree_pool_exhausted_is_transient() {
        let err = EngineError::WorktreePoolExhausted {
            in_use: 6,
            capacity: 6,
        };
        assert!(err.is_transient());
        assert!(!err.is_permanent());
    }

    #[test]
    fn task_graph_cycle_is_permanent() {
        let err = EngineError::TaskGraphCycle(vec!["a".into(), "b".into()]);
        assert!(err.is_permanent());
        assert!(!err.is_transient());
    }

    #[test]
    fn worker_failure_is_neither() {
        let err = EngineError::WorkerFailure {
            task_id: "t1".into(),
            detail: "boom".into(),
        };
        assert!(!err.is_transient());
        assert!(!err.is_permanent());
    }

    #[test]
    fn display_includes_context() {
        let err = EngineError::CpuOverloaded {
            current: 95.5,
            ceiling: 80.0,
        };
        let msg = err.to_string();
        assert!(msg.contains("95.5"));
        assert!(msg.contains("80"));
    }
}
