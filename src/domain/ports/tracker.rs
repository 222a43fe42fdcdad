//! Tracker port - interface for the pluggable issue/task tracker.
//!
//! The engine treats the tracker as an external collaborator (§6): it never
//! inspects a tracker's storage format directly, only this trait.

use async_trait::async_trait;

use crate::domain::error::EngineError;
use crate::domain::models::{Task, TaskStatus};

/// Filter applied when fetching tasks from the tracker.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Only return tasks whose status is in this set. Empty means no filter.
    pub status_in: Vec<TaskStatus>,
    pub exclude_ids: Vec<String>,
    /// Only return tasks carrying at least one of these labels.
    pub labels: Vec<String>,
    pub epic_id: Option<String>,
    /// Only return tasks with no unresolved `depends_on` entries.
    pub ready_only: bool,
}

/// Result of marking a task complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResult {
    pub task_id: String,
    pub accepted: bool,
    pub detail: Option<String>,
}

/// The pluggable issue tracker a run pulls its backlog from.
///
/// Implementations are expected to be cheap to clone/share (`Arc` internally)
/// since the executor, workers, and merge engine all hold a reference.
#[async_trait]
pub trait Tracker: Send + Sync {
    async fn get_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, EngineError>;

    async fn update_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
    ) -> Result<(), EngineError>;

    async fn complete_task(
        &self,
        task_id: &str,
        reason: Option<&str>,
    ) -> Result<CompletionResult, EngineError>;

    /// Paths to files the tracker persists to, snapshotted/restored by the
    /// merge engine around each merge (§5, "Shared-resource policy").
    async fn get_state_files(&self) -> Result<Vec<String>, EngineError> {
        Ok(Vec::new())
    }

    /// Invoked after state-file restore, if the tracker keeps an in-memory
    /// cache that could now be stale.
    async fn clear_cache(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn set_epic_id(&self, _epic_id: &str) -> Result<(), EngineError> {
        Ok(())
    }
}
