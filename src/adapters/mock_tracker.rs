//! In-memory `Tracker` used by tests and the demo binary.
//!
//! No direct teacher analogue exists (the teacher's tracker-equivalent is a
//! SQL-backed `TaskRepository`); built fresh against this engine's own
//! `Tracker` contract (§6), in the `Arc<RwLock<HashMap<..>>>` idiom shared
//! with `adapters::mock_agent`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::error::EngineError;
use crate::domain::models::{Task, TaskStatus};
use crate::domain::ports::tracker::{CompletionResult, TaskFilter, Tracker};

/// A fixed backlog of tasks held in memory, with status mutated through the
/// `Tracker` trait the way the real plugin would mutate its own store.
pub struct MockTracker {
    tasks: Arc<RwLock<HashMap<String, Task>>>,
    epic_id: Arc<RwLock<Option<String>>>,
}

impl MockTracker {
    #[must_use]
    pub fn new(tasks: impl IntoIterator<Item = Task>) -> Self {
        let map = tasks.into_iter().map(|t| (t.id.clone(), t)).collect();
        Self {
            tasks: Arc::new(RwLock::new(map)),
            epic_id: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn insert(&self, task: Task) {
        self.tasks.write().await.insert(task.id.clone(), task);
    }

    pub async fn get(&self, id: &str) -> Option<Task> {
        self.tasks.read().await.get(id).cloned()
    }

    pub async fn all(&self) -> Vec<Task> {
        self.tasks.read().await.values().cloned().collect()
    }
}

fn matches(task: &Task, filter: &TaskFilter) -> bool {
    if !filter.status_in.is_empty() && !filter.status_in.contains(&task.status) {
        return false;
    }
    if filter.exclude_ids.iter().any(|id| id == &task.id) {
        return false;
    }
    if !filter.labels.is_empty() && !filter.labels.iter().any(|l| task.labels.contains(l)) {
        return false;
    }
    if filter.ready_only && !task.depends_on.is_empty() {
        return false;
    }
    true
}

#[async_trait]
impl Tracker for MockTracker {
    async fn get_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, EngineError> {
        let tasks = self.tasks.read().await;
        Ok(tasks.values().filter(|t| matches(t, filter)).cloned().collect())
    }

    async fn update_task_status(&self, task_id: &str, status: TaskStatus) -> Result<(), EngineError> {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(task_id) {
            Some(task) => {
                task.status = status;
                Ok(())
            }
            None => Err(EngineError::TrackerUpdateFailure {
                task_id: task_id.to_string(),
                detail: "task not found".to_string(),
            }),
        }
    }

    async fn complete_task(
        &self,
        task_id: &str,
        reason: Option<&str>,
    ) -> Result<CompletionResult, EngineError> {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(task_id) {
            Some(task) => {
                task.status = TaskStatus::Completed;
                Ok(CompletionResult {
                    task_id: task_id.to_string(),
                    accepted: true,
                    detail: reason.map(ToString::to_string),
                })
            }
            None => Err(EngineError::TrackerUpdateFailure {
                task_id: task_id.to_string(),
                detail: "task not found".to_string(),
            }),
        }
    }

    async fn set_epic_id(&self, epic_id: &str) -> Result<(), EngineError> {
        *self.epic_id.write().await = Some(epic_id.to_string());
        Ok(())
    }
}
