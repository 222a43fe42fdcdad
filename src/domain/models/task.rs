//! Task domain model.
//!
//! A `Task` is fetched from the tracker collaborator (`domain::ports::tracker::Tracker`)
//! at the start of a run and never mutated locally by the core engine — status
//! transitions go back through the tracker API.

use serde::{Deserialize, Serialize};

/// Status of a task as reported by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    InProgress,
    Blocked,
    Completed,
    Cancelled,
}

impl TaskStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "in_progress" => Some(Self::InProgress),
            "blocked" => Some(Self::Blocked),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Whether the analyzer/executor should consider this task for scheduling.
    #[must_use]
    pub const fn is_actionable(&self) -> bool {
        matches!(self, Self::Open | Self::InProgress)
    }
}

/// A unit of work pulled from the tracker.
///
/// `id` is treated as an opaque string throughout the engine: it is never
/// parsed, only compared, hashed, and used to derive branch names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    /// 0 = highest priority, 4 = lowest.
    pub priority: u8,
    pub depends_on: Vec<String>,
    pub blocks: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub affects: Vec<String>,
}

impl Task {
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            status: TaskStatus::Open,
            priority: 2,
            depends_on: Vec::new(),
            blocks: Vec::new(),
            labels: Vec::new(),
            affects: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_depends_on(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_blocks(mut self, blocks: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.blocks = blocks.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_labels(mut self, labels: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            TaskStatus::Open,
            TaskStatus::InProgress,
            TaskStatus::Blocked,
            TaskStatus::Completed,
            TaskStatus::Cancelled,
        ] {
            let s = status.as_str();
            assert_eq!(TaskStatus::from_str(s), Some(status));
        }
    }

    #[test]
    fn only_open_and_in_progress_are_actionable() {
        assert!(TaskStatus::Open.is_actionable());
        assert!(TaskStatus::InProgress.is_actionable());
        assert!(!TaskStatus::Blocked.is_actionable());
        assert!(!TaskStatus::Completed.is_actionable());
        assert!(!TaskStatus::Cancelled.is_actionable());
    }

    #[test]
    fn builder_sets_fields() {
        let task = Task::new("t1", "Add widget")
            .with_priority(1)
            .with_depends_on(["t0"])
            .with_labels(["backend"]);
        assert_eq!(task.priority, 1);
        assert_eq!(task.depends_on, vec!["t0".to_string()]);
        assert_eq!(task.labels, vec!["backend".to_string()]);
    }
}
