//! Worktree domain model.
//!
//! A `Worktree` is a handle owned exclusively by `application::worktree_manager`:
//! nothing else may check out branches while a handle is `InUse` or `Merging`
//! (§5, Shared-resource policy).

use serde::{Deserialize, Serialize};

/// Lifecycle state of a pooled worktree handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorktreeStatus {
    Creating,
    Ready,
    InUse,
    Merging,
    Cleaning,
    Error,
}

impl WorktreeStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Ready => "ready",
            Self::InUse => "in_use",
            Self::Merging => "merging",
            Self::Cleaning => "cleaning",
            Self::Error => "error",
        }
    }
}

/// A checked-out working copy, pinned to a dedicated branch, owned by the pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worktree {
    /// Stable handle, distinct from the filesystem path so the pool can
    /// relocate without invalidating references held by callers.
    pub id: String,
    pub worker_id: String,
    pub task_id: String,
    pub path: String,
    pub branch: String,
    /// Revision the branch was forked from.
    pub base_ref: String,
    pub status: WorktreeStatus,
}

impl Worktree {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        worker_id: impl Into<String>,
        task_id: impl Into<String>,
        path: impl Into<String>,
        branch: impl Into<String>,
        base_ref: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            worker_id: worker_id.into(),
            task_id: task_id.into(),
            path: path.into(),
            branch: branch.into(),
            base_ref: base_ref.into(),
            status: WorktreeStatus::Creating,
        }
    }

    pub fn mark_ready(&mut self) {
        self.status = WorktreeStatus::Ready;
    }

    pub fn mark_in_use(&mut self) {
        self.status = WorktreeStatus::InUse;
    }

    pub fn mark_merging(&mut self) {
        self.status = WorktreeStatus::Merging;
    }

    pub fn mark_cleaning(&mut self) {
        self.status = WorktreeStatus::Cleaning;
    }

    pub fn mark_error(&mut self) {
        self.status = WorktreeStatus::Error;
    }
}

/// Sanitize a task id into a valid git ref component: replace any character
/// invalid for a branch ref with `-`, collapse consecutive separators, and
/// strip leading/trailing separators.
#[must_use]
pub fn sanitize_branch_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_sep = false;
    for ch in raw.chars() {
        let is_valid = ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.');
        if is_valid {
            out.push(ch);
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('-');
            last_was_sep = true;
        }
    }
    out.trim_matches('-').to_string()
}

/// Branch name for a task, per §4.2: `worktree/<sanitized-task-id>`.
#[must_use]
pub fn branch_name_for_task(task_id: &str) -> String {
    format!("worktree/{}", sanitize_branch_component(task_id))
}

/// Worktree directory name for a worker, per §4.2: `worker-<workerId>`.
#[must_use]
pub fn worktree_dir_name(worker_id: &str) -> String {
    format!("worker-{worker_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_invalid_characters() {
        assert_eq!(sanitize_branch_component("task:42/fix bug"), "task-42-fix-bug");
    }

    #[test]
    fn sanitize_collapses_runs_and_trims() {
        assert_eq!(sanitize_branch_component("--task..42--"), "task..42");
        assert_eq!(sanitize_branch_component("///weird///"), "weird");
    }

    #[test]
    fn branch_name_uses_worktree_prefix() {
        assert_eq!(branch_name_for_task("TASK-100"), "worktree/TASK-100");
        assert_eq!(branch_name_for_task("fix bug #3"), "worktree/fix-bug-3");
    }

    #[test]
    fn worktree_lifecycle_transitions() {
        let mut wt = Worktree::new("w1", "worker-1", "t1", "/tmp/w1", "worktree/t1", "main");
        assert_eq!(wt.status, WorktreeStatus::Creating);
        wt.mark_ready();
        assert_eq!(wt.status, WorktreeStatus::Ready);
        wt.mark_in_use();
        assert_eq!(wt.status, WorktreeStatus::InUse);
        wt.mark_merging();
        assert_eq!(wt.status, WorktreeStatus::Merging);
        wt.mark_cleaning();
        assert_eq!(wt.status, WorktreeStatus::Cleaning);
    }
}
