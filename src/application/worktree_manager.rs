//! Bounded pool of git worktrees, each pinned to a dedicated branch (§4.2).
//!
//! Grounded on `services/worktree_service.rs` for the create/validate/cleanup
//! shelling idiom, generalized from a per-task one-off into a pool the
//! executor acquires from and releases back to across an entire run.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::adapters::git_cli;
use crate::application::resource_monitor::ResourceGate;
use crate::domain::error::EngineError;
use crate::domain::models::config::EngineConfig;
use crate::domain::models::worktree::{branch_name_for_task, worktree_dir_name, Worktree};

/// Owns every worktree checked out for the life of one executor run.
pub struct WorktreeManager {
    repo_dir: String,
    worktree_dir: String,
    base_ref: String,
    max_worktrees: usize,
    min_free_memory_mb: u64,
    max_cpu_utilization: f32,
    resource_gate: ResourceGate,
    worktrees: Arc<RwLock<HashMap<String, Worktree>>>,
    suffix_counter: AtomicU64,
}

impl WorktreeManager {
    #[must_use]
    pub fn new(config: &EngineConfig, repo_dir: impl Into<String>, base_ref: impl Into<String>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            worktree_dir: config.worktree_dir.clone(),
            base_ref: base_ref.into(),
            max_worktrees: config.max_worktrees(),
            min_free_memory_mb: config.min_free_memory_mb,
            max_cpu_utilization: config.max_cpu_utilization,
            resource_gate: ResourceGate::new(),
            worktrees: Arc::new(RwLock::new(HashMap::new())),
            suffix_counter: AtomicU64::new(0),
        }
    }

    /// Acquire a worktree for one (worker, task) pair. Creates the branch
    /// and the on-disk checkout; resolves a branch-name collision by
    /// appending a short counter-based suffix (§4.2).
    pub async fn acquire(&self, worker_id: &str, task_id: &str) -> Result<Worktree, EngineError> {
        {
            let in_use = self.worktrees.read().await.len();
            if in_use >= self.max_worktrees {
                return Err(EngineError::WorktreePoolExhausted {
                    in_use,
                    capacity: self.max_worktrees,
                });
            }
        }

        self.resource_gate
            .check(self.min_free_memory_mb, self.max_cpu_utilization)
            .await?;

        let branch = self.reserve_branch_name(task_id).await?;
        let dir_name = worktree_dir_name(worker_id);
        let absolute_worktree_dir = format!("{}/{}", self.repo_dir, self.worktree_dir);
        let path = format!("{absolute_worktree_dir}/{dir_name}");

        tokio::fs::create_dir_all(&absolute_worktree_dir)
            .await
            .map_err(|source| EngineError::FilesystemError {
                path: absolute_worktree_dir,
                source,
            })?;

        git_cli::worktree_add(&self.repo_dir, &path, &branch, &self.base_ref).await?;

        let id = format!("{worker_id}:{task_id}");
        let mut worktree = Worktree::new(
            id.clone(),
            worker_id,
            task_id,
            path.clone(),
            branch,
            self.base_ref.clone(),
        );
        worktree.mark_ready();

        info!(worktree_id = %id, path = %path, "worktree acquired");
        self.worktrees.write().await.insert(id, worktree.clone());
        Ok(worktree)
    }

    async fn reserve_branch_name(&self, task_id: &str) -> Result<String, EngineError> {
        let base = branch_name_for_task(task_id);
        let mut candidate = base.clone();
        for _ in 0..10 {
            if !git_cli::branch_exists(&self.repo_dir, &candidate).await? {
                return Ok(candidate);
            }
            let suffix = self.suffix_counter.fetch_add(1, Ordering::Relaxed);
            candidate = format!("{base}-{suffix:x}");
        }
        Err(EngineError::VcsError {
            command: "branch name reservation".to_string(),
            detail: format!("could not find a free branch name for task {task_id}"),
        })
    }

    /// Release a worktree back to the pool: marks it `Ready` without
    /// touching the checkout on disk. Removal is deferred to `cleanup_all`
    /// (§4.2, "Release(worktreeHandle)").
    pub async fn release(&self, worktree_id: &str) {
        let mut worktrees = self.worktrees.write().await;
        let Some(worktree) = worktrees.get_mut(worktree_id) else {
            warn!(worktree_id, "release called for unknown worktree");
            return;
        };
        worktree.mark_ready();
    }

    pub async fn mark_in_use(&self, worktree_id: &str) {
        if let Some(worktree) = self.worktrees.write().await.get_mut(worktree_id) {
            worktree.mark_in_use();
        }
    }

    pub async fn mark_merging(&self, worktree_id: &str) {
        if let Some(worktree) = self.worktrees.write().await.get_mut(worktree_id) {
            worktree.mark_merging();
        }
    }

    pub async fn get(&self, worktree_id: &str) -> Option<Worktree> {
        self.worktrees.read().await.get(worktree_id).cloned()
    }

    /// Remove every worktree this manager has checked out. Best-effort and
    /// tolerant of worktrees already removed on disk.
    pub async fn cleanup_all(&self) {
        let ids: Vec<String> = self.worktrees.read().await.keys().cloned().collect();
        for id in ids {
            let worktree = self.worktrees.write().await.remove(&id);
            if let Some(worktree) = worktree {
                if let Err(err) = git_cli::worktree_remove(&self.repo_dir, &worktree.path).await {
                    warn!(worktree_id = %id, %err, "worktree removal failed during cleanup");
                }
                git_cli::branch_delete(&self.repo_dir, &worktree.branch).await.ok();
            }
        }
    }

    /// Remove on-disk worktree directories this manager is not tracking —
    /// leftovers from a prior crashed run sharing the same `worktreeDir`.
    pub async fn prune_orphaned(&self) -> Result<(), EngineError> {
        let tracked: HashSet<String> = self
            .worktrees
            .read()
            .await
            .values()
            .map(|w| w.path.clone())
            .collect();

        let absolute_worktree_dir = format!("{}/{}", self.repo_dir, self.worktree_dir);
        let mut entries = match tokio::fs::read_dir(&absolute_worktree_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(source) => {
                return Err(EngineError::FilesystemError {
                    path: absolute_worktree_dir,
                    source,
                })
            }
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| EngineError::FilesystemError {
                path: absolute_worktree_dir.clone(),
                source,
            })?
        {
            let path = entry.path();
            let path_str = path.to_string_lossy().to_string();
            if tracked.contains(&path_str) {
                continue;
            }
            debug!(path = %path_str, "pruning orphaned worktree directory");
            git_cli::worktree_remove(&self.repo_dir, &path_str).await.ok();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EngineConfig {
        let mut cfg = EngineConfig::new(0, 100.0);
        cfg.max_workers = 2;
        cfg
    }

    #[tokio::test]
    async fn capacity_is_double_max_workers() {
        let manager = WorktreeManager::new(&config(), "/tmp/repo", "main");
        assert_eq!(manager.max_worktrees, 4);
    }

    #[tokio::test]
    async fn release_on_unknown_id_does_not_panic() {
        let manager = WorktreeManager::new(&config(), "/tmp/repo", "main");
        manager.release("nonexistent").await;
    }

    #[tokio::test]
    async fn prune_orphaned_tolerates_missing_dir() {
        let mut cfg = config();
        cfg.worktree_dir = "/tmp/ralph-engine-test-missing-dir-xyz".to_string();
        let manager = WorktreeManager::new(&cfg, "/tmp/repo", "main");
        assert!(manager.prune_orphaned().await.is_ok());
    }
}
