//! Serialized FIFO merge queue that lands worker branches on the session
//! branch (§3, §4.3).
//!
//! Grounded on `services/merge_queue.rs`'s `VecDeque`-backed queue and
//! two-stage merge idiom, collapsed to the spec's single target branch and
//! retargeted at `git_cli::attempt_merge`'s fast-forward/3-way/conflict
//! trichotomy.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::adapters::git_cli::{self, MergeAttempt};
use crate::domain::error::EngineError;
use crate::domain::models::config::EngineConfig;
use crate::domain::models::merge::{MergeOperation, MergeState};
use crate::domain::models::worker::WorkerResult;
use crate::domain::ports::tracker::Tracker;

/// Outcome of processing one queued merge, or finalizing/aborting a
/// conflicted one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub operation_id: String,
    pub success: bool,
    pub had_conflicts: bool,
}

struct FileSnapshot {
    path: String,
    contents: Option<Vec<u8>>,
}

/// Serializes every worker-branch merge into the session (or, if
/// `direct_merge` is set, the original) branch. `process_next` and
/// `finalize_conflicted_merge` each hold `merge_lock` for their duration so
/// at most one merge is ever in flight, the §3 invariant this module exists
/// to uphold.
pub struct MergeEngine {
    repo_dir: String,
    namespace: String,
    direct_merge: bool,
    session_id: String,
    tracker: Arc<dyn Tracker>,
    original_branch: RwLock<Option<String>>,
    session_branch: RwLock<Option<String>>,
    queue: RwLock<VecDeque<MergeOperation>>,
    operations: RwLock<HashMap<String, MergeOperation>>,
    pre_merge_tags: RwLock<HashMap<String, String>>,
    tags_created: RwLock<Vec<String>>,
    merge_lock: Mutex<()>,
    op_counter: AtomicU64,
}

impl MergeEngine {
    #[must_use]
    pub fn new(
        config: &EngineConfig,
        repo_dir: impl Into<String>,
        tracker: Arc<dyn Tracker>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            namespace: config.namespace.clone(),
            direct_merge: config.direct_merge,
            session_id: session_id.into(),
            tracker,
            original_branch: RwLock::new(None),
            session_branch: RwLock::new(None),
            queue: RwLock::new(VecDeque::new()),
            operations: RwLock::new(HashMap::new()),
            pre_merge_tags: RwLock::new(HashMap::new()),
            tags_created: RwLock::new(Vec::new()),
            merge_lock: Mutex::new(()),
            op_counter: AtomicU64::new(0),
        }
    }

    /// Capture the branch the executor started on and, unless `direct_merge`,
    /// create the session branch plus its one-time backup tag (§4.3,
    /// "Session branch protocol"; Open Question #2: `direct_merge` skips the
    /// whole-session tag too, since there is no throwaway branch to protect).
    pub async fn start(&self) -> Result<(), EngineError> {
        let original = git_cli::current_branch(&self.repo_dir).await?;
        *self.original_branch.write().await = Some(original.clone());

        if self.direct_merge {
            return Ok(());
        }

        let session_branch = self.session_branch_name();
        git_cli::create_and_checkout_branch(&self.repo_dir, &session_branch, &original).await?;
        let tag = self.backup_tag();
        git_cli::tag_create(&self.repo_dir, &tag).await?;
        self.tags_created.write().await.push(tag);
        *self.session_branch.write().await = Some(session_branch.clone());
        info!(session_branch = %session_branch, "session branch created");
        Ok(())
    }

    /// `ralph-session/<8-hex-chars>` (§6, "Session branch naming").
    #[must_use]
    pub fn session_branch_name(&self) -> String {
        format!("ralph-session/{}", &self.session_id)
    }

    fn backup_tag(&self) -> String {
        format!("{}-session-backup-{}", self.namespace, self.session_id)
    }

    fn pre_merge_tag(&self, operation_id: &str) -> String {
        format!("{}-premerge-{operation_id}", self.namespace)
    }

    /// Branch every merge targets: the session branch, or the branch the
    /// executor started on when `direct_merge` is set.
    pub async fn target_branch(&self) -> String {
        if let Some(session) = self.session_branch.read().await.clone() {
            return session;
        }
        self.original_branch.read().await.clone().unwrap_or_default()
    }

    #[must_use]
    pub async fn original_branch(&self) -> Option<String> {
        self.original_branch.read().await.clone()
    }

    /// Non-blocking: append a worker result to the queue and return its
    /// operation id.
    pub async fn enqueue(&self, result: WorkerResult) -> String {
        let id = format!("merge-{}", self.op_counter.fetch_add(1, Ordering::Relaxed));
        let op = MergeOperation::new(id.clone(), result);
        self.operations.write().await.insert(id.clone(), op.clone());
        self.queue.write().await.push_back(op);
        id
    }

    pub async fn operation(&self, operation_id: &str) -> Option<MergeOperation> {
        self.operations.read().await.get(operation_id).cloned()
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.read().await.len()
    }

    async fn record(&self, op: MergeOperation) {
        self.operations.write().await.insert(op.id.clone(), op);
    }

    async fn snapshot_state_files(&self) -> Vec<FileSnapshot> {
        let paths = self.tracker.get_state_files().await.unwrap_or_default();
        let mut snapshots = Vec::with_capacity(paths.len());
        for path in paths {
            let contents = tokio::fs::read(&path).await.ok();
            snapshots.push(FileSnapshot { path, contents });
        }
        snapshots
    }

    async fn restore_state_files(&self, snapshots: &[FileSnapshot]) {
        let mut any = false;
        for snapshot in snapshots {
            any = true;
            match &snapshot.contents {
                Some(bytes) => {
                    if let Err(err) = tokio::fs::write(&snapshot.path, bytes).await {
                        warn!(path = %snapshot.path, %err, "failed to restore tracker state file");
                    }
                }
                None => {
                    let _ = tokio::fs::remove_file(&snapshot.path).await;
                }
            }
        }
        if any {
            let _ = self.tracker.clear_cache().await;
        }
    }

    /// Process exactly one queued merge. Returns `Ok(None)` if the queue was
    /// empty (§4.3, "Queue semantics").
    ///
    /// # Errors
    /// Returns an error only for unexpected VCS/filesystem failures outside
    /// the documented merge-failure path, which is instead reported via
    /// `MergeOutcome { success: false, .. }`.
    pub async fn process_next(&self) -> Result<Option<MergeOutcome>, EngineError> {
        let _guard = self.merge_lock.lock().await;

        let mut op = match self.queue.write().await.pop_front() {
            Some(op) => op,
            None => return Ok(None),
        };

        op.mark_merging();
        self.record(op.clone()).await;

        if op.worker_result.commit_count == 0 {
            op.mark_merged();
            let id = op.id.clone();
            self.record(op).await;
            return Ok(Some(MergeOutcome {
                operation_id: id,
                success: true,
                had_conflicts: false,
            }));
        }

        let snapshot = self.snapshot_state_files().await;

        let tag = self.pre_merge_tag(&op.id);
        git_cli::tag_create(&self.repo_dir, &tag).await?;
        self.tags_created.write().await.push(tag.clone());

        let message = format!("merge task {} (no-edit)", op.worker_result.task_id);
        let attempt = git_cli::attempt_merge(&self.repo_dir, &op.worker_result.branch_name, &message).await;

        self.restore_state_files(&snapshot).await;

        let outcome = match attempt {
            Ok(MergeAttempt::FastForward | MergeAttempt::Merged { .. }) => {
                op.mark_merged();
                MergeOutcome {
                    operation_id: op.id.clone(),
                    success: true,
                    had_conflicts: false,
                }
            }
            Ok(MergeAttempt::Conflict) => {
                op.mark_conflicted();
                self.pre_merge_tags.write().await.insert(op.id.clone(), tag);
                MergeOutcome {
                    operation_id: op.id.clone(),
                    success: false,
                    had_conflicts: true,
                }
            }
            Ok(MergeAttempt::Failed { detail }) => {
                warn!(operation_id = %op.id, %detail, "merge failed, rolling back");
                git_cli::reset_hard(&self.repo_dir, &tag).await.ok();
                op.mark_rolled_back();
                MergeOutcome {
                    operation_id: op.id.clone(),
                    success: false,
                    had_conflicts: false,
                }
            }
            Err(err) => {
                warn!(operation_id = %op.id, %err, "merge command failed, rolling back");
                git_cli::reset_hard(&self.repo_dir, &tag).await.ok();
                op.mark_rolled_back();
                MergeOutcome {
                    operation_id: op.id.clone(),
                    success: false,
                    had_conflicts: false,
                }
            }
        };

        self.record(op).await;
        Ok(Some(outcome))
    }

    /// Called once `ConflictResolver` has staged a resolution for every
    /// conflicted file in `operation_id`: commits the merge and marks the
    /// operation merged. Rolls back to the operation's pre-merge tag on
    /// failure (e.g. a file was left unresolved).
    ///
    /// # Errors
    /// Returns an error if `operation_id` has no recorded pre-merge tag
    /// (it was never conflicted, or was already finalized/aborted).
    pub async fn finalize_conflicted_merge(&self, operation_id: &str) -> Result<MergeOutcome, EngineError> {
        let _guard = self.merge_lock.lock().await;

        let tag = self
            .pre_merge_tags
            .read()
            .await
            .get(operation_id)
            .cloned()
            .ok_or_else(|| EngineError::ConflictResolutionFailure {
                operation_id: operation_id.to_string(),
                detail: "no pending conflict recorded for this operation".to_string(),
            })?;

        let mut op = self.operations.read().await.get(operation_id).cloned().ok_or_else(|| {
            EngineError::ConflictResolutionFailure {
                operation_id: operation_id.to_string(),
                detail: "unknown operation".to_string(),
            }
        })?;

        let outcome = match git_cli::commit_merge(&self.repo_dir).await {
            Ok(_) => {
                op.mark_merged();
                self.pre_merge_tags.write().await.remove(operation_id);
                MergeOutcome {
                    operation_id: operation_id.to_string(),
                    success: true,
                    had_conflicts: true,
                }
            }
            Err(err) => {
                warn!(operation_id, %err, "finalizing conflicted merge failed, rolling back");
                git_cli::merge_abort(&self.repo_dir).await;
                git_cli::reset_hard(&self.repo_dir, &tag).await.ok();
                op.mark_failed();
                self.pre_merge_tags.write().await.remove(operation_id);
                MergeOutcome {
                    operation_id: operation_id.to_string(),
                    success: false,
                    had_conflicts: true,
                }
            }
        };

        self.record(op).await;
        Ok(outcome)
    }

    /// Abandon a conflicted merge: abort it at the VCS level and roll back
    /// to its pre-merge tag. The task stays incomplete (§4.6, "Conflict
    /// retry/skip surface", `SkipFailedConflict`).
    pub async fn abort_conflicted_merge(&self, operation_id: &str) {
        let _guard = self.merge_lock.lock().await;

        let tag = self.pre_merge_tags.write().await.remove(operation_id);
        git_cli::merge_abort(&self.repo_dir).await;
        if let Some(tag) = tag {
            git_cli::reset_hard(&self.repo_dir, &tag).await.ok();
        }

        if let Some(mut op) = self.operations.read().await.get(operation_id).cloned() {
            op.mark_rolled_back();
            self.record(op).await;
        }
    }

    /// Remove every tag this engine created and, best-effort, check out the
    /// branch the executor started on (§4.3, §4.6 step 7).
    pub async fn cleanup(&self) {
        let tags: Vec<String> = self.tags_created.write().await.drain(..).collect();
        for tag in tags {
            git_cli::tag_delete(&self.repo_dir, &tag).await;
        }

        if let Some(original) = self.original_branch.read().await.clone() {
            if git_cli::checkout(&self.repo_dir, &original).await.is_err() {
                warn!(branch = %original, "failed to check out original branch during cleanup");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock_tracker::MockTracker;
    use crate::domain::models::worker::WorkerResult;
    use std::process::Command;

    fn init_repo(dir: &std::path::Path) {
        let run = |args: &[&str]| {
            assert!(Command::new("git").args(args).current_dir(dir).status().unwrap().success());
        };
        run(&["init", "-q"]);
        run(&["config", "user.email", "test@example.com"]);
        run(&["config", "user.name", "test"]);
        std::fs::write(dir.join("README.md"), "hello\n").unwrap();
        run(&["add", "."]);
        run(&["commit", "-q", "-m", "initial"]);
    }

    fn config() -> EngineConfig {
        EngineConfig::new(0, 100.0)
    }

    #[tokio::test]
    async fn zero_commit_result_is_a_no_op_success() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let tracker = Arc::new(MockTracker::new([]));
        let engine = MergeEngine::new(&config(), dir.path().to_str().unwrap(), tracker, "abcd1234");
        engine.start().await.unwrap();

        let result = WorkerResult::new("w1", "t1", true, true, 1, 10, "worktree/t1", 0, "/tmp/irrelevant");
        engine.enqueue(result).await;

        let outcome = engine.process_next().await.unwrap().unwrap();
        assert!(outcome.success);
        assert!(!outcome.had_conflicts);
    }

    #[tokio::test]
    async fn session_branch_is_created_from_original() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let tracker = Arc::new(MockTracker::new([]));
        let engine = MergeEngine::new(&config(), dir.path().to_str().unwrap(), tracker, "deadbeef");
        let original = git_cli::current_branch(dir.path().to_str().unwrap()).await.unwrap();
        engine.start().await.unwrap();

        assert_eq!(engine.original_branch().await, Some(original));
        assert_eq!(engine.target_branch().await, "ralph-session/deadbeef");
    }

    #[tokio::test]
    async fn direct_merge_skips_session_branch() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let mut cfg = config();
        cfg.direct_merge = true;
        let tracker = Arc::new(MockTracker::new([]));
        let engine = MergeEngine::new(&cfg, dir.path().to_str().unwrap(), tracker, "deadbeef");
        engine.start().await.unwrap();

        let original = engine.original_branch().await.unwrap();
        assert_eq!(engine.target_branch().await, original);
    }

    #[tokio::test]
    async fn clean_branch_merges_without_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().to_str().unwrap();
        init_repo(dir.path());
        let tracker = Arc::new(MockTracker::new([]));
        let engine = MergeEngine::new(&config(), repo, tracker, "cafef00d");
        engine.start().await.unwrap();

        git_cli::create_and_checkout_branch(repo, "worktree/t1", "ralph-session/cafef00d")
            .await
            .unwrap();
        std::fs::write(dir.path().join("new_file.txt"), "content\n").unwrap();
        Command::new("git").args(["add", "."]).current_dir(dir.path()).status().unwrap();
        Command::new("git")
            .args(["commit", "-q", "-m", "worker commit"])
            .current_dir(dir.path())
            .status()
            .unwrap();
        git_cli::checkout(repo, "ralph-session/cafef00d").await.unwrap();

        let result = WorkerResult::new("w1", "t1", true, true, 1, 10, "worktree/t1", 1, "/tmp/irrelevant");
        engine.enqueue(result).await;

        let outcome = engine.process_next().await.unwrap().unwrap();
        assert!(outcome.success);
        assert!(!outcome.had_conflicts);
        assert!(dir.path().join("new_file.txt").exists());
    }

    #[tokio::test]
    async fn conflicting_branch_is_left_for_the_resolver() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().to_str().unwrap();
        init_repo(dir.path());
        let tracker = Arc::new(MockTracker::new([]));
        let engine = MergeEngine::new(&config(), repo, tracker, "f00dcafe");
        engine.start().await.unwrap();

        git_cli::create_and_checkout_branch(repo, "worktree/t1", "ralph-session/f00dcafe")
            .await
            .unwrap();
        std::fs::write(dir.path().join("README.md"), "from worker\n").unwrap();
        Command::new("git").args(["add", "."]).current_dir(dir.path()).status().unwrap();
        Command::new("git")
            .args(["commit", "-q", "-m", "worker edit"])
            .current_dir(dir.path())
            .status()
            .unwrap();
        git_cli::checkout(repo, "ralph-session/f00dcafe").await.unwrap();
        std::fs::write(dir.path().join("README.md"), "from session\n").unwrap();
        Command::new("git").args(["add", "."]).current_dir(dir.path()).status().unwrap();
        Command::new("git")
            .args(["commit", "-q", "-m", "session edit"])
            .current_dir(dir.path())
            .status()
            .unwrap();

        let result = WorkerResult::new("w1", "t1", true, true, 1, 10, "worktree/t1", 1, "/tmp/irrelevant");
        let op_id = engine.enqueue(result).await;

        let outcome = engine.process_next().await.unwrap().unwrap();
        assert!(!outcome.success);
        assert!(outcome.had_conflicts);
        assert_eq!(outcome.operation_id, op_id);

        let conflicted = git_cli::conflicted_files(repo).await.unwrap();
        assert_eq!(conflicted, vec!["README.md".to_string()]);

        git_cli::merge_abort(repo).await;
    }

    #[tokio::test]
    async fn process_next_on_empty_queue_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let tracker = Arc::new(MockTracker::new([]));
        let engine = MergeEngine::new(&config(), dir.path().to_str().unwrap(), tracker, "00000000");
        engine.start().await.unwrap();
        assert!(engine.process_next().await.unwrap().is_none());
    }
}
