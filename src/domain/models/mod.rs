//! Domain models
//!
//! Pure domain entities with no infrastructure concerns: tasks, the derived
//! task graph, worktrees, worker results, merge operations, conflict data,
//! and configuration.

pub mod conflict;
pub mod config;
pub mod graph;
pub mod merge;
pub mod task;
pub mod worker;
pub mod worktree;

pub use conflict::{
    ConflictHunk, FileResolutionResult, HunkClassification, ResolutionCandidate, Strategy,
    UserResolutionDecision,
};
pub use config::EngineConfig;
pub use graph::{AnalysisResult, Confidence, ParallelGroup, ParallelismAdvice, TaskNode};
pub use merge::{MergeOperation, MergeState};
pub use task::{Task, TaskStatus};
pub use worker::{WorkerEvent, WorkerResult};
pub use worktree::{branch_name_for_task, sanitize_branch_component, worktree_dir_name, Worktree, WorktreeStatus};
