//! ralph-engine: a parallel execution engine for task-graph-driven coding
//! agents.
//!
//! Given a flat task list from an issue tracker, the engine derives a
//! dependency graph, fans actionable tasks out to agents running in their
//! own git worktrees, and serializes their results back onto one session
//! branch - resolving merge conflicts automatically where confidence allows
//! and surfacing the rest for a human decision.

pub mod adapters;
pub mod application;
pub mod config_loader;
pub mod domain;

pub use adapters::{MockAgentPlugin, MockTracker};
pub use application::{
    ConflictResolver, EngineEvent, ExecuteOutcome, ExecutionSummary, ExecutorState, MergeEngine,
    MergeOutcome, ParallelExecutor, ResourceGate, Worker, WorkerHandle, WorktreeManager,
};
pub use config_loader::ConfigLoader;
pub use domain::error::{ConfigError, EngineError, GraphError};
pub use domain::models::{
    AnalysisResult, ConflictHunk, Confidence, EngineConfig, FileResolutionResult,
    HunkClassification, MergeOperation, MergeState, ParallelGroup, ParallelismAdvice,
    ResolutionCandidate, Strategy, Task, TaskNode, TaskStatus, UserResolutionDecision,
    WorkerEvent, WorkerResult, Worktree, WorktreeStatus,
};
pub use domain::ports::{
    AgentDetection, AgentEvent, AgentExecution, AgentPlugin, CompletionResult, ExecuteOptions,
    TaskFilter, Tracker,
};
