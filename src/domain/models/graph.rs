//! Derived graph types produced by `application::task_graph_analyzer`.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// One task's position in the dependency graph, derived by the analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNode {
    pub id: String,
    pub dependencies: Vec<String>,
    pub dependents: Vec<String>,
    /// 0 = no unresolved dependencies. `None` if the node is cyclic.
    pub depth: Option<usize>,
    pub in_cycle: bool,
}

/// A set of tasks at the same topological depth, safe to run concurrently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelGroup {
    pub depth: usize,
    /// Task ids, sorted by ascending priority number (0 first).
    pub task_ids: Vec<String>,
    /// Minimum (highest-urgency) priority number among members.
    pub max_priority: u8,
}

/// Confidence attached to a parallelism recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// Output of `ParallelismAdvisor`: a suggested worker ceiling for this batch
/// of tasks, distinct from whether to run in parallel at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelismAdvice {
    pub recommended_max_workers: usize,
    pub confidence: Confidence,
    pub reasoning: String,
}

/// Full result of `TaskGraphAnalyzer::analyze`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub nodes: Vec<TaskNode>,
    /// Ordered ascending by depth; within a group, ascending by priority.
    pub groups: Vec<ParallelGroup>,
    pub cyclic_task_ids: HashSet<String>,
    pub actionable_task_count: usize,
    pub max_parallelism: usize,
    pub should_run_parallel: bool,
}

impl AnalysisResult {
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&TaskNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}
