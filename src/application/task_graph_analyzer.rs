//! Pure task-graph analysis: layer a task list into topologically ordered,
//! internally-parallel groups (§4.1). No I/O; safe to call repeatedly with
//! the same input.

use std::collections::{HashMap, HashSet};

use crate::domain::error::GraphError;
use crate::domain::models::{
    AnalysisResult, Confidence, ParallelGroup, ParallelismAdvice, Task, TaskNode,
};

/// Build the node table and edge sets, then peel zero-in-degree nodes layer
/// by layer (Kahn's algorithm) to assign depths and detect cycles.
#[must_use]
pub fn analyze(tasks: &[Task]) -> AnalysisResult {
    let ids: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();

    // dependencies[id] = set of ids this task depends on (must finish first)
    // dependents[id]   = set of ids that depend on this task
    let mut dependencies: HashMap<&str, HashSet<&str>> = HashMap::new();
    let mut dependents: HashMap<&str, HashSet<&str>> = HashMap::new();

    for task in tasks {
        dependencies.entry(task.id.as_str()).or_default();
        dependents.entry(task.id.as_str()).or_default();
    }

    for task in tasks {
        for dep in &task.depends_on {
            if ids.contains(dep.as_str()) {
                dependencies
                    .entry(task.id.as_str())
                    .or_default()
                    .insert(dep.as_str());
                dependents
                    .entry(dep.as_str())
                    .or_default()
                    .insert(task.id.as_str());
            }
        }
        for blocked in &task.blocks {
            if ids.contains(blocked.as_str()) {
                dependencies
                    .entry(blocked.as_str())
                    .or_default()
                    .insert(task.id.as_str());
                dependents
                    .entry(task.id.as_str())
                    .or_default()
                    .insert(blocked.as_str());
            }
        }
    }

    let mut remaining: HashMap<&str, usize> = dependencies
        .iter()
        .map(|(id, deps)| (*id, deps.len()))
        .collect();

    let mut depth_of: HashMap<&str, usize> = HashMap::new();
    let mut frontier: Vec<&str> = remaining
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(id, _)| *id)
        .collect();
    frontier.sort_unstable();

    let mut depth = 0;
    let mut peeled: HashSet<&str> = HashSet::new();
    while !frontier.is_empty() {
        for &id in &frontier {
            depth_of.insert(id, depth);
            peeled.insert(id);
        }
        let mut next: HashSet<&str> = HashSet::new();
        for &id in &frontier {
            for &dependent in dependents.get(id).into_iter().flatten() {
                if peeled.contains(dependent) {
                    continue;
                }
                if let Some(deg) = remaining.get_mut(dependent) {
                    *deg -= 1;
                    if *deg == 0 {
                        next.insert(dependent);
                    }
                }
            }
        }
        let mut next: Vec<&str> = next.into_iter().collect();
        next.sort_unstable();
        frontier = next;
        depth += 1;
    }

    let cyclic_task_ids: HashSet<String> = tasks
        .iter()
        .filter(|t| !peeled.contains(t.id.as_str()))
        .map(|t| t.id.clone())
        .collect();

    let priority_of: HashMap<&str, u8> = tasks.iter().map(|t| (t.id.as_str(), t.priority)).collect();

    let nodes: Vec<TaskNode> = tasks
        .iter()
        .map(|t| TaskNode {
            id: t.id.clone(),
            dependencies: dependencies
                .get(t.id.as_str())
                .into_iter()
                .flatten()
                .map(|s| (*s).to_string())
                .collect(),
            dependents: dependents
                .get(t.id.as_str())
                .into_iter()
                .flatten()
                .map(|s| (*s).to_string())
                .collect(),
            depth: depth_of.get(t.id.as_str()).copied(),
            in_cycle: cyclic_task_ids.contains(&t.id),
        })
        .collect();

    let mut by_depth: HashMap<usize, Vec<&str>> = HashMap::new();
    for (&id, &d) in &depth_of {
        by_depth.entry(d).or_default().push(id);
    }

    let mut depths: Vec<usize> = by_depth.keys().copied().collect();
    depths.sort_unstable();

    let groups: Vec<ParallelGroup> = depths
        .into_iter()
        .map(|d| {
            let mut members = by_depth.remove(&d).unwrap_or_default();
            members.sort_by_key(|id| (priority_of.get(id).copied().unwrap_or(2), *id));
            let max_priority = members
                .iter()
                .map(|id| priority_of.get(id).copied().unwrap_or(2))
                .min()
                .unwrap_or(2);
            ParallelGroup {
                depth: d,
                task_ids: members.into_iter().map(ToString::to_string).collect(),
                max_priority,
            }
        })
        .collect();

    let actionable_task_count = tasks.len() - cyclic_task_ids.len();
    let max_parallelism = groups.iter().map(|g| g.task_ids.len()).max().unwrap_or(0);

    let cyclic_fraction = if tasks.is_empty() {
        0.0
    } else {
        cyclic_task_ids.len() as f64 / tasks.len() as f64
    };
    let has_parallel_group = groups.iter().any(|g| g.task_ids.len() >= 2);
    let should_run_parallel =
        actionable_task_count >= 3 && has_parallel_group && cyclic_fraction < 0.5;

    AnalysisResult {
        nodes,
        groups,
        cyclic_task_ids,
        actionable_task_count,
        max_parallelism,
        should_run_parallel,
    }
}

const TEST_KEYWORDS: &[&str] = &["test", "tests", "testing"];
const REFACTOR_KEYWORDS: &[&str] = &["refactor", "refactoring"];

fn matches_keyword(task: &Task, keywords: &[&str]) -> bool {
    let title = task.title.to_lowercase();
    keywords.iter().any(|kw| title.contains(kw))
        || task
            .labels
            .iter()
            .any(|l| keywords.iter().any(|kw| l.to_lowercase().contains(kw)))
}

/// Strict pre-check for callers that want malformed input treated as a hard
/// failure rather than the leniency `analyze` itself applies: `analyze`
/// never fails, silently dropping edges to unknown task ids and reporting
/// cycles through `cyclic_task_ids` instead of an `Err` (§4.1, §8). This is
/// for a lint/validate entry point sitting in front of it, not for
/// `ParallelExecutor`'s own run loop, which relies on that leniency.
pub fn validate(tasks: &[Task]) -> Result<(), GraphError> {
    let ids: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    for task in tasks {
        for dep in task.depends_on.iter().chain(task.blocks.iter()) {
            if !ids.contains(dep.as_str()) {
                return Err(GraphError::MissingDependency(dep.clone()));
            }
        }
    }

    let analysis = analyze(tasks);
    if !analysis.cyclic_task_ids.is_empty() {
        let mut cyclic: Vec<String> = analysis.cyclic_task_ids.into_iter().collect();
        cyclic.sort_unstable();
        return Err(GraphError::CycleDetected(cyclic));
    }

    Ok(())
}

/// Recommend a worker ceiling for one batch of tasks, separate from whether
/// to run in parallel at all (§4.1, "Parallelism advisor").
#[must_use]
pub fn advise_parallelism(tasks: &[Task], max_workers: usize) -> ParallelismAdvice {
    if tasks.is_empty() || max_workers == 0 {
        return ParallelismAdvice {
            recommended_max_workers: max_workers,
            confidence: Confidence::Low,
            reasoning: "no tasks to classify".to_string(),
        };
    }

    let total = tasks.len();
    let refactor_count = tasks.iter().filter(|t| matches_keyword(t, REFACTOR_KEYWORDS)).count();
    let test_count = tasks.iter().filter(|t| matches_keyword(t, TEST_KEYWORDS)).count();

    let refactor_fraction = refactor_count as f64 / total as f64;
    let test_fraction = test_count as f64 / total as f64;

    // Refactor detection dominates test detection when both apply.
    if refactor_fraction > 0.25 {
        let recommended = (max_workers / 2).max(1);
        let confidence = if refactor_fraction > 0.5 {
            Confidence::High
        } else {
            Confidence::Medium
        };
        return ParallelismAdvice {
            recommended_max_workers: recommended,
            confidence,
            reasoning: format!(
                "{refactor_count}/{total} tasks look like refactors; reducing worker ceiling to limit contention"
            ),
        };
    }

    let overlapping_affects = affects_overlap_fraction(tasks);
    if overlapping_affects >= 2.0 / 3.0 {
        let recommended = (max_workers / 2).max(1);
        return ParallelismAdvice {
            recommended_max_workers: recommended,
            confidence: Confidence::Medium,
            reasoning: format!(
                "affected file sets overlap across {:.0}% of tasks; reducing worker ceiling to limit merge contention",
                overlapping_affects * 100.0
            ),
        };
    }

    if test_fraction > 0.5 {
        return ParallelismAdvice {
            recommended_max_workers: max_workers,
            confidence: Confidence::High,
            reasoning: format!("{test_count}/{total} tasks look like tests; parallel-friendly"),
        };
    }

    ParallelismAdvice {
        recommended_max_workers: max_workers,
        confidence: Confidence::Medium,
        reasoning: "no dominant task pattern detected; keeping configured worker ceiling".to_string(),
    }
}

/// Fraction of tasks whose `affects` file set shares at least one file with
/// another task's `affects` set.
fn affects_overlap_fraction(tasks: &[Task]) -> f64 {
    let with_affects: Vec<&Task> = tasks.iter().filter(|t| !t.affects.is_empty()).collect();
    if with_affects.len() < 2 {
        return 0.0;
    }

    let mut overlapping = 0usize;
    for (i, a) in with_affects.iter().enumerate() {
        let a_files: HashSet<&str> = a.affects.iter().map(String::as_str).collect();
        let overlaps = with_affects.iter().enumerate().any(|(j, b)| {
            i != j && b.affects.iter().any(|f| a_files.contains(f.as_str()))
        });
        if overlaps {
            overlapping += 1;
        }
    }
    overlapping as f64 / tasks.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::TaskStatus;

    fn task(id: &str, depends_on: &[&str]) -> Task {
        Task::new(id, id).with_depends_on(depends_on.iter().copied())
    }

    #[test]
    fn diamond_graph_layers_by_depth() {
        // a -> b,c -> d
        let tasks = vec![
            task("a", &[]),
            task("b", &["a"]),
            task("c", &["a"]),
            task("d", &["b", "c"]),
        ];
        let result = analyze(&tasks);
        assert_eq!(result.node("a").unwrap().depth, Some(0));
        assert_eq!(result.node("b").unwrap().depth, Some(1));
        assert_eq!(result.node("c").unwrap().depth, Some(1));
        assert_eq!(result.node("d").unwrap().depth, Some(2));
        assert_eq!(result.groups.len(), 3);
        assert_eq!(result.groups[1].task_ids, vec!["b".to_string(), "c".to_string()]);
        assert!(result.cyclic_task_ids.is_empty());
    }

    #[test]
    fn cycle_is_isolated_not_scheduled() {
        let mut a = task("a", &["b"]);
        a.status = TaskStatus::Open;
        let mut b = task("b", &["a"]);
        b.status = TaskStatus::Open;
        let c = task("c", &[]);

        let result = analyze(&[a, b, c]);
        assert!(result.cyclic_task_ids.contains("a"));
        assert!(result.cyclic_task_ids.contains("b"));
        assert!(result.node("c").unwrap().depth.is_some());
        assert!(result.groups.iter().all(|g| !g.task_ids.contains(&"a".to_string())));
    }

    #[test]
    fn blocks_edges_mirror_depends_on() {
        // a blocks b <=> b depends on a
        let mut a = task("a", &[]);
        a.blocks = vec!["b".to_string()];
        let b = task("b", &[]);

        let result = analyze(&[a, b]);
        assert_eq!(result.node("b").unwrap().depth, Some(1));
    }

    #[test]
    fn duplicate_edges_across_fields_do_not_double_count() {
        let mut a = task("a", &[]);
        a.blocks = vec!["b".to_string()];
        let b = task("b", &["a"]);

        let result = analyze(&[a, b]);
        assert_eq!(result.node("b").unwrap().dependencies, vec!["a".to_string()]);
    }

    #[test]
    fn should_run_parallel_requires_three_actionable_and_a_wide_group() {
        let tasks = vec![task("a", &[]), task("b", &[]), task("c", &[])];
        let result = analyze(&tasks);
        assert!(result.should_run_parallel);

        let tasks = vec![task("a", &[]), task("b", &["a"])];
        let result = analyze(&tasks);
        assert!(!result.should_run_parallel);
    }

    #[test]
    fn advisor_reduces_workers_for_refactor_heavy_batch() {
        let tasks = vec![
            Task::new("a", "Refactor auth module"),
            Task::new("b", "Refactor db layer"),
            Task::new("c", "Add button"),
        ];
        let advice = advise_parallelism(&tasks, 4);
        assert_eq!(advice.recommended_max_workers, 2);
    }

    #[test]
    fn advisor_keeps_ceiling_for_test_heavy_batch() {
        let tasks = vec![
            Task::new("a", "Add tests for auth"),
            Task::new("b", "Add tests for db"),
            Task::new("c", "Testing edge cases"),
        ];
        let advice = advise_parallelism(&tasks, 4);
        assert_eq!(advice.recommended_max_workers, 4);
        assert_eq!(advice.confidence, Confidence::High);
    }

    #[test]
    fn validate_rejects_edge_to_unknown_task() {
        let a = task("a", &["missing"]);
        let err = validate(&[a]).unwrap_err();
        assert_eq!(err, GraphError::MissingDependency("missing".to_string()));
    }

    #[test]
    fn validate_rejects_cycle() {
        let a = task("a", &["b"]);
        let b = task("b", &["a"]);
        let err = validate(&[a, b]).unwrap_err();
        assert_eq!(err, GraphError::CycleDetected(vec!["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn validate_accepts_clean_graph() {
        let tasks = vec![task("a", &[]), task("b", &["a"])];
        assert!(validate(&tasks).is_ok());
    }

    #[test]
    fn advisor_reduces_workers_on_file_overlap() {
        let mut a = Task::new("a", "Add feature");
        a.affects = vec!["src/lib.rs".to_string()];
        let mut b = Task::new("b", "Add other feature");
        b.affects = vec!["src/lib.rs".to_string()];
        let mut c = Task::new("c", "Add third feature");
        c.affects = vec!["src/lib.rs".to_string()];

        let advice = advise_parallelism(&[a, b, c], 4);
        assert_eq!(advice.recommended_max_workers, 2);
    }
}
