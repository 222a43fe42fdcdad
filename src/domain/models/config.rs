//! Engine configuration.
//!
//! Loaded hierarchically by [`crate::config_loader::ConfigLoader`]: programmatic
//! defaults, then `.ralph/config.yaml`, then `.ralph/local.yaml`, then
//! `RALPH_`-prefixed environment variables, highest priority last.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Top-level configuration for the parallel execution engine.
///
/// `min_free_memory_mb` and `max_cpu_utilization` have no defaults on
/// purpose: the spec leaves resource-check thresholds undocumented, so this
/// type requires the operator to state them explicitly rather than silently
/// picking a number that happens to work on one machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EngineConfig {
    /// Ceiling on concurrently running workers within one batch.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Directory (relative to cwd) under which worker worktrees are checked out.
    #[serde(default = "default_worktree_dir")]
    pub worktree_dir: String,

    /// Iteration cap per worker before it is considered stalled.
    #[serde(default = "default_max_iterations_per_worker")]
    pub max_iterations_per_worker: usize,

    /// Delay between iterations, in milliseconds.
    #[serde(default = "default_iteration_delay_ms")]
    pub iteration_delay_ms: u64,

    /// Whether `ConflictResolver` may auto-apply a resolution above threshold.
    #[serde(default = "default_ai_conflict_resolution")]
    pub ai_conflict_resolution: bool,

    /// Per-task cap on requeue attempts after a failed merge, per run.
    #[serde(default = "default_max_requeue_count")]
    pub max_requeue_count: u32,

    /// Merge directly into the branch the executor started on, skipping the
    /// throwaway session branch.
    #[serde(default)]
    pub direct_merge: bool,

    /// Minimum resolver confidence required to auto-apply a resolution.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    /// Required free host memory, in MB, to acquire a new worktree.
    pub min_free_memory_mb: u64,

    /// Ceiling on host CPU utilization (0-100) to acquire a new worktree.
    pub max_cpu_utilization: f32,

    /// Restrict a run to this id set, if present.
    #[serde(default)]
    pub filtered_task_ids: Option<HashSet<String>>,

    /// Namespace used for the progress file and worktree directory naming
    /// (e.g. `.ralph/progress.md`).
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

const fn default_max_workers() -> usize {
    3
}

fn default_worktree_dir() -> String {
    ".ralph/worktrees".to_string()
}

const fn default_max_iterations_per_worker() -> usize {
    25
}

const fn default_iteration_delay_ms() -> u64 {
    0
}

const fn default_ai_conflict_resolution() -> bool {
    true
}

const fn default_max_requeue_count() -> u32 {
    1
}

const fn default_confidence_threshold() -> f64 {
    0.8
}

/// Sanity ceiling on `max_requeue_count` — §9 scopes requeue counters to a
/// single in-memory run, but nothing stops a misconfigured value from
/// turning a stuck task into an effectively unbounded retry loop for that
/// run's duration.
const MAX_REQUEUE_COUNT_CEILING: u32 = 100;

fn default_namespace() -> String {
    "ralph".to_string()
}

impl EngineConfig {
    /// Construct a config with the two required resource thresholds and
    /// every other field at its documented default.
    #[must_use]
    pub fn new(min_free_memory_mb: u64, max_cpu_utilization: f32) -> Self {
        Self {
            max_workers: default_max_workers(),
            worktree_dir: default_worktree_dir(),
            max_iterations_per_worker: default_max_iterations_per_worker(),
            iteration_delay_ms: default_iteration_delay_ms(),
            ai_conflict_resolution: default_ai_conflict_resolution(),
            max_requeue_count: default_max_requeue_count(),
            direct_merge: false,
            confidence_threshold: default_confidence_threshold(),
            min_free_memory_mb,
            max_cpu_utilization,
            filtered_task_ids: None,
            namespace: default_namespace(),
        }
    }

    /// Bounded pool size: `max_workers * 2`, a buffer for re-queues (§4.2).
    #[must_use]
    pub const fn max_worktrees(&self) -> usize {
        self.max_workers * 2
    }

    /// Validate field-level invariants the loader does not enforce via serde.
    ///
    /// # Errors
    /// Returns [`crate::domain::error::ConfigError`] on the first invalid field found.
    pub fn validate(&self) -> Result<(), crate::domain::error::ConfigError> {
        use crate::domain::error::ConfigError;

        if self.max_workers == 0 {
            return Err(ConfigError::InvalidMaxWorkers(self.max_workers));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::InvalidConfidenceThreshold(
                self.confidence_threshold,
            ));
        }
        if self.max_cpu_utilization <= 0.0 || self.max_cpu_utilization > 100.0 {
            return Err(ConfigError::InvalidCpuCeiling(self.max_cpu_utilization));
        }
        if self.max_requeue_count > MAX_REQUEUE_COUNT_CEILING {
            return Err(ConfigError::InvalidRequeueCount {
                got: self.max_requeue_count,
                max: MAX_REQUEUE_COUNT_CEILING,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_worktrees_doubles_max_workers() {
        let cfg = EngineConfig::new(512, 80.0);
        assert_eq!(cfg.max_worktrees(), cfg.max_workers * 2);
    }

    #[test]
    fn validate_rejects_zero_workers() {
        let mut cfg = EngineConfig::new(512, 80.0);
        cfg.max_workers = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_confidence() {
        let mut cfg = EngineConfig::new(512, 80.0);
        cfg.confidence_threshold = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_requeue_count_above_ceiling() {
        let mut cfg = EngineConfig::new(512, 80.0);
        cfg.max_requeue_count = MAX_REQUEUE_COUNT_CEILING + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_accepts_defaults() {
        let cfg = EngineConfig::new(512, 80.0);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn yaml_round_trip_applies_defaults() {
        use figment::Figment;
        use figment::providers::{Format, Yaml};

        let yaml = "min_free_memory_mb: 256\nmax_cpu_utilization: 90.0\n";
        let cfg: EngineConfig = Figment::new()
            .merge(Yaml::string(yaml))
            .extract()
            .unwrap();
        assert_eq!(cfg.max_workers, 3);
        assert!(cfg.ai_conflict_resolution);
        assert_eq!(cfg.min_free_memory_mb, 256);
    }
}
