//! On-demand host resource gate.
//!
//! Unlike a continuously polling monitor, `WorktreeManager` only needs a
//! point-in-time answer to "can I afford one more worktree right now" before
//! each acquisition (§4.2, §5 "Back-pressure"). This keeps the teacher's
//! `sysinfo`-backed refresh idiom but drops the background-task/broadcast
//! machinery nothing in this engine's flow subscribes to.

use std::sync::Arc;

use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};
use tokio::sync::RwLock;

use crate::domain::error::EngineError;

/// Point-in-time CPU/memory reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSnapshot {
    pub cpu_percent: f32,
    pub available_memory_mb: u64,
}

/// Gate on host resources, backed by a shared `sysinfo::System`.
pub struct ResourceGate {
    system: Arc<RwLock<System>>,
}

impl Default for ResourceGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceGate {
    #[must_use]
    pub fn new() -> Self {
        let refresh_kind = RefreshKind::new()
            .with_cpu(CpuRefreshKind::everything())
            .with_memory(MemoryRefreshKind::everything());
        Self {
            system: Arc::new(RwLock::new(System::new_with_specifics(refresh_kind))),
        }
    }

    /// Refresh and read current CPU/memory usage.
    pub async fn snapshot(&self) -> ResourceSnapshot {
        let mut sys = self.system.write().await;
        sys.refresh_cpu_all();
        sys.refresh_memory();
        ResourceSnapshot {
            cpu_percent: sys.global_cpu_usage(),
            available_memory_mb: sys.available_memory() / 1024 / 1024,
        }
    }

    /// Check a snapshot against configured thresholds, returning the
    /// structured failure reason the spec requires (§4.2): insufficient
    /// memory is checked before CPU overload when both fail.
    pub async fn check(
        &self,
        min_free_memory_mb: u64,
        max_cpu_utilization: f32,
    ) -> Result<(), EngineError> {
        let snapshot = self.snapshot().await;
        if snapshot.available_memory_mb < min_free_memory_mb {
            return Err(EngineError::InsufficientMemory {
                available_mb: snapshot.available_memory_mb,
                required_mb: min_free_memory_mb,
            });
        }
        if snapshot.cpu_percent > max_cpu_utilization {
            return Err(EngineError::CpuOverloaded {
                current: snapshot.cpu_percent,
                ceiling: max_cpu_utilization,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn check_passes_with_permissive_thresholds() {
        let gate = ResourceGate::new();
        let result = gate.check(0, 100.0).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn check_fails_when_memory_requirement_unreachable() {
        let gate = ResourceGate::new();
        let result = gate.check(u64::MAX, 100.0).await;
        assert!(matches!(
            result,
            Err(EngineError::InsufficientMemory { .. })
        ));
    }

    #[tokio::test]
    async fn check_fails_when_cpu_ceiling_unreachable() {
        let gate = ResourceGate::new();
        let result = gate.check(0, -1.0).await;
        assert!(matches!(result, Err(EngineError::CpuOverloaded { .. })));
    }
}
