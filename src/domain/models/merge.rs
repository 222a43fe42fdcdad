//! Merge operation domain model.
//!
//! A `MergeOperation` wraps one `WorkerResult` as it moves through
//! `application::merge_engine`'s serialized queue (§3, §4.3).

use serde::{Deserialize, Serialize};

use super::worker::WorkerResult;

/// Lifecycle state of a queued merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeState {
    Queued,
    Merging,
    Merged,
    Conflicted,
    Failed,
    RolledBack,
}

impl MergeState {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Merged | Self::Conflicted | Self::Failed | Self::RolledBack
        )
    }
}

/// One worker branch's journey through the merge queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeOperation {
    pub id: String,
    pub worker_result: WorkerResult,
    pub state: MergeState,
}

impl MergeOperation {
    #[must_use]
    pub fn new(id: impl Into<String>, worker_result: WorkerResult) -> Self {
        Self {
            id: id.into(),
            worker_result,
            state: MergeState::Queued,
        }
    }

    pub fn mark_merging(&mut self) {
        self.state = MergeState::Merging;
    }

    pub fn mark_merged(&mut self) {
        self.state = MergeState::Merged;
    }

    pub fn mark_conflicted(&mut self) {
        self.state = MergeState::Conflicted;
    }

    pub fn mark_failed(&mut self) {
        self.state = MergeState::Failed;
    }

    pub fn mark_rolled_back(&mut self) {
        self.state = MergeState::RolledBack;
    }
}
