//! Conflict hunk and resolution domain model, produced and consumed by
//! `application::conflict_resolver` (§3, §4.4).

use serde::{Deserialize, Serialize};

/// One `<<<<<<<` ... `=======` ... `>>>>>>>` block parsed from a conflicted
/// working-tree file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictHunk {
    pub start_line: usize,
    pub end_line: usize,
    pub ours_content: String,
    pub theirs_content: String,
    pub ancestor_content: Option<String>,
}

/// Strategy used to produce a `ResolutionCandidate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Ours,
    Theirs,
    Merged,
    Semantic,
}

/// A proposed resolution for one conflicted file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionCandidate {
    pub resolved_content: String,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub strategy: Strategy,
    pub reasoning: String,
}

impl ResolutionCandidate {
    #[must_use]
    pub fn meets_threshold(&self, threshold: f64) -> bool {
        self.confidence >= threshold
    }
}

/// Per-hunk classification, an intermediate result on the way to a
/// file-level `ResolutionCandidate`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HunkClassification {
    pub prefer_ours: bool,
    pub prefer_theirs: bool,
    pub confidence: f64,
}

impl HunkClassification {
    #[must_use]
    pub const fn no_preference(confidence: f64) -> Self {
        Self {
            prefer_ours: false,
            prefer_theirs: false,
            confidence,
        }
    }

    #[must_use]
    pub const fn prefer_ours(confidence: f64) -> Self {
        Self {
            prefer_ours: true,
            prefer_theirs: false,
            confidence,
        }
    }

    #[must_use]
    pub const fn prefer_theirs(confidence: f64) -> Self {
        Self {
            prefer_ours: false,
            prefer_theirs: true,
            confidence,
        }
    }
}

/// Outcome of resolving one conflicted file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileResolutionResult {
    pub path: String,
    pub candidate: ResolutionCandidate,
    /// `true` once the candidate has been written to disk and staged.
    pub applied: bool,
    /// Set when confidence was below threshold or auto-resolve was off.
    pub requires_user_input: bool,
}

/// Disposition chosen by a user-prompt callback for a file that did not
/// clear the auto-resolve threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum UserResolutionDecision {
    AcceptCandidate,
    UseOurs,
    UseTheirs,
    Manual { content: String },
    Reject,
    AbortAll,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meets_threshold_is_inclusive() {
        let candidate = ResolutionCandidate {
            resolved_content: String::new(),
            confidence: 0.8,
            strategy: Strategy::Merged,
            reasoning: "disjoint hunks".to_string(),
        };
        assert!(candidate.meets_threshold(0.8));
        assert!(!candidate.meets_threshold(0.81));
    }

    #[test]
    fn classification_constructors_set_preference() {
        let c = HunkClassification::prefer_ours(0.95);
        assert!(c.prefer_ours);
        assert!(!c.prefer_theirs);

        let c = HunkClassification::no_preference(0.5);
        assert!(!c.prefer_ours && !c.prefer_theirs);
    }
}
