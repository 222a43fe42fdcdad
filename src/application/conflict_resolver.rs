//! Parses conflict hunks out of a conflicted working-tree file, classifies
//! each one, and proposes a whole-file resolution with a confidence score
//! (§4.4).
//!
//! Grounded on `services/merge_queue.rs::check_merge_conflicts`'s marker
//! scan, extended with the Jaccard-similarity confidence scoring §4.4
//! specifies — the teacher has no direct analogue for that math, so it is
//! built fresh in the teacher's module idiom (plain functions operating on
//! owned strings, `regex` for marker-line matching).

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::warn;

use crate::adapters::git_cli;
use crate::domain::error::EngineError;
use crate::domain::models::conflict::{
    ConflictHunk, FileResolutionResult, HunkClassification, ResolutionCandidate, Strategy,
    UserResolutionDecision,
};

// Marker lines carry arbitrary trailing text (branch names after `<<<<<<<`
// / `>>>>>>>`); matching tolerates anything up to the newline rather than
// anchoring on an exact literal (§4.4, "Marker regex safety").
static START_MARKER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^<{7}.*$").unwrap());
static ANCESTOR_MARKER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\|{7}.*$").unwrap());
static SEPARATOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^={7}$").unwrap());
static END_MARKER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^>{7}.*$").unwrap());

#[derive(Debug, Clone)]
enum Segment {
    Verbatim(String),
    Hunk(ConflictHunk),
}

/// Parse a whole file's contents into an ordered list of segments (verbatim
/// text interleaved with conflict hunks) plus the flat hunk list, so the
/// caller can both classify each hunk and reconstruct a resolved file.
fn parse_file(content: &str) -> (Vec<Segment>, Vec<ConflictHunk>) {
    let lines: Vec<&str> = content.lines().collect();
    let mut segments = Vec::new();
    let mut hunks = Vec::new();
    let mut verbatim = String::new();
    let mut i = 0;

    while i < lines.len() {
        if !START_MARKER.is_match(lines[i]) {
            verbatim.push_str(lines[i]);
            verbatim.push('\n');
            i += 1;
            continue;
        }

        if !verbatim.is_empty() {
            segments.push(Segment::Verbatim(std::mem::take(&mut verbatim)));
        }
        let start_line = i;
        i += 1;

        let mut ours = Vec::new();
        while i < lines.len() && !ANCESTOR_MARKER.is_match(lines[i]) && !SEPARATOR.is_match(lines[i]) {
            ours.push(lines[i]);
            i += 1;
        }

        let ancestor = if i < lines.len() && ANCESTOR_MARKER.is_match(lines[i]) {
            i += 1;
            let mut ancestor_lines = Vec::new();
            while i < lines.len() && !SEPARATOR.is_match(lines[i]) {
                ancestor_lines.push(lines[i]);
                i += 1;
            }
            Some(ancestor_lines.join("\n"))
        } else {
            None
        };

        if i < lines.len() && SEPARATOR.is_match(lines[i]) {
            i += 1;
        }

        let mut theirs = Vec::new();
        while i < lines.len() && !END_MARKER.is_match(lines[i]) {
            theirs.push(lines[i]);
            i += 1;
        }
        let end_line = i;
        if i < lines.len() {
            i += 1;
        }

        let hunk = ConflictHunk {
            start_line,
            end_line,
            ours_content: ours.join("\n"),
            theirs_content: theirs.join("\n"),
            ancestor_content: ancestor,
        };
        hunks.push(hunk.clone());
        segments.push(Segment::Hunk(hunk));
    }

    if !verbatim.is_empty() {
        segments.push(Segment::Verbatim(verbatim));
    }

    (segments, hunks)
}

fn trimmed_line_set(content: &str) -> HashSet<&str> {
    content.lines().map(str::trim).collect()
}

/// Jaccard similarity over trimmed lines. Two empty sides are defined as
/// fully similar (no divergence to measure).
fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let set_a = trimmed_line_set(a);
    let set_b = trimmed_line_set(b);
    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        1.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Classify one hunk per the rule ladder in §4.4.
fn classify_hunk(hunk: &ConflictHunk) -> HunkClassification {
    let ours_empty = hunk.ours_content.trim().is_empty();
    let theirs_empty = hunk.theirs_content.trim().is_empty();

    if ours_empty != theirs_empty {
        return if theirs_empty {
            HunkClassification::prefer_ours(0.95)
        } else {
            HunkClassification::prefer_theirs(0.95)
        };
    }

    if hunk.ours_content == hunk.theirs_content {
        return HunkClassification::prefer_ours(1.0);
    }

    let ours_lines = hunk.ours_content.lines().count();
    let theirs_lines = hunk.theirs_content.lines().count();
    if ours_lines == theirs_lines {
        let similarity = jaccard_similarity(&hunk.ours_content, &hunk.theirs_content);
        if similarity > 0.8 {
            let confidence = (0.7 + similarity * 0.2).min(1.0);
            return if hunk.ours_content.len() >= hunk.theirs_content.len() {
                HunkClassification::prefer_ours(confidence)
            } else {
                HunkClassification::prefer_theirs(confidence)
            };
        }
    }

    if let Some(ancestor) = &hunk.ancestor_content {
        let sim_ours = jaccard_similarity(&hunk.ours_content, ancestor);
        let sim_theirs = jaccard_similarity(&hunk.theirs_content, ancestor);
        if sim_ours - sim_theirs > 0.2 {
            return HunkClassification::prefer_theirs(0.75);
        }
        if sim_theirs - sim_ours > 0.2 {
            return HunkClassification::prefer_ours(0.75);
        }
    }

    HunkClassification::no_preference(0.5)
}

fn non_empty_trimmed_lines(content: &str) -> HashSet<&str> {
    content.lines().map(str::trim).filter(|l| !l.is_empty()).collect()
}

/// Union of ours verbatim followed by theirs lines not already present,
/// preserving insertion order (§4.4, "semantic" strategy).
fn semantic_union(ours: &str, theirs: &str) -> String {
    let mut seen: HashSet<String> = ours.lines().map(|l| l.trim().to_string()).collect();
    let mut out = ours.to_string();
    for line in theirs.lines() {
        let key = line.trim().to_string();
        if seen.insert(key) {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(line);
        }
    }
    out
}

fn render_hunk(hunk: &ConflictHunk, strategy: Strategy) -> String {
    match strategy {
        Strategy::Ours => hunk.ours_content.clone(),
        Strategy::Theirs => hunk.theirs_content.clone(),
        Strategy::Merged => {
            let mut out = hunk.ours_content.clone();
            if !hunk.theirs_content.is_empty() {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(&hunk.theirs_content);
            }
            out
        }
        Strategy::Semantic => semantic_union(&hunk.ours_content, &hunk.theirs_content),
    }
}

fn render(segments: &[Segment], strategy: Strategy) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Verbatim(text) => out.push_str(text),
            Segment::Hunk(hunk) => {
                let resolved = render_hunk(hunk, strategy);
                if !resolved.is_empty() {
                    out.push_str(&resolved);
                    out.push('\n');
                }
            }
        }
    }
    out
}

/// File-level decision: disjoint-lines check first, then unanimous
/// preference, falling back to `semantic` (§4.4, "File-level decision").
fn decide(hunks: &[ConflictHunk]) -> (Strategy, f64, &'static str) {
    let classifications: Vec<HunkClassification> = hunks.iter().map(classify_hunk).collect();
    #[allow(clippy::cast_precision_loss)]
    let mean_confidence =
        classifications.iter().map(|c| c.confidence).sum::<f64>() / classifications.len().max(1) as f64;

    let ours_lines: HashSet<&str> = hunks.iter().flat_map(|h| non_empty_trimmed_lines(&h.ours_content)).collect();
    let theirs_lines: HashSet<&str> =
        hunks.iter().flat_map(|h| non_empty_trimmed_lines(&h.theirs_content)).collect();

    if ours_lines.is_disjoint(&theirs_lines) {
        return (Strategy::Merged, (mean_confidence + 0.1).min(1.0), "disjoint hunks; concatenating both sides");
    }

    if classifications.iter().all(|c| c.prefer_ours) {
        return (Strategy::Ours, mean_confidence, "every hunk prefers ours");
    }
    if classifications.iter().all(|c| c.prefer_theirs) {
        return (Strategy::Theirs, mean_confidence, "every hunk prefers theirs");
    }

    (Strategy::Semantic, mean_confidence * 0.7, "hunks disagree; unioning ours and theirs")
}

async fn read_file(repo_dir: &str, path: &str) -> Result<String, EngineError> {
    let full_path = format!("{repo_dir}/{path}");
    tokio::fs::read_to_string(&full_path)
        .await
        .map_err(|source| EngineError::FilesystemError { path: full_path, source })
}

async fn write_and_stage(repo_dir: &str, path: &str, content: &str) -> Result<(), EngineError> {
    let full_path = format!("{repo_dir}/{path}");
    tokio::fs::write(&full_path, content)
        .await
        .map_err(|source| EngineError::FilesystemError { path: full_path, source })?;
    git_cli::stage(repo_dir, path).await
}

/// Resolve one conflicted file: parse, classify, decide, and — if the
/// candidate clears the threshold and auto-resolve is on — write and stage
/// it.
async fn resolve_file(
    repo_dir: &str,
    path: &str,
    confidence_threshold: f64,
    auto_resolve: bool,
) -> Result<FileResolutionResult, EngineError> {
    let content = read_file(repo_dir, path).await?;
    let (segments, hunks) = parse_file(&content);

    if hunks.is_empty() {
        return Ok(FileResolutionResult {
            path: path.to_string(),
            candidate: ResolutionCandidate {
                resolved_content: content,
                confidence: 1.0,
                strategy: Strategy::Ours,
                reasoning: "no conflict markers found".to_string(),
            },
            applied: false,
            requires_user_input: false,
        });
    }

    let (strategy, confidence, reasoning) = decide(&hunks);
    let candidate = ResolutionCandidate {
        resolved_content: render(&segments, strategy),
        confidence,
        strategy,
        reasoning: reasoning.to_string(),
    };

    let mut result = FileResolutionResult {
        path: path.to_string(),
        candidate: candidate.clone(),
        applied: false,
        requires_user_input: false,
    };

    if auto_resolve && candidate.meets_threshold(confidence_threshold) {
        write_and_stage(repo_dir, path, &candidate.resolved_content).await?;
        result.applied = true;
    } else {
        result.requires_user_input = true;
    }

    Ok(result)
}

/// Resolver configuration plus an optional callback invoked for files that
/// did not clear the auto-resolve threshold (§4.4, "Thresholding").
pub struct ConflictResolver {
    confidence_threshold: f64,
    auto_resolve: bool,
    on_user_input: Option<Arc<dyn Fn(&FileResolutionResult) -> UserResolutionDecision + Send + Sync>>,
}

impl ConflictResolver {
    #[must_use]
    pub fn new(confidence_threshold: f64, auto_resolve: bool) -> Self {
        Self {
            confidence_threshold,
            auto_resolve,
            on_user_input: None,
        }
    }

    #[must_use]
    pub fn with_user_callback(
        mut self,
        callback: impl Fn(&FileResolutionResult) -> UserResolutionDecision + Send + Sync + 'static,
    ) -> Self {
        self.on_user_input = Some(Arc::new(callback));
        self
    }

    /// Resolve every conflicted file reported by the VCS for `repo_dir`
    /// (§4.4, "Result aggregation"). All files must end up resolved for the
    /// caller to consider the merge resolved; a file left
    /// `requires_user_input` with no callback configured keeps the
    /// operation pending.
    ///
    /// # Errors
    /// Returns an error on I/O failure reading/writing a conflicted file, or
    /// if a user callback requests `abort_all`.
    pub async fn resolve_conflicts(&self, repo_dir: &str) -> Result<Vec<FileResolutionResult>, EngineError> {
        let files = git_cli::conflicted_files(repo_dir).await?;
        let mut results = Vec::with_capacity(files.len());

        for path in files {
            let mut result = resolve_file(repo_dir, &path, self.confidence_threshold, self.auto_resolve).await?;

            if result.requires_user_input {
                if let Some(callback) = self.on_user_input.clone() {
                    let decision = callback(&result);
                    self.apply_decision(repo_dir, &mut result, decision).await?;
                }
            }

            results.push(result);
        }

        Ok(results)
    }

    async fn apply_decision(
        &self,
        repo_dir: &str,
        result: &mut FileResolutionResult,
        decision: UserResolutionDecision,
    ) -> Result<(), EngineError> {
        match decision {
            UserResolutionDecision::AcceptCandidate => {
                write_and_stage(repo_dir, &result.path, &result.candidate.resolved_content).await?;
                result.applied = true;
                result.requires_user_input = false;
            }
            UserResolutionDecision::UseOurs | UserResolutionDecision::UseTheirs => {
                let strategy = if matches!(decision, UserResolutionDecision::UseOurs) {
                    Strategy::Ours
                } else {
                    Strategy::Theirs
                };
                let content = read_file(repo_dir, &result.path).await?;
                let (segments, _) = parse_file(&content);
                let resolved = render(&segments, strategy);
                write_and_stage(repo_dir, &result.path, &resolved).await?;
                result.candidate.resolved_content = resolved;
                result.candidate.strategy = strategy;
                result.applied = true;
                result.requires_user_input = false;
            }
            UserResolutionDecision::Manual { content } => {
                write_and_stage(repo_dir, &result.path, &content).await?;
                result.candidate.resolved_content = content;
                result.applied = true;
                result.requires_user_input = false;
            }
            UserResolutionDecision::Reject => {
                warn!(path = %result.path, "user rejected candidate resolution, file stays unresolved");
            }
            UserResolutionDecision::AbortAll => {
                return Err(EngineError::Fatal(format!(
                    "conflict resolution aborted by user at file {}",
                    result.path
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hunk(ours: &str, theirs: &str) -> ConflictHunk {
        ConflictHunk {
            start_line: 0,
            end_line: 0,
            ours_content: ours.to_string(),
            theirs_content: theirs.to_string(),
            ancestor_content: None,
        }
    }

    #[test]
    fn parse_file_extracts_single_hunk() {
        let content = "a\n<<<<<<< HEAD\nmine\n=======\ntheirs\n>>>>>>> worktree/t1\nb\n";
        let (segments, hunks) = parse_file(content);
        assert_eq!(hunks.len(), 1);
        assert_eq!(hunks[0].ours_content, "mine");
        assert_eq!(hunks[0].theirs_content, "theirs");
        assert_eq!(segments.len(), 3);
    }

    #[test]
    fn parse_file_captures_ancestor_section() {
        let content = "<<<<<<< HEAD\nmine\n||||||| base\nbase\n=======\ntheirs\n>>>>>>> branch\n";
        let (_, hunks) = parse_file(content);
        assert_eq!(hunks[0].ancestor_content.as_deref(), Some("base"));
    }

    #[test]
    fn classify_prefers_non_empty_side() {
        let c = classify_hunk(&hunk("", "content"));
        assert!(c.prefer_theirs);
        assert!((c.confidence - 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn classify_identical_sides_are_confident() {
        let c = classify_hunk(&hunk("same", "same"));
        assert!((c.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn classify_falls_back_to_no_preference() {
        let c = classify_hunk(&hunk("alpha\nbeta", "gamma\ndelta"));
        assert!(!c.prefer_ours && !c.prefer_theirs);
        assert!((c.confidence - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn classify_uses_ancestor_divergence() {
        let h = ConflictHunk {
            start_line: 0,
            end_line: 0,
            ours_content: "original line".to_string(),
            theirs_content: "a brand new rewritten line entirely".to_string(),
            ancestor_content: Some("original line".to_string()),
        };
        let c = classify_hunk(&h);
        assert!(c.prefer_theirs);
    }

    #[test]
    fn decide_merges_disjoint_hunks() {
        let hunks = vec![hunk("alpha change", "beta change")];
        let (strategy, confidence, _) = decide(&hunks);
        assert_eq!(strategy, Strategy::Merged);
        assert!(confidence >= 0.5);
    }

    #[test]
    fn decide_falls_back_to_semantic_when_hunks_disagree_and_overlap() {
        let hunks = vec![hunk("shared line\nalpha", "shared line\nbeta")];
        let (strategy, _, _) = decide(&hunks);
        assert_eq!(strategy, Strategy::Semantic);
    }

    #[test]
    fn render_merged_concatenates_both_sides() {
        let segments = vec![Segment::Hunk(hunk("ours line", "theirs line"))];
        let rendered = render(&segments, Strategy::Merged);
        assert!(rendered.contains("ours line"));
        assert!(rendered.contains("theirs line"));
    }

    #[test]
    fn semantic_union_dedupes_shared_lines() {
        let result = semantic_union("a\nb", "b\nc");
        assert_eq!(result, "a\nb\nc");
    }

    #[tokio::test]
    async fn resolve_file_auto_applies_above_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().to_str().unwrap();
        std::process::Command::new("git").args(["init", "-q"]).current_dir(dir.path()).status().unwrap();
        let content = "top\n<<<<<<< HEAD\nalpha addition\n=======\nbeta addition\n>>>>>>> worktree/t1\nbottom\n";
        std::fs::write(dir.path().join("file.txt"), content).unwrap();

        let result = resolve_file(repo, "file.txt", 0.8, true).await.unwrap();
        assert!(result.applied);
        assert_eq!(result.candidate.strategy, Strategy::Merged);
    }

    #[tokio::test]
    async fn resolve_file_defers_below_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().to_str().unwrap();
        let content = "<<<<<<< HEAD\nshared\nalpha\n=======\nshared\nbeta\n>>>>>>> worktree/t1\n";
        std::fs::write(dir.path().join("file.txt"), content).unwrap();

        let result = resolve_file(repo, "file.txt", 0.8, true).await.unwrap();
        assert!(!result.applied);
        assert!(result.requires_user_input);
    }
}
