//! Thin `git` CLI wrapper shared by `application::worktree_manager` and
//! `application::merge_engine`.
//!
//! No VCS trait abstraction — every collaborator in this engine shells
//! straight out to the `git` binary via `tokio::process::Command`, the same
//! way the single-task iteration engine this crate sits beside does.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::domain::error::EngineError;

/// Validate a branch/tag name to prevent it from being interpreted as a
/// `git` flag or otherwise subverting command execution.
///
/// Follows `git check-ref-format` at the level this engine needs: it does
/// not reimplement the full ref grammar, only the checks that matter for
/// names this engine itself generates or receives from a task id.
pub fn validate_branch_name(name: &str) -> Result<(), EngineError> {
    if name.is_empty() {
        return Err(EngineError::InvalidBranchName(name.to_string()));
    }
    if name.starts_with('-') {
        return Err(EngineError::InvalidBranchName(name.to_string()));
    }
    if name.contains("..") {
        return Err(EngineError::InvalidBranchName(name.to_string()));
    }
    for ch in name.chars() {
        if ch.is_ascii_control() || matches!(ch, ' ' | '~' | '^' | ':' | '?' | '*' | '[' | '\\') {
            return Err(EngineError::InvalidBranchName(name.to_string()));
        }
    }
    if name.ends_with(".lock") {
        return Err(EngineError::InvalidBranchName(name.to_string()));
    }
    Ok(())
}

fn vcs_error(command: &str, detail: impl Into<String>) -> EngineError {
    EngineError::VcsError {
        command: command.to_string(),
        detail: detail.into(),
    }
}

async fn run(repo_dir: &str, args: &[&str]) -> Result<std::process::Output, EngineError> {
    Command::new("git")
        .current_dir(repo_dir)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| vcs_error(&format!("git {}", args.join(" ")), e.to_string()))
}

/// `git show-ref --verify --quiet refs/heads/<branch>`.
pub async fn branch_exists(repo_dir: &str, branch: &str) -> Result<bool, EngineError> {
    validate_branch_name(branch)?;
    let output = run(
        repo_dir,
        &["show-ref", "--verify", "--quiet", &format!("refs/heads/{branch}")],
    )
    .await?;
    Ok(output.status.success())
}

/// `git worktree add [-b branch] path base`.
pub async fn worktree_add(
    repo_dir: &str,
    path: &str,
    branch: &str,
    base: &str,
) -> Result<(), EngineError> {
    validate_branch_name(branch)?;
    validate_branch_name(base)?;

    let output = run(repo_dir, &["worktree", "add", "-b", branch, path, base]).await?;
    if !output.status.success() {
        return Err(vcs_error(
            "git worktree add",
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }
    Ok(())
}

/// `git worktree remove [--force] path`, tolerant of an already-missing
/// directory.
pub async fn worktree_remove(repo_dir: &str, path: &str) -> Result<(), EngineError> {
    if !Path::new(path).exists() {
        return Ok(());
    }

    let output = run(repo_dir, &["worktree", "remove", path]).await?;
    if output.status.success() {
        return Ok(());
    }

    warn!(path, "worktree remove failed, retrying with --force");
    let forced = run(repo_dir, &["worktree", "remove", "--force", path]).await?;
    if !forced.status.success() {
        return Err(vcs_error(
            "git worktree remove --force",
            String::from_utf8_lossy(&forced.stderr).into_owned(),
        ));
    }
    Ok(())
}

/// `git branch -d branch`, best-effort (unmerged branches are tolerated).
pub async fn branch_delete(repo_dir: &str, branch: &str) -> Result<(), EngineError> {
    validate_branch_name(branch)?;
    let output = run(repo_dir, &["branch", "-D", branch]).await?;
    if !output.status.success() {
        debug!(
            branch,
            stderr = %String::from_utf8_lossy(&output.stderr),
            "branch delete failed, ignoring"
        );
    }
    Ok(())
}

/// `git checkout branch`.
pub async fn checkout(repo_dir: &str, branch: &str) -> Result<(), EngineError> {
    validate_branch_name(branch)?;
    let output = run(repo_dir, &["checkout", branch]).await?;
    if !output.status.success() {
        return Err(vcs_error(
            "git checkout",
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }
    Ok(())
}

/// `git rev-parse --abbrev-ref HEAD`, trimmed. Used by `MergeEngine` to
/// capture the branch the executor started on (§4.3, "Session branch protocol").
pub async fn current_branch(repo_dir: &str) -> Result<String, EngineError> {
    let output = run(repo_dir, &["rev-parse", "--abbrev-ref", "HEAD"]).await?;
    if !output.status.success() {
        return Err(vcs_error(
            "git rev-parse --abbrev-ref HEAD",
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// `git checkout -b branch base`, creating the session branch from the
/// executor's starting revision.
pub async fn create_and_checkout_branch(
    repo_dir: &str,
    branch: &str,
    base: &str,
) -> Result<(), EngineError> {
    validate_branch_name(branch)?;
    validate_branch_name(base)?;
    let output = run(repo_dir, &["checkout", "-b", branch, base]).await?;
    if !output.status.success() {
        return Err(vcs_error(
            "git checkout -b",
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }
    Ok(())
}

/// `git rev-parse HEAD`, trimmed.
pub async fn rev_parse_head(repo_dir: &str) -> Result<String, EngineError> {
    let output = run(repo_dir, &["rev-parse", "HEAD"]).await?;
    if !output.status.success() {
        return Err(vcs_error(
            "git rev-parse HEAD",
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Whether `git merge-tree target source` would produce conflict markers,
/// without touching the working tree.
pub async fn would_conflict(repo_dir: &str, source: &str, target: &str) -> Result<bool, EngineError> {
    validate_branch_name(source)?;
    validate_branch_name(target)?;
    let output = run(repo_dir, &["merge-tree", target, source]).await?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.contains("<<<<<<<") || stdout.contains(">>>>>>>"))
}

/// Outcome of [`attempt_merge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeAttempt {
    /// Fast-forwarded; no merge commit created.
    FastForward,
    /// A 3-way merge commit was created cleanly.
    Merged { commit: String },
    /// The 3-way merge left conflict markers in the working tree. The index
    /// and working tree are left as git produced them — not rolled back.
    Conflict,
    /// A non-conflict failure (e.g. dirty working tree); the attempt was
    /// aborted and the repo is back at its pre-attempt state.
    Failed { detail: String },
}

/// Try a fast-forward merge of `source`; on failure, fall back to a 3-way
/// `--no-ff` merge. Conflicts are distinguished from other failures by
/// checking the index for unmerged paths rather than assuming every
/// non-zero exit is a conflict (§4.3, "Merge attempt").
pub async fn attempt_merge(repo_dir: &str, source: &str, message: &str) -> Result<MergeAttempt, EngineError> {
    validate_branch_name(source)?;

    let ff = run(repo_dir, &["merge", "--ff-only", source]).await?;
    if ff.status.success() {
        return Ok(MergeAttempt::FastForward);
    }

    let merge = run(repo_dir, &["merge", "--no-ff", "-m", message, "--", source]).await?;
    if merge.status.success() {
        return Ok(MergeAttempt::Merged {
            commit: rev_parse_head(repo_dir).await?,
        });
    }

    let conflicts = conflicted_files(repo_dir).await.unwrap_or_default();
    if !conflicts.is_empty() {
        return Ok(MergeAttempt::Conflict);
    }

    merge_abort(repo_dir).await;
    Ok(MergeAttempt::Failed {
        detail: String::from_utf8_lossy(&merge.stderr).into_owned(),
    })
}

/// Abort an in-progress merge, best-effort.
pub async fn merge_abort(repo_dir: &str) {
    let _ = run(repo_dir, &["merge", "--abort"]).await;
}

/// `git reset --hard <tag>`, used to roll back to a pre-merge tag.
pub async fn reset_hard(repo_dir: &str, target: &str) -> Result<(), EngineError> {
    let output = run(repo_dir, &["reset", "--hard", target]).await?;
    if !output.status.success() {
        return Err(vcs_error(
            "git reset --hard",
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }
    Ok(())
}

/// Lightweight tag, used for session-backup and per-merge-attempt rollback
/// points (§4.3).
pub async fn tag_create(repo_dir: &str, tag: &str) -> Result<(), EngineError> {
    let output = run(repo_dir, &["tag", "-f", tag]).await?;
    if !output.status.success() {
        return Err(vcs_error(
            "git tag",
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }
    Ok(())
}

/// Best-effort tag deletion, used during cleanup.
pub async fn tag_delete(repo_dir: &str, tag: &str) {
    let _ = run(repo_dir, &["tag", "-d", tag]).await;
}

/// `git stage/add <path>`, used by the conflict resolver after writing a
/// resolved file.
pub async fn stage(repo_dir: &str, path: &str) -> Result<(), EngineError> {
    let output = run(repo_dir, &["add", "--", path]).await?;
    if !output.status.success() {
        return Err(vcs_error(
            "git add",
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }
    Ok(())
}

/// Number of commits on `HEAD` not reachable from `base_ref`, run inside a
/// worktree checkout. Used by `Worker` to populate `WorkerResult::commit_count`.
pub async fn commit_count_since(repo_dir: &str, base_ref: &str) -> Result<usize, EngineError> {
    let output = run(repo_dir, &["rev-list", "--count", &format!("{base_ref}..HEAD")]).await?;
    if !output.status.success() {
        return Err(vcs_error(
            "git rev-list --count",
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }
    String::from_utf8_lossy(&output.stdout)
        .trim()
        .parse()
        .map_err(|_| vcs_error("git rev-list --count", "non-numeric output"))
}

/// `git commit --no-edit`, used by `ConflictResolver` to finalize a merge
/// after every conflicted file has been resolved and staged.
pub async fn commit_merge(repo_dir: &str) -> Result<String, EngineError> {
    let output = run(repo_dir, &["commit", "--no-edit"]).await?;
    if !output.status.success() {
        return Err(vcs_error(
            "git commit --no-edit",
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }
    rev_parse_head(repo_dir).await
}

/// Files currently recorded as unmerged (conflicted) in the index.
pub async fn conflicted_files(repo_dir: &str) -> Result<Vec<String>, EngineError> {
    let output = run(repo_dir, &["diff", "--name-only", "--diff-filter=U"]).await?;
    if !output.status.success() {
        return Err(vcs_error(
            "git diff --diff-filter=U",
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(ToString::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_branch_name_rejects_empty() {
        assert!(validate_branch_name("").is_err());
    }

    #[test]
    fn validate_branch_name_rejects_leading_dash() {
        assert!(validate_branch_name("-Xours").is_err());
        assert!(validate_branch_name("--strategy=recursive").is_err());
    }

    #[test]
    fn validate_branch_name_rejects_double_dot() {
        assert!(validate_branch_name("main..evil").is_err());
    }

    #[test]
    fn validate_branch_name_rejects_invalid_chars() {
        assert!(validate_branch_name("branch~1").is_err());
        assert!(validate_branch_name("branch name").is_err());
        assert!(validate_branch_name("branch\\evil").is_err());
    }

    #[test]
    fn validate_branch_name_rejects_lock_suffix() {
        assert!(validate_branch_name("feature.lock").is_err());
    }

    #[test]
    fn validate_branch_name_accepts_valid_names() {
        assert!(validate_branch_name("main").is_ok());
        assert!(validate_branch_name("worktree/task-12345678").is_ok());
        assert!(validate_branch_name("ralph-session/abc12345").is_ok());
        assert!(validate_branch_name("release/1.0.0").is_ok());
    }
}
