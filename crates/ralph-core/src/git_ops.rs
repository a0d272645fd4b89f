//! Thin wrappers around the `git` binary.
//!
//! The Worktree Manager is the only component allowed to shell out to
//! `git`; everything else in this crate goes through here.

use std::io;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum GitOpsError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("git command failed: {0}")]
    Git(String),
    #[error("git operation timed out after {0:?}")]
    Timeout(Duration),
}

fn run(repo: &Path, args: &[&str]) -> Result<std::process::Output, GitOpsError> {
    Command::new("git")
        .args(args)
        .current_dir(repo)
        .output()
        .map_err(GitOpsError::from)
}

fn ok_or_git_err(output: std::process::Output) -> Result<String, GitOpsError> {
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        Err(GitOpsError::Git(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ))
    }
}

pub fn has_uncommitted_changes(repo: &Path) -> Result<bool, GitOpsError> {
    let output = run(repo, &["status", "--porcelain"])?;
    let out = ok_or_git_err(output)?;
    Ok(!out.is_empty())
}

/// Stages and commits all changes under the worktree. Returns `None` if
/// nothing changed, so the caller can skip the commit entirely.
pub fn commit_all(repo: &Path, message: &str) -> Result<Option<String>, GitOpsError> {
    if !has_uncommitted_changes(repo)? {
        return Ok(None);
    }
    let add = run(repo, &["add", "-A"])?;
    ok_or_git_err(add)?;
    let commit = run(repo, &["commit", "-m", message])?;
    ok_or_git_err(commit)?;
    Ok(Some(head_sha(repo)?))
}

pub fn head_sha(repo: &Path) -> Result<String, GitOpsError> {
    ok_or_git_err(run(repo, &["rev-parse", "HEAD"])?)
}

/// The branch `HEAD` points to symbolically, e.g. `main`. Errors on
/// detached HEAD.
pub fn current_branch(repo: &Path) -> Result<String, GitOpsError> {
    let branch = ok_or_git_err(run(repo, &["symbolic-ref", "--short", "HEAD"])?)?;
    Ok(branch)
}

pub fn branch_exists(repo: &Path, branch: &str) -> bool {
    run(repo, &["rev-parse", "--verify", "--quiet", branch])
        .map(|o| o.status.success())
        .unwrap_or(false)
}

pub fn create_branch_from_head(repo: &Path, branch: &str) -> Result<(), GitOpsError> {
    ok_or_git_err(run(repo, &["branch", branch, "HEAD"])?)?;
    Ok(())
}

pub fn delete_branch(repo: &Path, branch: &str) -> Result<(), GitOpsError> {
    ok_or_git_err(run(repo, &["branch", "-D", branch])?)?;
    Ok(())
}

pub fn checkout(repo: &Path, branch: &str) -> Result<(), GitOpsError> {
    ok_or_git_err(run(repo, &["checkout", branch])?)?;
    Ok(())
}

/// Tries `git merge --ff-only`, then falls back to a normal `--no-edit`
/// merge commit. Returns `Ok(true)` on success, `Ok(false)` on conflict
/// (the caller is responsible for `merge --abort`).
pub fn try_merge(repo: &Path, branch: &str) -> Result<bool, GitOpsError> {
    let ff = run(repo, &["merge", "--ff-only", branch])?;
    if ff.status.success() {
        return Ok(true);
    }
    let normal = run(repo, &["merge", "--no-edit", branch])?;
    Ok(normal.status.success())
}

pub fn merge_abort(repo: &Path) -> Result<(), GitOpsError> {
    let _ = run(repo, &["merge", "--abort"]);
    Ok(())
}

/// Starts a merge without committing, so the caller can inspect and resolve
/// conflicts before finalizing. Returns `Ok(true)` if the merge applied
/// cleanly (still uncommitted, ready for `commit_all`), `Ok(false)` if it
/// left conflict markers in the tree for the caller to resolve.
pub fn merge_no_commit(repo: &Path, branch: &str) -> Result<bool, GitOpsError> {
    let output = run(repo, &["merge", "--no-commit", "--no-ff", branch])?;
    Ok(output.status.success())
}

pub fn conflicted_files(repo: &Path) -> Result<Vec<std::path::PathBuf>, GitOpsError> {
    let out = ok_or_git_err(run(repo, &["diff", "--name-only", "--diff-filter=U"])?)?;
    Ok(out
        .lines()
        .filter(|l| !l.is_empty())
        .map(std::path::PathBuf::from)
        .collect())
}

/// Reads one side (`:2:` ours, `:3:` theirs) of a conflicted path out of the
/// index, or `None` if that side doesn't exist (file added/deleted).
pub fn show_index_stage(repo: &Path, stage: u8, path: &Path) -> Option<Vec<u8>> {
    let spec = format!(":{}:{}", stage, path.display());
    let output = Command::new("git")
        .args(["show", &spec])
        .current_dir(repo)
        .output()
        .ok()?;
    if output.status.success() {
        Some(output.stdout)
    } else {
        None
    }
}

pub fn add_path(repo: &Path, path: &Path) -> Result<(), GitOpsError> {
    ok_or_git_err(run(repo, &["add", &path.to_string_lossy()])?)?;
    Ok(())
}

pub fn worktree_add(repo: &Path, path: &Path, branch: &str, new_branch: bool) -> Result<(), GitOpsError> {
    let path_str = path.to_string_lossy().to_string();
    let output = if new_branch {
        run(repo, &["worktree", "add", "-b", branch, &path_str, "HEAD"])?
    } else {
        run(repo, &["worktree", "add", &path_str, branch])?
    };
    ok_or_git_err(output)?;
    Ok(())
}

pub fn worktree_remove(repo: &Path, path: &Path) -> Result<(), GitOpsError> {
    ok_or_git_err(run(
        repo,
        &["worktree", "remove", "--force", &path.to_string_lossy()],
    )?)?;
    Ok(())
}

pub fn worktree_prune(repo: &Path) -> Result<(), GitOpsError> {
    let _ = run(repo, &["worktree", "prune"]);
    Ok(())
}

#[derive(Debug, Clone)]
pub struct WorktreeListEntry {
    pub path: std::path::PathBuf,
    pub branch: Option<String>,
}

pub fn list_worktrees(repo: &Path) -> Result<Vec<WorktreeListEntry>, GitOpsError> {
    let out = ok_or_git_err(run(repo, &["worktree", "list", "--porcelain"])?)?;
    let mut entries = Vec::new();
    let mut cur_path: Option<std::path::PathBuf> = None;
    let mut cur_branch: Option<String> = None;
    for line in out.lines() {
        if let Some(p) = line.strip_prefix("worktree ") {
            if let Some(path) = cur_path.take() {
                entries.push(WorktreeListEntry {
                    path,
                    branch: cur_branch.take(),
                });
            }
            cur_path = Some(std::path::PathBuf::from(p));
        } else if let Some(b) = line.strip_prefix("branch ") {
            cur_branch = Some(b.trim_start_matches("refs/heads/").to_string());
        }
    }
    if let Some(path) = cur_path {
        entries.push(WorktreeListEntry {
            path,
            branch: cur_branch,
        });
    }
    Ok(entries)
}

pub fn is_branch_checked_out(repo: &Path, branch: &str) -> Result<Option<std::path::PathBuf>, GitOpsError> {
    Ok(list_worktrees(repo)?
        .into_iter()
        .find(|w| w.branch.as_deref() == Some(branch))
        .map(|w| w.path))
}
