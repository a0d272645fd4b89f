//! Creates, resumes, and merges back isolated git worktrees for a session
//! and its parallel workers.

use crate::git_ops::{self, GitOpsError};
use ralph_proto::{WorktreeDescriptor, WorktreeMode};
use sha1::{Digest, Sha1};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const MIN_FREE_MIB: u64 = 500;
const GIT_INVALID_CHARS: &[char] = &['~', '^', ':', '?', '*', '[', '\\', '@', '{'];

#[derive(Debug, thiserror::Error)]
pub enum WorktreeManagerError {
    #[error(transparent)]
    Git(#[from] GitOpsError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("insufficient free disk space to create worktree (need >= {need} MiB, have {have} MiB)")]
    DiskPressure { need: u64, have: u64 },
    #[error("merge conflict in {branch}: worktree preserved for manual resolution")]
    MergeConflict { branch: String },
}

/// Derives a session or worker name from the highest-priority input
/// available, then sanitizes it into a valid git branch/path component.
pub fn derive_name(
    custom: Option<&str>,
    epic_id: Option<&str>,
    prd_path: Option<&Path>,
    session_uuid: &uuid::Uuid,
) -> String {
    let raw = custom
        .map(ToString::to_string)
        .or_else(|| epic_id.map(ToString::to_string))
        .or_else(|| {
            prd_path.and_then(|p| p.file_stem()).map(|s| s.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| session_uuid.to_string()[..8].to_string());

    sanitize_name(&raw)
}

/// Replaces whitespace and git-invalid characters with `-`, strips control
/// characters, collapses repeated separators, and trims leading/trailing
/// `./-`. Falls back to a hash of the input if the result is empty.
pub fn sanitize_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_control() {
            continue;
        }
        if ch.is_whitespace() || GIT_INVALID_CHARS.contains(&ch) {
            out.push('-');
        } else {
            out.push(ch);
        }
    }

    let mut collapsed = String::with_capacity(out.len());
    let mut last_was_sep = false;
    for ch in out.chars() {
        let is_sep = ch == '-';
        if is_sep && last_was_sep {
            continue;
        }
        collapsed.push(ch);
        last_was_sep = is_sep;
    }

    let trimmed = collapsed.trim_matches(|c| c == '.' || c == '-');
    let trimmed = trimmed.trim_end_matches(".lock").trim_end_matches(|c| c == '.' || c == '-');

    if trimmed.is_empty() {
        let mut hasher = Sha1::new();
        hasher.update(raw.as_bytes());
        format!("wt-{:x}", hasher.finalize())[..16].to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn session_branch(name: &str) -> String {
    format!("ralph-session/{name}")
}

pub fn worker_branch(name: &str, n: u32) -> String {
    format!("ralph-worker/{name}-{n}")
}

/// `<parent_of_cwd>/.ralph-worktrees/<project>/<name>`.
pub fn worktree_path(cwd: &Path, project: &str, name: &str) -> PathBuf {
    let parent = cwd.parent().unwrap_or(cwd);
    parent.join(".ralph-worktrees").join(project).join(name)
}

fn free_space_mib(path: &Path) -> Option<u64> {
    // `statvfs` is the native probe; fall back to parsing `df` output if it's
    // unavailable, and proceed optimistically if neither yields a number.
    #[cfg(unix)]
    {
        if let Ok(stat) = nix::sys::statvfs::statvfs(path) {
            let bytes = stat.blocks_available() as u64 * stat.fragment_size();
            return Some(bytes / (1024 * 1024));
        }
    }
    let output = std::process::Command::new("df")
        .args(["-Pm", &path.to_string_lossy()])
        .output()
        .ok()?;
    let text = String::from_utf8_lossy(&output.stdout);
    let line = text.lines().nth(1)?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    fields.get(3)?.parse().ok()
}

pub struct WorktreeManager {
    pub repo_root: PathBuf,
}

impl WorktreeManager {
    pub fn new(repo_root: PathBuf) -> Self {
        Self { repo_root }
    }

    /// Creates or resumes a worktree on `branch` at `path`, copying config
    /// and tracker data in per the creation steps.
    pub fn create_or_resume(
        &self,
        path: &Path,
        branch: &str,
    ) -> Result<WorktreeDescriptor, WorktreeManagerError> {
        if let Some(existing_path) = git_ops::is_branch_checked_out(&self.repo_root, branch)? {
            info!(branch, path = %existing_path.display(), "reusing already-checked-out worktree");
            return Ok(WorktreeDescriptor {
                path: existing_path,
                branch: branch.to_string(),
                mode: WorktreeMode::Reused,
            });
        }

        if git_ops::branch_exists(&self.repo_root, branch) {
            self.clear_stale_path(path)?;
            git_ops::worktree_add(&self.repo_root, path, branch, false)?;
            return Ok(WorktreeDescriptor {
                path: path.to_path_buf(),
                branch: branch.to_string(),
                mode: WorktreeMode::Attached,
            });
        }

        self.check_preconditions(path)?;
        self.clear_stale_path(path)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        git_ops::worktree_add(&self.repo_root, path, branch, true)?;
        Ok(WorktreeDescriptor {
            path: path.to_path_buf(),
            branch: branch.to_string(),
            mode: WorktreeMode::Created,
        })
    }

    fn check_preconditions(&self, path: &Path) -> Result<(), WorktreeManagerError> {
        let probe_dir = path.parent().unwrap_or(&self.repo_root);
        match free_space_mib(probe_dir) {
            Some(have) if have < MIN_FREE_MIB => Err(WorktreeManagerError::DiskPressure {
                need: MIN_FREE_MIB,
                have,
            }),
            _ => Ok(()),
        }
    }

    fn clear_stale_path(&self, path: &Path) -> Result<(), WorktreeManagerError> {
        if path.exists() {
            if git_ops::worktree_remove(&self.repo_root, path).is_err() {
                std::fs::remove_dir_all(path)?;
            }
            git_ops::worktree_prune(&self.repo_root)?;
        }
        Ok(())
    }

    /// Copies `.ralph-tui/config.*` into the worktree.
    pub fn propagate_config(&self, worktree: &Path) -> Result<(), std::io::Error> {
        for ext in ["toml", "yaml", "yml"] {
            let src = self.repo_root.join(".ralph-tui").join(format!("config.{ext}"));
            if src.exists() {
                let dst_dir = worktree.join(".ralph-tui");
                std::fs::create_dir_all(&dst_dir)?;
                std::fs::copy(&src, dst_dir.join(format!("config.{ext}")))?;
            }
        }
        Ok(())
    }

    /// Copies `.beads/` excluding volatile sqlite/lock files, after running
    /// a flush-only sync with the given binary (`bd` or `br`).
    pub fn propagate_beads_data(
        &self,
        worktree: &Path,
        sync_binary: &str,
    ) -> Result<(), std::io::Error> {
        let _ = std::process::Command::new(sync_binary)
            .args(["sync", "--flush-only"])
            .current_dir(&self.repo_root)
            .output();

        let src = self.repo_root.join(".beads");
        if !src.exists() {
            return Ok(());
        }
        let dst = worktree.join(".beads");
        std::fs::create_dir_all(&dst)?;
        let excluded_suffixes = [".db", ".db-shm", ".db-wal", ".lock", ".tmp"];
        for entry in std::fs::read_dir(&src)? {
            let entry = entry?;
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            if name_str == "last-touched" || excluded_suffixes.iter().any(|s| name_str.ends_with(s)) {
                continue;
            }
            std::fs::copy(entry.path(), dst.join(&name))?;
        }
        Ok(())
    }

    /// Copies the PRD file into the worktree, rebasing paths outside `cwd`
    /// into `.ralph-tui/external-prd/<safe-base>-<sha1[:8]><ext>`.
    pub fn propagate_json_prd(
        &self,
        worktree: &Path,
        prd_path: &Path,
    ) -> Result<PathBuf, std::io::Error> {
        if prd_path.starts_with(&self.repo_root) {
            let rel = prd_path.strip_prefix(&self.repo_root).unwrap_or(prd_path);
            let dst = worktree.join(rel);
            if let Some(parent) = dst.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(prd_path, &dst)?;
            return Ok(dst);
        }

        let contents = std::fs::read(prd_path)?;
        let mut hasher = Sha1::new();
        hasher.update(&contents);
        let digest = format!("{:x}", hasher.finalize());
        let short_hash = &digest[..8];

        let base = prd_path
            .file_stem()
            .map(|s| sanitize_name(&s.to_string_lossy()))
            .unwrap_or_else(|| "prd".to_string());
        let ext = prd_path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        let dest_dir = worktree.join(".ralph-tui").join("external-prd");
        std::fs::create_dir_all(&dest_dir)?;
        let dest = dest_dir.join(format!("{base}-{short_hash}{ext}"));
        std::fs::write(&dest, &contents)?;
        info!(source = %prd_path.display(), rebased = %dest.display(), "JSON PRD rebased into worktree");
        Ok(dest)
    }

    /// Switches the main checkout back to `original_branch`, tries a
    /// fast-forward merge of `branch`, then falls back to a normal merge
    /// commit; on conflict, aborts and preserves the worktree.
    pub fn merge_back(
        &self,
        worktree_path: &Path,
        branch: &str,
        original_branch: &str,
    ) -> Result<(), WorktreeManagerError> {
        self.preserve_iteration_logs(worktree_path)?;
        git_ops::checkout(&self.repo_root, original_branch)?;

        match git_ops::try_merge(&self.repo_root, branch) {
            Ok(true) => {
                git_ops::worktree_remove(&self.repo_root, worktree_path)?;
                git_ops::delete_branch(&self.repo_root, branch)?;
                git_ops::worktree_prune(&self.repo_root)?;
                info!(branch, "merged back and removed worktree");
                Ok(())
            }
            Ok(false) | Err(_) => {
                git_ops::merge_abort(&self.repo_root)?;
                warn!(branch, path = %worktree_path.display(), "merge conflict: worktree preserved for manual resolution");
                Err(WorktreeManagerError::MergeConflict {
                    branch: branch.to_string(),
                })
            }
        }
    }

    /// Copies `.ralph-tui/iterations/*.log` back into the main cwd before a
    /// worktree is removed, never overwriting existing files.
    pub fn preserve_iteration_logs(&self, worktree_path: &Path) -> Result<(), std::io::Error> {
        let src_dir = worktree_path.join(".ralph-tui").join("iterations");
        if !src_dir.exists() {
            return Ok(());
        }
        let dst_dir = self.repo_root.join(".ralph-tui").join("iterations");
        std::fs::create_dir_all(&dst_dir)?;
        for entry in std::fs::read_dir(&src_dir)? {
            let entry = entry?;
            let dst = dst_dir.join(entry.file_name());
            if !dst.exists() {
                std::fs::copy(entry.path(), dst)?;
            } else {
                debug!(file = %dst.display(), "iteration log already present in main cwd, skipping");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_whitespace_and_invalid_chars() {
        assert_eq!(sanitize_name("my feature~branch"), "my-feature-branch");
    }

    #[test]
    fn sanitize_collapses_repeated_separators() {
        assert_eq!(sanitize_name("a   b"), "a-b");
    }

    #[test]
    fn sanitize_strips_leading_trailing_dashes_and_dots() {
        assert_eq!(sanitize_name("-./name./-"), "name");
    }

    #[test]
    fn sanitize_falls_back_to_hash_when_empty() {
        let out = sanitize_name("~~~");
        assert!(out.starts_with("wt-"));
    }

    #[test]
    fn sanitize_forbids_trailing_lock() {
        let out = sanitize_name("branch.lock");
        assert!(!out.ends_with(".lock"));
    }

    #[test]
    fn derive_name_prefers_custom_over_epic_and_prd() {
        let id = uuid::Uuid::new_v4();
        let name = derive_name(Some("custom"), Some("EPIC-1"), None, &id);
        assert_eq!(name, "custom");
    }

    #[test]
    fn derive_name_falls_back_to_prd_basename() {
        let id = uuid::Uuid::new_v4();
        let name = derive_name(None, None, Some(Path::new("/tmp/my-prd.json")), &id);
        assert_eq!(name, "my-prd");
    }

    #[test]
    fn derive_name_falls_back_to_session_uuid_prefix() {
        let id = uuid::Uuid::new_v4();
        let name = derive_name(None, None, None, &id);
        assert_eq!(name, id.to_string()[..8].to_string());
    }

    #[test]
    fn branch_names_follow_documented_format() {
        assert_eq!(session_branch("foo"), "ralph-session/foo");
        assert_eq!(worker_branch("foo", 2), "ralph-worker/foo-2");
    }
}
