//! Merge-conflict detection and resolution.
//!
//! Conflicts are resolved in two passes: a fast path that never needs an
//! agent (identical or whitespace-only diffs, handled by
//! `FileConflict::fast_path_resolution`), and an AI path that asks an agent
//! to produce a merged file when the fast path doesn't apply. The AI path
//! is pluggable through `ConflictAgent` so this crate never depends on a
//! concrete agent backend.

use crate::config::ConflictResolutionConfig;
use crate::git_ops::{self, GitOpsError};
use ralph_proto::FileConflict;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ConflictResolverError {
    #[error(transparent)]
    Git(#[from] GitOpsError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("too many conflicted files ({count}, max {max}); leaving for manual resolution")]
    TooManyFiles { count: usize, max: u32 },
    #[error("agent resolution timed out after {0:?}")]
    Timeout(Duration),
    #[error("agent confidence {confidence} below threshold {threshold}")]
    LowConfidence { confidence: f64, threshold: f64 },
}

/// An agent capable of producing a merged file from a conflict. Implemented
/// by the concrete agent adapters one layer out.
pub trait ConflictAgent {
    fn resolve(&self, prompt: &str, timeout: Duration) -> Result<ConflictAgentResponse, String>;
}

pub struct ConflictAgentResponse {
    pub content: String,
    pub confidence: f64,
}

/// Outcome of attempting to resolve one conflicted file.
pub enum Resolution {
    FastPath(Vec<u8>),
    Agent(Vec<u8>),
    Unresolved,
}

pub struct ConflictResolver<'a> {
    repo: &'a Path,
    config: &'a ConflictResolutionConfig,
}

impl<'a> ConflictResolver<'a> {
    pub fn new(repo: &'a Path, config: &'a ConflictResolutionConfig) -> Self {
        Self { repo, config }
    }

    /// Reads every conflicted path out of the index and builds a
    /// `FileConflict` record for each. Added/deleted sides surface as an
    /// empty buffer rather than erroring, matching git's own 2-way view of
    /// add/add and delete/modify conflicts. `task_id`/`task_title` identify
    /// the worker branch this merge came from, so the AI path can give the
    /// agent the same task context the iteration itself had.
    pub fn detect(
        &self,
        task_id: &str,
        task_title: &str,
    ) -> Result<Vec<FileConflict>, ConflictResolverError> {
        let paths = git_ops::conflicted_files(self.repo)?;
        let mut conflicts = Vec::with_capacity(paths.len());
        for path in paths {
            let base = git_ops::show_index_stage(self.repo, 1, &path);
            let ours = git_ops::show_index_stage(self.repo, 2, &path).unwrap_or_default();
            let theirs = git_ops::show_index_stage(self.repo, 3, &path).unwrap_or_default();
            let raw = std::fs::read(self.repo.join(&path)).unwrap_or_default();
            conflicts.push(FileConflict {
                relative_path: path,
                task_id: task_id.to_string(),
                task_title: task_title.to_string(),
                base,
                ours,
                theirs,
                raw,
            });
        }
        Ok(conflicts)
    }

    /// Resolves every detected conflict, writing winning content back to
    /// disk and staging it. Returns per-file resolutions in detection
    /// order; an `Unresolved` entry means the file was left mid-conflict
    /// for a human.
    pub fn resolve_all(
        &self,
        conflicts: &[FileConflict],
        agent: Option<&dyn ConflictAgent>,
    ) -> Result<Vec<Resolution>, ConflictResolverError> {
        if conflicts.len() > self.config.max_files as usize {
            return Err(ConflictResolverError::TooManyFiles {
                count: conflicts.len(),
                max: self.config.max_files,
            });
        }

        let mut results = Vec::with_capacity(conflicts.len());
        for conflict in conflicts {
            let resolution = self.resolve_one(conflict, agent)?;
            if let Resolution::FastPath(ref content) | Resolution::Agent(ref content) = resolution
            {
                let abs = self.repo.join(&conflict.relative_path);
                std::fs::write(&abs, content)?;
                git_ops::add_path(self.repo, &conflict.relative_path)?;
            }
            results.push(resolution);
        }
        Ok(results)
    }

    fn resolve_one(
        &self,
        conflict: &FileConflict,
        agent: Option<&dyn ConflictAgent>,
    ) -> Result<Resolution, ConflictResolverError> {
        if let Some(content) = conflict.fast_path_resolution() {
            info!(path = %conflict.relative_path.display(), "conflict resolved on fast path");
            return Ok(Resolution::FastPath(content));
        }

        if !self.config.enabled {
            warn!(path = %conflict.relative_path.display(), "AI conflict resolution disabled, leaving for manual resolution");
            return Ok(Resolution::Unresolved);
        }

        let Some(agent) = agent else {
            warn!(path = %conflict.relative_path.display(), "no conflict agent configured, leaving for manual resolution");
            return Ok(Resolution::Unresolved);
        };

        let prompt = build_prompt(conflict);
        let timeout = Duration::from_millis(self.config.timeout_ms);
        let response = agent
            .resolve(&prompt, timeout)
            .map_err(|_| ConflictResolverError::Timeout(timeout))?;

        if response.confidence < self.config.confidence_threshold {
            warn!(
                path = %conflict.relative_path.display(),
                confidence = response.confidence,
                threshold = self.config.confidence_threshold,
                "agent confidence below threshold, leaving for manual resolution"
            );
            return Ok(Resolution::Unresolved);
        }

        let content = strip_code_fence(&response.content);
        info!(path = %conflict.relative_path.display(), confidence = response.confidence, "conflict resolved by agent");
        Ok(Resolution::Agent(content.into_bytes()))
    }
}

fn build_prompt(conflict: &FileConflict) -> String {
    let base = conflict
        .base
        .as_deref()
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .unwrap_or_else(|| "(file did not exist)".to_string());
    format!(
        "Resolve the merge conflict in {} (task {}: {}).\n\n--- base ---\n{}\n\n--- ours ---\n{}\n\n--- theirs ---\n{}\n\nReturn only the fully merged file content, no commentary.",
        conflict.relative_path.display(),
        conflict.task_id,
        conflict.task_title,
        base,
        String::from_utf8_lossy(&conflict.ours),
        String::from_utf8_lossy(&conflict.theirs),
    )
}

/// Agents routinely wrap their answer in a fenced code block; strip the
/// fence if present so the raw content round-trips cleanly to disk.
fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.trim_start_matches(|c: char| c.is_alphanumeric());
        let rest = rest.strip_prefix('\n').unwrap_or(rest);
        if let Some(body) = rest.strip_suffix("```") {
            return body.trim_end().to_string();
        }
        return rest.trim_end().to_string();
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubAgent {
        response: Result<ConflictAgentResponse, String>,
    }

    impl ConflictAgent for StubAgent {
        fn resolve(&self, _prompt: &str, _timeout: Duration) -> Result<ConflictAgentResponse, String> {
            match &self.response {
                Ok(r) => Ok(ConflictAgentResponse {
                    content: r.content.clone(),
                    confidence: r.confidence,
                }),
                Err(e) => Err(e.clone()),
            }
        }
    }

    fn conflict(path: &str, ours: &[u8], theirs: &[u8]) -> FileConflict {
        FileConflict {
            relative_path: path.into(),
            task_id: "T-1".into(),
            task_title: "sample task".into(),
            base: None,
            ours: ours.to_vec(),
            theirs: theirs.to_vec(),
            raw: Vec::new(),
        }
    }

    #[test]
    fn build_prompt_includes_task_context_and_missing_base_fallback() {
        let c = conflict("a.txt", b"alpha", b"beta");
        let prompt = build_prompt(&c);
        assert!(prompt.contains("task T-1: sample task"));
        assert!(prompt.contains("(file did not exist)"));
    }

    #[test]
    fn strip_code_fence_removes_language_tagged_fence() {
        let out = strip_code_fence("```rust\nfn main() {}\n```");
        assert_eq!(out, "fn main() {}");
    }

    #[test]
    fn strip_code_fence_leaves_plain_text_alone() {
        assert_eq!(strip_code_fence("plain content"), "plain content");
    }

    #[test]
    fn fast_path_conflicts_never_reach_the_agent() {
        let cfg = ConflictResolutionConfig {
            enabled: true,
            confidence_threshold: 0.7,
            timeout_ms: 1000,
            max_files: 10,
        };
        let resolver = ConflictResolver::new(Path::new("."), &cfg);
        let agent = StubAgent {
            response: Err("should not be called".into()),
        };
        let c = conflict("same.txt", b"same", b"same");
        let result = resolver.resolve_one(&c, Some(&agent)).unwrap();
        assert!(matches!(result, Resolution::FastPath(_)));
    }

    #[test]
    fn low_confidence_agent_response_is_left_unresolved() {
        let cfg = ConflictResolutionConfig {
            enabled: true,
            confidence_threshold: 0.9,
            timeout_ms: 1000,
            max_files: 10,
        };
        let resolver = ConflictResolver::new(Path::new("."), &cfg);
        let agent = StubAgent {
            response: Ok(ConflictAgentResponse {
                content: "merged".into(),
                confidence: 0.5,
            }),
        };
        let c = conflict("a.txt", b"alpha", b"beta");
        let result = resolver.resolve_one(&c, Some(&agent)).unwrap();
        assert!(matches!(result, Resolution::Unresolved));
    }

    #[test]
    fn confident_agent_response_is_accepted_and_fences_stripped() {
        let cfg = ConflictResolutionConfig {
            enabled: true,
            confidence_threshold: 0.5,
            timeout_ms: 1000,
            max_files: 10,
        };
        let resolver = ConflictResolver::new(Path::new("."), &cfg);
        let agent = StubAgent {
            response: Ok(ConflictAgentResponse {
                content: "```\nmerged content\n```".into(),
                confidence: 0.9,
            }),
        };
        let c = conflict("a.txt", b"alpha", b"beta");
        let result = resolver.resolve_one(&c, Some(&agent)).unwrap();
        match result {
            Resolution::Agent(content) => assert_eq!(content, b"merged content"),
            _ => panic!("expected agent resolution"),
        }
    }

    #[test]
    fn disabled_config_skips_agent_entirely() {
        let cfg = ConflictResolutionConfig {
            enabled: false,
            confidence_threshold: 0.7,
            timeout_ms: 1000,
            max_files: 10,
        };
        let resolver = ConflictResolver::new(Path::new("."), &cfg);
        let agent = StubAgent {
            response: Err("should not be called".into()),
        };
        let c = conflict("a.txt", b"alpha", b"beta");
        let result = resolver.resolve_one(&c, Some(&agent)).unwrap();
        assert!(matches!(result, Resolution::Unresolved));
    }

    #[test]
    fn too_many_files_rejects_before_resolving_any() {
        let cfg = ConflictResolutionConfig {
            enabled: true,
            confidence_threshold: 0.7,
            timeout_ms: 1000,
            max_files: 1,
        };
        let resolver = ConflictResolver::new(Path::new("."), &cfg);
        let conflicts = vec![
            conflict("a.txt", b"a", b"b"),
            conflict("c.txt", b"c", b"d"),
        ];
        let err = resolver.resolve_all(&conflicts, None).unwrap_err();
        assert!(matches!(err, ConflictResolverError::TooManyFiles { .. }));
    }
}
