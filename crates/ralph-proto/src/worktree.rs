//! Worktree descriptor types.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How a worktree came to exist for this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorktreeMode {
    Created,
    Reused,
    Attached,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeDescriptor {
    pub path: PathBuf,
    pub branch: String,
    pub mode: WorktreeMode,
}

/// A 3-way-merge conflict record.
#[derive(Debug, Clone)]
pub struct FileConflict {
    pub relative_path: PathBuf,
    /// Id/title of the task whose worker branch produced this conflict,
    /// carried along for context in the AI resolution prompt.
    pub task_id: String,
    pub task_title: String,
    pub base: Option<Vec<u8>>,
    pub ours: Vec<u8>,
    pub theirs: Vec<u8>,
    pub raw: Vec<u8>,
}

impl FileConflict {
    /// Whitespace-only or byte-identical sides resolve without invoking an
    /// agent.
    pub fn fast_path_resolution(&self) -> Option<Vec<u8>> {
        if self.ours == self.theirs {
            return Some(self.ours.clone());
        }
        let ours_blank = self.ours.iter().all(u8::is_ascii_whitespace);
        let theirs_blank = self.theirs.iter().all(u8::is_ascii_whitespace);
        if ours_blank {
            return Some(self.theirs.clone());
        }
        if theirs_blank {
            return Some(self.ours.clone());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conflict(ours: &[u8], theirs: &[u8]) -> FileConflict {
        FileConflict {
            relative_path: PathBuf::from("FEATURES.md"),
            task_id: "T-1".into(),
            task_title: "add features".into(),
            base: None,
            ours: ours.to_vec(),
            theirs: theirs.to_vec(),
            raw: Vec::new(),
        }
    }

    #[test]
    fn identical_sides_fast_path() {
        let c = conflict(b"same", b"same");
        assert_eq!(c.fast_path_resolution(), Some(b"same".to_vec()));
    }

    #[test]
    fn blank_ours_prefers_theirs() {
        let c = conflict(b"   \n", b"real content");
        assert_eq!(c.fast_path_resolution(), Some(b"real content".to_vec()));
    }

    #[test]
    fn blank_theirs_prefers_ours() {
        let c = conflict(b"real content", b"\t\n");
        assert_eq!(c.fast_path_resolution(), Some(b"real content".to_vec()));
    }

    #[test]
    fn genuinely_different_has_no_fast_path() {
        let c = conflict(b"alpha", b"beta");
        assert_eq!(c.fast_path_resolution(), None);
    }

    #[test]
    fn both_blank_is_fast_path_too() {
        let c = conflict(b"  ", b"\n\n");
        assert_eq!(c.fast_path_resolution(), Some(b"\n\n".to_vec()));
    }
}
