//! The error taxonomy shared across every crate.
//!
//! Each variant carries an operator-readable sentence with a suggested
//! action. `exit_code` maps a terminal error to one of the process exit
//! codes documented in the CLI's help text.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RalphError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("another session already holds the lock in this directory (pid {pid}); use --force to override")]
    LockConflict { pid: u32 },

    #[error("tracker unavailable: {0}")]
    TrackerUnavailable(String),

    #[error("agent unavailable: {0}")]
    AgentUnavailable(String),

    #[error("agent timed out after {0:?}")]
    AgentTimeout(std::time::Duration),

    #[error("merge conflict in {0}: worktree preserved for manual resolution")]
    MergeConflict(String),

    #[error("insufficient free disk space to create worktree (need >= 500 MiB, have {available_mib} MiB)")]
    DiskPressure { available_mib: u64 },

    #[error("requested model '{model}' rejected by agent: {reason} (falling back)")]
    ModelRejected { model: String, reason: String },

    #[error("session state corrupted: {0}; run --cleanup")]
    StateCorrupted(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RalphError {
    /// 0 means all tasks closed; 1 is incomplete/interrupted; 2 is a fatal
    /// config/IO error; 3 is a lock conflict.
    pub fn exit_code(&self) -> i32 {
        match self {
            RalphError::LockConflict { .. } => 3,
            RalphError::Config(_) | RalphError::Io(_) | RalphError::StateCorrupted(_) => 2,
            _ => 1,
        }
    }
}
