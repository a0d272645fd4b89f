//! Maps every `ralph-core` error type onto the shared `RalphError` taxonomy
//! so the exit-code logic in `main` only ever has one enum to match on.
//! `RalphError` and each source error type are both foreign to this crate,
//! so these are plain functions rather than `From` impls.

use ralph_adapters::UnknownBackendError;
use ralph_core::{
    ConfigError, ConflictResolverError, IterationEngineError, ParallelExecutorError,
    SessionManagerError, TrackerError, WorktreeManagerError,
};
use ralph_proto::RalphError;

pub fn config(e: ConfigError) -> RalphError {
    RalphError::Config(e.to_string())
}

pub fn unknown_backend(e: UnknownBackendError) -> RalphError {
    RalphError::AgentUnavailable(e.to_string())
}

pub fn session(e: SessionManagerError) -> RalphError {
    match e {
        SessionManagerError::LockConflict { pid } => RalphError::LockConflict { pid },
        SessionManagerError::Corrupted(msg) => RalphError::StateCorrupted(msg),
        SessionManagerError::Io(io) => RalphError::Io(io),
        SessionManagerError::NotFound(id) => RalphError::Config(format!("no session found with id {id}")),
    }
}

pub fn tracker(e: TrackerError) -> RalphError {
    RalphError::TrackerUnavailable(e.to_string())
}

pub fn worktree(e: WorktreeManagerError) -> RalphError {
    match e {
        WorktreeManagerError::DiskPressure { have, .. } => RalphError::DiskPressure { available_mib: have },
        WorktreeManagerError::MergeConflict { branch } => RalphError::MergeConflict(branch),
        WorktreeManagerError::Io(io) => RalphError::Io(io),
        WorktreeManagerError::Git(git) => RalphError::Config(git.to_string()),
    }
}

pub fn conflict(e: ConflictResolverError) -> RalphError {
    match e {
        ConflictResolverError::Io(io) => RalphError::Io(io),
        other => RalphError::AgentUnavailable(other.to_string()),
    }
}

pub fn iteration(e: IterationEngineError) -> RalphError {
    match e {
        IterationEngineError::Io(io) => RalphError::Io(io),
        IterationEngineError::Tracker(t) => tracker(t),
        IterationEngineError::Config(c) => config(c),
        other => RalphError::AgentUnavailable(other.to_string()),
    }
}

pub fn parallel(e: ParallelExecutorError) -> RalphError {
    match e {
        ParallelExecutorError::Io(io) => RalphError::Io(io),
        ParallelExecutorError::Tracker(t) => tracker(t),
        ParallelExecutorError::Worktree(w) => worktree(w),
        ParallelExecutorError::Conflict(c) => conflict(c),
        ParallelExecutorError::Git(git) => RalphError::Config(git.to_string()),
    }
}
