//! Session and iteration bookkeeping types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Why a session stopped. Set exactly once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    NoTasks,
    Completed,
    MaxIterations,
    UserQuit,
    UserPause,
    FatalError,
    ExternalSignal,
}

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Paused,
    Interrupted,
    Completed,
    Failed,
}

/// How the error-handling policy reacts to a failed iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStrategy {
    Skip,
    Retry,
    Abort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorHandlingPolicy {
    pub strategy: ErrorStrategy,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub continue_on_non_zero_exit: bool,
}

impl Default for ErrorHandlingPolicy {
    fn default() -> Self {
        Self {
            strategy: ErrorStrategy::Retry,
            max_retries: 2,
            retry_delay_ms: 2_000,
            continue_on_non_zero_exit: false,
        }
    }
}

/// Running counts tracked for a session.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TaskCounts {
    pub total: u32,
    pub attempted: u32,
    pub closed: u32,
    pub failed: u32,
}

/// A session's persisted state (`.ralph-tui/session.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: uuid::Uuid,
    pub cwd: PathBuf,
    pub tracker_plugin_id: String,
    pub agent_plugin_id: String,
    pub iteration: u32,
    pub counts: TaskCounts,
    pub max_iterations: Option<u32>,
    pub iteration_delay_ms: u64,
    pub error_handling: ErrorHandlingPolicy,
    pub worktree_path: Option<PathBuf>,
    pub status: SessionStatus,
    pub stop_reason: Option<StopReason>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Hash of the config used to start the session; resume verifies this
    /// hasn't silently drifted underneath a long-paused session.
    pub config_fingerprint: String,
}

impl Session {
    /// Setting a stop reason always moves the session to a matching status.
    pub fn set_stop_reason(&mut self, reason: StopReason) {
        debug_assert!(
            self.stop_reason.is_none(),
            "stop_reason must be set exactly once"
        );
        self.stop_reason = Some(reason);
        self.status = match reason {
            StopReason::Completed => SessionStatus::Completed,
            StopReason::UserQuit | StopReason::UserPause => SessionStatus::Paused,
            StopReason::ExternalSignal => SessionStatus::Interrupted,
            StopReason::MaxIterations | StopReason::NoTasks => SessionStatus::Completed,
            StopReason::FatalError => SessionStatus::Failed,
        };
        self.updated_at = Utc::now();
    }

    /// A session record is only deleted once it completed AND every known
    /// task was actually closed.
    pub fn should_delete_session_file(&self) -> bool {
        self.stop_reason == Some(StopReason::Completed) && self.counts.closed == self.counts.total
    }
}

/// Cross-directory discoverability record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRegistryEntry {
    pub id: uuid::Uuid,
    pub cwd: PathBuf,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub agent_plugin_id: String,
    pub tracker_plugin_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epic_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prd_path: Option<PathBuf>,
    #[serde(default)]
    pub sandboxed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_session() -> Session {
        Session {
            id: uuid::Uuid::new_v4(),
            cwd: PathBuf::from("/tmp/proj"),
            tracker_plugin_id: "json".into(),
            agent_plugin_id: "claude".into(),
            iteration: 3,
            counts: TaskCounts {
                total: 5,
                attempted: 5,
                closed: 5,
                failed: 0,
            },
            max_iterations: Some(100),
            iteration_delay_ms: 0,
            error_handling: ErrorHandlingPolicy::default(),
            worktree_path: None,
            status: SessionStatus::Running,
            stop_reason: None,
            started_at: Utc::now(),
            updated_at: Utc::now(),
            config_fingerprint: "abc".into(),
        }
    }

    #[test]
    fn completed_with_all_tasks_closed_deletes_file() {
        let mut s = sample_session();
        s.set_stop_reason(StopReason::Completed);
        assert!(s.should_delete_session_file());
    }

    #[test]
    fn user_quit_preserves_session_file() {
        let mut s = sample_session();
        s.set_stop_reason(StopReason::UserQuit);
        assert_eq!(s.status, SessionStatus::Paused);
        assert!(!s.should_delete_session_file());
    }

    #[test]
    fn completed_with_incomplete_tasks_preserves_file() {
        let mut s = sample_session();
        s.counts.closed = 3;
        s.set_stop_reason(StopReason::Completed);
        assert!(!s.should_delete_session_file());
    }
}
