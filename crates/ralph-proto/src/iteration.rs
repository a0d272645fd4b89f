//! One numbered attempt at agent work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where a resolved model value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSource {
    Task,
    SessionConfig,
    AgentDefault,
}

/// Outcome of detecting the completion sentinel for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosureDecision {
    Closed,
    Unproductive,
    Failed,
}

/// One agent invocation plus its bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Iteration {
    /// Starts at 1.
    pub number: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub task_ids: Vec<String>,
    pub command_line: Vec<String>,
    /// SHA-1 hex of the prompt bytes actually sent (the raw prompt is not
    /// retained in the summary record; the full text lives in the log file).
    pub prompt_hash: String,
    pub resolved_model: Option<String>,
    pub model_source: Option<ModelSource>,
    pub exit_code: Option<i32>,
    pub elapsed_ms: u64,
    pub closure: std::collections::HashMap<String, ClosureDecision>,
    pub retry_count: u32,
}

impl Iteration {
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }

    pub fn finish(&mut self, exit_code: Option<i32>) {
        self.ended_at = Some(Utc::now());
        self.exit_code = exit_code;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_sets_ended_at_and_exit_code() {
        let mut it = Iteration {
            number: 1,
            started_at: Utc::now(),
            ended_at: None,
            task_ids: vec!["T-1".into()],
            command_line: vec!["agent".into()],
            prompt_hash: "deadbeef".into(),
            resolved_model: None,
            model_source: None,
            exit_code: None,
            elapsed_ms: 0,
            closure: Default::default(),
            retry_count: 0,
        };
        it.finish(Some(0));
        assert!(it.ended_at.is_some());
        assert_eq!(it.exit_code, Some(0));
    }
}
