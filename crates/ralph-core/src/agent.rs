//! The `AgentAdapter` contract: one external command line representing
//! "the agent". Concrete implementations live in `ralph-adapters`; this
//! crate only depends on the trait so the Iteration Engine and Parallel
//! Executor stay agnostic to which coding agent is actually running.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Completed,
    Failed,
    Timeout,
    Interrupted,
}

#[derive(Debug, Clone)]
pub struct AgentInvocation {
    pub prompt: String,
    pub cwd: PathBuf,
    pub timeout: Duration,
    pub max_output_bytes: usize,
    pub extra_flags: Vec<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AgentResult {
    pub status: AgentStatus,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub interrupted: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl AgentResult {
    /// Success per the Iteration Engine's completion rule: the sentinel is
    /// present in the stream AND the process exited zero.
    pub fn observed_completion(&self) -> bool {
        self.exit_code == Some(0) && self.stdout.contains(COMPLETION_SENTINEL)
    }
}

pub const COMPLETION_SENTINEL: &str = "<promise>COMPLETE</promise>";

#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    pub supports_streaming: bool,
    pub supports_interrupt: bool,
    pub supports_file_context: bool,
    pub supports_subagent_tracing: bool,
    pub structured_output_format: Option<StructuredOutputFormat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuredOutputFormat {
    Json,
    Jsonl,
}

#[derive(Debug, Clone)]
pub enum ModelValidation {
    Ok,
    Invalid { reason: String },
}

#[derive(Debug, Clone)]
pub struct PreflightResult {
    pub ok: bool,
    pub fail_reason: Option<String>,
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EnvironmentReport {
    pub blocked: Vec<String>,
    pub allowed: Vec<String>,
}

/// An external coding-agent CLI. Implementations build their own default
/// flags and append the engine's flags last, so "last flag wins" CLIs
/// always honor the engine's choice of model.
#[async_trait]
pub trait AgentAdapter: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    fn validate_model(&self, model: &str) -> ModelValidation;

    async fn preflight(&self) -> PreflightResult;

    /// Filters the process environment by the deny-list plus configured
    /// additions, minus configured passthrough. Returns what would be
    /// blocked/allowed without actually spawning anything, so callers can
    /// log a summary before the real invocation.
    fn plan_environment(
        &self,
        env: &HashMap<String, String>,
        extra_deny: &[String],
        passthrough: &[String],
    ) -> EnvironmentReport {
        default_plan_environment(env, extra_deny, passthrough)
    }

    async fn invoke(&self, invocation: AgentInvocation) -> AgentResult;
}

const DEFAULT_DENY_SUFFIXES: &[&str] = &["_API_KEY", "_SECRET_KEY", "_SECRET"];

/// Shared deny-list/passthrough logic so every adapter filters environment
/// variables identically; `passthrough` entries are glob patterns matched
/// with a plain `*` wildcard, matching the simple globbing the config
/// surface documents.
pub fn default_plan_environment(
    env: &HashMap<String, String>,
    extra_deny: &[String],
    passthrough: &[String],
) -> EnvironmentReport {
    let mut blocked = Vec::new();
    let mut allowed = Vec::new();

    for key in env.keys() {
        let denied_by_default = DEFAULT_DENY_SUFFIXES.iter().any(|suf| key.ends_with(suf));
        let denied_by_config = extra_deny.iter().any(|pat| glob_match(pat, key));
        let passed_through = passthrough.iter().any(|pat| glob_match(pat, key));

        if (denied_by_default || denied_by_config) && !passed_through {
            blocked.push(key.clone());
        } else {
            allowed.push(key.clone());
        }
    }

    blocked.sort();
    allowed.sort();
    EnvironmentReport { blocked, allowed }
}

fn glob_match(pattern: &str, value: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == value,
        Some((prefix, suffix)) => value.starts_with(prefix) && value.ends_with(suffix),
    }
}
