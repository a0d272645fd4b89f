//! `ProcessAgentAdapter`: runs a `CliBackend`'s command line as a child
//! process, streams its stdout/stderr, and maps the outcome to an
//! `AgentResult`. This is the one place in the crate that actually shells out
//! to a coding-agent CLI.

use crate::cli_backend::{CliBackend, PromptMode};
use async_trait::async_trait;
use chrono::Utc;
use ralph_core::{
    AgentAdapter, AgentInvocation, AgentResult, AgentStatus, Capabilities, ModelValidation,
    PreflightResult,
};
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

/// Wraps one `CliBackend` as a full `AgentAdapter`.
pub struct ProcessAgentAdapter {
    backend: CliBackend,
    capabilities: Capabilities,
    env_exclude: Vec<String>,
    env_passthrough: Vec<String>,
}

impl ProcessAgentAdapter {
    pub fn new(backend: CliBackend, capabilities: Capabilities) -> Self {
        Self {
            backend,
            capabilities,
            env_exclude: Vec::new(),
            env_passthrough: Vec::new(),
        }
    }

    pub fn with_env_filter(mut self, env_exclude: Vec<String>, env_passthrough: Vec<String>) -> Self {
        self.env_exclude = env_exclude;
        self.env_passthrough = env_passthrough;
        self
    }

    /// The known, pre-wired backend catalog from §4.2, each declaring the
    /// capabilities their CLI actually supports.
    pub fn known(name: &str) -> Result<Self, crate::cli_backend::UnknownBackendError> {
        let backend = CliBackend::from_name(name)?;
        let capabilities = match backend.name {
            "claude" => Capabilities {
                supports_streaming: true,
                supports_interrupt: true,
                supports_file_context: true,
                supports_subagent_tracing: true,
                structured_output_format: Some(ralph_core::StructuredOutputFormat::Jsonl),
            },
            _ => Capabilities {
                supports_streaming: false,
                supports_interrupt: true,
                supports_file_context: false,
                supports_subagent_tracing: false,
                structured_output_format: None,
            },
        };
        Ok(Self::new(backend, capabilities))
    }

    fn command_line(&self, invocation: &AgentInvocation) -> (String, Vec<String>, Option<String>) {
        let (cmd, mut args, stdin) = self.backend.build_command(&invocation.prompt);
        if let Some(model) = &invocation.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args.extend(invocation.extra_flags.iter().cloned());
        (cmd, args, stdin)
    }

    async fn run_once(&self, invocation: &AgentInvocation) -> AgentResult {
        let started_at = Utc::now();
        let start = Instant::now();
        let (cmd, args, stdin_payload) = self.command_line(invocation);

        let current_env: HashMap<String, String> = std::env::vars().collect();
        let report = self.plan_environment(&current_env, &self.env_exclude, &self.env_passthrough);
        tracing::info!(
            command = %cmd,
            blocked = report.blocked.len(),
            allowed = report.allowed.len(),
            "spawning agent with filtered environment"
        );

        let mut command = Command::new(&cmd);
        command
            .args(&args)
            .current_dir(&invocation.cwd)
            .env_clear()
            .envs(
                current_env
                    .iter()
                    .filter(|(k, _)| !report.blocked.contains(k)),
            )
            .stdin(if stdin_payload.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return Self::failed_result(started_at, start, format!("failed to spawn {cmd}: {e}"));
            }
        };

        if let Some(payload) = stdin_payload {
            if let Some(mut stdin) = child.stdin.take() {
                let _ = stdin.write_all(payload.as_bytes()).await;
            }
        }

        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");
        let max_bytes = invocation.max_output_bytes;

        let stdout_task = tokio::spawn(async move { collect_lines(stdout, max_bytes).await });
        let stderr_task = tokio::spawn(async move { collect_lines(stderr, max_bytes).await });

        let wait = tokio::time::timeout(invocation.timeout, child.wait());

        match wait.await {
            Ok(Ok(status)) => {
                let stdout_buf = stdout_task.await.unwrap_or_default();
                let stderr_buf = stderr_task.await.unwrap_or_default();
                let ended_at = Utc::now();
                AgentResult {
                    status: if status.success() {
                        AgentStatus::Completed
                    } else {
                        AgentStatus::Failed
                    },
                    exit_code: status.code(),
                    stdout: stdout_buf,
                    stderr: stderr_buf,
                    duration: start.elapsed(),
                    interrupted: false,
                    started_at,
                    ended_at,
                }
            }
            Ok(Err(e)) => Self::failed_result(started_at, start, format!("agent process error: {e}")),
            Err(_) => {
                let _ = child.kill().await;
                let stdout_buf = stdout_task.await.unwrap_or_default();
                let stderr_buf = stderr_task.await.unwrap_or_default();
                AgentResult {
                    status: AgentStatus::Timeout,
                    exit_code: None,
                    stdout: stdout_buf,
                    stderr: stderr_buf,
                    duration: start.elapsed(),
                    interrupted: false,
                    started_at,
                    ended_at: Utc::now(),
                }
            }
        }
    }

    fn failed_result(started_at: chrono::DateTime<Utc>, start: Instant, message: String) -> AgentResult {
        AgentResult {
            status: AgentStatus::Failed,
            exit_code: None,
            stdout: String::new(),
            stderr: message,
            duration: start.elapsed(),
            interrupted: false,
            started_at,
            ended_at: Utc::now(),
        }
    }
}

/// Reads lines from a child pipe into one buffer, capped at `max_bytes`
/// (further lines are dropped once the cap is hit, matching the config
/// surface's `maxOutputBytes`).
async fn collect_lines<R: tokio::io::AsyncRead + Unpin>(pipe: R, max_bytes: usize) -> String {
    let mut reader = BufReader::new(pipe).lines();
    let mut buf = String::new();
    while let Ok(Some(line)) = reader.next_line().await {
        if buf.len() >= max_bytes {
            continue;
        }
        buf.push_str(&line);
        buf.push('\n');
    }
    if buf.len() > max_bytes {
        buf.truncate(max_bytes);
    }
    buf
}

#[async_trait]
impl AgentAdapter for ProcessAgentAdapter {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn validate_model(&self, model: &str) -> ModelValidation {
        if model.trim().is_empty() {
            ModelValidation::Invalid {
                reason: "model name is empty".to_string(),
            }
        } else {
            ModelValidation::Ok
        }
    }

    async fn preflight(&self) -> PreflightResult {
        let detect = Command::new(&self.backend.command)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        let Ok(status) = detect else {
            return PreflightResult {
                ok: false,
                fail_reason: Some(format!("'{}' not found on PATH", self.backend.command)),
                suggestion: Some(format!("install {} or configure a different agent", self.backend.command)),
            };
        };
        if !status.success() {
            return PreflightResult {
                ok: false,
                fail_reason: Some(format!("'{} --version' exited non-zero", self.backend.command)),
                suggestion: Some("check the agent CLI is correctly installed".to_string()),
            };
        }

        let smoke = self
            .run_once(&AgentInvocation {
                prompt: "Reply with a single word to confirm you are working.".to_string(),
                cwd: std::env::temp_dir(),
                timeout: std::time::Duration::from_secs(30),
                max_output_bytes: 4096,
                extra_flags: Vec::new(),
                model: None,
            })
            .await;

        if smoke.exit_code == Some(0) && !smoke.stdout.trim().is_empty() {
            PreflightResult {
                ok: true,
                fail_reason: None,
                suggestion: None,
            }
        } else {
            PreflightResult {
                ok: false,
                fail_reason: Some("smoke-test prompt produced no output".to_string()),
                suggestion: Some("run the agent CLI manually to diagnose".to_string()),
            }
        }
    }

    async fn invoke(&self, invocation: AgentInvocation) -> AgentResult {
        self.run_once(&invocation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ralph_core::COMPLETION_SENTINEL;
    use std::time::Duration;

    fn echo_backend(prompt_mode: PromptMode) -> CliBackend {
        CliBackend::custom("sh".into(), vec!["-c".into()], prompt_mode, None)
    }

    #[tokio::test]
    async fn invoke_captures_stdout_and_exit_code() {
        let script = format!("echo 'done {}'", COMPLETION_SENTINEL);
        let backend = CliBackend::custom(
            "sh".into(),
            vec!["-c".into(), script],
            PromptMode::Arg,
            None,
        );
        let adapter = ProcessAgentAdapter::new(
            backend,
            Capabilities {
                supports_streaming: false,
                supports_interrupt: false,
                supports_file_context: false,
                supports_subagent_tracing: false,
                structured_output_format: None,
            },
        );
        let invocation = AgentInvocation {
            prompt: "ignored-because-shell-builds-its-own-command".to_string(),
            cwd: std::env::temp_dir(),
            timeout: Duration::from_secs(5),
            max_output_bytes: 4096,
            extra_flags: Vec::new(),
            model: None,
        };
        let result = adapter.invoke(invocation).await;
        assert_eq!(result.exit_code, Some(0));
        assert!(result.observed_completion());
    }

    #[tokio::test]
    async fn invoke_reports_timeout_when_process_hangs() {
        let backend = CliBackend::custom("sleep".into(), vec!["5".into()], PromptMode::Arg, None);
        let adapter = ProcessAgentAdapter::new(
            backend,
            Capabilities::default(),
        );
        let invocation = AgentInvocation {
            prompt: String::new(),
            cwd: std::env::temp_dir(),
            timeout: Duration::from_millis(100),
            max_output_bytes: 4096,
            extra_flags: Vec::new(),
            model: None,
        };
        let result = adapter.invoke(invocation).await;
        assert_eq!(result.status, AgentStatus::Timeout);
    }

    #[tokio::test]
    async fn invoke_appends_model_flag_last() {
        // "sh -c 'echo "$@"' -- " prints its trailing argv, which should end
        // with the engine-injected --model flag per the flag-ordering rule.
        let backend = CliBackend::custom(
            "sh".into(),
            vec!["-c".into(), "echo \"$@\"".into(), "--".into()],
            PromptMode::Arg,
            None,
        );
        let adapter = ProcessAgentAdapter::new(backend, Capabilities::default());
        let invocation = AgentInvocation {
            prompt: "hello".to_string(),
            cwd: std::env::temp_dir(),
            timeout: Duration::from_secs(5),
            max_output_bytes: 4096,
            extra_flags: vec!["--extra".to_string()],
            model: Some("gpt-5".to_string()),
        };
        let result = adapter.invoke(invocation).await;
        assert!(result.stdout.trim_end().ends_with("--extra"));
        assert!(result.stdout.contains("--model gpt-5"));
    }

    #[test]
    fn validate_model_rejects_blank_names() {
        let adapter = ProcessAgentAdapter::new(echo_backend(PromptMode::Arg), Capabilities::default());
        assert!(matches!(adapter.validate_model("  "), ModelValidation::Invalid { .. }));
        assert!(matches!(adapter.validate_model("gpt-5"), ModelValidation::Ok));
    }
}
