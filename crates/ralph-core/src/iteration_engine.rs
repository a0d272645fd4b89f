//! Runs one unit of agent work on one task: prepare, resolve model, assemble
//! prompt, execute, detect completion, commit, close, log, delay. The
//! Parallel Executor drives N of these concurrently, one per worker
//! worktree; a single-worker session drives one directly.

use crate::agent::{AgentAdapter, AgentInvocation, AgentStatus, ModelValidation};
use crate::config::{ConfigError, TrackerKind};
use crate::git_ops::{self, GitOpsError};
use crate::logger::{IterationLogger, LogLevel, LogRecord, OrchestratorEvent};
use crate::tracker::{TrackerAdapter, TrackerError};
use ralph_proto::{ClosureDecision, ErrorHandlingPolicy, ErrorStrategy, Iteration, ModelSource, Task};
use sha1::{Digest, Sha1};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum IterationEngineError {
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error(transparent)]
    Git(#[from] GitOpsError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("iteration aborted per error-handling policy: {0}")]
    Aborted(String),
}

/// What happened to the task after one `run` call, including however many
/// retries the error-handling policy spent getting there.
#[derive(Debug, Clone)]
pub struct IterationOutcome {
    pub iteration: Iteration,
    pub closure: ClosureDecision,
}

pub struct IterationEngine<'a> {
    repo: &'a Path,
    policy: &'a ErrorHandlingPolicy,
    tracker_kind: TrackerKind,
    logger: &'a IterationLogger,
}

impl<'a> IterationEngine<'a> {
    pub fn new(
        repo: &'a Path,
        policy: &'a ErrorHandlingPolicy,
        tracker_kind: TrackerKind,
        logger: &'a IterationLogger,
    ) -> Self {
        Self { repo, policy, tracker_kind, logger }
    }

    /// Runs the full 9-step flow for `task`, retrying per the configured
    /// error-handling policy on agent failure. Completion-sentinel absence
    /// on a clean exit is never retried here — it's not an error, the task
    /// simply stays open for the next scheduling pass.
    pub async fn run(
        &self,
        number: u32,
        task: &Task,
        agent: &dyn AgentAdapter,
        tracker: &mut dyn TrackerAdapter,
        timeout: Duration,
        iteration_delay: Duration,
        resolved_model: Option<&str>,
        commit_template: &str,
        project_context: Option<&str>,
        default_flags: &[String],
    ) -> Result<IterationOutcome, IterationEngineError> {
        let started_at = chrono::Utc::now();
        self.logger.publish(OrchestratorEvent::IterationStarted {
            number,
            task_ids: vec![task.id.clone()],
        });
        self.logger.log(
            number,
            &LogRecord::new(LogLevel::Info, "iteration:start", format!("task {} ({})", task.id, task.title)),
        )?;

        // Step 1: prepare.
        tracker.update_task_status(&task.id, ralph_proto::TaskStatus::InProgress)?;

        // Step 2: resolve model.
        let (model, model_source) = self.resolve_model(task, resolved_model, agent);

        // Step 3: assemble prompt.
        let prompt = self.assemble_prompt(task, project_context);
        let prompt_hash = hex_sha1(prompt.as_bytes());

        let mut retry_count = 0;
        let mut last_exit_code = None;
        let mut closure;
        let mut command_line = vec!["<agent>".to_string()];

        loop {
            // Step 4: execute.
            let invocation = AgentInvocation {
                prompt: prompt.clone(),
                cwd: self.repo.to_path_buf(),
                timeout,
                max_output_bytes: 10 * 1024 * 1024,
                extra_flags: default_flags.to_vec(),
                model: model.clone(),
            };
            command_line = build_command_line_summary(&invocation);
            let result = agent.invoke(invocation).await;
            last_exit_code = result.exit_code;

            self.logger.log(
                number,
                &LogRecord::new(LogLevel::Debug, "agent:stdout", result.stdout.clone()),
            )?;

            // Step 5: detect completion.
            if result.observed_completion() {
                closure = ClosureDecision::Closed;
                break;
            }

            // A clean exit with no sentinel is non-completion, not an error:
            // leave the task open and stop retrying this iteration.
            if matches!(result.status, AgentStatus::Completed) && result.exit_code == Some(0) {
                closure = ClosureDecision::Unproductive;
                warn!(task_id = %task.id, "agent exited cleanly without the completion sentinel");
                break;
            }

            // Everything else is a policy-governed failure.
            if self.policy.continue_on_non_zero_exit {
                closure = ClosureDecision::Unproductive;
                break;
            }

            match self.policy.strategy {
                ErrorStrategy::Retry if retry_count < self.policy.max_retries => {
                    retry_count += 1;
                    let delay = Duration::from_millis(self.policy.retry_delay_ms * retry_count as u64);
                    warn!(task_id = %task.id, attempt = retry_count, ?delay, "retrying after agent failure");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                ErrorStrategy::Retry => {
                    closure = ClosureDecision::Failed;
                    break;
                }
                ErrorStrategy::Skip => {
                    closure = ClosureDecision::Failed;
                    break;
                }
                ErrorStrategy::Abort => {
                    self.logger.log(
                        number,
                        &LogRecord::new(LogLevel::Error, "iteration:abort", "error-handling policy is abort"),
                    )?;
                    return Err(IterationEngineError::Aborted(task.id.clone()));
                }
            }
        }

        // Step 6: commit.
        let message = render_commit_message(commit_template, &task.id, &task.title);
        let commit_sha = git_ops::commit_all(self.repo, &message)?;

        // Step 7: close.
        if closure == ClosureDecision::Closed {
            tracker.close_task(&task.id)?;
            self.logger.publish(OrchestratorEvent::TaskClosed { task_id: task.id.clone() });
            self.logger.log(number, &LogRecord::new(LogLevel::Info, "task:closed", task.id.clone()))?;
        } else if closure == ClosureDecision::Failed {
            tracker.update_task_status(&task.id, ralph_proto::TaskStatus::Open)?;
        }

        let mut closure_map = std::collections::HashMap::new();
        closure_map.insert(task.id.clone(), closure);

        let mut iteration = Iteration {
            number,
            started_at,
            ended_at: None,
            task_ids: vec![task.id.clone()],
            command_line,
            prompt_hash,
            resolved_model: model,
            model_source: Some(model_source),
            exit_code: last_exit_code,
            elapsed_ms: (chrono::Utc::now() - started_at).num_milliseconds().max(0) as u64,
            closure: closure_map,
            retry_count,
        };
        iteration.finish(last_exit_code);

        // Step 8: log.
        self.logger.log(
            number,
            &LogRecord::new(
                LogLevel::Info,
                "iteration:end",
                format!(
                    "closure={closure:?} exit_code={last_exit_code:?} commit={commit_sha:?} retries={retry_count}"
                ),
            ),
        )?;
        self.logger.publish(OrchestratorEvent::IterationFinished { number, exit_code: last_exit_code });

        // Step 9: delay.
        if !iteration_delay.is_zero() {
            tokio::time::sleep(iteration_delay).await;
        }

        Ok(IterationOutcome { iteration, closure })
    }

    /// Precedence: `task.model` → session config model → agent default (no
    /// flag injected). An invalid choice at any step is a warning, never a
    /// hard error, and falls through to the next candidate.
    fn resolve_model(
        &self,
        task: &Task,
        session_model: Option<&str>,
        agent: &dyn AgentAdapter,
    ) -> (Option<String>, ModelSource) {
        if let Some(model) = task.model.as_deref() {
            match agent.validate_model(model) {
                ModelValidation::Ok => return (Some(model.to_string()), ModelSource::Task),
                ModelValidation::Invalid { reason } => {
                    warn!(task_id = %task.id, model, reason, "task-level model rejected by agent, falling back");
                }
            }
        }
        if let Some(model) = session_model {
            match agent.validate_model(model) {
                ModelValidation::Ok => return (Some(model.to_string()), ModelSource::SessionConfig),
                ModelValidation::Invalid { reason } => {
                    warn!(task_id = %task.id, model, reason, "session-level model rejected by agent, falling back to agent default");
                }
            }
        }
        (None, ModelSource::AgentDefault)
    }

    fn assemble_prompt(&self, task: &Task, project_context: Option<&str>) -> String {
        let mut out = String::new();
        if let Some(ctx) = project_context {
            out.push_str(ctx);
            out.push_str("\n\n");
        }
        out.push_str(&format!("Task {}: {}\n", task.id, task.title));
        if let Some(desc) = &task.description {
            out.push_str(&format!("\nDescription:\n{desc}\n"));
        }
        if let Some(acc) = &task.acceptance {
            out.push_str(&format!("\nAcceptance criteria:\n{acc}\n"));
        }
        out.push_str("\nWhen finished, close this out per the project's tracker: ");
        out.push_str(self.closure_instructions());
        out.push_str(&format!(
            "\nSignal completion by emitting the literal text {} once all acceptance criteria are satisfied.\n",
            crate::agent::COMPLETION_SENTINEL
        ));
        out
    }

    fn closure_instructions(&self) -> &'static str {
        match self.tracker_kind {
            TrackerKind::Json => "flip this story's `passes` flag to true in the PRD file.",
            TrackerKind::Beads | TrackerKind::BeadsRust | TrackerKind::BeadsBv => {
                "run `bd update <id> --status=closed --close_reason=<summary>`."
            }
        }
    }
}

fn render_commit_message(template: &str, task_id: &str, task_title: &str) -> String {
    template
        .replace("<task-id>", task_id)
        .replace("<task-title>", task_title)
}

fn build_command_line_summary(invocation: &AgentInvocation) -> Vec<String> {
    let mut line = vec!["<agent>".to_string()];
    if let Some(model) = &invocation.model {
        line.push("--model".to_string());
        line.push(model.clone());
    }
    line.extend(invocation.extra_flags.iter().cloned());
    line
}

fn hex_sha1(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
