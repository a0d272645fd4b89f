//! Wires the Session Manager, Scheduler, Tracker Adapter, Worktree Manager,
//! and Iteration/Parallel Executors into the single loop both `run` and
//! `resume` drive. This is the headless equivalent of the teacher's
//! `loop_runner`, minus everything PTY- and TUI-specific.

use crate::conflict_agent::BlockingConflictAgent;
use crate::errors;
use crate::signals::{spawn_force_kill_on_second_signal, ShutdownSignal};
use ralph_adapters::ProcessAgentAdapter;
use ralph_core::conflict_resolver::ConflictAgent;
use ralph_core::{
    git_ops, BeadsLikeTracker, IterationEngine, IterationLogger, JsonPrdTracker, ParallelExecutor,
    RalphConfig, Scheduler, SessionGuard, SessionManager, TrackerAdapter, TrackerKind,
    WorktreeManager,
};
use ralph_proto::{ErrorHandlingPolicy, RalphError, Session, SessionStatus, StopReason, TaskCounts};
use sha1::{Digest, Sha1};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

const COMMIT_TEMPLATE: &str = "feat: [<task-id>] - <task-title>";
const DEFAULT_AGENT_TIMEOUT_MS: u64 = 600_000;

/// CLI-neutral description of one orchestration run, built by `main` from
/// either `RunArgs` or `ResumeArgs`.
pub struct OrchestrationRequest {
    pub cwd: PathBuf,
    pub tracker: Option<String>,
    pub prd: Option<PathBuf>,
    pub epic: Option<String>,
    pub agent: Option<String>,
    pub model: Option<String>,
    pub iterations: Option<u32>,
    pub parallel: Option<u32>,
    pub worktree: Option<Option<String>>,
    pub resume_in_place: bool,
    pub force: bool,
    pub no_setup: bool,
}

fn sync_binary_for(kind: TrackerKind) -> Option<&'static str> {
    match kind {
        TrackerKind::Json => None,
        TrackerKind::Beads => Some("bd"),
        TrackerKind::BeadsRust => Some("br"),
        TrackerKind::BeadsBv => Some("bv"),
    }
}

fn build_agent(
    name: &str,
    command: Option<&str>,
    agent_options: &ralph_core::config::AgentOptions,
) -> Result<ProcessAgentAdapter, RalphError> {
    let adapter = if name == "custom" {
        let command = command.ok_or_else(|| {
            RalphError::Config("agent \"custom\" requires a `command` in config".to_string())
        })?;
        let mut parts = command.split_whitespace();
        let binary = parts
            .next()
            .ok_or_else(|| RalphError::Config("`command` is empty".to_string()))?
            .to_string();
        let base_args: Vec<String> = parts.map(str::to_string).collect();
        let backend = ralph_adapters::CliBackend::custom(
            binary,
            base_args,
            ralph_adapters::PromptMode::Arg,
            None,
        );
        ProcessAgentAdapter::new(
            backend,
            ralph_core::Capabilities {
                supports_interrupt: true,
                ..Default::default()
            },
        )
    } else {
        ProcessAgentAdapter::known(name).map_err(errors::unknown_backend)?
    };

    Ok(adapter.with_env_filter(
        agent_options.env_exclude.clone(),
        agent_options.env_passthrough.clone(),
    ))
}

fn open_tracker_for(
    kind: TrackerKind,
    repo_root: &Path,
    prd_path: &Path,
    epic_id: Option<&str>,
) -> Result<Box<dyn TrackerAdapter>, RalphError> {
    match kind {
        TrackerKind::Json => Ok(Box::new(
            JsonPrdTracker::open(prd_path).map_err(errors::tracker)?,
        )),
        TrackerKind::Beads => Ok(Box::new(BeadsLikeTracker::new(
            "bd",
            repo_root.to_path_buf(),
            epic_id.map(str::to_string),
        ))),
        TrackerKind::BeadsRust => Ok(Box::new(BeadsLikeTracker::new(
            "br",
            repo_root.to_path_buf(),
            epic_id.map(str::to_string),
        ))),
        TrackerKind::BeadsBv => Ok(Box::new(BeadsLikeTracker::new(
            "bv",
            repo_root.to_path_buf(),
            epic_id.map(str::to_string),
        ))),
    }
}

fn config_path_candidates(cwd: &Path) -> [PathBuf; 3] {
    let dir = cwd.join(".ralph-tui");
    [
        dir.join("config.toml"),
        dir.join("config.yaml"),
        dir.join("config.yml"),
    ]
}

fn load_config(cwd: &Path) -> Result<RalphConfig, RalphError> {
    for candidate in config_path_candidates(cwd) {
        if candidate.exists() {
            return RalphConfig::from_file(&candidate).map_err(errors::config);
        }
    }
    Ok(RalphConfig::default())
}

fn fingerprint(config: &RalphConfig) -> Result<String, RalphError> {
    let bytes = serde_json::to_vec(config)
        .map_err(|e| RalphError::Config(format!("failed to fingerprint config: {e}")))?;
    let mut hasher = Sha1::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

pub async fn execute(req: OrchestrationRequest) -> Result<StopReason, RalphError> {
    let cwd = std::fs::canonicalize(&req.cwd).map_err(RalphError::Io)?;
    let config = load_config(&cwd)?;

    let tracker_kind: TrackerKind = req
        .tracker
        .clone()
        .unwrap_or_else(|| config.tracker.clone())
        .parse()
        .map_err(errors::config)?;

    let agent_name = req
        .agent
        .clone()
        .or_else(|| config.agent.clone())
        .ok_or_else(|| {
            RalphError::Config("no agent configured; pass --agent or set `agent` in config".to_string())
        })?;
    let agent = build_agent(&agent_name, config.command.as_deref(), &config.agent_options)?;
    let default_flags = config.agent_options.default_flags.clone();

    if !req.no_setup {
        let preflight = agent.preflight().await;
        if !preflight.ok {
            return Err(RalphError::AgentUnavailable(
                preflight
                    .fail_reason
                    .unwrap_or_else(|| "agent preflight check failed".to_string()),
            ));
        }
    }

    let session_model = req.model.clone().or_else(|| config.agent_options.model.clone());
    let parallel = req.parallel.unwrap_or(config.parallel).max(1);
    let max_iterations = req.iterations.unwrap_or(config.max_iterations);
    let epic_id = req.epic.clone().or_else(|| config.tracker_options.epic_id.clone());
    let prd_path = req
        .prd
        .clone()
        .or_else(|| config.tracker_options.path.clone().map(PathBuf::from))
        .unwrap_or_else(|| cwd.join("PRD.json"));
    let want_worktree = req.worktree.clone().or(if config.worktree { Some(None) } else { None });

    let guard: SessionGuard = SessionManager::acquire(&cwd, req.force).map_err(errors::session)?;
    let manager = SessionManager;

    let existing = if req.resume_in_place {
        manager.load(&cwd).map_err(errors::session)?
    } else {
        None
    };

    let config_fingerprint = fingerprint(&config)?;
    let mut session = match existing {
        Some(s) => {
            if s.config_fingerprint != config_fingerprint {
                warn!("resumed session's config has drifted since it was started; continuing with the live config");
            }
            s
        }
        None => Session {
            id: uuid::Uuid::new_v4(),
            cwd: cwd.clone(),
            tracker_plugin_id: format!("{tracker_kind:?}").to_lowercase(),
            agent_plugin_id: agent_name.clone(),
            iteration: 0,
            counts: TaskCounts::default(),
            max_iterations: Some(max_iterations),
            iteration_delay_ms: config.iteration_delay,
            error_handling: ErrorHandlingPolicy::from(config.error_handling.clone()),
            worktree_path: None,
            status: SessionStatus::Running,
            stop_reason: None,
            started_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            config_fingerprint: config_fingerprint.clone(),
        },
    };
    session.max_iterations = Some(max_iterations);
    guard.record_session_id(session.id).map_err(RalphError::Io)?;

    let original_branch = git_ops::current_branch(&cwd)
        .map_err(|e| RalphError::Config(format!("failed to resolve current branch: {e}")))?;

    // Session-level worktree only applies to the serial path; combining it
    // with `--parallel > 1` isn't a scenario this CLI supports, since the
    // worker worktrees already branch off the main repo independently.
    let session_worktree = if parallel <= 1 {
        if let Some(custom) = &want_worktree {
            let project = ralph_core::worktree_manager::sanitize_name(
                &cwd.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
            );
            let name = ralph_core::worktree_manager::derive_name(
                custom.as_deref(),
                epic_id.as_deref(),
                Some(prd_path.as_path()),
                &session.id,
            );
            let branch = ralph_core::worktree_manager::session_branch(&name);
            let path = ralph_core::worktree_manager::worktree_path(&cwd, &project, &name);
            let wt_manager = WorktreeManager::new(cwd.clone());
            let descriptor = wt_manager.create_or_resume(&path, &branch).map_err(errors::worktree)?;
            wt_manager.propagate_config(&descriptor.path).map_err(RalphError::Io)?;
            session.worktree_path = Some(descriptor.path.clone());
            Some((wt_manager, descriptor))
        } else {
            None
        }
    } else {
        None
    };

    let (effective_repo, effective_prd) = match &session_worktree {
        Some((wt_manager, descriptor)) => {
            let prd = if tracker_kind == TrackerKind::Json && prd_path.exists() {
                wt_manager
                    .propagate_json_prd(&descriptor.path, &prd_path)
                    .map_err(RalphError::Io)?
            } else {
                prd_path.clone()
            };
            if let Some(binary) = sync_binary_for(tracker_kind) {
                wt_manager
                    .propagate_beads_data(&descriptor.path, binary)
                    .map_err(RalphError::Io)?;
            }
            (descriptor.path.clone(), prd)
        }
        None => (cwd.clone(), prd_path.clone()),
    };

    let logger = IterationLogger::new(&cwd);
    let mut tracker = open_tracker_for(tracker_kind, &effective_repo, &effective_prd, epic_id.as_deref())?;
    let mut scheduler = Scheduler::new();
    let policy = session.error_handling.clone();
    let conflict_config = config.conflict_resolution.clone();
    let timeout = Duration::from_millis(config.agent_options.timeout.unwrap_or(DEFAULT_AGENT_TIMEOUT_MS));
    let iteration_delay = Duration::from_millis(session.iteration_delay_ms);

    let conflict_agent = if conflict_config.enabled {
        Some(BlockingConflictAgent::new(&agent, cwd.clone()))
    } else {
        None
    };

    let mut iteration_number = session.iteration;
    let mut shutdown = ShutdownSignal::install();
    let stop_reason;

    loop {
        let tasks = tracker.list_tasks().map_err(errors::tracker)?;
        ralph_core::tracker::warn_on_suspicious_empty_listing(tasks.len(), session.counts.total);
        if session.counts.total == 0 {
            session.counts.total = tasks.len() as u32;
        }

        if iteration_number >= max_iterations {
            stop_reason = StopReason::MaxIterations;
            break;
        }

        let selection = scheduler.next_batch(&tasks, parallel as usize, None);
        if selection.is_empty() {
            stop_reason = if tasks.iter().all(|t| t.status == ralph_proto::TaskStatus::Closed) {
                StopReason::Completed
            } else {
                StopReason::NoTasks
            };
            break;
        }

        iteration_number += 1;
        session.iteration = iteration_number;

        if parallel <= 1 {
            let task = &selection.tasks[0];
            let engine = IterationEngine::new(&effective_repo, &policy, tracker_kind, &logger);
            let run_fut = engine.run(
                iteration_number,
                task,
                &agent,
                tracker.as_mut(),
                timeout,
                iteration_delay,
                session_model.as_deref(),
                COMMIT_TEMPLATE,
                None,
                &default_flags,
            );
            tokio::select! {
                biased;
                cause = shutdown.recv() => {
                    warn!(?cause, "shutdown signal received, pausing session");
                    stop_reason = cause.stop_reason();
                    spawn_force_kill_on_second_signal(shutdown.clone());
                    break;
                }
                result = run_fut => {
                    let outcome = result.map_err(errors::iteration)?;
                    session.counts.attempted += 1;
                    match outcome.closure {
                        ralph_proto::ClosureDecision::Closed => session.counts.closed += 1,
                        ralph_proto::ClosureDecision::Failed => session.counts.failed += 1,
                        ralph_proto::ClosureDecision::Unproductive => {}
                    }
                }
            }
        } else {
            let sync_binary = sync_binary_for(tracker_kind);
            let session_name = session.id.to_string();
            let executor = ParallelExecutor::new(
                &cwd,
                &session_name,
                &original_branch,
                tracker_kind,
                &policy,
                &conflict_config,
                &logger,
                &default_flags,
            );
            let prd_rel = prd_path
                .strip_prefix(&cwd)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| PathBuf::from(prd_path.file_name().unwrap_or_default()));
            let round_fut = executor.run_round(
                &mut scheduler,
                selection.tasks,
                &agent,
                |p: &Path| -> Result<Box<dyn TrackerAdapter>, ralph_core::TrackerError> {
                    match tracker_kind {
                        TrackerKind::Json => Ok(Box::new(JsonPrdTracker::open(p.join(&prd_rel))?)),
                        TrackerKind::Beads => {
                            Ok(Box::new(BeadsLikeTracker::new("bd", p.to_path_buf(), epic_id.clone())))
                        }
                        TrackerKind::BeadsRust => {
                            Ok(Box::new(BeadsLikeTracker::new("br", p.to_path_buf(), epic_id.clone())))
                        }
                        TrackerKind::BeadsBv => {
                            Ok(Box::new(BeadsLikeTracker::new("bv", p.to_path_buf(), epic_id.clone())))
                        }
                    }
                },
                sync_binary,
                timeout,
                iteration_delay,
                COMMIT_TEMPLATE,
                iteration_number,
                conflict_agent.as_ref().map(|a| a as &dyn ConflictAgent),
            );

            tokio::select! {
                biased;
                cause = shutdown.recv() => {
                    warn!(?cause, "shutdown signal received, pausing session");
                    stop_reason = cause.stop_reason();
                    spawn_force_kill_on_second_signal(shutdown.clone());
                    break;
                }
                result = round_fut => {
                    let outcomes = result.map_err(errors::parallel)?;
                    for outcome in outcomes {
                        session.counts.attempted += 1;
                        if outcome.merged {
                            session.counts.closed += 1;
                        } else if outcome.error.is_some() {
                            session.counts.failed += 1;
                        }
                    }
                }
            }
        }

        manager.save(&session).map_err(errors::session)?;
    }

    if stop_reason == StopReason::Completed {
        if let Some((wt_manager, descriptor)) = &session_worktree {
            wt_manager
                .merge_back(&descriptor.path, &descriptor.branch, &original_branch)
                .map_err(errors::worktree)?;
            session.worktree_path = None;
        }
    }

    session.set_stop_reason(stop_reason);
    manager.finalize(&session).map_err(errors::session)?;
    info!(?stop_reason, iterations = session.iteration, closed = session.counts.closed, total = session.counts.total, "session stopped");
    drop(guard);

    Ok(stop_reason)
}

/// Exit code per the documented mapping: 0 complete (including "nothing to
/// do"), 1 incomplete/interrupted, terminal `RalphError`s carry their own.
pub fn stop_reason_exit_code(reason: StopReason) -> i32 {
    match reason {
        StopReason::Completed | StopReason::NoTasks => 0,
        StopReason::MaxIterations
        | StopReason::UserQuit
        | StopReason::UserPause
        | StopReason::ExternalSignal
        | StopReason::FatalError => 1,
    }
}
