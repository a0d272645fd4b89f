//! # ralph-cli
//!
//! Binary entry point for Ralph-TUI's headless orchestration commands:
//! `run` drives a fresh or resumed session to completion (or to a safe
//! stopping point); `resume` re-enters an existing session, optionally just
//! to inspect or clean it up.

mod conflict_agent;
mod errors;
mod orchestrator;
mod signals;

use anyhow::Result;
use clap::{Parser, Subcommand};
use orchestrator::OrchestrationRequest;
use ralph_core::{SessionManager, SessionManagerError};
use ralph_proto::RalphError;
use std::path::PathBuf;
use tracing::{error, info};

/// Ralph-TUI - autonomous task-orchestration harness
#[derive(Parser, Debug)]
#[command(name = "ralph", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (debug-level logging)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start (or resume in place) the orchestration loop
    Run(RunArgs),
    /// Resume, list, or clean up a previously started session
    Resume(ResumeArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Working directory for the session (default: current directory)
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Tracker backend: json, beads, beads-rust, beads-bv
    #[arg(long)]
    tracker: Option<String>,

    /// Path to the PRD file (json tracker only)
    #[arg(long)]
    prd: Option<PathBuf>,

    /// Epic id to scope the tracker to (beads-family trackers)
    #[arg(long)]
    epic: Option<String>,

    /// Agent backend: claude, kiro, gemini, codex, amp, copilot, opencode, custom
    #[arg(long)]
    agent: Option<String>,

    /// Model to request from the agent
    #[arg(long)]
    model: Option<String>,

    /// Maximum iterations before stopping
    #[arg(long)]
    iterations: Option<u32>,

    /// Number of tasks to run concurrently, each in its own worktree
    #[arg(long)]
    parallel: Option<u32>,

    /// Run the whole session inside an isolated worktree, optionally named
    #[arg(long, num_args = 0..=1, default_missing_value = "")]
    worktree: Option<String>,

    /// Resume an existing session for this directory instead of starting fresh
    #[arg(long)]
    resume: bool,

    /// Headless mode (accepted for compatibility; this binary is always headless)
    #[arg(long)]
    headless: bool,

    /// Force-acquire the session lock, overriding a stale or live holder
    #[arg(long)]
    force: bool,

    /// Skip the agent preflight check
    #[arg(long)]
    no_setup: bool,
}

#[derive(Parser, Debug)]
struct ResumeArgs {
    /// Session id to resume (defaults to the session for --cwd)
    session_id: Option<String>,

    /// Working directory for the session (default: current directory)
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// List resumable sessions instead of resuming one
    #[arg(long)]
    list: bool,

    /// Remove this session's state instead of resuming it
    #[arg(long)]
    cleanup: bool,

    /// Force-acquire the session lock, overriding a stale or live holder
    #[arg(long)]
    force: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let exit_code = match cli.command {
        Commands::Run(args) => run_command(args).await,
        Commands::Resume(args) => resume_command(args).await,
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

async fn run_command(args: RunArgs) -> i32 {
    let req = OrchestrationRequest {
        cwd: args.cwd.unwrap_or_else(|| PathBuf::from(".")),
        tracker: args.tracker,
        prd: args.prd,
        epic: args.epic,
        agent: args.agent,
        model: args.model,
        iterations: args.iterations,
        parallel: args.parallel,
        worktree: args.worktree.map(|name| if name.is_empty() { None } else { Some(name) }),
        resume_in_place: args.resume,
        force: args.force,
        no_setup: args.no_setup,
    };

    match orchestrator::execute(req).await {
        Ok(reason) => {
            info!(?reason, "run finished");
            orchestrator::stop_reason_exit_code(reason)
        }
        Err(err) => {
            error!("{err}");
            err.exit_code()
        }
    }
}

async fn resume_command(args: ResumeArgs) -> i32 {
    let cwd = match std::fs::canonicalize(args.cwd.unwrap_or_else(|| PathBuf::from("."))) {
        Ok(p) => p,
        Err(e) => {
            error!("{e}");
            return RalphError::Io(e).exit_code();
        }
    };

    if args.list {
        let manager = SessionManager;
        return match manager.list_resumable() {
            Ok(entries) => {
                if entries.is_empty() {
                    println!("no resumable sessions");
                } else {
                    for entry in entries {
                        println!(
                            "{}  {}  {:?}  {}",
                            entry.id,
                            entry.cwd.display(),
                            entry.status,
                            entry.updated_at
                        );
                    }
                }
                0
            }
            Err(e) => {
                error!("{e}");
                session_error_exit_code(e)
            }
        };
    }

    if args.cleanup {
        let manager = SessionManager;
        return match manager.cleanup(&cwd) {
            Ok(()) => {
                println!("cleaned up session state under {}", cwd.display());
                0
            }
            Err(e) => {
                error!("{e}");
                session_error_exit_code(e)
            }
        };
    }

    let cwd = if let Some(id) = &args.session_id {
        let manager = SessionManager;
        match manager.list_resumable() {
            Ok(entries) => match entries.into_iter().find(|e| e.id.to_string() == *id) {
                Some(entry) => entry.cwd,
                None => {
                    error!("no resumable session found with id {id}");
                    return RalphError::Config(format!("no resumable session found with id {id}")).exit_code();
                }
            },
            Err(e) => {
                error!("{e}");
                return session_error_exit_code(e);
            }
        }
    } else {
        cwd
    };

    let req = OrchestrationRequest {
        cwd,
        tracker: None,
        prd: None,
        epic: None,
        agent: None,
        model: None,
        iterations: None,
        parallel: None,
        worktree: None,
        resume_in_place: true,
        force: args.force,
        no_setup: false,
    };

    match orchestrator::execute(req).await {
        Ok(reason) => {
            info!(?reason, "resume finished");
            orchestrator::stop_reason_exit_code(reason)
        }
        Err(err) => {
            error!("{err}");
            err.exit_code()
        }
    }
}

fn session_error_exit_code(e: SessionManagerError) -> i32 {
    errors::session(e).exit_code()
}
