//! Runs up to N Iteration Engines concurrently, each privately in its own
//! sibling git worktree, then serializes merges back to the session branch
//! through the Conflict Resolver. A crashed or erroring worker leaves its
//! worktree untouched for inspection or a later retry; it never takes down
//! the other workers in the same round.

use crate::agent::AgentAdapter;
use crate::conflict_resolver::{ConflictAgent, ConflictResolver, ConflictResolverError, Resolution};
use crate::config::{ConflictResolutionConfig, TrackerKind};
use crate::git_ops::{self, GitOpsError};
use crate::iteration_engine::{IterationEngine, IterationOutcome};
use crate::logger::IterationLogger;
use crate::scheduler::Scheduler;
use crate::tracker::{TrackerAdapter, TrackerError};
use crate::worktree_manager::{self, WorktreeManager, WorktreeManagerError};
use futures::future::join_all;
use ralph_proto::{ErrorHandlingPolicy, Task};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ParallelExecutorError {
    #[error(transparent)]
    Worktree(#[from] WorktreeManagerError),
    #[error(transparent)]
    Git(#[from] GitOpsError),
    #[error(transparent)]
    Conflict(#[from] ConflictResolverError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// What happened to one worker's task: its private iteration, and then
/// whatever the serialized merge step decided.
pub struct WorkerOutcome {
    pub worker: u32,
    pub task_id: String,
    pub task_title: String,
    pub branch: String,
    pub worktree_path: PathBuf,
    pub iteration: Option<IterationOutcome>,
    pub merged: bool,
    pub error: Option<String>,
}

pub struct ParallelExecutor<'a> {
    repo_root: &'a Path,
    worktrees: WorktreeManager,
    session_name: &'a str,
    original_branch: &'a str,
    tracker_kind: TrackerKind,
    policy: &'a ErrorHandlingPolicy,
    conflict_config: &'a ConflictResolutionConfig,
    logger: &'a IterationLogger,
    default_flags: &'a [String],
}

impl<'a> ParallelExecutor<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repo_root: &'a Path,
        session_name: &'a str,
        original_branch: &'a str,
        tracker_kind: TrackerKind,
        policy: &'a ErrorHandlingPolicy,
        conflict_config: &'a ConflictResolutionConfig,
        logger: &'a IterationLogger,
        default_flags: &'a [String],
    ) -> Self {
        Self {
            repo_root,
            worktrees: WorktreeManager::new(repo_root.to_path_buf()),
            session_name,
            original_branch,
            tracker_kind,
            policy,
            conflict_config,
            logger,
            default_flags,
        }
    }

    /// Runs one admitted batch of tasks, one worker worktree per task, then
    /// merges results back in task order. `open_tracker` builds a fresh
    /// tracker bound to the copy of tracker state propagated into each
    /// worktree (a JSON PRD file or a beads database directory).
    #[allow(clippy::too_many_arguments)]
    pub async fn run_round(
        &self,
        scheduler: &mut Scheduler,
        tasks: Vec<Task>,
        agent: &dyn AgentAdapter,
        open_tracker: impl Fn(&Path) -> Result<Box<dyn TrackerAdapter>, TrackerError>,
        sync_binary: Option<&str>,
        timeout: Duration,
        iteration_delay: Duration,
        commit_template: &str,
        iteration_number: u32,
        conflict_agent: Option<&dyn ConflictAgent>,
    ) -> Result<Vec<WorkerOutcome>, ParallelExecutorError> {
        for task in &tasks {
            scheduler.mark_in_flight(&task.id);
        }

        let project = worktree_manager::sanitize_name(self.session_name);
        let futures = tasks.into_iter().enumerate().map(|(idx, task)| {
            let worker = idx as u32 + 1;
            self.run_worker(worker, task, &project, agent, &open_tracker, sync_binary, timeout, iteration_delay, commit_template, iteration_number)
        });

        let mut outcomes: Vec<WorkerOutcome> = join_all(futures).await;

        for outcome in outcomes.iter_mut() {
            scheduler.release(&outcome.task_id);
            if outcome.error.is_some() {
                warn!(task_id = %outcome.task_id, worktree = %outcome.worktree_path.display(), "worker failed, worktree preserved for retry");
                continue;
            }
            match self.merge_worker(
                &outcome.worktree_path,
                &outcome.branch,
                &outcome.task_id,
                &outcome.task_title,
                conflict_agent,
            ) {
                Ok(merged) => outcome.merged = merged,
                Err(e) => {
                    warn!(task_id = %outcome.task_id, error = %e, "merge failed, worktree preserved");
                    outcome.error = Some(e.to_string());
                }
            }
        }

        Ok(outcomes)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_worker(
        &self,
        worker: u32,
        task: Task,
        project: &str,
        agent: &dyn AgentAdapter,
        open_tracker: &impl Fn(&Path) -> Result<Box<dyn TrackerAdapter>, TrackerError>,
        sync_binary: Option<&str>,
        timeout: Duration,
        iteration_delay: Duration,
        commit_template: &str,
        iteration_number: u32,
    ) -> WorkerOutcome {
        let branch = worktree_manager::worker_branch(self.session_name, worker);
        let name = format!("{}-{worker}", self.session_name);
        let path = worktree_manager::worktree_path(self.repo_root, project, &name);
        let task_title = task.title.clone();

        let prepared = self.prepare_worker(&path, &branch, sync_binary);
        let (path, branch) = match prepared {
            Ok(()) => (path, branch),
            Err(e) => {
                return WorkerOutcome {
                    worker,
                    task_id: task.id,
                    task_title,
                    branch,
                    worktree_path: path,
                    iteration: None,
                    merged: false,
                    error: Some(e.to_string()),
                };
            }
        };

        let mut tracker = match open_tracker(&path) {
            Ok(t) => t,
            Err(e) => {
                return WorkerOutcome {
                    worker,
                    task_id: task.id,
                    task_title,
                    branch,
                    worktree_path: path,
                    iteration: None,
                    merged: false,
                    error: Some(e.to_string()),
                };
            }
        };

        let worker_logger = IterationLogger::new(&path);
        let engine = IterationEngine::new(&path, self.policy, self.tracker_kind, &worker_logger);
        let result = engine
            .run(
                iteration_number,
                &task,
                agent,
                tracker.as_mut(),
                timeout,
                iteration_delay,
                None,
                commit_template,
                None,
                self.default_flags,
            )
            .await;

        match result {
            Ok(outcome) => {
                info!(worker, task_id = %task.id, branch = %branch, "worker iteration complete");
                WorkerOutcome {
                    worker,
                    task_id: task.id,
                    task_title,
                    branch,
                    worktree_path: path,
                    iteration: Some(outcome),
                    merged: false,
                    error: None,
                }
            }
            Err(e) => WorkerOutcome {
                worker,
                task_id: task.id,
                task_title,
                branch,
                worktree_path: path,
                iteration: None,
                merged: false,
                error: Some(e.to_string()),
            },
        }
    }

    fn prepare_worker(
        &self,
        path: &Path,
        branch: &str,
        sync_binary: Option<&str>,
    ) -> Result<(), ParallelExecutorError> {
        self.worktrees.create_or_resume(path, branch)?;
        self.worktrees.propagate_config(path)?;
        match (self.tracker_kind, sync_binary) {
            (TrackerKind::Json, _) => {}
            (_, Some(binary)) => self.worktrees.propagate_beads_data(path, binary)?,
            (_, None) => {}
        }
        Ok(())
    }

    /// Checks out the session branch, attempts the merge without
    /// committing, resolves any conflicts, and commits. Returns `false`
    /// (worktree and branch preserved) if resolution left files unresolved.
    fn merge_worker(
        &self,
        worktree_path: &Path,
        branch: &str,
        task_id: &str,
        task_title: &str,
        conflict_agent: Option<&dyn ConflictAgent>,
    ) -> Result<bool, ParallelExecutorError> {
        self.worktrees.preserve_iteration_logs(worktree_path)?;
        git_ops::checkout(self.repo_root, self.original_branch)?;

        let clean = git_ops::merge_no_commit(self.repo_root, branch)?;
        if !clean {
            let resolver = ConflictResolver::new(self.repo_root, self.conflict_config);
            let conflicts = resolver.detect(task_id, task_title)?;
            let resolutions = resolver.resolve_all(&conflicts, conflict_agent)?;
            if resolutions.iter().any(|r| matches!(r, Resolution::Unresolved)) {
                git_ops::merge_abort(self.repo_root)?;
                warn!(branch, "conflict left unresolved, worktree preserved for manual resolution");
                return Ok(false);
            }
        }

        git_ops::commit_all(self.repo_root, &format!("merge: {branch}"))?;
        git_ops::worktree_remove(self.repo_root, worktree_path)?;
        git_ops::delete_branch(self.repo_root, branch)?;
        git_ops::worktree_prune(self.repo_root)?;
        info!(branch, "worker merged back and worktree removed");
        Ok(true)
    }
}
