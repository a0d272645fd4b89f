//! Tracker adapters: pluggable backends for where tasks live.
//!
//! `JsonPrdTracker` treats a single PRD file as the source of truth,
//! grounded on the same load/reload/exclusive-lock discipline used
//! elsewhere in this crate for shared files. A `.json` PRD is the documented
//! `{userStories: [...]}` shape where a story's `passes` flag stands in for
//! task status; a `.jsonl` PRD is one story object per line, for trackers
//! that prefer an append-friendly format. `BeadsLikeTracker` shells out to a
//! sync binary (`bd` for the Go implementation, `br` for the Rust port, `bv`
//! for the bv fork) and treats its JSON export as the source of truth
//! instead.

use crate::file_lock::FileLock;
use ralph_proto::{Task, TaskStatus};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::warn;

/// One story as it appears in the PRD JSON/JSONL file. `passes` is the
/// wire-level stand-in for `TaskStatus`: `true` means closed, anything else
/// means open (this tracker never persists `in_progress`/`blocked` back to
/// the PRD file — the Tracker Adapter contract only requires idempotent
/// close and status updates, and the PRD format has no slot for the other
/// two states).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserStory {
    id: String,
    title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    acceptance: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    priority: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    passes: Option<bool>,
}

impl UserStory {
    fn into_task(self, position: usize) -> Task {
        Task {
            id: self.id,
            title: self.title,
            description: self.description,
            acceptance: self.acceptance,
            status: if self.passes.unwrap_or(false) {
                TaskStatus::Closed
            } else {
                TaskStatus::Open
            },
            priority: self.priority.unwrap_or(0),
            dependencies: self.dependencies,
            labels: self.labels,
            model: self.model,
            parent: None,
            metadata: Default::default(),
            position,
        }
    }

    fn from_task(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            title: task.title.clone(),
            description: task.description.clone(),
            acceptance: task.acceptance.clone(),
            dependencies: task.dependencies.clone(),
            priority: Some(task.priority),
            labels: task.labels.clone(),
            model: task.model.clone(),
            passes: Some(task.status == TaskStatus::Closed),
        }
    }
}

/// The `.json` PRD's top-level shape. Unrecognized top-level keys (e.g. an
/// `epicId` or `title` the PRD author added) round-trip unchanged via
/// `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PrdDocument {
    #[serde(default, rename = "userStories")]
    user_stories: Vec<UserStory>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed task record: {0}")]
    Parse(String),
    #[error("sync binary '{0}' failed: {1}")]
    SyncFailed(String, String),
    #[error("task {0} not found")]
    NotFound(String),
}

/// Uniform interface the Scheduler and Iteration Engine drive every tracker
/// backend through.
pub trait TrackerAdapter {
    fn list_tasks(&mut self) -> Result<Vec<Task>, TrackerError>;
    fn get_task(&mut self, id: &str) -> Result<Option<Task>, TrackerError>;
    fn close_task(&mut self, id: &str) -> Result<(), TrackerError>;
    fn update_task_status(&mut self, id: &str, status: TaskStatus) -> Result<(), TrackerError>;
}

/// Emits a warning once a listing comes back empty when the session
/// previously observed `known_task_count` tasks — a strong signal the
/// tracker backend is misconfigured (wrong path, wrong epic filter, stale
/// binary) rather than that the work genuinely ran out.
pub fn warn_on_suspicious_empty_listing(engine_task_count: usize, session_known_task_count: u32) {
    if engine_task_count == 0 && session_known_task_count > 0 {
        warn!(
            session_known_task_count,
            "tracker returned zero tasks after previously reporting tasks; check tracker configuration before assuming the work is done"
        );
    }
}

pub struct JsonPrdTracker {
    path: PathBuf,
    lock: FileLock,
    tasks: Vec<Task>,
    /// Preserved so a `.json` PRD's non-story top-level keys survive a
    /// close/status-update round trip. Empty (and unused) for `.jsonl`.
    extra: serde_json::Map<String, serde_json::Value>,
}

impl JsonPrdTracker {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, TrackerError> {
        let path = path.into();
        let lock = FileLock::new(&path)?;
        let (tasks, extra) = Self::read_tasks(&path, &lock)?;
        Ok(Self { path, lock, tasks, extra })
    }

    fn is_jsonl(path: &Path) -> bool {
        path.extension().and_then(|e| e.to_str()) == Some("jsonl")
    }

    fn read_tasks(
        path: &Path,
        lock: &FileLock,
    ) -> Result<(Vec<Task>, serde_json::Map<String, serde_json::Value>), TrackerError> {
        let _guard = lock.shared()?;
        if !path.exists() {
            return Ok((Vec::new(), serde_json::Map::new()));
        }
        let content = std::fs::read_to_string(path)?;
        if Self::is_jsonl(path) {
            let mut tasks = Vec::new();
            for (i, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let story: UserStory =
                    serde_json::from_str(line).map_err(|e| TrackerError::Parse(e.to_string()))?;
                tasks.push(story.into_task(i));
            }
            Ok((tasks, serde_json::Map::new()))
        } else {
            let doc: PrdDocument =
                serde_json::from_str(&content).map_err(|e| TrackerError::Parse(e.to_string()))?;
            let tasks = doc
                .user_stories
                .into_iter()
                .enumerate()
                .map(|(i, story)| story.into_task(i))
                .collect();
            Ok((tasks, doc.extra))
        }
    }

    fn write_tasks(&self) -> Result<(), TrackerError> {
        let _guard = self.lock.exclusive()?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if Self::is_jsonl(&self.path) {
            let content: String = self
                .tasks
                .iter()
                .map(|t| {
                    serde_json::to_string(&UserStory::from_task(t))
                        .map_err(|e| TrackerError::Parse(e.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?
                .join("\n");
            let content = if content.is_empty() { content } else { content + "\n" };
            std::fs::write(&self.path, content)?;
        } else {
            let doc = PrdDocument {
                user_stories: self.tasks.iter().map(UserStory::from_task).collect(),
                extra: self.extra.clone(),
            };
            let content = serde_json::to_string_pretty(&doc)
                .map_err(|e| TrackerError::Parse(e.to_string()))?;
            std::fs::write(&self.path, content)?;
        }
        Ok(())
    }
}

impl TrackerAdapter for JsonPrdTracker {
    fn list_tasks(&mut self) -> Result<Vec<Task>, TrackerError> {
        let (tasks, extra) = Self::read_tasks(&self.path, &self.lock)?;
        self.tasks = tasks;
        self.extra = extra;
        Ok(self.tasks.clone())
    }

    fn get_task(&mut self, id: &str) -> Result<Option<Task>, TrackerError> {
        self.list_tasks()?;
        Ok(self.tasks.iter().find(|t| t.id == id).cloned())
    }

    fn close_task(&mut self, id: &str) -> Result<(), TrackerError> {
        self.update_task_status(id, TaskStatus::Closed)
    }

    fn update_task_status(&mut self, id: &str, status: TaskStatus) -> Result<(), TrackerError> {
        self.list_tasks()?;
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| TrackerError::NotFound(id.to_string()))?;
        task.status = status;
        self.write_tasks()
    }
}

/// The shared binary (`bd`/`br`/`bv`) backend. Reads tasks via `<bin> export
/// --json`; writes via `<bin> update <id> --status <status>`.
pub struct BeadsLikeTracker {
    binary: String,
    repo_root: PathBuf,
    epic_id: Option<String>,
}

impl BeadsLikeTracker {
    pub fn new(binary: impl Into<String>, repo_root: impl Into<PathBuf>, epic_id: Option<String>) -> Self {
        Self {
            binary: binary.into(),
            repo_root: repo_root.into(),
            epic_id,
        }
    }

    fn run(&self, args: &[&str]) -> Result<String, TrackerError> {
        let output = Command::new(&self.binary)
            .args(args)
            .current_dir(&self.repo_root)
            .output()
            .map_err(|e| TrackerError::SyncFailed(self.binary.clone(), e.to_string()))?;
        if !output.status.success() {
            return Err(TrackerError::SyncFailed(
                self.binary.clone(),
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl TrackerAdapter for BeadsLikeTracker {
    fn list_tasks(&mut self) -> Result<Vec<Task>, TrackerError> {
        let mut args = vec!["export", "--json"];
        if let Some(epic) = &self.epic_id {
            args.push("--epic");
            args.push(epic);
        }
        let out = self.run(&args)?;
        let mut tasks: Vec<Task> =
            serde_json::from_str(&out).map_err(|e| TrackerError::Parse(e.to_string()))?;
        for (i, task) in tasks.iter_mut().enumerate() {
            task.position = i;
        }
        Ok(tasks)
    }

    fn get_task(&mut self, id: &str) -> Result<Option<Task>, TrackerError> {
        Ok(self.list_tasks()?.into_iter().find(|t| t.id == id))
    }

    fn close_task(&mut self, id: &str) -> Result<(), TrackerError> {
        self.update_task_status(id, TaskStatus::Closed)
    }

    fn update_task_status(&mut self, id: &str, status: TaskStatus) -> Result<(), TrackerError> {
        let status_str = match status {
            TaskStatus::Open => "open",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Closed => "closed",
        };
        self.run(&["update", id, "--status", status_str]).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn story(id: &str) -> UserStory {
        UserStory {
            id: id.into(),
            title: id.into(),
            description: None,
            acceptance: None,
            dependencies: vec![],
            priority: Some(1),
            labels: vec![],
            model: None,
            passes: Some(false),
        }
    }

    #[test]
    fn json_prd_tracker_round_trips_jsonl() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.jsonl");
        std::fs::write(&path, format!("{}\n", serde_json::to_string(&story("T-1")).unwrap())).unwrap();

        let mut tracker = JsonPrdTracker::open(&path).unwrap();
        let tasks = tracker.list_tasks().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "T-1");
        assert_eq!(tasks[0].status, TaskStatus::Open);
    }

    #[test]
    fn json_prd_tracker_close_task_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.jsonl");
        std::fs::write(&path, format!("{}\n", serde_json::to_string(&story("T-1")).unwrap())).unwrap();

        let mut tracker = JsonPrdTracker::open(&path).unwrap();
        tracker.close_task("T-1").unwrap();

        let mut reopened = JsonPrdTracker::open(&path).unwrap();
        let tasks = reopened.list_tasks().unwrap();
        assert_eq!(tasks[0].status, TaskStatus::Closed);
    }

    #[test]
    fn json_prd_tracker_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("does-not-exist.jsonl");
        let mut tracker = JsonPrdTracker::open(&path).unwrap();
        assert!(tracker.list_tasks().unwrap().is_empty());
    }

    #[test]
    fn update_status_on_missing_task_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.jsonl");
        std::fs::write(&path, "").unwrap();
        let mut tracker = JsonPrdTracker::open(&path).unwrap();
        let err = tracker.close_task("ghost").unwrap_err();
        assert!(matches!(err, TrackerError::NotFound(_)));
    }

    #[test]
    fn json_array_format_assigns_positions_in_file_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.json");
        let doc = PrdDocument {
            user_stories: vec![story("T-1"), story("T-2")],
            extra: serde_json::Map::new(),
        };
        std::fs::write(&path, serde_json::to_string(&doc).unwrap()).unwrap();

        let mut tracker = JsonPrdTracker::open(&path).unwrap();
        let loaded = tracker.list_tasks().unwrap();
        assert_eq!(loaded[0].position, 0);
        assert_eq!(loaded[1].position, 1);
    }

    #[test]
    fn json_prd_passes_true_maps_to_closed_status() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prd.json");
        let mut s = story("T-1");
        s.passes = Some(true);
        let doc = PrdDocument {
            user_stories: vec![s],
            extra: serde_json::Map::new(),
        };
        std::fs::write(&path, serde_json::to_string(&doc).unwrap()).unwrap();

        let mut tracker = JsonPrdTracker::open(&path).unwrap();
        let tasks = tracker.list_tasks().unwrap();
        assert_eq!(tasks[0].status, TaskStatus::Closed);
    }

    #[test]
    fn json_prd_preserves_unknown_top_level_keys_across_a_close() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prd.json");
        std::fs::write(
            &path,
            r#"{"epicId":"EPIC-7","userStories":[{"id":"T-1","title":"T-1"}]}"#,
        )
        .unwrap();

        let mut tracker = JsonPrdTracker::open(&path).unwrap();
        tracker.close_task("T-1").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["epicId"], "EPIC-7");
    }
}
