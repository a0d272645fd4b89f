//! The Task data model.
//!
//! A [`Task`] is authoritatively owned by whichever tracker produced it
//! (JSON PRD, beads, ...); the orchestrator only ever holds a read-through
//! view plus the ability to issue status-change commands back through the
//! `TrackerAdapter` trait in `ralph-core`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle state of a task, as observed by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Ready to be picked up (subject to dependency gating).
    Open,
    /// Currently claimed by a worker.
    InProgress,
    /// Ineligible right now: unmet dependency, or part of a dependency cycle.
    Blocked,
    /// Done. Terminal.
    Closed,
}

impl TaskStatus {
    /// Closed is the only terminal state the core recognizes.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Closed)
    }
}

/// A unit of work authored outside the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Stable identifier, e.g. `TEST-004` or a bead id.
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceptance: Option<String>,
    pub status: TaskStatus,
    /// Lower number = higher urgency.
    pub priority: i32,
    /// Ordered set of dependency task ids.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    /// Per-task model override; takes precedence over any session- or
    /// agent-level default when resolving which model to run with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Position of this task in the tracker's natural listing order. Used as
    /// the stable tie-break in scheduling order and as the anchor for
    /// dotted-child reordering.
    #[serde(default)]
    pub position: usize,
}

impl Task {
    /// True only if every dependency resolves to a closed task in
    /// `closed_ids`.
    pub fn dependencies_satisfied(&self, closed_ids: &std::collections::HashSet<&str>) -> bool {
        self.dependencies
            .iter()
            .all(|dep| closed_ids.contains(dep.as_str()))
    }

    pub fn is_eligible(&self) -> bool {
        matches!(self.status, TaskStatus::Open | TaskStatus::InProgress)
    }
}
