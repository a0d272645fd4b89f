//! `TaskSelection`: an ordered batch of tasks admitted for one iteration.

use crate::task::{Task, TaskStatus};

#[derive(Debug, Clone, Default)]
pub struct TaskSelection {
    pub tasks: Vec<Task>,
}

impl TaskSelection {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self { tasks }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.id.as_str()).collect()
    }

    /// Re-checks that every task is still eligible and every dependency is
    /// closed and not itself part of this selection. Used defensively by
    /// the Iteration Engine right before spawning the agent, in case the
    /// tracker state shifted between scheduling and execution.
    pub fn is_valid(&self, closed_ids: &std::collections::HashSet<&str>) -> bool {
        let selected_ids: std::collections::HashSet<&str> =
            self.tasks.iter().map(|t| t.id.as_str()).collect();
        self.tasks.iter().all(|t| {
            matches!(t.status, TaskStatus::Open | TaskStatus::InProgress)
                && t.dependencies
                    .iter()
                    .all(|d| closed_ids.contains(d.as_str()) && !selected_ids.contains(d.as_str()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn task(id: &str, deps: &[&str], status: TaskStatus) -> Task {
        Task {
            id: id.into(),
            title: id.into(),
            description: None,
            acceptance: None,
            status,
            priority: 1,
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            labels: vec![],
            model: None,
            parent: None,
            metadata: HashMap::new(),
            position: 0,
        }
    }

    #[test]
    fn valid_when_dependencies_closed_and_not_co_selected() {
        let sel = TaskSelection::new(vec![task("B", &["A"], TaskStatus::Open)]);
        let mut closed = std::collections::HashSet::new();
        closed.insert("A");
        assert!(sel.is_valid(&closed));
    }

    #[test]
    fn invalid_when_dependency_is_co_selected() {
        let sel = TaskSelection::new(vec![
            task("A", &[], TaskStatus::Open),
            task("B", &["A"], TaskStatus::Open),
        ]);
        let mut closed = std::collections::HashSet::new();
        closed.insert("A");
        assert!(!sel.is_valid(&closed));
    }

    #[test]
    fn invalid_when_task_not_eligible_status() {
        let sel = TaskSelection::new(vec![task("A", &[], TaskStatus::Blocked)]);
        assert!(!sel.is_valid(&std::collections::HashSet::new()));
    }
}
