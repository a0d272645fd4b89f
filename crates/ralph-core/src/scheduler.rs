//! Picks the next batch of tasks to run, honoring dependency gating,
//! priority ordering, dotted-child reordering, and (for parallel runs)
//! dependency-intersection admission across currently in-flight tasks.

use crate::dotted_order::reorder_dotted_children;
use ralph_proto::{Task, TaskSelection, TaskStatus};
use std::collections::{HashMap, HashSet};
use tracing::warn;

#[derive(Debug, Default)]
pub struct Scheduler {
    /// Task ids currently claimed by a worker; never admitted twice.
    in_flight: HashSet<String>,
    cycle_logged: HashSet<String>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_in_flight(&mut self, id: &str) {
        self.in_flight.insert(id.to_string());
    }

    pub fn release(&mut self, id: &str) {
        self.in_flight.remove(id);
    }

    /// Returns up to `k` tasks admitted for the next iteration(s), applying
    /// eligibility, ordering, cycle detection, and (for `k > 1`) the
    /// dependency-intersection rule that keeps two workers from racing on a
    /// shared dependency edge.
    pub fn next_batch(&mut self, tasks: &[Task], k: usize, label_filter: Option<&str>) -> TaskSelection {
        let by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
        let closed_ids: HashSet<&str> = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Closed)
            .map(|t| t.id.as_str())
            .collect();

        let cycle_members = self.detect_cycles(tasks, &by_id);
        for id in &cycle_members {
            if self.cycle_logged.insert((*id).to_string()) {
                warn!(task_id = %id, "task is part of a dependency cycle; will never be selected");
            }
        }

        let eligible_ids: Vec<String> = tasks
            .iter()
            .filter(|t| self.is_eligible(t, &closed_ids, &cycle_members, label_filter))
            .map(|t| t.id.clone())
            .collect();

        let ordered_ids = reorder_dotted_children(&eligible_ids);
        let mut ordered: Vec<&Task> = ordered_ids
            .iter()
            .filter_map(|id| by_id.get(id.as_str()).copied())
            .collect();
        ordered.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.position.cmp(&b.position)));

        let mut admitted: Vec<Task> = Vec::new();
        let mut admitted_ids: HashSet<&str> = HashSet::new();

        for task in ordered {
            if admitted.len() >= k {
                break;
            }
            if self.dependency_set_transitive(task, &by_id, &mut HashSet::new())
                .iter()
                .any(|dep| self.in_flight.contains(*dep) || admitted_ids.contains(*dep))
            {
                continue;
            }
            admitted_ids.insert(task.id.as_str());
            admitted.push(task.clone());
        }

        TaskSelection::new(admitted)
    }

    fn is_eligible(
        &self,
        task: &Task,
        closed_ids: &HashSet<&str>,
        cycle_members: &HashSet<String>,
        label_filter: Option<&str>,
    ) -> bool {
        if cycle_members.contains(&task.id) {
            return false;
        }
        if !matches!(task.status, TaskStatus::Open | TaskStatus::InProgress) {
            return false;
        }
        if self.in_flight.contains(&task.id) {
            return false;
        }
        if !task.dependencies_satisfied(closed_ids) {
            return false;
        }
        if let Some(label) = label_filter {
            if !task.labels.iter().any(|l| l == label) {
                return false;
            }
        }
        true
    }

    /// Every dependency id reachable from `task`, including itself excluded.
    fn dependency_set_transitive<'a>(
        &self,
        task: &'a Task,
        by_id: &HashMap<&'a str, &'a Task>,
        seen: &mut HashSet<&'a str>,
    ) -> HashSet<&'a str> {
        let mut out = HashSet::new();
        for dep in &task.dependencies {
            let dep_id = dep.as_str();
            if !seen.insert(dep_id) {
                continue;
            }
            out.insert(dep_id);
            if let Some(dep_task) = by_id.get(dep_id) {
                out.extend(self.dependency_set_transitive(dep_task, by_id, seen));
            }
        }
        out
    }

    /// DFS-colours the dependency graph to find every id participating in a
    /// cycle. Cached per call; the caller re-lists from the tracker between
    /// scheduling passes, so staleness is bounded to one pass.
    fn detect_cycles(&self, tasks: &[Task], by_id: &HashMap<&str, &Task>) -> HashSet<String> {
        #[derive(Clone, Copy, PartialEq)]
        enum Colour {
            White,
            Gray,
            Black,
        }

        let mut colour: HashMap<&str, Colour> =
            tasks.iter().map(|t| (t.id.as_str(), Colour::White)).collect();
        let mut in_cycle: HashSet<String> = HashSet::new();

        fn visit<'a>(
            id: &'a str,
            by_id: &HashMap<&'a str, &'a Task>,
            colour: &mut HashMap<&'a str, Colour>,
            stack: &mut Vec<&'a str>,
            in_cycle: &mut HashSet<String>,
        ) {
            colour.insert(id, Colour::Gray);
            stack.push(id);
            if let Some(task) = by_id.get(id) {
                for dep in &task.dependencies {
                    let dep_id = dep.as_str();
                    match colour.get(dep_id).copied().unwrap_or(Colour::Black) {
                        Colour::White => visit(dep_id, by_id, colour, stack, in_cycle),
                        Colour::Gray => {
                            if let Some(pos) = stack.iter().position(|s| *s == dep_id) {
                                for member in &stack[pos..] {
                                    in_cycle.insert((*member).to_string());
                                }
                            }
                        }
                        Colour::Black => {}
                    }
                }
            }
            stack.pop();
            colour.insert(id, Colour::Black);
        }

        let mut stack = Vec::new();
        for task in tasks {
            if colour[task.id.as_str()] == Colour::White {
                visit(task.id.as_str(), by_id, &mut colour, &mut stack, &mut in_cycle);
            }
        }
        in_cycle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn task(id: &str, deps: &[&str], priority: i32, position: usize) -> Task {
        Task {
            id: id.into(),
            title: id.into(),
            description: None,
            acceptance: None,
            status: TaskStatus::Open,
            priority,
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            labels: vec![],
            model: None,
            parent: None,
            metadata: Map::new(),
            position,
        }
    }

    #[test]
    fn picks_lowest_priority_first() {
        let tasks = vec![task("A", &[], 5, 0), task("B", &[], 1, 1)];
        let mut sched = Scheduler::new();
        let sel = sched.next_batch(&tasks, 1, None);
        assert_eq!(sel.ids(), vec!["B"]);
    }

    #[test]
    fn blocks_task_with_open_dependency() {
        let tasks = vec![task("A", &[], 1, 0), task("B", &["A"], 1, 1)];
        let mut sched = Scheduler::new();
        let sel = sched.next_batch(&tasks, 2, None);
        assert_eq!(sel.ids(), vec!["A"]);
    }

    #[test]
    fn parallel_admission_rejects_dependency_still_in_flight() {
        // A is closed (merge not yet landed, so still tracked in-flight) and
        // B depends on it: B must not be admitted alongside A's worker.
        let mut tasks = vec![task("A", &[], 1, 0), task("B", &["A"], 1, 1)];
        tasks[0].status = TaskStatus::Closed;
        let mut sched = Scheduler::new();
        sched.mark_in_flight("A");
        let sel = sched.next_batch(&tasks, 2, None);
        assert!(sel.is_empty());
    }

    #[test]
    fn cycle_members_are_never_selected() {
        let tasks = vec![task("A", &["B"], 1, 0), task("B", &["A"], 1, 1)];
        let mut sched = Scheduler::new();
        let sel = sched.next_batch(&tasks, 2, None);
        assert!(sel.is_empty());
    }

    #[test]
    fn label_filter_excludes_unmatched_tasks() {
        let mut tasks = vec![task("A", &[], 1, 0)];
        tasks[0].labels = vec!["backend".into()];
        let mut sched = Scheduler::new();
        let sel = sched.next_batch(&tasks, 1, Some("frontend"));
        assert!(sel.is_empty());
        let sel2 = sched.next_batch(&tasks, 1, Some("backend"));
        assert_eq!(sel2.ids(), vec!["A"]);
    }
}
