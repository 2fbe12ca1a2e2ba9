use crate::types::{Task, TaskStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// The task map, ordered by priority.
///
/// Priorities are assigned in creation order starting at 1. Re-adding a task
/// that is already queued replaces it but keeps its priority.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskQueue {
    tasks: HashMap<Uuid, Task>,
}

impl TaskQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
        }
    }

    /// Add or replace a task. Returns its id.
    pub fn add(&mut self, mut task: Task) -> Uuid {
        let id = task.id;
        task.priority = match self.tasks.get(&id) {
            Some(existing) => existing.priority,
            None => self.next_priority(),
        };
        self.tasks.insert(id, task);
        id
    }

    fn next_priority(&self) -> u32 {
        self.tasks
            .values()
            .map(|t| t.priority)
            .max()
            .unwrap_or(0)
            + 1
    }

    /// Get a task by ID.
    pub fn get(&self, id: Uuid) -> Option<&Task> {
        self.tasks.get(&id)
    }

    /// Get a mutable reference to a task.
    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut Task> {
        self.tasks.get_mut(&id)
    }

    /// Find the task built for `component_id`.
    pub fn find_by_component(&self, component_id: &str) -> Option<&Task> {
        self.tasks.values().find(|t| t.component_id == component_id)
    }

    /// All tasks, lowest priority number first.
    pub fn in_priority_order(&self) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self.tasks.values().collect();
        tasks.sort_by_key(|t| t.priority);
        tasks
    }

    /// Task ids, lowest priority number first.
    pub fn ids_in_priority_order(&self) -> Vec<Uuid> {
        self.in_priority_order().iter().map(|t| t.id).collect()
    }

    /// Count of tasks with the given status.
    pub fn count_with_status(&self, status: TaskStatus) -> usize {
        self.tasks.values().filter(|t| t.status == status).count()
    }

    /// Total number of tasks.
    pub fn total_count(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no task has been added.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Check if no task can make further automatic progress.
    pub fn is_settled(&self) -> bool {
        self.tasks.values().all(|t| match t.status {
            TaskStatus::Completed => true,
            TaskStatus::NeedsRevision => !t.can_iterate() || t.failure.is_some(),
            _ => false,
        })
    }
}
