//! Task registry: in-memory table of every known task.
//!
//! Transitions are only applied from the state they are valid in. Anything
//! else is a benign race (a worker reporting on a task that was already
//! re-queued after a timeout, a duplicate completion) and is logged and
//! ignored without touching the record.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::model::{Task, TaskStatus};

/// Per-status task counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, Task>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a task. An existing record with the same id is replaced.
    pub fn insert(&mut self, task: Task) {
        self.tasks.insert(task.id.clone(), task);
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<Task> {
        self.tasks.remove(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Hand a pending task to a worker: `pending → running`.
    pub fn assign(&mut self, id: &str, worker_id: &str) -> Option<&Task> {
        let task = self.tasks.get_mut(id)?;
        if task.status != TaskStatus::Pending {
            warn!(task_id = %id, status = %task.status, "Cannot assign non-pending task");
            return None;
        }

        task.status = TaskStatus::Running;
        task.container_id = Some(worker_id.to_string());
        task.attempts += 1;
        if task.started_at.is_none() {
            task.started_at = Some(Utc::now());
        }
        Some(&*task)
    }

    /// Worker acknowledged the start of a task it was assigned.
    pub fn mark_started(&mut self, id: &str, worker_id: &str) -> Option<&Task> {
        let task = self.running_on(id, worker_id, "start")?;
        if task.started_at.is_none() {
            task.started_at = Some(Utc::now());
        }
        Some(&*task)
    }

    /// `running → completed` with a result.
    pub fn mark_completed(
        &mut self,
        id: &str,
        worker_id: &str,
        result: serde_json::Value,
    ) -> Option<&Task> {
        let task = self.running_on(id, worker_id, "complete")?;
        task.status = TaskStatus::Completed;
        task.completed_at = Some(Utc::now());
        task.container_id = None;
        task.result = Some(result);
        task.error = None;
        Some(&*task)
    }

    /// `running → failed` with an error.
    pub fn mark_failed(
        &mut self,
        id: &str,
        worker_id: &str,
        error: serde_json::Value,
    ) -> Option<&Task> {
        let task = self.running_on(id, worker_id, "fail")?;
        task.status = TaskStatus::Failed;
        task.failures += 1;
        task.completed_at = Some(Utc::now());
        task.container_id = None;
        task.error = Some(error);
        task.result = None;
        Some(&*task)
    }

    /// Count a reported failure that will be retried. Only applies while the
    /// task is running on the reporting worker.
    pub fn record_failure(&mut self, id: &str, worker_id: &str) -> Option<&Task> {
        let task = self.running_on(id, worker_id, "retry")?;
        task.failures += 1;
        Some(&*task)
    }

    /// `running → pending`, keeping the id. Returns the task for re-pushing.
    pub fn requeue(&mut self, id: &str) -> Option<&Task> {
        let task = self.tasks.get_mut(id)?;
        if task.status != TaskStatus::Running {
            debug!(task_id = %id, status = %task.status, "Skipping requeue of non-running task");
            return None;
        }
        task.status = TaskStatus::Pending;
        task.container_id = None;
        Some(&*task)
    }

    /// Ids of terminal tasks finished longer than `retention` ago.
    pub fn expired(&self, now: DateTime<Utc>, retention: Duration) -> Vec<String> {
        let retention = chrono::Duration::from_std(retention)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        self.tasks
            .values()
            .filter(|t| t.status.is_terminal())
            .filter(|t| {
                t.completed_at
                    .is_some_and(|done| now.signed_duration_since(done) > retention)
            })
            .map(|t| t.id.clone())
            .collect()
    }

    pub fn counts(&self) -> TaskCounts {
        let mut counts = TaskCounts::default();
        for task in self.tasks.values() {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    fn running_on(&mut self, id: &str, worker_id: &str, action: &str) -> Option<&mut Task> {
        let Some(task) = self.tasks.get_mut(id) else {
            warn!(task_id = %id, container_id = %worker_id, action, "Unknown task reported by worker");
            return None;
        };
        if !task.is_running_on(worker_id) {
            warn!(
                task_id = %id,
                container_id = %worker_id,
                status = %task.status,
                assigned = ?task.container_id,
                action,
                "Ignoring stale task report"
            );
            return None;
        }
        Some(task)
    }
}
