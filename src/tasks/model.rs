//! Task data model: descriptors, lifecycle status, and queue references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::connection::protocol::TaskAssignment;

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the queue.
    Pending,
    /// Assigned to a worker.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

impl TaskStatus {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a client submits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    #[serde(rename = "type", default)]
    pub task_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub priority: i64,
}

/// A task tracked by the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub data: serde_json::Value,
    pub language: String,
    pub priority: i64,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub container_id: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<serde_json::Value>,
    /// How many times the task has been handed to a worker.
    #[serde(default)]
    pub attempts: u32,
    /// Failures reported by workers. Only these count against the retry
    /// budget; a lost worker does not.
    #[serde(default)]
    pub failures: u32,
}

impl Task {
    /// A new pending task with a fresh id.
    pub fn new(descriptor: TaskDescriptor) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_type: descriptor.task_type,
            data: descriptor.data,
            language: descriptor.language,
            priority: descriptor.priority,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            container_id: None,
            result: None,
            error: None,
            attempts: 0,
            failures: 0,
        }
    }

    /// The lightweight reference kept in the durable queue.
    pub fn queue_entry(&self) -> QueueEntry {
        QueueEntry {
            task_id: self.id.clone(),
            language: self.language.clone(),
            priority: self.priority,
        }
    }

    /// The body pushed to the worker.
    pub fn assignment(&self) -> TaskAssignment {
        TaskAssignment {
            id: self.id.clone(),
            task_type: self.task_type.clone(),
            data: self.data.clone(),
        }
    }

    /// Whether the task is running under `worker_id`.
    pub fn is_running_on(&self, worker_id: &str) -> bool {
        self.status == TaskStatus::Running && self.container_id.as_deref() == Some(worker_id)
    }
}

/// Member of the durable priority queue: task id plus target language,
/// scored by priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub task_id: String,
    pub language: String,
    pub priority: i64,
}
