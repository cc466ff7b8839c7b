//! `QueueStore` trait: durable home for the pending-task sorted set and
//! task records, so queued work survives a bridge restart.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::tasks::model::{QueueEntry, Task};

/// Backend-agnostic durable queue.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Priority queue ──────────────────────────────────────────────

    /// Add an entry, or update it in place if the task is already queued.
    /// A task never has more than one entry.
    async fn push(&self, entry: &QueueEntry) -> Result<(), DatabaseError>;

    /// Up to `limit` entries, highest priority first, ties in enqueue order.
    /// Entries stay queued.
    async fn peek(&self, limit: usize) -> Result<Vec<QueueEntry>, DatabaseError>;

    /// Remove a task's entry. Returns false if it was not queued.
    async fn remove(&self, task_id: &str) -> Result<bool, DatabaseError>;

    /// Number of queued entries.
    async fn queue_len(&self) -> Result<usize, DatabaseError>;

    // ── Task records ────────────────────────────────────────────────

    /// Insert or replace a task record.
    async fn save_task(&self, task: &Task) -> Result<(), DatabaseError>;

    /// Delete a task record and any queue entry it still has.
    async fn delete_task(&self, id: &str) -> Result<(), DatabaseError>;

    /// All persisted task records.
    async fn load_tasks(&self) -> Result<Vec<Task>, DatabaseError>;

    /// Stop accepting operations.
    async fn close(&self);
}
