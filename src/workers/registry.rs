//! Worker registry: connected workers in registration order.

use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tracing::debug;

use super::model::{Capabilities, Worker, WorkerSnapshot, WorkerStatus};
use crate::connection::ConnectionId;

/// Per-status worker counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerCounts {
    pub idle: usize,
    pub busy: usize,
}

#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: IndexMap<String, Worker>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a worker, replacing any entry with the same id (last
    /// registration wins). The replaced entry is returned so the caller can
    /// release whatever it was holding.
    pub fn register(&mut self, worker: Worker) -> Option<Worker> {
        let displaced = self.workers.shift_remove(&worker.id);
        self.workers.insert(worker.id.clone(), worker);
        displaced
    }

    pub fn get(&self, id: &str) -> Option<&Worker> {
        self.workers.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Worker> {
        self.workers.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Id of the worker owning a connection, if it registered.
    pub fn find_by_connection(&self, connection: ConnectionId) -> Option<&str> {
        self.workers
            .values()
            .find(|w| w.connection.id == connection)
            .map(|w| w.id.as_str())
    }

    /// Whether `id` is registered and owned by `connection`.
    pub fn is_owned_by(&self, id: &str, connection: ConnectionId) -> bool {
        self.workers
            .get(id)
            .is_some_and(|w| w.connection.id == connection)
    }

    /// Refresh last-seen for the worker on a connection.
    pub fn touch(&mut self, connection: ConnectionId, now: DateTime<Utc>) {
        if let Some(worker) = self
            .workers
            .values_mut()
            .find(|w| w.connection.id == connection)
        {
            worker.last_heartbeat = now;
        }
    }

    /// Apply a status reported by the worker.
    ///
    /// Unknown ids are ignored. A reported `idle` is not applied while the
    /// worker still holds an assignment: the report may predate it.
    /// Returns true when the worker is available afterwards.
    pub fn heartbeat(&mut self, id: &str, status: WorkerStatus) -> bool {
        let Some(worker) = self.workers.get_mut(id) else {
            debug!(container_id = %id, "Heartbeat from unregistered worker ignored");
            return false;
        };
        worker.last_heartbeat = Utc::now();

        if status == WorkerStatus::Idle && worker.current_task.is_some() {
            debug!(
                container_id = %id,
                task_id = ?worker.current_task,
                "Worker reported idle while assigned, keeping busy"
            );
        } else {
            worker.status = status;
        }
        worker.is_available()
    }

    /// Replace the capability set of a worker.
    pub fn update_capabilities(&mut self, id: &str, capabilities: Capabilities) {
        if let Some(worker) = self.workers.get_mut(id) {
            worker.capabilities = capabilities;
        }
    }

    /// Deregister a worker and hand back its entry.
    pub fn remove(&mut self, id: &str) -> Option<Worker> {
        self.workers.shift_remove(id)
    }

    /// Idle workers satisfying `filter`, in registration order.
    pub fn list_idle<F>(&self, filter: F) -> Vec<&Worker>
    where
        F: Fn(&Capabilities) -> bool,
    {
        self.workers
            .values()
            .filter(|w| w.is_available() && filter(&w.capabilities))
            .collect()
    }

    /// Ids of workers silent for longer than `timeout`.
    pub fn stale(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<String> {
        let timeout = chrono::Duration::from_std(timeout)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        self.workers
            .values()
            .filter(|w| now.signed_duration_since(w.last_heartbeat) > timeout)
            .map(|w| w.id.clone())
            .collect()
    }

    pub fn snapshots(&self) -> Vec<WorkerSnapshot> {
        self.workers.values().map(Worker::snapshot).collect()
    }

    pub fn counts(&self) -> WorkerCounts {
        let mut counts = WorkerCounts::default();
        for worker in self.workers.values() {
            match worker.status {
                WorkerStatus::Idle => counts.idle += 1,
                WorkerStatus::Busy => counts.busy += 1,
            }
        }
        counts
    }

    /// Remove every worker, in registration order.
    pub fn drain(&mut self) -> Vec<Worker> {
        self.workers.drain(..).map(|(_, w)| w).collect()
    }
}
