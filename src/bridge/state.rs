//! Bridge state: the worker and task registries behind one lock.
//!
//! Every scheduling decision (registration, heartbeat, task report,
//! eviction, dispatch) runs with `inner` held, so two workers can never
//! be handed the same task and a task is never both queued and running.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::dispatch::dispatch_pending;
use crate::config::BridgeConfig;
use crate::connection::{BridgeMessage, ConnectionId, ConnectionSession, WorkerMessage};
use crate::error::{DatabaseError, ProtocolError};
use crate::metrics::{BridgeMetrics, MetricsSnapshot};
use crate::notify::{CentralEvent, CentralNotifier};
use crate::store::QueueStore;
use crate::tasks::{Task, TaskDescriptor, TaskRegistry, TaskStatus};
use crate::workers::{Capabilities, Worker, WorkerRegistry, WorkerSnapshot, WorkerStatus};

/// Registries guarded by the bridge lock.
#[derive(Debug, Default)]
pub(crate) struct BridgeInner {
    pub workers: WorkerRegistry,
    pub tasks: TaskRegistry,
    /// Pending tasks whose queue entry could not be written. Retried by
    /// `restore_queue_entries` until the store takes them.
    pub unqueued: HashSet<String>,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub containers: usize,
    pub active_tasks: usize,
    pub pending_tasks: usize,
}

pub struct Bridge {
    config: BridgeConfig,
    inner: Mutex<BridgeInner>,
    store: Arc<dyn QueueStore>,
    notifier: CentralNotifier,
    metrics: BridgeMetrics,
}

impl Bridge {
    pub fn new(
        config: BridgeConfig,
        store: Arc<dyn QueueStore>,
        notifier: CentralNotifier,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            inner: Mutex::new(BridgeInner::default()),
            store,
            notifier,
            metrics: BridgeMetrics::new(),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Reload task records persisted by a previous run.
    ///
    /// Tasks that were running are reset to pending (their workers are gone
    /// with the old process) and every pending task gets its queue entry
    /// back. Terminal tasks are kept so they stay queryable until purged.
    /// Returns the number of tasks waiting for a worker.
    pub async fn recover(&self) -> Result<usize, DatabaseError> {
        let tasks = self.store.load_tasks().await?;
        let mut inner = self.inner.lock().await;
        let mut waiting = 0;

        for mut task in tasks {
            match task.status {
                TaskStatus::Running => {
                    info!(
                        task_id = %task.id,
                        container_id = ?task.container_id,
                        "Resetting task interrupted by restart"
                    );
                    task.status = TaskStatus::Pending;
                    task.container_id = None;
                    self.store.save_task(&task).await?;
                    self.store.push(&task.queue_entry()).await?;
                    waiting += 1;
                }
                TaskStatus::Pending => {
                    self.store.push(&task.queue_entry()).await?;
                    waiting += 1;
                }
                TaskStatus::Completed | TaskStatus::Failed => {}
            }
            inner.tasks.insert(task);
        }

        if !inner.tasks.is_empty() {
            info!(
                total = inner.tasks.len(),
                waiting, "Recovered tasks from queue store"
            );
        }
        Ok(waiting)
    }

    // ── Tasks ───────────────────────────────────────────────────────────

    /// Accept a task: persist it, queue it, then try to dispatch.
    ///
    /// Nothing is tracked unless both the record and the queue entry were
    /// stored.
    pub async fn submit_task(&self, descriptor: TaskDescriptor) -> Result<String, DatabaseError> {
        let task = Task::new(descriptor);
        let mut inner = self.inner.lock().await;

        self.store.save_task(&task).await?;
        if let Err(e) = self.store.push(&task.queue_entry()).await {
            if let Err(cleanup) = self.store.delete_task(&task.id).await {
                warn!(task_id = %task.id, error = %cleanup, "Failed to roll back task record");
            }
            return Err(e);
        }

        info!(
            task_id = %task.id,
            task_type = %task.task_type,
            language = %task.language,
            priority = task.priority,
            "Task queued"
        );
        let id = task.id.clone();
        inner.tasks.insert(task);

        dispatch_pending(&mut inner, self.store.as_ref()).await;
        Ok(id)
    }

    pub async fn task(&self, id: &str) -> Option<Task> {
        self.inner.lock().await.tasks.get(id).cloned()
    }

    // ── Workers ─────────────────────────────────────────────────────────

    pub async fn workers(&self) -> Vec<WorkerSnapshot> {
        self.inner.lock().await.workers.snapshots()
    }

    /// Ask a worker to shut down. Returns false if it is not registered.
    ///
    /// The worker stays registered until its connection closes.
    pub async fn shutdown_worker(&self, id: &str) -> bool {
        let inner = self.inner.lock().await;
        let Some(worker) = inner.workers.get(id) else {
            return false;
        };
        if !worker.connection.send(BridgeMessage::Shutdown) {
            debug!(container_id = %id, "Shutdown requested on closing connection");
        }
        info!(container_id = %id, "Shutdown requested");
        true
    }

    // ── Connection events ───────────────────────────────────────────────

    /// Handle one inbound text frame from a worker connection.
    ///
    /// Any frame counts as liveness for the worker on that connection.
    /// Malformed frames are logged and dropped.
    pub async fn handle_frame(&self, session: &mut ConnectionSession, text: &str) {
        let parsed = WorkerMessage::parse(text);
        let mut inner = self.inner.lock().await;
        inner.workers.touch(session.id, Utc::now());

        match parsed {
            Ok(message) => self.apply_message(&mut inner, session, message).await,
            Err(e) => warn!(connection_id = %session.id, error = %e, "Dropping malformed frame"),
        }
    }

    /// The socket for `connection` is gone. Evicts whichever worker it
    /// carried, returning its running task to the queue.
    pub async fn connection_closed(&self, connection: ConnectionId) {
        let mut inner = self.inner.lock().await;
        let Some(id) = inner
            .workers
            .find_by_connection(connection)
            .map(str::to_string)
        else {
            debug!(connection_id = %connection, "Unregistered connection closed");
            return;
        };
        self.evict_locked(&mut inner, &id, "connection closed").await;
        dispatch_pending(&mut inner, self.store.as_ref()).await;
    }

    // ── Monitor hooks ───────────────────────────────────────────────────

    /// Evict workers silent for longer than the heartbeat timeout.
    /// Returns the evicted ids.
    pub async fn evict_stale(&self) -> Vec<String> {
        let mut inner = self.inner.lock().await;
        let stale = inner
            .workers
            .stale(Utc::now(), self.config.heartbeat_timeout);
        for id in &stale {
            self.evict_locked(&mut inner, id, "heartbeat timeout").await;
        }
        if !stale.is_empty() {
            dispatch_pending(&mut inner, self.store.as_ref()).await;
        }
        stale
    }

    /// Push queue entries for requeued tasks whose first push failed.
    /// Returns the number restored.
    pub async fn restore_queue_entries(&self) -> usize {
        let mut inner = self.inner.lock().await;
        if inner.unqueued.is_empty() {
            return 0;
        }

        let ids: Vec<String> = inner.unqueued.iter().cloned().collect();
        let mut restored = 0;
        for id in ids {
            let entry = inner
                .tasks
                .get(&id)
                .filter(|t| t.status == TaskStatus::Pending)
                .map(Task::queue_entry);
            let Some(entry) = entry else {
                inner.unqueued.remove(&id);
                continue;
            };
            match self.store.push(&entry).await {
                Ok(()) => {
                    inner.unqueued.remove(&id);
                    info!(task_id = %id, "Queue entry restored");
                    restored += 1;
                }
                Err(e) => warn!(task_id = %id, error = %e, "Failed to restore queue entry"),
            }
        }
        restored
    }

    /// Run a scheduling pass outside of any event. Returns tasks assigned.
    pub async fn dispatch(&self) -> usize {
        let mut inner = self.inner.lock().await;
        dispatch_pending(&mut inner, self.store.as_ref()).await
    }

    /// Forget terminal tasks older than the retention window.
    pub async fn purge_expired(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let expired = inner
            .tasks
            .expired(Utc::now(), self.config.task_retention);
        for id in &expired {
            inner.tasks.remove(id);
            if let Err(e) = self.store.delete_task(id).await {
                warn!(task_id = %id, error = %e, "Failed to delete expired task record");
            }
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "Purged finished tasks");
        }
        expired.len()
    }

    // ── Observability ───────────────────────────────────────────────────

    pub async fn health(&self) -> HealthSnapshot {
        let inner = self.inner.lock().await;
        let tasks = inner.tasks.counts();
        HealthSnapshot {
            status: "ok",
            containers: inner.workers.len(),
            active_tasks: tasks.running,
            pending_tasks: tasks.pending,
        }
    }

    /// Prometheus text for the metrics port.
    pub async fn render_metrics(&self) -> String {
        let snapshot = {
            let inner = self.inner.lock().await;
            let tasks = inner.tasks.counts();
            let queue_depth = match self.store.queue_len().await {
                Ok(depth) => depth,
                Err(e) => {
                    warn!(error = %e, "Failed to read queue depth");
                    tasks.pending
                }
            };
            MetricsSnapshot {
                workers: inner.workers.counts(),
                tasks,
                queue_depth,
            }
        };
        self.metrics.render(&snapshot)
    }

    // ── Shutdown ────────────────────────────────────────────────────────

    /// Tell every worker to shut down, drop their connections and close
    /// the store. Running tasks keep their persisted state and are reset
    /// by `recover` on the next start.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        let workers = inner.workers.drain();
        for worker in &workers {
            worker.connection.send(BridgeMessage::Shutdown);
        }
        info!(workers = workers.len(), "Bridge shutting down");
        drop(workers);
        self.store.close().await;
    }

    // ── Internals (lock held) ───────────────────────────────────────────

    async fn apply_message(
        &self,
        inner: &mut BridgeInner,
        session: &mut ConnectionSession,
        message: WorkerMessage,
    ) {
        // Everything but `register` must come from the connection that owns
        // the claimed worker id.
        if !matches!(message, WorkerMessage::Register { .. })
            && !inner
                .workers
                .is_owned_by(message.container_id(), session.id)
        {
            warn!(
                connection_id = %session.id,
                container_id = %message.container_id(),
                kind = message.kind(),
                "Ignoring message for a worker this connection does not own"
            );
            return;
        }

        match message {
            WorkerMessage::Register {
                container_id,
                language_type,
                capabilities,
            } => {
                self.register(inner, session, container_id, language_type, capabilities)
                    .await;
            }
            WorkerMessage::Heartbeat {
                container_id,
                status,
            } => {
                if inner.workers.heartbeat(&container_id, status) {
                    dispatch_pending(inner, self.store.as_ref()).await;
                }
            }
            WorkerMessage::TaskStarted {
                task_id,
                container_id,
            } => {
                let Some(task) = inner.tasks.mark_started(&task_id, &container_id).cloned() else {
                    return;
                };
                self.persist(&task).await;
                info!(task_id = %task_id, container_id = %container_id, "Task started");
                self.notifier.notify(CentralEvent::TaskStarted {
                    task_id,
                    container_id,
                });
            }
            WorkerMessage::TaskCompleted {
                task_id,
                container_id,
                result,
            } => {
                let Some(task) = inner
                    .tasks
                    .mark_completed(&task_id, &container_id, result.clone())
                    .cloned()
                else {
                    return;
                };
                self.persist(&task).await;
                release_worker(inner, &container_id, &task_id);
                info!(task_id = %task_id, container_id = %container_id, "Task completed");
                self.notifier.notify(CentralEvent::TaskCompleted {
                    task_id,
                    container_id,
                    result,
                });
                dispatch_pending(inner, self.store.as_ref()).await;
            }
            WorkerMessage::TaskFailed {
                task_id,
                container_id,
                error,
            } => {
                self.task_failed(inner, task_id, container_id, error).await;
            }
            WorkerMessage::StatusReport {
                container_id,
                status,
                capabilities,
            } => {
                if let Some(capabilities) = capabilities {
                    inner
                        .workers
                        .update_capabilities(&container_id, capabilities);
                }
                if inner.workers.heartbeat(&container_id, status) {
                    dispatch_pending(inner, self.store.as_ref()).await;
                }
            }
        }
    }

    async fn register(
        &self,
        inner: &mut BridgeInner,
        session: &mut ConnectionSession,
        container_id: String,
        language_type: String,
        capabilities: Capabilities,
    ) {
        let Some(connection) = session.take_handle() else {
            let current = inner
                .workers
                .find_by_connection(session.id)
                .unwrap_or_default()
                .to_string();
            let e = ProtocolError::AlreadyRegistered {
                connection: session.id.to_string(),
                container_id: current,
            };
            warn!(requested = %container_id, error = %e, "Rejecting second registration");
            return;
        };

        let worker = Worker::new(
            container_id.clone(),
            language_type.clone(),
            capabilities.clone(),
            connection,
        );
        if let Some(displaced) = inner.workers.register(worker) {
            warn!(
                container_id = %container_id,
                previous_connection = %displaced.connection.id,
                "Worker re-registered, replacing previous connection"
            );
            if let Some(task_id) = displaced.current_task.as_deref() {
                self.requeue_locked(inner, task_id, &container_id).await;
            }
        }

        info!(
            container_id = %container_id,
            language_type = %language_type,
            languages = ?capabilities.languages,
            "Worker registered"
        );
        self.notifier.notify(CentralEvent::ContainerRegistered {
            container_id,
            language_type,
            capabilities,
        });
        dispatch_pending(inner, self.store.as_ref()).await;
    }

    async fn task_failed(
        &self,
        inner: &mut BridgeInner,
        task_id: String,
        container_id: String,
        error: serde_json::Value,
    ) {
        let retry = inner.tasks.get(&task_id).is_some_and(|t| {
            t.is_running_on(&container_id) && t.failures < self.config.max_task_retries
        });

        if retry {
            inner.tasks.record_failure(&task_id, &container_id);
            warn!(task_id = %task_id, container_id = %container_id, error = %error, "Task failed, retrying");
            self.requeue_locked(inner, &task_id, &container_id).await;
        } else {
            let Some(task) = inner
                .tasks
                .mark_failed(&task_id, &container_id, error.clone())
                .cloned()
            else {
                return;
            };
            self.persist(&task).await;
            warn!(task_id = %task_id, container_id = %container_id, error = %error, "Task failed");
        }

        release_worker(inner, &container_id, &task_id);
        self.notifier.notify(CentralEvent::TaskFailed {
            task_id,
            container_id,
            error,
        });
        dispatch_pending(inner, self.store.as_ref()).await;
    }

    /// Remove a worker and put its running task back in the queue.
    ///
    /// Shared by disconnect and heartbeat timeout. Safe to call for a worker
    /// that is already gone, or whose task already finished.
    async fn evict_locked(&self, inner: &mut BridgeInner, id: &str, reason: &str) {
        let Some(worker) = inner.workers.remove(id) else {
            return;
        };
        warn!(
            container_id = %id,
            task_id = ?worker.current_task,
            reason,
            "Worker evicted"
        );
        if let Some(task_id) = worker.current_task.as_deref() {
            self.requeue_locked(inner, task_id, id).await;
        }
    }

    /// Return a task running on `worker_id` to the queue.
    ///
    /// The task is pending from here on even if the queue write fails; the
    /// id is then kept in `unqueued` for the monitor sweep to retry.
    async fn requeue_locked(&self, inner: &mut BridgeInner, task_id: &str, worker_id: &str) {
        if !inner
            .tasks
            .get(task_id)
            .is_some_and(|t| t.is_running_on(worker_id))
        {
            return;
        }
        let Some(task) = inner.tasks.requeue(task_id).cloned() else {
            return;
        };
        self.persist(&task).await;
        if let Err(e) = self.store.push(&task.queue_entry()).await {
            warn!(task_id = %task_id, error = %e, "Failed to requeue task, retrying on next sweep");
            inner.unqueued.insert(task.id);
            return;
        }
        info!(task_id = %task_id, container_id = %worker_id, "Task requeued");
    }

    async fn persist(&self, task: &Task) {
        if let Err(e) = self.store.save_task(task).await {
            warn!(task_id = %task.id, error = %e, "Failed to persist task");
        }
    }
}

/// Free a worker after its task reached a terminal state or went back to
/// the queue.
fn release_worker(inner: &mut BridgeInner, worker_id: &str, task_id: &str) {
    if let Some(worker) = inner.workers.get_mut(worker_id) {
        if worker.current_task.as_deref() == Some(task_id) {
            worker.current_task = None;
            worker.status = WorkerStatus::Idle;
        }
    }
}
