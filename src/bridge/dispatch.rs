//! Scheduling pass: matches queued tasks to idle, capable workers.
//!
//! Runs with the bridge lock held. Entries are peeked, not popped: an entry
//! leaves the durable queue only once a worker has been chosen for it, so a
//! task nobody can run yet keeps its place.

use tracing::{debug, info, warn};

use super::state::BridgeInner;
use crate::connection::BridgeMessage;
use crate::store::QueueStore;
use crate::tasks::TaskStatus;
use crate::workers::WorkerStatus;

/// Assign as many queued tasks as there are idle workers able to take them.
/// Returns the number of tasks sent out.
pub(crate) async fn dispatch_pending(inner: &mut BridgeInner, store: &dyn QueueStore) -> usize {
    let mut idle = inner.workers.list_idle(|_| true).len();
    if idle == 0 {
        return 0;
    }

    let entries = match store.peek(idle).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, "Failed to read task queue");
            return 0;
        }
    };

    let mut assigned = 0;
    for entry in entries {
        if idle == 0 {
            break;
        }

        let pending = inner
            .tasks
            .get(&entry.task_id)
            .is_some_and(|t| t.status == TaskStatus::Pending);
        if !pending {
            debug!(task_id = %entry.task_id, "Dropping stale queue entry");
            if let Err(e) = store.remove(&entry.task_id).await {
                warn!(task_id = %entry.task_id, error = %e, "Failed to drop stale queue entry");
            }
            continue;
        }

        // Assigned workers turn busy below, so they drop out of later lookups.
        let candidate = inner
            .workers
            .list_idle(|caps| caps.supports_language(&entry.language))
            .first()
            .map(|w| w.id.clone());
        let Some(worker_id) = candidate else {
            debug!(task_id = %entry.task_id, language = %entry.language, "No idle worker for language");
            continue;
        };

        match store.remove(&entry.task_id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(task_id = %entry.task_id, "Queue entry already gone");
                continue;
            }
            Err(e) => {
                warn!(task_id = %entry.task_id, error = %e, "Failed to dequeue task");
                continue;
            }
        }

        let Some(task) = inner.tasks.assign(&entry.task_id, &worker_id).cloned() else {
            continue;
        };
        let Some(worker) = inner.workers.get_mut(&worker_id) else {
            continue;
        };
        worker.status = WorkerStatus::Busy;
        worker.current_task = Some(task.id.clone());
        idle -= 1;

        // A closed channel means the socket is going away; its close path
        // requeues the task.
        if !worker.connection.send(BridgeMessage::Task {
            task: task.assignment(),
        }) {
            debug!(task_id = %task.id, container_id = %worker_id, "Worker connection closing");
        }

        if let Err(e) = store.save_task(&task).await {
            warn!(task_id = %task.id, error = %e, "Failed to persist assignment");
        }

        info!(
            task_id = %task.id,
            container_id = %worker_id,
            language = %task.language,
            priority = task.priority,
            "Task assigned"
        );
        assigned += 1;
    }
    assigned
}
