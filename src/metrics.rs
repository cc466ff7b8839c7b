//! Prometheus gauges for workers, tasks and queue depth.
//!
//! Gauges are written through the `metrics` facade into a bridge-local
//! recorder (no global install), refreshed from a snapshot right before
//! each render.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};

use crate::tasks::TaskCounts;
use crate::workers::WorkerCounts;

/// Point-in-time figures rendered by `/metrics`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub workers: WorkerCounts,
    pub tasks: TaskCounts,
    pub queue_depth: usize,
}

pub struct BridgeMetrics {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
}

impl BridgeMetrics {
    pub fn new() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        Self { recorder, handle }
    }

    /// Record `snapshot` and render the Prometheus text exposition.
    pub fn render(&self, snapshot: &MetricsSnapshot) -> String {
        metrics::with_local_recorder(&self.recorder, || {
            metrics::describe_gauge!("bridge_workers", "Connected workers by status");
            metrics::describe_gauge!("bridge_tasks", "Tracked tasks by status");
            metrics::describe_gauge!("bridge_queue_depth", "Entries in the durable task queue");

            metrics::gauge!("bridge_workers", "status" => "idle").set(snapshot.workers.idle as f64);
            metrics::gauge!("bridge_workers", "status" => "busy").set(snapshot.workers.busy as f64);

            metrics::gauge!("bridge_tasks", "status" => "pending").set(snapshot.tasks.pending as f64);
            metrics::gauge!("bridge_tasks", "status" => "running").set(snapshot.tasks.running as f64);
            metrics::gauge!("bridge_tasks", "status" => "completed")
                .set(snapshot.tasks.completed as f64);
            metrics::gauge!("bridge_tasks", "status" => "failed").set(snapshot.tasks.failed as f64);

            metrics::gauge!("bridge_queue_depth").set(snapshot.queue_depth as f64);
        });
        self.handle.render()
    }
}

impl Default for BridgeMetrics {
    fn default() -> Self {
        Self::new()
    }
}
