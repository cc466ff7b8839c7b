//! Worker containers: capability model and the live registry.

pub mod model;
pub mod registry;

pub use model::{Capabilities, Worker, WorkerSnapshot, WorkerStatus};
pub use registry::{WorkerCounts, WorkerRegistry};
