//! Task tracking: the registry of submitted tasks and their lifecycle.

pub mod model;
pub mod registry;

pub use model::{QueueEntry, Task, TaskDescriptor, TaskStatus};
pub use registry::{TaskCounts, TaskRegistry};
