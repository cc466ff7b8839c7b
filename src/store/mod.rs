//! Persistence layer: libSQL-backed durable task queue.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlQueueStore;
pub use traits::QueueStore;
