//! Bridge server: queues tasks and hands them to worker containers over
//! WebSocket.

pub mod api;
pub mod bridge;
pub mod config;
pub mod connection;
pub mod error;
pub mod metrics;
pub mod notify;
pub mod store;
pub mod tasks;
pub mod workers;
