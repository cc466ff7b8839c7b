//! HTTP surface of the bridge.

pub mod routes;

pub use routes::{control_routes, metrics_routes};
