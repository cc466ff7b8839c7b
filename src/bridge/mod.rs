//! The bridge: owns worker and task state and decides who runs what.
//!
//! - `state`: the `Bridge` handle and every state transition
//! - `dispatch`: the queue-to-worker scheduling pass
//! - `monitor`: periodic liveness sweep and purge of finished tasks

pub mod dispatch;
pub mod monitor;
pub mod state;

pub use monitor::spawn_liveness_monitor;
pub use state::{Bridge, HealthSnapshot};
