//! Connection layer: one persistent WebSocket per worker container.
//!
//! - `protocol`: inbound/outbound message types and the connection handle
//! - `ws`: the socket loop that feeds inbound frames to the bridge

pub mod protocol;
pub mod ws;

pub use protocol::{
    BridgeMessage, ConnectionId, ConnectionSession, TaskAssignment, WorkerConnection, WorkerMessage,
};
