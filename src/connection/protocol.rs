//! Wire protocol between the bridge and worker containers.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::ProtocolError;
use crate::workers::model::{Capabilities, WorkerStatus};

/// Message from worker → bridge.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    #[serde(rename_all = "camelCase")]
    Register {
        container_id: String,
        #[serde(default)]
        language_type: String,
        #[serde(default)]
        capabilities: Capabilities,
    },
    #[serde(rename_all = "camelCase")]
    Heartbeat {
        container_id: String,
        status: WorkerStatus,
    },
    #[serde(rename_all = "camelCase")]
    TaskStarted {
        task_id: String,
        container_id: String,
    },
    #[serde(rename_all = "camelCase")]
    TaskCompleted {
        task_id: String,
        container_id: String,
        #[serde(default)]
        result: serde_json::Value,
    },
    #[serde(rename_all = "camelCase")]
    TaskFailed {
        task_id: String,
        container_id: String,
        #[serde(default)]
        error: serde_json::Value,
    },
    #[serde(rename_all = "camelCase")]
    StatusReport {
        container_id: String,
        status: WorkerStatus,
        #[serde(default)]
        capabilities: Option<Capabilities>,
    },
}

impl WorkerMessage {
    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// The worker id the message claims to come from.
    pub fn container_id(&self) -> &str {
        match self {
            Self::Register { container_id, .. }
            | Self::Heartbeat { container_id, .. }
            | Self::TaskStarted { container_id, .. }
            | Self::TaskCompleted { container_id, .. }
            | Self::TaskFailed { container_id, .. }
            | Self::StatusReport { container_id, .. } => container_id,
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Heartbeat { .. } => "heartbeat",
            Self::TaskStarted { .. } => "task_started",
            Self::TaskCompleted { .. } => "task_completed",
            Self::TaskFailed { .. } => "task_failed",
            Self::StatusReport { .. } => "status_report",
        }
    }
}

/// Task body pushed to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub data: serde_json::Value,
}

/// Message from bridge → worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeMessage {
    Task { task: TaskAssignment },
    Shutdown,
}

/// Identity of one accepted WebSocket connection.
pub type ConnectionId = Uuid;

/// Outbound half of a worker connection, owned by the registry entry.
///
/// Dropping the last handle closes the underlying socket.
#[derive(Debug, Clone)]
pub struct WorkerConnection {
    pub id: ConnectionId,
    tx: mpsc::UnboundedSender<BridgeMessage>,
}

impl WorkerConnection {
    /// New connection handle plus the receiver its writer task drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BridgeMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    /// Queue a message for the worker. A closed connection is not an error.
    pub fn send(&self, message: BridgeMessage) -> bool {
        self.tx.send(message).is_ok()
    }
}

/// Per-connection state held by the socket loop.
///
/// The outbound handle is surrendered to the worker registry on the first
/// `register`, which is what limits a connection to one registration.
#[derive(Debug)]
pub struct ConnectionSession {
    pub id: ConnectionId,
    handle: Option<WorkerConnection>,
}

impl ConnectionSession {
    pub fn new(handle: WorkerConnection) -> Self {
        Self {
            id: handle.id,
            handle: Some(handle),
        }
    }

    /// Hand the outbound handle over. Only the first call gets it.
    pub fn take_handle(&mut self) -> Option<WorkerConnection> {
        self.handle.take()
    }
}
