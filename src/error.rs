//! Error types for the bridge server.

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Queue store errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Worker connection protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid message format: {0}")]
    InvalidMessage(#[from] serde_json::Error),

    #[error("Connection {connection} already registered as {container_id}")]
    AlreadyRegistered {
        connection: String,
        container_id: String,
    },
}

/// Central-server notification errors.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Request to {url} failed: {reason}")]
    RequestFailed { url: String, reason: String },

    #[error("Central server at {url} returned {status}")]
    BadStatus { url: String, status: u16 },
}
