//! Error types for the daemon

use ha_config::ConfigError;
use ha_core::{EntityIdError, NotificationError};
use thiserror::Error;

/// Failures surfaced by the transport collaborator
#[derive(Debug, Error)]
pub enum ClientError {
    /// Could not reach or authenticate with the remote platform
    #[error("connection failed: {0}")]
    Connect(String),

    /// The event stream or socket was closed
    #[error("connection closed")]
    Closed,

    /// A request was answered with an error
    #[error("request '{request}' failed: {reason}")]
    Request { request: String, reason: String },

    /// The remote platform sent something the client could not understand
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Errors returned by the daemon
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("invalid entity id: {0}")]
    InvalidEntityId(#[from] EntityIdError),

    #[error(transparent)]
    Notification(#[from] NotificationError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An operation needs a collaborator that was not supplied
    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    /// The remote platform refused the connection
    #[error("connection to {0} was refused")]
    ConnectRefused(String),

    #[error("daemon is already running")]
    AlreadyRunning,

    #[error("data repository failed: {0:#}")]
    Repository(anyhow::Error),
}

/// Result type for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;
