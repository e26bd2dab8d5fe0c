//! Error types for the active-check pipeline

use std::time::Duration;

use thiserror::Error;

/// Result type alias for agent operations
pub type AgentResult<T> = Result<T, AgentError>;

/// Errors that can occur while scheduling, collecting or submitting checks
#[derive(Debug, Error)]
pub enum AgentError {
    /// Connecting to or talking with a server failed
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Connect or round-trip took longer than the configured timeout
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Malformed frame, unparseable JSON or unexpected reply shape
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server does not know the host we asked marching orders for
    #[error("host '{0}' is unknown to the server")]
    UnknownHost(String),

    /// The server answered with a non-success response
    #[error("server rejected request: {0}")]
    Rejected(String),

    /// Invalid configuration (fatal, raised at construction time)
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The backing store of a collection stream failed
    #[error("collation error: {0}")]
    Collation(std::io::Error),

    /// The collection stream was already flushed or closed
    #[error("collection stream is closed")]
    StreamClosed,
}

impl AgentError {
    /// Whether steady-state operation may continue after this error.
    ///
    /// Only configuration errors are fatal; everything else is absorbed by the
    /// scheduling loop and surfaced through logs and state fields.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, AgentError::InvalidConfig(_))
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::Protocol(err.to_string())
    }
}
