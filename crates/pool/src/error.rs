//! Error types for the connection pool
//!
//! Caller-facing operations (`acquire`, `query`, `connect`) propagate these
//! errors; background work (idle sweeps, releases into a closed pool) logs
//! them instead.

use thiserror::Error;

/// Result type alias for pool operations
pub type PoolResult<T> = Result<T, PoolError>;

/// Connection pool error types
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PoolError {
    /// The connection factory could not produce a connection
    #[error("Connection creation failed: {0}")]
    ConnectionFailed(String),

    #[error("Pool is closing")]
    PoolClosing,

    #[error("Pool is not connected")]
    NotConnected,

    #[error("Requested pool size {requested} is outside [{min}, {max}]")]
    ResizeOutOfBounds {
        requested: usize,
        min: usize,
        max: usize,
    },

    #[error("Resize to {requested} failed: {reason}")]
    ResizeFailed { requested: usize, reason: String },

    #[error("Wait queue is full ({max_depth} callers waiting)")]
    QueueFull { max_depth: usize },

    #[error("Timed out after {timeout_ms}ms waiting for a connection")]
    AcquireTimeout { timeout_ms: u64 },

    /// The backend rejected or failed a statement
    #[error("Query error: {0}")]
    Query(String),

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Connection close failed: {0}")]
    CloseFailed(String),

    #[error("Health check failed: {reason}")]
    HealthCheckFailed { reason: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Invalid value '{value}' for {var}: expected {expected}")]
    InvalidEnvVar {
        var: String,
        value: String,
        expected: String,
    },
}

impl PoolError {
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        PoolError::Configuration {
            message: message.into(),
        }
    }

    /// Whether the error came from the backend rather than from pool bookkeeping
    pub fn is_backend_error(&self) -> bool {
        matches!(
            self,
            PoolError::ConnectionFailed(_) | PoolError::Query(_) | PoolError::CloseFailed(_)
        )
    }
}

impl From<serde_json::Error> for PoolError {
    fn from(err: serde_json::Error) -> Self {
        PoolError::Query(format!("Serialization error: {}", err))
    }
}
