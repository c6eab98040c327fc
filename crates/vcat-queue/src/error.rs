//! Queue error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Broker unreachable after {attempts} attempts: {last_error}")]
    ConnectionExhausted { attempts: u32, last_error: String },

    #[error("Broker connection lost: {0}")]
    ConnectionLost(String),

    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn connection_lost(msg: impl Into<String>) -> Self {
        Self::ConnectionLost(msg.into())
    }

    pub fn publish_failed(msg: impl Into<String>) -> Self {
        Self::PublishFailed(msg.into())
    }

    /// Whether the error means the broker connection is gone.
    ///
    /// Consumers treat these as fatal and exit so a supervisor restarts them.
    pub fn is_fatal(&self) -> bool {
        match self {
            QueueError::ConnectionExhausted { .. } | QueueError::ConnectionLost(_) => true,
            QueueError::Redis(e) => {
                e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal()
            }
            _ => false,
        }
    }
}
