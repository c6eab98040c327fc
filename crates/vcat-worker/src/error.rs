//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Queue error: {0}")]
    Queue(#[from] vcat_queue::QueueError),

    #[error("Store error: {0}")]
    Store(#[from] vcat_store::StoreError),

    #[error("Media error: {0}")]
    Media(#[from] vcat_media::MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Infrastructure failures end the process; supervision restarts it.
    pub fn is_fatal(&self) -> bool {
        match self {
            WorkerError::Queue(e) => e.is_fatal(),
            WorkerError::ConfigError(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcat_queue::QueueError;

    #[test]
    fn test_fatal_errors() {
        assert!(WorkerError::from(QueueError::connection_lost("reset by peer")).is_fatal());
        assert!(WorkerError::config_error("ffmpeg missing").is_fatal());
        assert!(!WorkerError::from(vcat_store::StoreError::io("timeout")).is_fatal());
    }
}
