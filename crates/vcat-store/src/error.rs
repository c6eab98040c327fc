//! Catalog store error types.

use thiserror::Error;
use vcat_models::CatalogId;

/// Result type for catalog store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during catalog store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Catalog entry not found: {0}")]
    NotFound(CatalogId),

    /// Another entry already owns this source path.
    #[error("Source path already cataloged: {0}")]
    ConstraintViolation(String),

    #[error("Corrupt catalog record: {0}")]
    Corrupt(String),

    #[error("Store I/O error: {0}")]
    Io(String),

    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

impl StoreError {
    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }

    /// Check if the operation may succeed when retried later.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Io(_) | StoreError::Redis(_))
    }
}
