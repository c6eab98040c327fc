//! Catalog store metrics.

use std::time::Instant;

use metrics::{counter, histogram};

/// Metric name constants.
pub mod names {
    /// Store operations by operation and outcome.
    pub const OPERATIONS_TOTAL: &str = "vcat_store_operations_total";

    /// Store operation latency in seconds by operation.
    pub const LATENCY_SECONDS: &str = "vcat_store_latency_seconds";
}

/// Record a finished store operation.
pub fn record_operation(operation: &'static str, outcome: &'static str, started: Instant) {
    counter!(
        names::OPERATIONS_TOTAL,
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);

    histogram!(names::LATENCY_SECONDS, "operation" => operation)
        .record(started.elapsed().as_secs_f64());
}

/// Outcome label for a store result.
pub fn outcome<T>(result: &crate::StoreResult<T>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(crate::StoreError::NotFound(_)) => "not_found",
        Err(crate::StoreError::ConstraintViolation(_)) => "conflict",
        Err(_) => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreError;
    use vcat_models::CatalogId;

    #[test]
    fn test_outcome_labels() {
        assert_eq!(outcome(&Ok::<(), StoreError>(())), "ok");
        assert_eq!(outcome::<()>(&Err(StoreError::NotFound(CatalogId(1)))), "not_found");
        assert_eq!(outcome::<()>(&Err(StoreError::ConstraintViolation("/a".into()))), "conflict");
        assert_eq!(outcome::<()>(&Err(StoreError::io("down"))), "error");
    }

    #[test]
    fn test_record_without_recorder_is_noop() {
        record_operation("insert", "ok", Instant::now());
    }
}
