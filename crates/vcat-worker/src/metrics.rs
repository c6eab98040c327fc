//! Worker and reconciler metrics.

use std::net::{Ipv4Addr, SocketAddr};

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_STARTED_TOTAL: &str = "vcat_jobs_started_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "vcat_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "vcat_jobs_failed_total";
    pub const JOBS_ACTIVE: &str = "vcat_jobs_active";
    pub const BACKPRESSURE_REQUEUES_TOTAL: &str = "vcat_backpressure_requeues_total";
    pub const TRANSCODE_DURATION_SECONDS: &str = "vcat_transcode_duration_seconds";
    pub const FILES_DISCOVERED_TOTAL: &str = "vcat_files_discovered_total";
    pub const CATALOG_MUTATIONS_TOTAL: &str = "vcat_catalog_mutations_total";
}

/// Serve Prometheus metrics on `0.0.0.0:port`.
pub fn init_metrics(port: u16) -> WorkerResult<()> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics exporter: {}", e)))?;
    info!(%addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_job_started(operation: &'static str) {
    counter!(names::JOBS_STARTED_TOTAL, "operation" => operation).increment(1);
}

pub fn record_job_completed(operation: &'static str) {
    counter!(names::JOBS_COMPLETED_TOTAL, "operation" => operation).increment(1);
}

pub fn record_job_failed(operation: &'static str, reason: &'static str) {
    counter!(
        names::JOBS_FAILED_TOTAL,
        "operation" => operation,
        "reason" => reason
    )
    .increment(1);
}

pub fn set_active_jobs(count: usize) {
    gauge!(names::JOBS_ACTIVE).set(count as f64);
}

pub fn record_backpressure_requeue() {
    counter!(names::BACKPRESSURE_REQUEUES_TOTAL).increment(1);
}

pub fn record_transcode_duration(secs: f64) {
    histogram!(names::TRANSCODE_DURATION_SECONDS).record(secs);
}

pub fn record_files_discovered(count: usize) {
    counter!(names::FILES_DISCOVERED_TOTAL).increment(count as u64);
}

pub fn record_catalog_mutation(operation: &'static str, outcome: &'static str) {
    counter!(
        names::CATALOG_MUTATIONS_TOTAL,
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);
}
