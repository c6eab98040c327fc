//! Worker configuration.

use std::time::Duration;

use vcat_media::TranscodeConfig;
use vcat_queue::QueueConfig;

/// Transcoding worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent transcodes
    pub concurrency: usize,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Stable consumer name, so a restart recovers our pending messages
    pub consumer_name: String,
    /// Port for the Prometheus scrape endpoint, disabled when unset
    pub metrics_port: Option<u16>,
    pub queue: QueueConfig,
    pub transcode: TranscodeConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            shutdown_timeout: Duration::from_secs(60),
            consumer_name: default_consumer_name("vcat-worker"),
            metrics_port: None,
            queue: QueueConfig::default(),
            transcode: TranscodeConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            concurrency: std::env::var("WORKER_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or_else(default_concurrency),
            shutdown_timeout: shutdown_timeout(std::env::var("WORKER_SHUTDOWN_TIMEOUT").ok(), 60),
            consumer_name: std::env::var("QUEUE_CONSUMER_NAME")
                .unwrap_or_else(|_| default_consumer_name("vcat-worker")),
            metrics_port: metrics_port_from_env(),
            queue: QueueConfig::from_env(),
            transcode: TranscodeConfig::from_env(),
        }
    }
}

/// Catalog reconciler configuration.
#[derive(Debug, Clone)]
pub struct DbConsumerConfig {
    pub consumer_name: String,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    pub metrics_port: Option<u16>,
    pub queue: QueueConfig,
    pub store: vcat_store::StoreConfig,
}

impl Default for DbConsumerConfig {
    fn default() -> Self {
        Self {
            consumer_name: default_consumer_name("vcat-db-consumer"),
            shutdown_timeout: Duration::from_secs(30),
            metrics_port: None,
            queue: QueueConfig::default(),
            store: vcat_store::StoreConfig::default(),
        }
    }
}

impl DbConsumerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            consumer_name: std::env::var("QUEUE_CONSUMER_NAME")
                .unwrap_or_else(|_| default_consumer_name("vcat-db-consumer")),
            shutdown_timeout: shutdown_timeout(std::env::var("WORKER_SHUTDOWN_TIMEOUT").ok(), 30),
            metrics_port: metrics_port_from_env(),
            queue: QueueConfig::from_env(),
            store: vcat_store::StoreConfig::from_env(),
        }
    }
}

/// Slots derived from the core count: one core is left for the
/// orchestrator on machines with more than two.
pub fn default_concurrency() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    concurrency_for_cores(cores)
}

fn concurrency_for_cores(cores: usize) -> usize {
    if cores > 2 {
        cores - 1
    } else {
        1
    }
}

fn default_consumer_name(binary: &str) -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "local".to_string());
    format!("{}-{}", binary, host)
}

/// Seconds from `raw`, or `default_secs` when unset or unparsable.
fn shutdown_timeout(raw: Option<String>, default_secs: u64) -> Duration {
    Duration::from_secs(
        raw.and_then(|s| s.trim().parse().ok())
            .unwrap_or(default_secs),
    )
}

fn metrics_port_from_env() -> Option<u16> {
    std::env::var("METRICS_PORT").ok().and_then(|s| s.parse().ok())
}
