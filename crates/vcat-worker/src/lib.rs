//! Transcoding worker and catalog reconciler.
//!
//! This crate provides:
//! - The job dispatcher for the transcode queue (scan + transcode)
//! - The catalog reconciler for the catalog queue
//! - A bounded job executor shared by both consuming processes
//! - Graceful shutdown, structured logging and metrics

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod reconciler;

pub use config::{DbConsumerConfig, WorkerConfig};
pub use dispatcher::JobDispatcher;
pub use error::{WorkerError, WorkerResult};
pub use executor::{ExecutorConfig, JobExecutor, JobHandler};
pub use logging::{init_tracing, JobLogger};
pub use reconciler::{CatalogConsumer, CatalogReconciler, ReconcileEvent, ReconcileOutcome};

/// Resolve on Ctrl-C or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Received shutdown signal");
}
