//! Catalog reconciler binary.

use std::sync::Arc;

use tracing::{error, info};

use vcat_models::{DB_QUEUE, TRANSCODE_QUEUE};
use vcat_queue::Broker;
use vcat_store::RedisCatalogStore;
use vcat_worker::{
    init_tracing, metrics, shutdown_signal, CatalogConsumer, DbConsumerConfig, ExecutorConfig,
    JobExecutor,
};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Needed for rediss:// URLs; a second install is harmless
    let _ = rustls::crypto::ring::default_provider().install_default();

    init_tracing();
    info!("Starting vcat-db-consumer");

    if let Err(e) = run().await {
        error!("DB consumer error: {:#}", e);
        std::process::exit(1);
    }

    info!("DB consumer shutdown complete");
}

async fn run() -> anyhow::Result<()> {
    let config = DbConsumerConfig::from_env();
    info!(
        consumer = %config.consumer_name,
        prefix = %config.store.key_prefix,
        shutdown_timeout_secs = config.shutdown_timeout.as_secs(),
        "DB consumer config loaded"
    );

    if let Some(port) = config.metrics_port {
        metrics::init_metrics(port)?;
    }

    let broker = Arc::new(Broker::connect(config.queue.clone()).await?);
    broker.declare_queue(DB_QUEUE).await?;
    broker.declare_queue(TRANSCODE_QUEUE).await?;

    let store = Arc::new(RedisCatalogStore::connect(&config.store).await?);
    let handler = Arc::new(CatalogConsumer::new(store, Arc::clone(&broker)));

    // One message at a time: catalog writes stay in queue order
    let executor = Arc::new(JobExecutor::new(
        handler,
        Arc::clone(&broker),
        ExecutorConfig {
            capacity: 1,
            requeue_delay: config.queue.requeue_delay,
            shutdown_timeout: config.shutdown_timeout,
        },
    ));

    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_executor.shutdown();
    });

    let mut consumer = broker.consumer(DB_QUEUE, &config.consumer_name).await?;
    executor.run(&mut consumer).await?;
    Ok(())
}
