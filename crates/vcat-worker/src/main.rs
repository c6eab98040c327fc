//! Transcoding worker binary.

use std::sync::Arc;

use tracing::{error, info, warn};

use vcat_media::{check_ffmpeg, check_ffprobe, FfmpegTranscoder};
use vcat_models::{DB_QUEUE, TRANSCODE_QUEUE};
use vcat_queue::Broker;
use vcat_worker::{
    init_tracing, metrics, shutdown_signal, ExecutorConfig, JobDispatcher, JobExecutor,
    WorkerConfig,
};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Needed for rediss:// URLs; a second install is harmless
    let _ = rustls::crypto::ring::default_provider().install_default();

    init_tracing();
    info!("Starting vcat-worker");

    if let Err(e) = run().await {
        error!("Worker error: {:#}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

async fn run() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env();
    info!(
        concurrency = config.concurrency,
        consumer = %config.consumer_name,
        source_root = %config.transcode.source_root.display(),
        output_root = %config.transcode.output_root.display(),
        "Worker config loaded"
    );

    match check_ffmpeg(&config.transcode.ffmpeg_path) {
        Ok(path) => info!("Using encoder at {}", path.display()),
        Err(e) => error!("{}; every transcode will fail until this is fixed", e),
    }
    if let Err(e) = check_ffprobe(&config.transcode.ffprobe_path) {
        warn!("{}; transcodes will use the fallback deadline", e);
    }

    if let Some(port) = config.metrics_port {
        metrics::init_metrics(port)?;
    }

    let broker = Arc::new(Broker::connect(config.queue.clone()).await?);
    broker.declare_queue(TRANSCODE_QUEUE).await?;
    broker.declare_queue(DB_QUEUE).await?;

    let dispatcher = Arc::new(JobDispatcher::new(
        FfmpegTranscoder::new(config.transcode.clone()),
        Arc::clone(&broker),
        config.transcode.source_root.clone(),
    ));

    let executor = Arc::new(JobExecutor::new(
        dispatcher,
        Arc::clone(&broker),
        ExecutorConfig {
            capacity: config.concurrency,
            requeue_delay: config.queue.requeue_delay,
            shutdown_timeout: config.shutdown_timeout,
        },
    ));

    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_executor.shutdown();
    });

    let mut consumer = broker.consumer(TRANSCODE_QUEUE, &config.consumer_name).await?;
    executor.run(&mut consumer).await?;
    Ok(())
}
