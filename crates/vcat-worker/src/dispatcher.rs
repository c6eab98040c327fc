//! Job dispatcher for the transcode queue.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{info, warn, Instrument};

use vcat_media::{scan_directory, TranscodeError, Transcoder};
use vcat_models::{CatalogTask, CatalogUpdate, TranscodeRequest, TranscodeTask, DB_QUEUE};
use vcat_queue::{Delivery, Disposition, MessagePublisher, PublishExt};

use crate::executor::JobHandler;
use crate::logging::JobLogger;
use crate::metrics;

/// Routes transcode-queue messages to the scanner or the transcoding engine
/// and reports results to the catalog queue.
pub struct JobDispatcher<T, P: ?Sized> {
    transcoder: Arc<T>,
    publisher: Arc<P>,
    source_root: PathBuf,
}

impl<T, P> JobDispatcher<T, P>
where
    T: Transcoder + 'static,
    P: MessagePublisher + ?Sized,
{
    pub fn new(transcoder: T, publisher: Arc<P>, source_root: impl Into<PathBuf>) -> Self {
        Self {
            transcoder: Arc::new(transcoder),
            publisher,
            source_root: source_root.into(),
        }
    }

    /// Handle one decoded task.
    pub async fn dispatch(&self, task: TranscodeTask, logger: &JobLogger) -> Disposition {
        match task {
            TranscodeTask::ProcessDirectory => self.process_directory(logger).await,
            TranscodeTask::TranscodeVideo(request) => self.transcode_video(request, logger).await,
            TranscodeTask::Unknown => {
                logger.log_warning("unknown task, dropping message");
                Disposition::Ack
            }
        }
    }

    /// Scan the source root and request a catalog entry for every video.
    async fn process_directory(&self, logger: &JobLogger) -> Disposition {
        logger.log_start(&format!("scanning {}", self.source_root.display()));

        let files = match scan_directory(&self.source_root).await {
            Ok(files) => files,
            Err(e) => {
                logger.log_error(&format!("scan failed: {}", e));
                metrics::record_job_failed("process_directory", "scan_failed");
                return Disposition::reject(e.to_string());
            }
        };

        let found = files.len();
        let mut published = 0usize;
        for file in files {
            if self
                .publisher
                .publish_or_log(DB_QUEUE, &CatalogTask::from(file))
                .await
            {
                published += 1;
            }
        }

        metrics::record_files_discovered(found);
        metrics::record_job_completed("process_directory");
        logger.log_completion(&format!("{} video files found, {} catalog requests sent", found, published));
        Disposition::Ack
    }

    /// Encode one file and report the outcome.
    ///
    /// Failures are permanent: the entry is marked failed and the message is
    /// rejected rather than redelivered.
    async fn transcode_video(&self, request: TranscodeRequest, logger: &JobLogger) -> Disposition {
        logger.log_start(&request.original_path);
        metrics::record_job_started("transcode_video");

        if let Some(id) = request.db_id {
            self.report(CatalogUpdate::processing(id)).await;
        } else {
            info!(source = %request.original_path, "On-demand transcode, no catalog entry to update");
        }

        let started = Instant::now();
        match self.run_engine(&request.original_path).await {
            Ok(output) => {
                let output = output.to_string_lossy().to_string();
                metrics::record_transcode_duration(started.elapsed().as_secs_f64());
                metrics::record_job_completed("transcode_video");
                logger.log_completion(&format!("{} -> {}", request.original_path, output));

                if let Some(id) = request.db_id {
                    self.report(CatalogUpdate::completed(id, output)).await;
                }
                Disposition::Ack
            }
            Err(e) => {
                if e.is_configuration_error() {
                    warn!(error = %e, "Transcode failed on a deployment problem");
                }
                logger.log_error(&format!("{}: {}", request.original_path, e));
                metrics::record_job_failed("transcode_video", e.kind());

                if let Some(id) = request.db_id {
                    self.report(CatalogUpdate::failed(id, e.to_string())).await;
                }
                Disposition::reject(e.to_string())
            }
        }
    }

    /// Run the engine in its own task so a panic still ends in a result.
    async fn run_engine(&self, source: &str) -> Result<PathBuf, TranscodeError> {
        let transcoder = Arc::clone(&self.transcoder);
        let source = PathBuf::from(source);
        match tokio::spawn(async move { transcoder.transcode(&source).await }).await {
            Ok(result) => result,
            Err(e) => Err(TranscodeError::Aborted(e.to_string())),
        }
    }

    async fn report(&self, update: CatalogUpdate) {
        self.publisher
            .publish_or_log(DB_QUEUE, &CatalogTask::from(update))
            .await;
    }
}

#[async_trait]
impl<T, P> JobHandler for JobDispatcher<T, P>
where
    T: Transcoder + 'static,
    P: MessagePublisher + ?Sized + 'static,
{
    async fn handle(&self, delivery: &Delivery) -> Disposition {
        let task: TranscodeTask = match delivery.decode() {
            Ok(task) => task,
            Err(e) => {
                let logger = JobLogger::new(&delivery.message_id, "malformed");
                logger.log_error(&e.to_string());
                return Disposition::reject(e.to_string());
            }
        };

        let logger = JobLogger::new(&delivery.message_id, task.kind());
        if delivery.redelivered {
            logger.log_progress("redelivered after restart");
        }
        let span = logger.create_span();
        self.dispatch(task, &logger).instrument(span).await
    }
}
