//! Job executor.
//!
//! Reads deliveries only when a slot is free, runs each one in its own task
//! and resolves it with the handler's [`Disposition`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn, Instrument};

use vcat_queue::{Delivery, DeliverySource, Disposition, Settler};

use crate::error::{WorkerError, WorkerResult};
use crate::metrics;

/// Decides what happens to one delivery.
///
/// Handlers never fail: every outcome, including a failed job, is expressed as
/// a disposition.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, delivery: &Delivery) -> Disposition;
}

/// Executor settings.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Number of jobs allowed to run at once
    pub capacity: usize,
    /// Delay before a delivery that found no free slot is requeued
    pub requeue_delay: Duration,
    /// How long shutdown waits for in-flight jobs
    pub shutdown_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            capacity: 1,
            requeue_delay: Duration::from_millis(500),
            shutdown_timeout: Duration::from_secs(60),
        }
    }
}

/// Job executor that processes deliveries from one source.
pub struct JobExecutor<H, S> {
    handler: Arc<H>,
    settler: Arc<S>,
    slots: Arc<Semaphore>,
    config: ExecutorConfig,
    shutdown: watch::Sender<bool>,
}

impl<H, S> JobExecutor<H, S>
where
    H: JobHandler,
    S: Settler + 'static,
{
    /// Create a new job executor.
    pub fn new(handler: Arc<H>, settler: Arc<S>, config: ExecutorConfig) -> Self {
        let capacity = config.capacity.max(1);
        let (shutdown, _) = watch::channel(false);

        Self {
            handler,
            settler,
            slots: Arc::new(Semaphore::new(capacity)),
            config: ExecutorConfig { capacity, ..config },
            shutdown,
        }
    }

    /// Slots currently occupied by running jobs.
    pub fn active_jobs(&self) -> usize {
        self.config.capacity - self.slots.available_permits()
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Consume `source` until shutdown is signalled.
    ///
    /// A broker failure while reading ends the loop with an error; jobs
    /// already running are still given the shutdown grace period.
    pub async fn run<R: DeliverySource>(&self, source: &mut R) -> WorkerResult<()> {
        info!(capacity = self.config.capacity, "Starting job executor");

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut jobs = JoinSet::new();

        let result = loop {
            while jobs.try_join_next().is_some() {}

            let permit = tokio::select! {
                _ = shutdown_requested(&mut shutdown_rx) => break Ok(()),
                permit = Arc::clone(&self.slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break Err(WorkerError::config_error("job slots closed")),
                },
            };

            // Prefetch never exceeds the number of free slots
            let want = 1 + self.slots.available_permits();

            let batch = tokio::select! {
                _ = shutdown_requested(&mut shutdown_rx) => break Ok(()),
                batch = source.next_batch(want) => batch,
            };

            let deliveries = match batch {
                Ok(deliveries) => deliveries,
                Err(e) => {
                    error!(error = %e, "Failed to read from queue");
                    break Err(WorkerError::from(e));
                }
            };

            if deliveries.is_empty() {
                continue;
            }
            debug!(count = deliveries.len(), "Received deliveries");

            let mut permit = Some(permit);
            for delivery in deliveries {
                let slot = permit
                    .take()
                    .or_else(|| Arc::clone(&self.slots).try_acquire_owned().ok());

                match slot {
                    Some(slot) => self.spawn_job(&mut jobs, slot, delivery),
                    None => self.spawn_requeue(&mut jobs, delivery),
                }
            }
            metrics::set_active_jobs(self.active_jobs());
        };

        info!(in_flight = self.active_jobs(), "Waiting for in-flight jobs to complete");
        let drained = tokio::time::timeout(self.config.shutdown_timeout, async {
            while jobs.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                in_flight = jobs.len(),
                "Shutdown timeout reached, abandoning in-flight jobs to redelivery"
            );
            jobs.abort_all();
        }

        info!("Job executor stopped");
        result
    }

    fn spawn_job(&self, jobs: &mut JoinSet<()>, permit: OwnedSemaphorePermit, delivery: Delivery) {
        let handler = Arc::clone(&self.handler);
        let settler = Arc::clone(&self.settler);
        let slots = Arc::clone(&self.slots);
        let capacity = self.config.capacity;
        let span = tracing::info_span!(
            "delivery",
            message_id = %delivery.message_id,
            queue = %delivery.queue
        );

        jobs.spawn(
            async move {
                let job_delivery = delivery.clone();
                let job = tokio::spawn(
                    async move { handler.handle(&job_delivery).await }.in_current_span(),
                );

                let disposition = match job.await {
                    Ok(disposition) => disposition,
                    Err(e) => {
                        error!(error = %e, "Job task panicked");
                        metrics::record_job_failed("unknown", "panic");
                        Disposition::reject(format!("job panicked: {}", e))
                    }
                };

                if let Err(e) = settler.settle(&delivery, &disposition).await {
                    error!(error = %e, ?disposition, "Failed to resolve delivery");
                }

                drop(permit);
                metrics::set_active_jobs(capacity - slots.available_permits());
            }
            .instrument(span),
        );
    }

    fn spawn_requeue(&self, jobs: &mut JoinSet<()>, delivery: Delivery) {
        let settler = Arc::clone(&self.settler);
        let delay = self.config.requeue_delay;

        debug!(message_id = %delivery.message_id, "No free slot, requeueing delivery");
        metrics::record_backpressure_requeue();

        jobs.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = settler.settle(&delivery, &Disposition::Requeue).await {
                error!(message_id = %delivery.message_id, error = %e, "Failed to requeue delivery");
            }
        });
    }
}

async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use vcat_queue::{QueueError, QueueResult};

    fn delivery(n: usize, payload: &str) -> Delivery {
        Delivery {
            message_id: format!("{}-0", n),
            queue: "transcode_queue".to_string(),
            payload: payload.to_string(),
            redelivered: false,
        }
    }

    /// Source backed by a list; `overfill` returns more than asked for.
    struct ListSource {
        pending: VecDeque<Delivery>,
        requested: Vec<usize>,
        overfill: bool,
        fail_when_empty: bool,
    }

    impl ListSource {
        fn new(deliveries: Vec<Delivery>) -> Self {
            Self {
                pending: deliveries.into(),
                requested: Vec::new(),
                overfill: false,
                fail_when_empty: false,
            }
        }
    }

    #[async_trait]
    impl DeliverySource for ListSource {
        async fn next_batch(&mut self, count: usize) -> QueueResult<Vec<Delivery>> {
            self.requested.push(count);
            if self.pending.is_empty() {
                if self.fail_when_empty {
                    return Err(QueueError::connection_lost("connection reset"));
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
                return Ok(Vec::new());
            }
            let take = if self.overfill { self.pending.len() } else { count.min(self.pending.len()) };
            Ok(self.pending.drain(..take).collect())
        }
    }

    #[derive(Default)]
    struct RecordingSettler {
        settled: Mutex<Vec<(String, Disposition)>>,
    }

    impl RecordingSettler {
        fn settled(&self) -> Vec<(String, Disposition)> {
            self.settled.lock().unwrap().clone()
        }

        async fn wait_for(&self, count: usize) {
            tokio::time::timeout(Duration::from_secs(5), async {
                while self.settled.lock().unwrap().len() < count {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .expect("deliveries were not settled in time");
        }
    }

    #[async_trait]
    impl Settler for RecordingSettler {
        async fn settle(&self, delivery: &Delivery, disposition: &Disposition) -> QueueResult<()> {
            self.settled
                .lock()
                .unwrap()
                .push((delivery.message_id.clone(), disposition.clone()));
            Ok(())
        }
    }

    /// Sleeps per job and tracks peak concurrency; panics on payload "boom".
    #[derive(Default)]
    struct SlowHandler {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl JobHandler for SlowHandler {
        async fn handle(&self, delivery: &Delivery) -> Disposition {
            if delivery.payload == "boom" {
                panic!("handler exploded");
            }
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Disposition::Ack
        }
    }

    fn executor(
        capacity: usize,
        handler: Arc<SlowHandler>,
        settler: Arc<RecordingSettler>,
    ) -> Arc<JobExecutor<SlowHandler, RecordingSettler>> {
        Arc::new(JobExecutor::new(
            handler,
            settler,
            ExecutorConfig {
                capacity,
                requeue_delay: Duration::from_millis(10),
                shutdown_timeout: Duration::from_secs(5),
            },
        ))
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_capacity() {
        let handler = Arc::new(SlowHandler::default());
        let settler = Arc::new(RecordingSettler::default());
        let executor = executor(2, Arc::clone(&handler), Arc::clone(&settler));

        let deliveries = (0..10).map(|n| delivery(n, "{}")).collect();
        let runner = {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move {
                let mut source = ListSource::new(deliveries);
                let result = executor.run(&mut source).await;
                (result, source.requested)
            })
        };

        settler.wait_for(10).await;
        executor.shutdown();
        let (result, requested) = runner.await.unwrap();
        result.unwrap();

        assert_eq!(handler.peak.load(Ordering::SeqCst), 2);
        assert!(requested.iter().all(|&n| n <= 2), "prefetch exceeded free slots: {:?}", requested);
        assert!(settler.settled().iter().all(|(_, d)| *d == Disposition::Ack));
    }

    #[tokio::test]
    async fn test_single_slot_runs_jobs_one_at_a_time() {
        let handler = Arc::new(SlowHandler::default());
        let settler = Arc::new(RecordingSettler::default());
        let executor = executor(1, Arc::clone(&handler), Arc::clone(&settler));

        let runner = {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move {
                let mut source = ListSource::new((0..4).map(|n| delivery(n, "{}")).collect());
                executor.run(&mut source).await
            })
        };

        settler.wait_for(4).await;
        executor.shutdown();
        runner.await.unwrap().unwrap();

        assert_eq!(handler.peak.load(Ordering::SeqCst), 1);
        let order: Vec<_> = settler.settled().into_iter().map(|(id, _)| id).collect();
        assert_eq!(order, vec!["0-0", "1-0", "2-0", "3-0"]);
    }

    #[tokio::test]
    async fn test_surplus_deliveries_are_requeued() {
        let handler = Arc::new(SlowHandler::default());
        let settler = Arc::new(RecordingSettler::default());
        let executor = executor(1, Arc::clone(&handler), Arc::clone(&settler));

        let runner = {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move {
                let mut source = ListSource::new((0..3).map(|n| delivery(n, "{}")).collect());
                source.overfill = true;
                executor.run(&mut source).await
            })
        };

        settler.wait_for(3).await;
        executor.shutdown();
        runner.await.unwrap().unwrap();

        let settled = settler.settled();
        let acked = settled.iter().filter(|(_, d)| *d == Disposition::Ack).count();
        let requeued = settled.iter().filter(|(_, d)| *d == Disposition::Requeue).count();
        assert_eq!((acked, requeued), (1, 2));
        assert_eq!(handler.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_job_is_rejected_and_frees_its_slot() {
        let handler = Arc::new(SlowHandler::default());
        let settler = Arc::new(RecordingSettler::default());
        let executor = executor(1, Arc::clone(&handler), Arc::clone(&settler));

        let runner = {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move {
                let mut source = ListSource::new(vec![delivery(0, "boom"), delivery(1, "{}")]);
                executor.run(&mut source).await
            })
        };

        settler.wait_for(2).await;
        executor.shutdown();
        runner.await.unwrap().unwrap();

        let settled = settler.settled();
        assert!(matches!(&settled[0], (id, Disposition::Reject(_)) if id == "0-0"));
        assert_eq!(settled[1], ("1-0".to_string(), Disposition::Ack));
        assert_eq!(executor.active_jobs(), 0);
    }

    #[tokio::test]
    async fn test_lost_connection_is_fatal_after_draining() {
        let handler = Arc::new(SlowHandler::default());
        let settler = Arc::new(RecordingSettler::default());
        let executor = executor(2, Arc::clone(&handler), Arc::clone(&settler));

        let mut source = ListSource::new(vec![delivery(0, "{}")]);
        source.fail_when_empty = true;

        let err = executor.run(&mut source).await.unwrap_err();
        assert!(err.is_fatal());
        // The job read before the failure still completed
        assert_eq!(settler.settled().len(), 1);
    }
}
