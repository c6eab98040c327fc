//! Catalog reconciler for the catalog queue.
//!
//! [`CatalogReconciler`] applies one catalog task to the store and returns the
//! disposition plus the events it wants published. [`CatalogConsumer`] wires
//! it to the broker.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use vcat_models::{
    CatalogReset, CatalogStatus, CatalogTask, CatalogUpdate, FileDescriptor, NewCatalogEntry,
    TranscodeRequest, TranscodeTask, TRANSCODE_QUEUE,
};
use vcat_queue::{Delivery, Disposition, MessagePublisher, PublishExt};
use vcat_store::{CatalogStore, StoreError};

use crate::executor::JobHandler;
use crate::metrics;

/// Follow-up work produced by a reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileEvent {
    /// A catalog entry is ready to be transcoded
    TranscodeRequested(TranscodeRequest),
}

/// Result of applying one catalog task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub disposition: Disposition,
    pub events: Vec<ReconcileEvent>,
}

impl ReconcileOutcome {
    fn ack() -> Self {
        Self {
            disposition: Disposition::Ack,
            events: Vec::new(),
        }
    }

    fn ack_with(event: ReconcileEvent) -> Self {
        Self {
            disposition: Disposition::Ack,
            events: vec![event],
        }
    }

    fn store_failure(operation: &'static str, error: StoreError) -> Self {
        metrics::record_catalog_mutation(operation, "error");
        let disposition = if error.is_transient() {
            warn!(operation, error = %error, "Store unavailable, requeueing");
            Disposition::Requeue
        } else {
            warn!(operation, error = %error, "Store rejected operation");
            Disposition::reject(error.to_string())
        };
        Self {
            disposition,
            events: Vec::new(),
        }
    }
}

/// Keeps the catalog in step with scan results and transcode reports.
pub struct CatalogReconciler<S: ?Sized> {
    store: Arc<S>,
}

impl<S: CatalogStore + ?Sized> CatalogReconciler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Apply a task delivered for the first time.
    pub async fn reconcile(&self, task: CatalogTask) -> ReconcileOutcome {
        self.reconcile_attempt(task, false).await
    }

    /// Apply a task; `redelivered` marks a message recovered after a crash.
    pub async fn reconcile_attempt(&self, task: CatalogTask, redelivered: bool) -> ReconcileOutcome {
        match task {
            CatalogTask::CreateMetadata { data } => self.create(data, redelivered).await,
            CatalogTask::UpdateMetadata { data } => self.update(data).await,
            CatalogTask::ResetMetadata { data } => self.reset(data).await,
            CatalogTask::Unknown => {
                warn!("Unknown catalog task, dropping message");
                ReconcileOutcome::ack()
            }
        }
    }

    /// Record a scanned file once; a path already in the catalog is left
    /// alone and triggers nothing.
    ///
    /// A redelivered create may belong to a run that inserted the entry and
    /// died before requesting the transcode, so a still-pending entry gets
    /// its request again.
    async fn create(&self, file: FileDescriptor, redelivered: bool) -> ReconcileOutcome {
        match self.store.find_by_path(&file.original_path).await {
            Ok(Some(existing)) if redelivered && existing.status == CatalogStatus::Pending => {
                info!(id = %existing.id, path = %existing.original_path, "Re-requesting transcode for recovered entry");
                metrics::record_catalog_mutation("create", "resumed");
                return ReconcileOutcome::ack_with(ReconcileEvent::TranscodeRequested(
                    TranscodeRequest::for_entry(existing.id, existing.original_path),
                ));
            }
            Ok(Some(existing)) => {
                debug!(id = %existing.id, path = %existing.original_path, "Already cataloged");
                metrics::record_catalog_mutation("create", "exists");
                return ReconcileOutcome::ack();
            }
            Ok(None) => {}
            Err(e) => return ReconcileOutcome::store_failure("create", e),
        }

        match self.store.insert(NewCatalogEntry::pending(file)).await {
            Ok(entry) => {
                info!(id = %entry.id, path = %entry.original_path, "Cataloged new video");
                metrics::record_catalog_mutation("create", "ok");
                ReconcileOutcome::ack_with(ReconcileEvent::TranscodeRequested(
                    TranscodeRequest::for_entry(entry.id, entry.original_path),
                ))
            }
            // Lost a race with a concurrent insert of the same path
            Err(StoreError::ConstraintViolation(path)) => {
                debug!(path = %path, "Already cataloged");
                metrics::record_catalog_mutation("create", "exists");
                ReconcileOutcome::ack()
            }
            Err(e) => ReconcileOutcome::store_failure("create", e),
        }
    }

    async fn update(&self, update: CatalogUpdate) -> ReconcileOutcome {
        let mut entry = match self.store.find_by_id(update.db_id).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                warn!(id = %update.db_id, "Update for unknown catalog entry, dropping");
                metrics::record_catalog_mutation("update", "not_found");
                return ReconcileOutcome::ack();
            }
            Err(e) => return ReconcileOutcome::store_failure("update", e),
        };

        if !entry.apply_update(&update) {
            info!(
                id = %entry.id,
                current = %entry.status,
                reported = %update.status,
                "Ignoring stale status report"
            );
            metrics::record_catalog_mutation("update", "stale");
            return ReconcileOutcome::ack();
        }

        match self.store.update(&entry).await {
            Ok(()) => {
                info!(id = %entry.id, status = %entry.status, "Catalog entry updated");
                metrics::record_catalog_mutation("update", "ok");
                ReconcileOutcome::ack()
            }
            Err(StoreError::NotFound(id)) => {
                warn!(id = %id, "Catalog entry vanished before update, dropping");
                metrics::record_catalog_mutation("update", "not_found");
                ReconcileOutcome::ack()
            }
            Err(e) => ReconcileOutcome::store_failure("update", e),
        }
    }

    /// Explicit retry: put a failed entry back to pending and ask for a new
    /// transcode.
    async fn reset(&self, reset: CatalogReset) -> ReconcileOutcome {
        let mut entry = match self.store.find_by_id(reset.db_id).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                warn!(id = %reset.db_id, "Reset for unknown catalog entry, dropping");
                metrics::record_catalog_mutation("reset", "not_found");
                return ReconcileOutcome::ack();
            }
            Err(e) => return ReconcileOutcome::store_failure("reset", e),
        };

        if !entry.reset() {
            info!(id = %entry.id, status = %entry.status, "Entry is not retryable, ignoring reset");
            metrics::record_catalog_mutation("reset", "stale");
            return ReconcileOutcome::ack();
        }

        match self.store.update(&entry).await {
            Ok(()) => {
                info!(id = %entry.id, "Catalog entry reset for retry");
                metrics::record_catalog_mutation("reset", "ok");
                ReconcileOutcome::ack_with(ReconcileEvent::TranscodeRequested(
                    TranscodeRequest::for_entry(entry.id, entry.original_path),
                ))
            }
            Err(StoreError::NotFound(_)) => ReconcileOutcome::ack(),
            Err(e) => ReconcileOutcome::store_failure("reset", e),
        }
    }
}

/// Broker-facing side of the reconciler: decodes deliveries and publishes
/// the resulting events before the delivery is resolved.
pub struct CatalogConsumer<S: ?Sized, P: ?Sized> {
    reconciler: CatalogReconciler<S>,
    publisher: Arc<P>,
}

impl<S, P> CatalogConsumer<S, P>
where
    S: CatalogStore + ?Sized,
    P: MessagePublisher + ?Sized,
{
    pub fn new(store: Arc<S>, publisher: Arc<P>) -> Self {
        Self {
            reconciler: CatalogReconciler::new(store),
            publisher,
        }
    }

    async fn publish_events(&self, events: Vec<ReconcileEvent>) {
        for event in events {
            match event {
                ReconcileEvent::TranscodeRequested(request) => {
                    self.publisher
                        .publish_or_log(TRANSCODE_QUEUE, &TranscodeTask::from(request))
                        .await;
                }
            }
        }
    }
}

#[async_trait]
impl<S, P> JobHandler for CatalogConsumer<S, P>
where
    S: CatalogStore + ?Sized + 'static,
    P: MessagePublisher + ?Sized + 'static,
{
    async fn handle(&self, delivery: &Delivery) -> Disposition {
        let task: CatalogTask = match delivery.decode() {
            Ok(task) => task,
            Err(e) => {
                warn!(message_id = %delivery.message_id, error = %e, "Malformed catalog message");
                return Disposition::reject(e.to_string());
            }
        };

        debug!(message_id = %delivery.message_id, task = task.kind(), "Reconciling");
        let outcome = self.reconciler.reconcile_attempt(task, delivery.redelivered).await;
        self.publish_events(outcome.events).await;
        outcome.disposition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use vcat_models::{CatalogEntry, CatalogId};
    use vcat_queue::MemoryPublisher;
    use vcat_store::{MemoryCatalogStore, StoreResult};

    fn file(path: &str, size: u64) -> FileDescriptor {
        FileDescriptor {
            original_path: path.to_string(),
            filename: path.rsplit('/').next().unwrap_or(path).to_string(),
            file_type: "mp4".to_string(),
            file_size: size,
            file_date_time: Utc::now(),
        }
    }

    fn create(path: &str) -> CatalogTask {
        CatalogTask::from(file(path, 5 * 1024 * 1024))
    }

    fn reconciler() -> CatalogReconciler<MemoryCatalogStore> {
        CatalogReconciler::new(Arc::new(MemoryCatalogStore::new()))
    }

    #[tokio::test]
    async fn test_create_persists_pending_and_requests_transcode() {
        let reconciler = reconciler();

        let outcome = reconciler.reconcile(create("/videos/a.mp4")).await;
        assert_eq!(outcome.disposition, Disposition::Ack);
        assert_eq!(
            outcome.events,
            vec![ReconcileEvent::TranscodeRequested(TranscodeRequest::for_entry(
                CatalogId(1),
                "/videos/a.mp4"
            ))]
        );

        let entry = reconciler.store().find_by_id(CatalogId(1)).await.unwrap().unwrap();
        assert_eq!(entry.status, CatalogStatus::Pending);
        assert_eq!(entry.file_size, 5 * 1024 * 1024);
        assert!(entry.transcoded_path.is_empty());
    }

    #[tokio::test]
    async fn test_rescan_does_not_duplicate_or_retrigger() {
        let reconciler = reconciler();
        reconciler.reconcile(create("/videos/a.mp4")).await;

        let again = reconciler.reconcile(create("/videos/a.mp4")).await;
        assert_eq!(again.disposition, Disposition::Ack);
        assert!(again.events.is_empty());
        assert_eq!(reconciler.store().len().await, 1);
    }

    #[tokio::test]
    async fn test_completed_report_sets_status_and_path() {
        let reconciler = reconciler();
        reconciler.reconcile(create("/videos/a.mp4")).await;

        let outcome = reconciler
            .reconcile(CatalogUpdate::completed(CatalogId(1), "/transcoded/a.mp4").into())
            .await;
        assert_eq!(outcome, ReconcileOutcome::ack());

        let entry = reconciler.store().find_by_id(CatalogId(1)).await.unwrap().unwrap();
        assert_eq!(entry.status, CatalogStatus::Completed);
        assert_eq!(entry.transcoded_path, "/transcoded/a.mp4");
    }

    #[tokio::test]
    async fn test_failed_report_is_annotated() {
        let reconciler = reconciler();
        reconciler.reconcile(create("/videos/a.mp4")).await;
        reconciler.reconcile(CatalogUpdate::processing(CatalogId(1)).into()).await;

        reconciler
            .reconcile(CatalogUpdate::failed(CatalogId(1), "Encoder exited with code 1").into())
            .await;

        let entry = reconciler.store().find_by_id(CatalogId(1)).await.unwrap().unwrap();
        assert_eq!(entry.status, CatalogStatus::Failed);
        assert!(entry.transcoded_path.is_empty());
        assert_eq!(entry.error_message.as_deref(), Some("Encoder exited with code 1"));
    }

    #[tokio::test]
    async fn test_redelivered_report_is_idempotent() {
        let reconciler = reconciler();
        reconciler.reconcile(create("/videos/a.mp4")).await;
        let update: CatalogTask = CatalogUpdate::completed(CatalogId(1), "/transcoded/a.mp4").into();

        reconciler.reconcile(update.clone()).await;
        let first = reconciler.store().find_by_id(CatalogId(1)).await.unwrap().unwrap();
        reconciler.reconcile(update).await;
        let second = reconciler.store().find_by_id(CatalogId(1)).await.unwrap().unwrap();

        assert_eq!(first.status, second.status);
        assert_eq!(first.transcoded_path, second.transcoded_path);
    }

    #[tokio::test]
    async fn test_late_processing_report_does_not_regress_terminal_entry() {
        let reconciler = reconciler();
        reconciler.reconcile(create("/videos/a.mp4")).await;
        reconciler
            .reconcile(CatalogUpdate::completed(CatalogId(1), "/transcoded/a.mp4").into())
            .await;

        let outcome = reconciler.reconcile(CatalogUpdate::processing(CatalogId(1)).into()).await;
        assert_eq!(outcome.disposition, Disposition::Ack);

        let entry = reconciler.store().find_by_id(CatalogId(1)).await.unwrap().unwrap();
        assert_eq!(entry.status, CatalogStatus::Completed);
    }

    #[tokio::test]
    async fn test_update_for_missing_entry_is_acked() {
        let reconciler = reconciler();

        let outcome = reconciler
            .reconcile(CatalogUpdate::completed(CatalogId(999), "/transcoded/x.mp4").into())
            .await;
        assert_eq!(outcome, ReconcileOutcome::ack());
        assert!(reconciler.store().is_empty().await);
    }

    #[tokio::test]
    async fn test_reset_retries_failed_entry_only() {
        let reconciler = reconciler();
        reconciler.reconcile(create("/videos/a.mp4")).await;
        reconciler.reconcile(create("/videos/b.mp4")).await;
        reconciler
            .reconcile(CatalogUpdate::failed(CatalogId(1), "timeout").into())
            .await;
        reconciler
            .reconcile(CatalogUpdate::completed(CatalogId(2), "/transcoded/b.mp4").into())
            .await;

        let reset = reconciler
            .reconcile(CatalogTask::ResetMetadata { data: CatalogReset { db_id: CatalogId(1) } })
            .await;
        assert_eq!(reset.events.len(), 1);
        let entry = reconciler.store().find_by_id(CatalogId(1)).await.unwrap().unwrap();
        assert_eq!(entry.status, CatalogStatus::Pending);
        assert_eq!(entry.error_message, None);

        let ignored = reconciler
            .reconcile(CatalogTask::ResetMetadata { data: CatalogReset { db_id: CatalogId(2) } })
            .await;
        assert!(ignored.events.is_empty());
        let entry = reconciler.store().find_by_id(CatalogId(2)).await.unwrap().unwrap();
        assert_eq!(entry.status, CatalogStatus::Completed);
    }

    /// Store whose reads fail while `down` is set.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryCatalogStore,
        down: AtomicBool,
    }

    impl FlakyStore {
        fn check(&self) -> StoreResult<()> {
            if self.down.load(Ordering::SeqCst) {
                Err(StoreError::io("connection refused"))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl CatalogStore for FlakyStore {
        async fn find_by_path(&self, original_path: &str) -> StoreResult<Option<CatalogEntry>> {
            self.check()?;
            self.inner.find_by_path(original_path).await
        }

        async fn insert(&self, entry: NewCatalogEntry) -> StoreResult<CatalogEntry> {
            self.check()?;
            self.inner.insert(entry).await
        }

        async fn find_by_id(&self, id: CatalogId) -> StoreResult<Option<CatalogEntry>> {
            self.check()?;
            self.inner.find_by_id(id).await
        }

        async fn update(&self, entry: &CatalogEntry) -> StoreResult<()> {
            self.check()?;
            self.inner.update(entry).await
        }

        async fn list(&self) -> StoreResult<Vec<CatalogEntry>> {
            self.check()?;
            self.inner.list().await
        }
    }

    #[tokio::test]
    async fn test_transient_store_error_requeues() {
        let store = Arc::new(FlakyStore::default());
        store.down.store(true, Ordering::SeqCst);
        let reconciler = CatalogReconciler::new(Arc::clone(&store));

        let outcome = reconciler.reconcile(create("/videos/a.mp4")).await;
        assert_eq!(outcome.disposition, Disposition::Requeue);
        assert!(outcome.events.is_empty());

        store.down.store(false, Ordering::SeqCst);
        let outcome = reconciler.reconcile(create("/videos/a.mp4")).await;
        assert_eq!(outcome.events.len(), 1);
    }

    #[tokio::test]
    async fn test_consumer_publishes_transcode_request_for_new_entry() {
        let store = Arc::new(MemoryCatalogStore::new());
        let publisher = Arc::new(MemoryPublisher::new());
        let consumer = CatalogConsumer::new(Arc::clone(&store), Arc::clone(&publisher));

        let delivery = Delivery {
            message_id: "5-0".to_string(),
            queue: "db_queue".to_string(),
            payload: serde_json::to_string(&create("/videos/a.mp4")).unwrap(),
            redelivered: false,
        };
        assert_eq!(consumer.handle(&delivery).await, Disposition::Ack);

        let published: Vec<TranscodeTask> = publisher.decoded(TRANSCODE_QUEUE);
        assert_eq!(
            published,
            vec![TranscodeTask::from(TranscodeRequest::for_entry(CatalogId(1), "/videos/a.mp4"))]
        );

        // A duplicate create: no second request
        assert_eq!(consumer.handle(&delivery).await, Disposition::Ack);
        assert_eq!(publisher.payloads(TRANSCODE_QUEUE).len(), 1);
    }

    #[tokio::test]
    async fn test_recovered_create_re_requests_pending_entry() {
        let store = Arc::new(MemoryCatalogStore::new());
        let publisher = Arc::new(MemoryPublisher::new());
        // Entry inserted by a run that died before publishing its request
        let stranded = store
            .insert(NewCatalogEntry::pending(file("/videos/a.mp4", 10)))
            .await
            .unwrap();
        let consumer = CatalogConsumer::new(Arc::clone(&store), Arc::clone(&publisher));

        let delivery = Delivery {
            message_id: "7-0".to_string(),
            queue: "db_queue".to_string(),
            payload: serde_json::to_string(&create("/videos/a.mp4")).unwrap(),
            redelivered: true,
        };
        assert_eq!(consumer.handle(&delivery).await, Disposition::Ack);

        let published: Vec<TranscodeTask> = publisher.decoded(TRANSCODE_QUEUE);
        assert_eq!(
            published,
            vec![TranscodeTask::from(TranscodeRequest::for_entry(stranded.id, "/videos/a.mp4"))]
        );
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_recovered_create_leaves_progressed_entry_alone() {
        let reconciler = reconciler();
        reconciler.reconcile(create("/videos/a.mp4")).await;
        reconciler.reconcile(CatalogUpdate::processing(CatalogId(1)).into()).await;

        let outcome = reconciler.reconcile_attempt(create("/videos/a.mp4"), true).await;
        assert_eq!(outcome, ReconcileOutcome::ack());

        // First-time duplicates never re-request, whatever the status
        let fresh = self::reconciler();
        fresh.reconcile(create("/videos/b.mp4")).await;
        let outcome = fresh.reconcile_attempt(create("/videos/b.mp4"), false).await;
        assert!(outcome.events.is_empty());
    }

    #[tokio::test]
    async fn test_consumer_rejects_malformed_payload() {
        let consumer = CatalogConsumer::new(
            Arc::new(MemoryCatalogStore::new()),
            Arc::new(MemoryPublisher::new()),
        );
        let delivery = Delivery {
            message_id: "6-0".to_string(),
            queue: "db_queue".to_string(),
            payload: r#"{"task":"create_metadata"}"#.to_string(),
            redelivered: false,
        };

        assert!(matches!(consumer.handle(&delivery).await, Disposition::Reject(_)));
    }
}
