//! Application state.

use std::sync::Arc;

use tracing::info;
use vcat_models::{DB_QUEUE, TRANSCODE_QUEUE};
use vcat_queue::{Broker, MessagePublisher};
use vcat_store::{CatalogStore, RedisCatalogStore};

use crate::config::ApiConfig;
use crate::error::ApiResult;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub store: Arc<dyn CatalogStore>,
    pub publisher: Arc<dyn MessagePublisher>,
}

impl AppState {
    /// Connect the broker and the catalog store.
    pub async fn new(config: ApiConfig) -> ApiResult<Self> {
        let broker = Broker::connect(config.queue.clone()).await?;
        broker.declare_queue(TRANSCODE_QUEUE).await?;
        broker.declare_queue(DB_QUEUE).await?;

        let store = RedisCatalogStore::connect(&config.store).await?;
        info!("Broker and catalog store ready");

        Ok(Self::with_backends(config, Arc::new(store), Arc::new(broker)))
    }

    pub fn with_backends(
        config: ApiConfig,
        store: Arc<dyn CatalogStore>,
        publisher: Arc<dyn MessagePublisher>,
    ) -> Self {
        Self {
            config,
            store,
            publisher,
        }
    }
}
