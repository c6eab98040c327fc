//! Catalog store interface.

use async_trait::async_trait;
use vcat_models::{CatalogEntry, CatalogId, NewCatalogEntry};

use crate::error::StoreResult;

/// Persistence for catalog entries.
///
/// Implementations must enforce path uniqueness atomically in [`insert`]:
/// two concurrent inserts for the same `original_path` yield exactly one
/// entry, the loser failing with `StoreError::ConstraintViolation`.
///
/// [`insert`]: CatalogStore::insert
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Look up the entry for a source path.
    async fn find_by_path(&self, original_path: &str) -> StoreResult<Option<CatalogEntry>>;

    /// Persist a new entry and return it with its assigned id.
    async fn insert(&self, entry: NewCatalogEntry) -> StoreResult<CatalogEntry>;

    /// Look up an entry by id.
    async fn find_by_id(&self, id: CatalogId) -> StoreResult<Option<CatalogEntry>>;

    /// Overwrite an existing entry. Fails with `NotFound` for unknown ids.
    async fn update(&self, entry: &CatalogEntry) -> StoreResult<()>;

    /// All entries, ordered by id.
    async fn list(&self) -> StoreResult<Vec<CatalogEntry>>;
}
