//! Catalog persistence.
//!
//! The catalog is keyed by a store-assigned id and holds at most one entry per
//! source path. Backends:
//! - [`RedisCatalogStore`]: shared, durable, atomic unique-path insert
//! - [`MemoryCatalogStore`]: in-process, for tests and single-process setups

pub mod error;
pub mod memory;
pub mod metrics;
pub mod redis_store;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryCatalogStore;
pub use redis_store::{RedisCatalogStore, StoreConfig};
pub use store::CatalogStore;
