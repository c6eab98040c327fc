//! In-process catalog store.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;
use vcat_models::{CatalogEntry, CatalogId, NewCatalogEntry};

use crate::error::{StoreError, StoreResult};
use crate::store::CatalogStore;

#[derive(Debug, Default)]
struct Inner {
    last_id: i64,
    entries: BTreeMap<CatalogId, CatalogEntry>,
    by_path: HashMap<String, CatalogId>,
}

/// Catalog store held in memory. Ids start at 1.
#[derive(Debug, Default)]
pub struct MemoryCatalogStore {
    inner: RwLock<Inner>,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn find_by_path(&self, original_path: &str) -> StoreResult<Option<CatalogEntry>> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_path
            .get(original_path)
            .and_then(|id| inner.entries.get(id))
            .cloned())
    }

    async fn insert(&self, entry: NewCatalogEntry) -> StoreResult<CatalogEntry> {
        let mut inner = self.inner.write().await;
        if inner.by_path.contains_key(&entry.original_path) {
            return Err(StoreError::ConstraintViolation(entry.original_path));
        }

        inner.last_id += 1;
        let id = CatalogId(inner.last_id);
        let stored = CatalogEntry::from_new(id, entry);
        inner.by_path.insert(stored.original_path.clone(), id);
        inner.entries.insert(id, stored.clone());
        Ok(stored)
    }

    async fn find_by_id(&self, id: CatalogId) -> StoreResult<Option<CatalogEntry>> {
        Ok(self.inner.read().await.entries.get(&id).cloned())
    }

    async fn update(&self, entry: &CatalogEntry) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        match inner.entries.get_mut(&entry.id) {
            Some(existing) => {
                *existing = entry.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(entry.id)),
        }
    }

    async fn list(&self) -> StoreResult<Vec<CatalogEntry>> {
        Ok(self.inner.read().await.entries.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;
    use vcat_models::{CatalogStatus, FileDescriptor};

    fn new_entry(path: &str) -> NewCatalogEntry {
        NewCatalogEntry::pending(FileDescriptor {
            original_path: path.to_string(),
            filename: path.rsplit('/').next().unwrap_or(path).to_string(),
            file_type: "mp4".to_string(),
            file_size: 10,
            file_date_time: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_insert_assigns_ids_and_enforces_unique_paths() {
        let store = MemoryCatalogStore::new();

        let a = store.insert(new_entry("/videos/a.mp4")).await.unwrap();
        let b = store.insert(new_entry("/videos/b.mp4")).await.unwrap();
        assert_eq!(a.id, CatalogId(1));
        assert_eq!(b.id, CatalogId(2));
        assert_eq!(a.status, CatalogStatus::Pending);
        assert!(a.transcoded_path.is_empty());

        let dup = store.insert(new_entry("/videos/a.mp4")).await;
        assert!(matches!(dup, Err(StoreError::ConstraintViolation(p)) if p == "/videos/a.mp4"));
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_concurrent_inserts_of_same_path_yield_one_entry() {
        let store = Arc::new(MemoryCatalogStore::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.insert(new_entry("/videos/race.mp4")).await })
            })
            .collect();

        let mut created = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => created += 1,
                Err(StoreError::ConstraintViolation(_)) => conflicts += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(created, 1);
        assert_eq!(conflicts, 7);
    }

    #[tokio::test]
    async fn test_find_update_list() {
        let store = MemoryCatalogStore::new();
        let b = store.insert(new_entry("/videos/b.mp4")).await.unwrap();
        let a = store.insert(new_entry("/videos/a.mp4")).await.unwrap();

        assert_eq!(store.find_by_path("/videos/a.mp4").await.unwrap().map(|e| e.id), Some(a.id));
        assert!(store.find_by_path("/videos/zzz.mp4").await.unwrap().is_none());

        let mut updated = b.clone();
        updated.status = CatalogStatus::Completed;
        updated.transcoded_path = "/transcoded/b.mp4".to_string();
        store.update(&updated).await.unwrap();

        let found = store.find_by_id(b.id).await.unwrap().unwrap();
        assert_eq!(found.status, CatalogStatus::Completed);
        assert_eq!(found.transcoded_path, "/transcoded/b.mp4");

        let ids: Vec<_> = store.list().await.unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![b.id, a.id]);
    }

    #[tokio::test]
    async fn test_update_unknown_id_is_not_found() {
        let store = MemoryCatalogStore::new();
        let mut ghost = store.insert(new_entry("/videos/a.mp4")).await.unwrap();
        ghost.id = CatalogId(999);

        assert!(matches!(store.update(&ghost).await, Err(StoreError::NotFound(CatalogId(999)))));
        assert!(store.find_by_id(CatalogId(999)).await.unwrap().is_none());
    }
}
