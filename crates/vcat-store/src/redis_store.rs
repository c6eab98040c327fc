//! Redis-backed catalog store.
//!
//! Layout under a key prefix (default `vcat:catalog`):
//! - `{prefix}:next_id`: id counter
//! - `{prefix}:paths`: hash of source path to id (the unique index)
//! - `{prefix}:entries`: hash of id to JSON entry
//!
//! Inserts and updates run as Lua scripts so the index and the records never
//! diverge. Ids come from `INCR` before the uniqueness check, so an insert
//! that loses a race leaves a gap in the id sequence.

use std::time::Instant;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use tracing::{debug, info};
use vcat_models::{CatalogEntry, CatalogId, NewCatalogEntry};

use crate::error::{StoreError, StoreResult};
use crate::metrics::{outcome, record_operation};
use crate::store::CatalogStore;

/// `KEYS[1]` paths index, `KEYS[2]` entries; `ARGV` path, id, json.
const INSERT_SCRIPT: &str = r#"
if redis.call('HSETNX', KEYS[1], ARGV[1], ARGV[2]) == 0 then
    return 0
end
redis.call('HSET', KEYS[2], ARGV[2], ARGV[3])
return 1
"#;

/// `KEYS[1]` entries; `ARGV` id, json.
const UPDATE_SCRIPT: &str = r#"
if redis.call('HEXISTS', KEYS[1], ARGV[1]) == 0 then
    return 0
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
return 1
"#;

/// Catalog store connection settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub redis_url: String,
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "vcat:catalog".to_string(),
        }
    }
}

impl StoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: std::env::var("CATALOG_KEY_PREFIX")
                .unwrap_or_else(|_| "vcat:catalog".to_string()),
        }
    }
}

/// Catalog store on Redis hashes.
#[derive(Clone)]
pub struct RedisCatalogStore {
    conn: MultiplexedConnection,
    next_id_key: String,
    paths_key: String,
    entries_key: String,
    insert_script: Script,
    update_script: Script,
}

impl RedisCatalogStore {
    /// Connect to Redis.
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!(prefix = %config.key_prefix, "Catalog store connected");
        Ok(Self::with_connection(conn, &config.key_prefix))
    }

    /// Wrap an existing connection.
    pub fn with_connection(conn: MultiplexedConnection, key_prefix: &str) -> Self {
        Self {
            conn,
            next_id_key: format!("{}:next_id", key_prefix),
            paths_key: format!("{}:paths", key_prefix),
            entries_key: format!("{}:entries", key_prefix),
            insert_script: Script::new(INSERT_SCRIPT),
            update_script: Script::new(UPDATE_SCRIPT),
        }
    }

    async fn load(&self, id: CatalogId) -> StoreResult<Option<CatalogEntry>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.hget(&self.entries_key, id.get()).await?;
        raw.map(|json| decode(&json)).transpose()
    }
}

fn decode(json: &str) -> StoreResult<CatalogEntry> {
    serde_json::from_str(json).map_err(|e| StoreError::corrupt(e.to_string()))
}

fn encode(entry: &CatalogEntry) -> StoreResult<String> {
    serde_json::to_string(entry).map_err(|e| StoreError::corrupt(e.to_string()))
}

#[async_trait]
impl CatalogStore for RedisCatalogStore {
    async fn find_by_path(&self, original_path: &str) -> StoreResult<Option<CatalogEntry>> {
        let started = Instant::now();
        let result: StoreResult<_> = async {
            let mut conn = self.conn.clone();
            let id: Option<i64> = conn.hget(&self.paths_key, original_path).await?;
            match id {
                Some(id) => self.load(CatalogId(id)).await,
                None => Ok(None),
            }
        }
        .await;
        record_operation("find_by_path", outcome(&result), started);
        result
    }

    async fn insert(&self, entry: NewCatalogEntry) -> StoreResult<CatalogEntry> {
        let started = Instant::now();
        let result: StoreResult<_> = async {
            let mut conn = self.conn.clone();
            let id: i64 = conn.incr(&self.next_id_key, 1).await?;
            let stored = CatalogEntry::from_new(CatalogId(id), entry);
            let json = encode(&stored)?;

            let inserted: i64 = self
                .insert_script
                .key(&self.paths_key)
                .key(&self.entries_key)
                .arg(&stored.original_path)
                .arg(id)
                .arg(json)
                .invoke_async(&mut conn)
                .await?;

            if inserted == 0 {
                debug!(path = %stored.original_path, "Insert lost to existing entry");
                return Err(StoreError::ConstraintViolation(stored.original_path));
            }
            Ok(stored)
        }
        .await;
        record_operation("insert", outcome(&result), started);
        result
    }

    async fn find_by_id(&self, id: CatalogId) -> StoreResult<Option<CatalogEntry>> {
        let started = Instant::now();
        let result = self.load(id).await;
        record_operation("find_by_id", outcome(&result), started);
        result
    }

    async fn update(&self, entry: &CatalogEntry) -> StoreResult<()> {
        let started = Instant::now();
        let result: StoreResult<_> = async {
            let mut conn = self.conn.clone();
            let json = encode(entry)?;
            let updated: i64 = self
                .update_script
                .key(&self.entries_key)
                .arg(entry.id.get())
                .arg(json)
                .invoke_async(&mut conn)
                .await?;

            if updated == 0 {
                return Err(StoreError::NotFound(entry.id));
            }
            Ok(())
        }
        .await;
        record_operation("update", outcome(&result), started);
        result
    }

    async fn list(&self) -> StoreResult<Vec<CatalogEntry>> {
        let started = Instant::now();
        let result: StoreResult<_> = async {
            let mut conn = self.conn.clone();
            let raw: Vec<String> = conn.hvals(&self.entries_key).await?;
            let mut entries = raw.iter().map(|json| decode(json)).collect::<StoreResult<Vec<_>>>()?;
            entries.sort_by_key(|e| e.id);
            Ok(entries)
        }
        .await;
        record_operation("list", outcome(&result), started);
        result
    }
}
