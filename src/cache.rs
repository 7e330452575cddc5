//! Reach metadata cache with a fixed staleness horizon.
//!
//! Only static reach metadata is cached. Forecast series are time-varying and
//! always fetched fresh.
//!
//! # Clock injection
//! The `*_at` variants take `now` explicitly so staleness is deterministic in
//! tests. The plain variants call `Utc::now()`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tokio::sync::RwLock;

use crate::constants::{DEFAULT_CACHE_MAX_AGE_DAYS, REACH_CACHE_PREFIX};
use crate::error::CacheError;
use crate::models::{CachedReachRecord, ReachMetadata};

// ---------------------------------------------------------------------------
// Key-value stores
// ---------------------------------------------------------------------------

/// String key-value storage backing the reach cache.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String) -> Result<(), CacheError>;

    /// Returns `true` if the key existed.
    async fn remove(&self, key: &str) -> Result<bool, CacheError>;

    async fn keys(&self) -> Result<Vec<String>, CacheError>;
}

/// Process-local store. Contents are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), CacheError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }
}

/// Everything but ASCII letters, digits, `_` and `-` is escaped in file names.
const FILE_NAME_ESCAPES: &AsciiSet = &NON_ALPHANUMERIC.remove(b'_').remove(b'-');

/// One JSON file per key under a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File names are the percent-encoded key, so any key maps to exactly
    /// one file and can be recovered from it.
    fn path_for(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", utf8_percent_encode(key, FILE_NAME_ESCAPES)))
    }

    /// Inverse of `path_for`. Files this store did not write are skipped.
    fn key_for(file_name: &str) -> Option<String> {
        let encoded = file_name.strip_suffix(".json")?;
        let key = percent_decode_str(encoded).decode_utf8().ok()?.into_owned();
        (utf8_percent_encode(&key, FILE_NAME_ESCAPES).to_string() == encoded).then_some(key)
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: String) -> Result<(), CacheError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.path_for(key), value).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            match Self::key_for(&name) {
                Some(key) => keys.push(key),
                None => tracing::debug!("Skipping foreign file in cache dir: {}", name),
            }
        }
        Ok(keys)
    }
}

// ---------------------------------------------------------------------------
// Reach cache
// ---------------------------------------------------------------------------

/// Returns `true` when `record` is older than `max_age` at `now`.
///
/// Staleness is strictly greater than: a record exactly `max_age` old is
/// still fresh.
pub fn is_stale(record: &CachedReachRecord, max_age: Duration, now: DateTime<Utc>) -> bool {
    now - record.cached_at > max_age
}

fn cache_key(reach_id: &str) -> String {
    format!("{}{}", REACH_CACHE_PREFIX, reach_id)
}

/// TTL cache of reach metadata.
///
/// Every failure inside the cache is logged and absorbed: a cache problem
/// never prevents the network path from completing. Concurrent writers to the
/// same key are not serialized; the last write wins.
#[derive(Clone)]
pub struct ReachCache {
    store: Arc<dyn KeyValueStore>,
    max_age: Duration,
}

impl ReachCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_max_age(store, Duration::days(DEFAULT_CACHE_MAX_AGE_DAYS))
    }

    pub fn with_max_age(store: Arc<dyn KeyValueStore>, max_age: Duration) -> Self {
        Self { store, max_age }
    }

    /// In-memory cache with the default staleness horizon.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub async fn get(&self, reach_id: &str) -> Option<ReachMetadata> {
        self.get_at(reach_id, Utc::now()).await
    }

    /// Look up a reach. Stale or undecodable entries are deleted and reported
    /// as a miss.
    pub async fn get_at(&self, reach_id: &str, now: DateTime<Utc>) -> Option<ReachMetadata> {
        let key = cache_key(reach_id);
        let raw = match self.store.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                tracing::debug!("Reach cache miss: {}", reach_id);
                return None;
            }
            Err(e) => {
                tracing::warn!("Reach cache read failed for {}: {}", reach_id, e);
                return None;
            }
        };

        let record: CachedReachRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("Discarding undecodable cache entry for {}: {}", reach_id, e);
                self.remove(reach_id).await;
                return None;
            }
        };

        if record.metadata.reach_id != reach_id {
            tracing::warn!(
                "Cache entry for {} holds reach {}, discarding",
                reach_id,
                record.metadata.reach_id
            );
            self.remove(reach_id).await;
            return None;
        }

        if is_stale(&record, self.max_age, now) {
            tracing::info!(
                "Reach cache entry for {} is stale (cached {}), removing",
                reach_id,
                record.cached_at
            );
            self.remove(reach_id).await;
            return None;
        }

        tracing::debug!("Reach cache hit: {}", reach_id);
        Some(record.metadata)
    }

    pub async fn store(&self, metadata: &ReachMetadata) {
        self.store_at(metadata, Utc::now()).await
    }

    /// Persist `metadata`, stamped with `now`. Failures are logged only.
    pub async fn store_at(&self, metadata: &ReachMetadata, now: DateTime<Utc>) {
        let record = CachedReachRecord {
            metadata: metadata.clone(),
            cached_at: now,
        };
        let raw = match serde_json::to_string(&record) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Failed to serialize reach {}: {}", metadata.reach_id, e);
                return;
            }
        };
        match self.store.set(&cache_key(&metadata.reach_id), raw).await {
            Ok(()) => tracing::debug!("Cached reach {}", metadata.reach_id),
            Err(e) => tracing::warn!("Failed to cache reach {}: {}", metadata.reach_id, e),
        }
    }

    /// Delete one reach. Returns `true` if an entry was removed.
    pub async fn remove(&self, reach_id: &str) -> bool {
        match self.store.remove(&cache_key(reach_id)).await {
            Ok(existed) => existed,
            Err(e) => {
                tracing::warn!("Failed to remove cache entry for {}: {}", reach_id, e);
                false
            }
        }
    }

    /// Identifiers of every cached reach, fresh or not.
    pub async fn cached_reach_ids(&self) -> Vec<String> {
        match self.store.keys().await {
            Ok(keys) => keys
                .into_iter()
                .filter_map(|k| k.strip_prefix(REACH_CACHE_PREFIX).map(str::to_string))
                .collect(),
            Err(e) => {
                tracing::warn!("Failed to list reach cache: {}", e);
                Vec::new()
            }
        }
    }

    /// Remove every cached reach. Returns the number removed.
    pub async fn clear(&self) -> usize {
        let mut removed = 0;
        for reach_id in self.cached_reach_ids().await {
            if self.remove(&reach_id).await {
                removed += 1;
            }
        }
        tracing::info!("Cleared {} cached reaches", removed);
        removed
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
