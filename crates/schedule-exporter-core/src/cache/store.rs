//! Storage backends for cached schedule snapshots.
//!
//! The store is treated as an external service that may be unavailable;
//! callers log store errors and carry on without the cache.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{ScheduleSnapshot, TermId};

/// Identifies one cached snapshot: `schedule:{user_id}:{term_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub user_id: String,
    pub term: TermId,
}

impl CacheKey {
    pub fn new(user_id: impl Into<String>, term: TermId) -> Self {
        Self {
            user_id: user_id.into(),
            term,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "schedule:{}:{}", self.user_id, self.term)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub snapshot: ScheduleSnapshot,
    pub stored_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Increases every time the key is written.
    pub version: u64,
}

impl CacheEntry {
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>>;

    async fn put(&self, key: &CacheKey, entry: &CacheEntry) -> Result<()>;

    async fn remove(&self, key: &CacheKey) -> Result<()>;
}

// ============================================================================
// In-memory store
// ============================================================================

/// Process-local store. Never fails.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        Ok(self.entries.get(&key.to_string()).map(|e| e.value().clone()))
    }

    async fn put(&self, key: &CacheKey, entry: &CacheEntry) -> Result<()> {
        self.entries.insert(key.to_string(), entry.clone());
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> Result<()> {
        self.entries.remove(&key.to_string());
        Ok(())
    }
}

// ============================================================================
// JSON file store
// ============================================================================

/// One JSON file per key under a directory.
/// File names are the hex-encoded key, so any user id is a safe path component.
pub struct FileStore {
    cache_dir: PathBuf,
}

impl FileStore {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let cache_dir = cache_dir.into();
        std::fs::create_dir_all(&cache_dir)
            .with_context(|| format!("Failed to create cache directory {}", cache_dir.display()))?;
        Ok(Self { cache_dir })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn cache_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir
            .join(format!("{}.json", hex::encode(key.to_string())))
    }
}

#[async_trait]
impl CacheStore for FileStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let path = self.cache_path(key);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read cache file for {}", key))
            }
        };

        let entry: CacheEntry = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse cache file for {}", key))?;
        Ok(Some(entry))
    }

    async fn put(&self, key: &CacheKey, entry: &CacheEntry) -> Result<()> {
        let path = self.cache_path(key);
        let tmp = path.with_extension("json.tmp");
        let contents = serde_json::to_vec_pretty(entry)?;

        tokio::fs::write(&tmp, contents)
            .await
            .with_context(|| format!("Failed to write cache file for {}", key))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to replace cache file for {}", key))?;

        debug!(key = %key, path = %path.display(), "Cache entry written");
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> Result<()> {
        match tokio::fs::remove_file(self.cache_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove cache file for {}", key)),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
