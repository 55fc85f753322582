//! Schedule cache with single-flight population.
//!
//! A lookup first checks the store for a live entry. On a miss, the first
//! caller for a key spawns the fetch and registers a shared handle to it;
//! every caller arriving while it runs awaits the same handle and sees the
//! same outcome. The fetch runs as its own task, so callers that give up
//! waiting do not cancel it and its result still lands in the cache.
//!
//! A caller can miss the store just before a running fetch writes to it and
//! find no flight once that fetch has released its key. The new flight reads
//! the store again before going to the portal, so it picks up that write.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};

use super::store::{CacheEntry, CacheKey, CacheStore};
use crate::clock::Clock;
use crate::error::{Result, ScheduleError};
use crate::models::{ScheduleSnapshot, TermId};

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<ScheduleSnapshot>>>>;

struct Flight {
    id: u64,
    fetch: SharedFetch,
}

/// Releases a flight's key when dropped, including when the fetch panics.
struct FlightRelease {
    in_flight: Arc<DashMap<CacheKey, Flight>>,
    key: CacheKey,
    id: u64,
}

impl Drop for FlightRelease {
    fn drop(&mut self) {
        let id = self.id;
        self.in_flight.remove_if(&self.key, |_, flight| flight.id == id);
    }
}

/// How a lookup was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Live entry found in the store.
    Cache,
    /// This caller started the fetch.
    Fetched,
    /// This caller attached to a fetch another caller started.
    Joined,
}

#[derive(Clone)]
pub struct ScheduleCache {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    in_flight: Arc<DashMap<CacheKey, Flight>>,
    versions: Arc<DashMap<CacheKey, u64>>,
    next_flight: Arc<AtomicU64>,
}

impl ScheduleCache {
    pub fn new(store: Arc<dyn CacheStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            store,
            clock,
            ttl,
            in_flight: Arc::new(DashMap::new()),
            versions: Arc::new(DashMap::new()),
            next_flight: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of fetches currently running.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Return the live snapshot for (user, term), fetching it with `fetch_fn`
    /// on a miss. Concurrent misses for the same key share one fetch.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        user_id: &str,
        term: TermId,
        fetch_fn: F,
    ) -> Result<Arc<ScheduleSnapshot>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<ScheduleSnapshot>> + Send + 'static,
    {
        self.lookup(user_id, term, fetch_fn).await.1
    }

    /// Like [`get_or_fetch`](Self::get_or_fetch), also reporting how the
    /// result was obtained.
    pub async fn lookup<F, Fut>(
        &self,
        user_id: &str,
        term: TermId,
        fetch_fn: F,
    ) -> (Origin, Result<Arc<ScheduleSnapshot>>)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<ScheduleSnapshot>> + Send + 'static,
    {
        let key = CacheKey::new(user_id, term);

        if let Some(snapshot) = self.load_live(&key).await {
            debug!(key = %key, "Cache hit");
            return (Origin::Cache, Ok(snapshot));
        }

        let (origin, fetch) = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(flight) => (Origin::Joined, flight.get().fetch.clone()),
            Entry::Vacant(slot) => {
                let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
                let fetch = self.spawn_fetch(key.clone(), id, fetch_fn);
                slot.insert(Flight {
                    id,
                    fetch: fetch.clone(),
                });
                (Origin::Fetched, fetch)
            }
        };

        if origin == Origin::Joined {
            debug!(key = %key, "Joining in-flight fetch");
        }
        (origin, fetch.await)
    }

    /// Remove the cached entry for (user, term) regardless of its TTL.
    ///
    /// A fetch already running for the key is left alone; its result will
    /// populate the cache when it completes.
    pub async fn bust(&self, user_id: &str, term: TermId) {
        let key = CacheKey::new(user_id, term);
        match self.store.remove(&key).await {
            Ok(()) => info!(key = %key, "Cache entry busted"),
            Err(e) => warn!(key = %key, error = %e, "Failed to bust cache entry"),
        }
    }

    /// Live entry from the store, if any. Expired entries are dropped and
    /// store failures count as a miss.
    async fn load_live(&self, key: &CacheKey) -> Option<Arc<ScheduleSnapshot>> {
        match self.store.get(key).await {
            Ok(Some(entry)) if entry.is_live_at(self.clock.now()) => Some(Arc::new(entry.snapshot)),
            Ok(Some(entry)) => {
                debug!(key = %key, expired_at = %entry.expires_at, "Cache entry expired");
                if let Err(e) = self.store.remove(key).await {
                    warn!(key = %key, error = %e, "Failed to evict expired cache entry");
                }
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache store unavailable, fetching directly");
                None
            }
        }
    }

    fn spawn_fetch<F, Fut>(&self, key: CacheKey, id: u64, fetch_fn: F) -> SharedFetch
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<ScheduleSnapshot>> + Send + 'static,
    {
        let cache = self.clone();

        let task = tokio::spawn(async move {
            let release = FlightRelease {
                in_flight: Arc::clone(&cache.in_flight),
                key: key.clone(),
                id,
            };

            if let Some(snapshot) = cache.load_live(&key).await {
                debug!(key = %key, flight = id, "Entry stored by a finished fetch");
                drop(release);
                return Ok(snapshot);
            }

            debug!(key = %key, flight = id, "Fetching schedule");
            let result = fetch_fn().await.map(Arc::new);

            match &result {
                Ok(snapshot) => cache.store_snapshot(&key, snapshot).await,
                Err(e) => warn!(key = %key, error = %e, "Schedule fetch failed"),
            }

            // Release only after the store write.
            drop(release);
            result
        });

        async move {
            task.await.unwrap_or_else(|e| {
                Err(ScheduleError::Internal(format!("Schedule fetch task failed: {}", e)))
            })
        }
        .boxed()
        .shared()
    }

    async fn store_snapshot(&self, key: &CacheKey, snapshot: &ScheduleSnapshot) {
        let version = {
            let mut counter = self.versions.entry(key.clone()).or_insert(0);
            *counter += 1;
            *counter
        };
        let entry = CacheEntry {
            snapshot: snapshot.clone(),
            stored_at: self.clock.now(),
            expires_at: expiry(snapshot.fetched_at, self.ttl),
            version,
        };

        match self.store.put(key, &entry).await {
            Ok(()) => debug!(key = %key, version = version, "Cached schedule snapshot"),
            Err(e) => warn!(key = %key, error = %e, "Failed to cache schedule snapshot"),
        }
    }
}

/// `fetched_at + ttl`, saturating at the latest representable instant.
fn expiry(fetched_at: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    fetched_at
        .checked_add_signed(ttl)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
