//! Schedule caching.
//!
//! `ScheduleCache` maps (user, term) to a schedule snapshot with a fixed TTL
//! and deduplicates concurrent fetches of the same key. Snapshots live in a
//! `CacheStore`: `MemoryStore` in process, or `FileStore` as JSON files on
//! disk. `SnapshotFetcher` is the fetch that runs on a miss.

pub mod fetch;
pub mod manager;
pub mod store;

pub use fetch::SnapshotFetcher;
pub use manager::{Origin, ScheduleCache};
pub use store::{CacheEntry, CacheKey, CacheStore, FileStore, MemoryStore};
