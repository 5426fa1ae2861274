//! Key-value cache store
//!
//! The bucket cache persists one serialized record per fingerprint through a
//! [`CacheStore`]. Stores are namespaced by organization and report an absent
//! key with [`CacheStoreError::NotFound`], which callers treat as a miss.
//!
//! # Example
//!
//! ```rust
//! use kuba_querier::cache::{CacheStore, MemoryCacheStore};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryCacheStore::new(10_000);
//! store.set("org-1", "v5:query:abc", b"{}".to_vec(), Duration::from_secs(60)).await?;
//! assert_eq!(store.get("org-1", "v5:query:abc").await?, b"{}".to_vec());
//! # Ok(())
//! # }
//! ```

use crate::error::CacheStoreError;
use crate::types::{Clock, SystemClock};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Per-organization key-value store with TTL
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch the value under `key`
    ///
    /// Returns [`CacheStoreError::NotFound`] when the key is absent or expired.
    async fn get(&self, org_id: &str, key: &str) -> Result<Vec<u8>, CacheStoreError>;

    /// Store `value` under `key`, replacing any previous value
    async fn set(
        &self,
        org_id: &str,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), CacheStoreError>;

    /// Remove `key`; removing an absent key is not an error
    async fn delete(&self, org_id: &str, key: &str) -> Result<(), CacheStoreError>;
}

/// Namespaced storage key
pub(crate) fn namespaced_key(org_id: &str, key: &str) -> String {
    format!("{}:{}", org_id, key)
}

// ============================================================================
// MemoryCacheStore
// ============================================================================

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    inserted_at: u64,
    expires_at: u64,
}

/// Hit/miss/eviction counters
#[derive(Debug, Default)]
struct StoreCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

/// Point-in-time view of store counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStatsSnapshot {
    /// Reads that returned a value
    pub hits: u64,
    /// Reads that found nothing
    pub misses: u64,
    /// Entries dropped to stay under the entry bound
    pub evictions: u64,
    /// Entries dropped because their TTL ran out
    pub expirations: u64,
    /// Live entries
    pub entries: usize,
}

/// In-process cache store
///
/// Entries expire lazily on read. When the entry bound is reached the
/// oldest entry is evicted before inserting a new key.
pub struct MemoryCacheStore {
    entries: DashMap<String, Entry>,
    max_entries: usize,
    clock: Arc<dyn Clock>,
    counters: StoreCounters,
}

impl MemoryCacheStore {
    /// Create a store holding at most `max_entries` keys, using the wall clock
    pub fn new(max_entries: usize) -> Self {
        Self::with_clock(max_entries, Arc::new(SystemClock))
    }

    /// Create a store driven by `clock`
    pub fn with_clock(max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
            clock,
            counters: StoreCounters::default(),
        }
    }

    /// Number of stored entries, expired ones included until next read
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Counter snapshot
    pub fn stats(&self) -> StoreStatsSnapshot {
        StoreStatsSnapshot {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.value().inserted_at)
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            if self.entries.remove(&key).is_some() {
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Evicted oldest cache entry");
            }
        }
    }
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, org_id: &str, key: &str) -> Result<Vec<u8>, CacheStoreError> {
        let full = namespaced_key(org_id, key);
        let now = self.clock.now_ms();

        let expired = match self.entries.get(&full) {
            Some(entry) if entry.expires_at > now => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove_if(&full, |_, e| e.expires_at <= now);
            self.counters.expirations.fetch_add(1, Ordering::Relaxed);
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        Err(CacheStoreError::NotFound(full))
    }

    async fn set(
        &self,
        org_id: &str,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<(), CacheStoreError> {
        let full = namespaced_key(org_id, key);
        let now = self.clock.now_ms();

        if !self.entries.contains_key(&full) && self.entries.len() >= self.max_entries {
            self.evict_oldest();
        }

        self.entries.insert(
            full,
            Entry {
                value,
                inserted_at: now,
                expires_at: now.saturating_add(ttl.as_millis() as u64),
            },
        );
        Ok(())
    }

    async fn delete(&self, org_id: &str, key: &str) -> Result<(), CacheStoreError> {
        self.entries.remove(&namespaced_key(org_id, key));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FixedClock;

    #[tokio::test]
    async fn test_missing_key_is_not_found() {
        let store = MemoryCacheStore::new(10);
        let err = store.get("org", "nope").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(store.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_orgs_are_isolated() {
        let store = MemoryCacheStore::new(10);
        store
            .set("a", "k", b"1".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get("a", "k").await.unwrap(), b"1".to_vec());
        assert!(store.get("b", "k").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let clock = Arc::new(FixedClock::new(1_000));
        let store = MemoryCacheStore::with_clock(10, clock.clone());
        store
            .set("org", "k", b"v".to_vec(), Duration::from_secs(5))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(4));
        assert!(store.get("org", "k").await.is_ok());

        clock.advance(Duration::from_secs(1));
        assert!(store.get("org", "k").await.unwrap_err().is_not_found());
        assert!(store.is_empty());
        assert_eq!(store.stats().expirations, 1);
    }

    #[tokio::test]
    async fn test_oldest_entry_is_evicted() {
        let clock = Arc::new(FixedClock::new(0));
        let store = MemoryCacheStore::with_clock(2, clock.clone());
        let ttl = Duration::from_secs(60);

        store.set("org", "a", vec![1], ttl).await.unwrap();
        clock.advance(Duration::from_millis(1));
        store.set("org", "b", vec![2], ttl).await.unwrap();
        clock.advance(Duration::from_millis(1));
        store.set("org", "c", vec![3], ttl).await.unwrap();

        assert_eq!(store.len(), 2);
        assert!(store.get("org", "a").await.unwrap_err().is_not_found());
        assert_eq!(store.get("org", "c").await.unwrap(), vec![3]);
        assert_eq!(store.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_overwrite_does_not_evict() {
        let store = MemoryCacheStore::new(1);
        let ttl = Duration::from_secs(60);
        store.set("org", "a", vec![1], ttl).await.unwrap();
        store.set("org", "a", vec![2], ttl).await.unwrap();
        assert_eq!(store.get("org", "a").await.unwrap(), vec![2]);
        assert_eq!(store.stats().evictions, 0);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryCacheStore::new(10);
        store
            .set("org", "k", vec![1], Duration::from_secs(60))
            .await
            .unwrap();
        store.delete("org", "k").await.unwrap();
        store.delete("org", "k").await.unwrap();
        assert!(store.get("org", "k").await.unwrap_err().is_not_found());
    }
}
