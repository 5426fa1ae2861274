//! Result caching
//!
//! Two layers:
//!
//! | Layer    | Type              | Role                                          |
//! |----------|-------------------|-----------------------------------------------|
//! | bucket   | `TimeBucketCache` | Range-aware cache of time-series results      |
//! | store    | `CacheStore`      | Per-organization key-value storage with TTL   |
//!
//! Store implementations: `MemoryCacheStore` (in-process, `DashMap`) and
//! `RedisCacheStore` (shared, Redis).

pub mod bucket;
pub mod redis;
pub mod store;

pub use bucket::{
    cache_key, classify_emptiness, find_missing_ranges, BucketCache, BucketCacheConfig,
    CachedBucket, CachedData, Emptiness, TimeBucketCache,
};
pub use redis::{RedisCacheStore, RedisStoreConfig, RetryPolicy};
pub use store::{CacheStore, MemoryCacheStore, StoreStatsSnapshot};
