//! Kuba Querier - cache-aware execution core for telemetry range queries
//!
//! This library sits between a query API and the telemetry stores:
//! - Bucketed, time-windowed result cache with flux-interval awareness
//! - Row-set consumers shaping backend rows into typed results
//! - Post-processing (functions, limits, reductions, formulas, gap filling, tables)
//! - A querier that executes only what the cache is missing
//!
//! # Example
//!
//! ```rust,no_run
//! use kuba_querier::cache::{BucketCacheConfig, MemoryCacheStore, TimeBucketCache};
//! use kuba_querier::query::{QueryResolver, QueryRangeRequest};
//! use kuba_querier::{Querier, QuerierOptions};
//! use std::sync::Arc;
//!
//! # async fn example(resolver: Arc<dyn QueryResolver>, req: QueryRangeRequest)
//! #     -> Result<(), Box<dyn std::error::Error>> {
//! let cache = TimeBucketCache::new(
//!     Arc::new(MemoryCacheStore::new(10_000)),
//!     BucketCacheConfig::default(),
//! );
//! let querier = Querier::new(resolver, QuerierOptions::default()).with_cache(Arc::new(cache));
//! let response = querier.query_range("org-1", req).await?;
//! println!("{} results", response.results.len());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;

/// Prometheus metrics and telemetry
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

/// Tracing subscriber setup
pub mod logging;

/// Query model, result payloads, row consumers and execution adapters
pub mod query;

/// Bucketed result cache and its key-value stores
pub mod cache;

/// Result post-processing pipeline
pub mod postprocess;

/// Composite request orchestration
pub mod querier;

// Re-export main types
pub use cache::{BucketCache, BucketCacheConfig, TimeBucketCache};
pub use config::QuerierConfig;
pub use error::{Error, Result};
pub use postprocess::PostProcessor;
pub use querier::{Querier, QuerierOptions, QueryRangeResponse, QueryWarning};
pub use types::{Clock, FixedClock, RequestType, Step, SystemClock, TimeRange};
