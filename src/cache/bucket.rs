//! Time-bucketed result cache
//!
//! Results are cached per query fingerprint as a list of `[startMs, endMs)`
//! buckets. A lookup returns whatever the buckets already cover plus the
//! ranges that still have to be executed; a store adds the finalized part of
//! a fresh result as a new bucket.
//!
//! ```text
//!  window         |-------------------------------------|
//!  buckets           [=======)      [==========)
//!  missing        [--)       [------)          [--------)
//!                  ▲                                    ▲
//!           partial edge                        partial edge /
//!       (unaligned start)                       flux interval
//! ```
//!
//! # Rules
//!
//! - Data newer than `now - flux_interval` is never stored.
//! - With a step, only complete step intervals are stored and missing
//!   ranges are step-aligned except for the two edges touching an
//!   unaligned window start or end.
//! - Only time-series (and heatmap) results are stored.
//! - A result without aggregations is not stored; a result whose
//!   aggregations matched nothing is stored so the negative answer sticks.
//!
//! `put` is a read-merge-write over the store. Two concurrent puts for the
//! same fingerprint can race and the later write wins; buckets are keyed by
//! their exact range, so a lost write only costs a future re-execution.

use super::store::CacheStore;
use crate::metrics;
use crate::query::adapter::Query;
use crate::query::result::{
    AggregationBucket, ExecStats, QueryResult, ResultValue, TimeSeries, TimeSeriesData,
};
use crate::types::{Clock, RequestType, Step, SystemClock, TimeRange};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Prefix of every cache key
pub const CACHE_KEY_PREFIX: &str = "v5:query:";

/// Cache key for a fingerprint
pub fn cache_key(fingerprint: &str) -> String {
    format!("{}{}", CACHE_KEY_PREFIX, fingerprint)
}

// ============================================================================
// Configuration
// ============================================================================

/// Bucket cache settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketCacheConfig {
    /// Lifetime of a cache record (default: 168 hours)
    pub ttl: Duration,

    /// Trailing window whose data is not final (default: 5 minutes)
    pub flux_interval: Duration,
}

impl Default for BucketCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(168 * 3600),
            flux_interval: Duration::from_secs(300),
        }
    }
}

impl BucketCacheConfig {
    /// Set the record lifetime
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the flux interval
    pub fn with_flux_interval(mut self, flux_interval: Duration) -> Self {
        self.flux_interval = flux_interval;
        self
    }
}

// ============================================================================
// Persisted Records
// ============================================================================

/// One stored slice of a result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedBucket {
    /// Inclusive start (ms)
    pub start_ms: u64,
    /// Exclusive end (ms)
    pub end_ms: u64,
    /// Shape of `value`
    #[serde(rename = "type")]
    pub kind: RequestType,
    /// Serialized payload
    pub value: serde_json::Value,
    /// Statistics of the execution that produced the slice
    #[serde(default)]
    pub stats: ExecStats,
}

impl CachedBucket {
    /// Range covered by the bucket
    pub fn range(&self) -> TimeRange {
        TimeRange::new(self.start_ms, self.end_ms)
    }
}

/// Everything stored for one fingerprint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CachedData {
    /// Buckets ordered by start
    #[serde(default)]
    pub buckets: Vec<CachedBucket>,
    /// Deduplicated warnings of every stored execution
    #[serde(default)]
    pub warnings: Vec<String>,
}

// ============================================================================
// BucketCache
// ============================================================================

/// Range-aware result cache used by the querier
#[async_trait]
pub trait BucketCache: Send + Sync {
    /// Cached part of the query window and the ranges still to execute
    async fn get_miss_ranges(
        &self,
        org_id: &str,
        query: &dyn Query,
        step: Step,
    ) -> (Option<QueryResult>, Vec<TimeRange>);

    /// Store the finalized part of a fresh result
    async fn put(&self, org_id: &str, query: &dyn Query, step: Step, fresh: &QueryResult);
}

/// [`BucketCache`] over a key-value [`CacheStore`]
pub struct TimeBucketCache {
    store: Arc<dyn CacheStore>,
    config: BucketCacheConfig,
    clock: Arc<dyn Clock>,
}

impl TimeBucketCache {
    /// Create a cache using the wall clock
    pub fn new(store: Arc<dyn CacheStore>, config: BucketCacheConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Create a cache driven by `clock`
    pub fn with_clock(
        store: Arc<dyn CacheStore>,
        config: BucketCacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    /// Cache settings
    pub fn config(&self) -> &BucketCacheConfig {
        &self.config
    }

    fn flux_boundary(&self) -> u64 {
        self.clock
            .now_ms()
            .saturating_sub(self.config.flux_interval.as_millis() as u64)
    }

    /// Load the record under `key`; `None` on absence or any store failure
    async fn load(&self, org_id: &str, key: &str) -> Option<CachedData> {
        let bytes = match self.store.get(org_id, key).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return None,
            Err(e) => {
                warn!(cache_key = %key, error = %e, "Cache read failed, treating as miss");
                metrics::record_cache_lookup("error");
                return None;
            }
        };

        match serde_json::from_slice::<CachedData>(&bytes) {
            Ok(data) => Some(data),
            Err(e) => {
                warn!(cache_key = %key, error = %e, "Undecodable cache record, treating as miss");
                metrics::record_cache_lookup("error");
                None
            }
        }
    }
}

#[async_trait]
impl BucketCache for TimeBucketCache {
    async fn get_miss_ranges(
        &self,
        org_id: &str,
        query: &dyn Query,
        step: Step,
    ) -> (Option<QueryResult>, Vec<TimeRange>) {
        let window = query.window();
        let fingerprint = query.fingerprint();
        debug!(
            fingerprint = %fingerprint,
            start = window.from,
            end = window.to,
            "Getting miss ranges"
        );

        let key = cache_key(&fingerprint);
        let Some(mut data) = self.load(org_id, &key).await else {
            metrics::record_cache_lookup("miss");
            metrics::observe_missing_ranges(1);
            return (None, vec![window]);
        };

        sort_buckets(&mut data.buckets);
        let missing = find_missing_ranges(
            &data.buckets,
            window,
            step.as_millis(),
            self.flux_boundary(),
        );
        debug!(missing = ?missing, step = step.as_millis(), "Missing ranges");
        metrics::observe_missing_ranges(missing.len());

        let relevant: Vec<&CachedBucket> = data
            .buckets
            .iter()
            .filter(|b| b.end_ms > window.from && b.start_ms < window.to)
            .collect();
        if relevant.is_empty() {
            metrics::record_cache_lookup("miss");
            return (None, missing);
        }

        let merged = merge_buckets(&relevant, data.warnings);
        let cached = filter_result_to_range(merged, window);

        metrics::record_cache_lookup(if missing.is_empty() { "hit" } else { "partial" });
        (Some(cached), missing)
    }

    async fn put(&self, org_id: &str, query: &dyn Query, step: Step, fresh: &QueryResult) {
        let window = query.window();
        let flux_boundary = self.flux_boundary();

        if window.from >= flux_boundary {
            debug!(
                start = window.from,
                end = window.to,
                flux_boundary,
                "Entire range within flux interval, skipping cache"
            );
            metrics::record_cache_put("skipped_flux");
            return;
        }

        let Some(cachable) = cachable_range(window, step.as_millis(), flux_boundary) else {
            debug!(
                start = window.from,
                end = window.to,
                step = step.as_millis(),
                "No complete intervals to cache"
            );
            metrics::record_cache_put("skipped_flux");
            return;
        };

        let Some(trimmed) = trim_result(fresh, cachable) else {
            debug!(kind = %fresh.request_type(), "Result type is not cacheable");
            metrics::record_cache_put("skipped_type");
            return;
        };

        let Some(bucket) = result_to_bucket(&trimmed, cachable) else {
            metrics::record_cache_put("skipped_empty");
            return;
        };

        let key = cache_key(&query.fingerprint());
        let existing = self.load(org_id, &key).await.unwrap_or_default();

        let mut warnings = existing.warnings;
        warnings.extend(trimmed.warnings.iter().cloned());
        let updated = CachedData {
            buckets: merge_and_deduplicate_buckets(existing.buckets, vec![bucket]),
            warnings: deduplicate_warnings(warnings),
        };

        let bytes = match serde_json::to_vec(&updated) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(cache_key = %key, error = %e, "Failed to encode cache record");
                metrics::record_cache_put("error");
                return;
            }
        };

        match self.store.set(org_id, &key, bytes, self.config.ttl).await {
            Ok(()) => {
                debug!(
                    cache_key = %key,
                    start = cachable.from,
                    end = cachable.to,
                    buckets = updated.buckets.len(),
                    "Stored cache bucket"
                );
                metrics::record_cache_put("stored");
            }
            Err(e) => {
                error!(cache_key = %key, error = %e, "Error setting cached data");
                metrics::record_cache_put("error");
            }
        }
    }
}

// ============================================================================
// Missing Ranges
// ============================================================================

fn sort_buckets(buckets: &mut [CachedBucket]) {
    let sorted = buckets.windows(2).all(|w| w[0].start_ms <= w[1].start_ms);
    if !sorted {
        buckets.sort_by_key(|b| b.start_ms);
    }
}

/// Ranges of `window` not covered by `buckets` (sorted by start)
///
/// With `step_ms > 0` and a window of at least one step, bucket edges are
/// aligned inward to step multiples and an unaligned window start produces
/// its own partial range. Without a step the scan is exact, and a trailing
/// gap crossing `flux_boundary` is split there.
pub fn find_missing_ranges(
    buckets: &[CachedBucket],
    window: TimeRange,
    step_ms: u64,
    flux_boundary: u64,
) -> Vec<TimeRange> {
    let (start, end) = (window.from, window.to);
    if start >= end {
        return Vec::new();
    }
    if step_ms == 0 || start + step_ms > end {
        return find_missing_ranges_basic(buckets, window, flux_boundary);
    }

    let mut missing = Vec::with_capacity(buckets.len() + 2);
    let mut current = start;

    if start % step_ms != 0 {
        let next_step = start - start % step_ms + step_ms;
        missing.push(TimeRange::new(start, next_step.min(end)));
        current = next_step;
    }

    for bucket in buckets {
        if bucket.end_ms <= current {
            continue;
        }
        if bucket.start_ms >= end {
            break;
        }

        let aligned_start = if bucket.start_ms % step_ms != 0 {
            bucket.start_ms - bucket.start_ms % step_ms + step_ms
        } else {
            bucket.start_ms
        };

        if current < aligned_start && current < end {
            missing.push(TimeRange::new(current, aligned_start.min(end)));
        }

        let mut bucket_end = bucket.end_ms.min(end);
        if bucket_end % step_ms != 0 && bucket_end < end {
            bucket_end -= bucket_end % step_ms;
        }
        current = current.max(bucket_end);
    }

    if current < end {
        missing.push(TimeRange::new(current, end));
    }

    missing
}

fn find_missing_ranges_basic(
    buckets: &[CachedBucket],
    window: TimeRange,
    flux_boundary: u64,
) -> Vec<TimeRange> {
    let (start, end) = (window.from, window.to);
    let mut missing = Vec::with_capacity(buckets.len() + 1);
    let mut current = start;

    for bucket in buckets {
        if bucket.end_ms <= start {
            continue;
        }
        if bucket.start_ms >= end {
            break;
        }
        if current < bucket.start_ms {
            missing.push(TimeRange::new(current, bucket.start_ms.min(end)));
        }
        current = current.max(bucket.end_ms.min(end));
    }

    if current < end {
        if current < flux_boundary && end > flux_boundary {
            missing.push(TimeRange::new(current, flux_boundary));
            missing.push(TimeRange::new(flux_boundary, end));
        } else {
            missing.push(TimeRange::new(current, end));
        }
    }

    missing
}

// ============================================================================
// Merge
// ============================================================================

/// Accumulates series from several time-series payloads
///
/// Series are identified by `(aggregation index, label set)`. Points of an
/// already-seen series are appended only for timestamps it does not have
/// yet, so the first payload added wins on duplicates. Output order follows
/// first appearance; aggregations are ordered by index.
#[derive(Debug, Default)]
pub(crate) struct SeriesMerger {
    aggregations: Vec<AggregationBucket>,
    agg_slots: HashMap<usize, usize>,
    series_slots: HashMap<(usize, String), usize>,
    timestamps: HashMap<(usize, String), HashSet<i64>>,
}

impl SeriesMerger {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add a payload; with `prefer_meta` its non-empty alias/unit replace
    /// what earlier payloads set
    pub(crate) fn add(&mut self, data: &TimeSeriesData, prefer_meta: bool) {
        for agg in &data.aggregations {
            let slot = match self.agg_slots.get(&agg.index) {
                Some(&slot) => {
                    let target = &mut self.aggregations[slot];
                    if prefer_meta && (!agg.alias.is_empty() || !agg.meta.unit.is_empty()) {
                        target.alias = agg.alias.clone();
                        target.meta = agg.meta.clone();
                    }
                    slot
                }
                None => {
                    self.aggregations.push(AggregationBucket {
                        index: agg.index,
                        alias: agg.alias.clone(),
                        meta: agg.meta.clone(),
                        series: Vec::new(),
                    });
                    self.agg_slots.insert(agg.index, self.aggregations.len() - 1);
                    self.aggregations.len() - 1
                }
            };

            for series in &agg.series {
                let key = (agg.index, series.series_key());
                let seen = self.timestamps.entry(key.clone()).or_default();
                match self.series_slots.get(&key) {
                    Some(&pos) => {
                        let target = &mut self.aggregations[slot].series[pos];
                        for value in &series.values {
                            if seen.insert(value.timestamp) {
                                target.values.push(value.clone());
                            }
                        }
                    }
                    None => {
                        seen.extend(series.values.iter().map(|v| v.timestamp));
                        let bucket = &mut self.aggregations[slot];
                        bucket.series.push(series.clone());
                        self.series_slots.insert(key, bucket.series.len() - 1);
                    }
                }
            }
        }
    }

    pub(crate) fn finish(mut self, query_name: impl Into<String>) -> TimeSeriesData {
        for agg in &mut self.aggregations {
            agg.series.iter_mut().for_each(TimeSeries::sort_values);
        }
        self.aggregations.sort_by_key(|a| a.index);
        TimeSeriesData {
            query_name: query_name.into(),
            aggregations: self.aggregations,
        }
    }
}

/// Merge overlapping buckets (sorted by start) into one result
fn merge_buckets(buckets: &[&CachedBucket], warnings: Vec<String>) -> QueryResult {
    let mut stats = ExecStats::default();
    let mut merger = SeriesMerger::new();
    let mut query_name = String::new();

    for bucket in buckets {
        stats.merge(&bucket.stats);
        match serde_json::from_value::<TimeSeriesData>(bucket.value.clone()) {
            Ok(data) => {
                if query_name.is_empty() {
                    query_name = data.query_name.clone();
                }
                merger.add(&data, false);
            }
            Err(e) => {
                error!(
                    start = bucket.start_ms,
                    end = bucket.end_ms,
                    error = %e,
                    "Failed to decode cached time series bucket"
                );
            }
        }
    }

    QueryResult::new(ResultValue::TimeSeries(merger.finish(query_name)))
        .with_stats(stats)
        .with_warnings(warnings)
}

/// Keep only points inside `window`; series survive even when emptied
fn filter_result_to_range(mut result: QueryResult, window: TimeRange) -> QueryResult {
    if let ResultValue::TimeSeries(data) = &mut result.value {
        for agg in &mut data.aggregations {
            for series in &mut agg.series {
                series
                    .values
                    .retain(|v| v.timestamp >= 0 && window.contains(v.timestamp as u64));
            }
        }
        data.aggregations.retain(|agg| !agg.series.is_empty());
    }
    result
}

/// Fresh buckets replace existing ones with the same range
fn merge_and_deduplicate_buckets(
    existing: Vec<CachedBucket>,
    fresh: Vec<CachedBucket>,
) -> Vec<CachedBucket> {
    let mut by_range: HashMap<(u64, u64), CachedBucket> = HashMap::new();
    for bucket in existing.into_iter().chain(fresh) {
        by_range.insert((bucket.start_ms, bucket.end_ms), bucket);
    }
    let mut merged: Vec<CachedBucket> = by_range.into_values().collect();
    merged.sort_by_key(|b| (b.start_ms, b.end_ms));
    merged
}

fn deduplicate_warnings(warnings: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    warnings
        .into_iter()
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

// ============================================================================
// Put Helpers
// ============================================================================

/// Part of `window` that may be stored: before the flux boundary and, with
/// a step, made of complete step intervals
fn cachable_range(window: TimeRange, step_ms: u64, flux_boundary: u64) -> Option<TimeRange> {
    let mut start = window.from;
    let mut end = window.to.min(flux_boundary);

    if step_ms > 0 {
        if start % step_ms != 0 {
            start = (start / step_ms + 1) * step_ms;
        }
        if end % step_ms != 0 {
            end = end / step_ms * step_ms;
        }
    }

    (start < end).then(|| TimeRange::new(start, end))
}

/// Copy of a time-series result restricted to `range`, partial points dropped
///
/// `None` for shapes that are never cached.
fn trim_result(result: &QueryResult, range: TimeRange) -> Option<QueryResult> {
    let ResultValue::TimeSeries(data) = &result.value else {
        return None;
    };

    let aggregations = data
        .aggregations
        .iter()
        .map(|agg| AggregationBucket {
            index: agg.index,
            alias: agg.alias.clone(),
            meta: agg.meta.clone(),
            series: agg
                .series
                .iter()
                .map(|series| TimeSeries {
                    labels: series.labels.clone(),
                    values: series
                        .values
                        .iter()
                        .filter(|v| {
                            !v.partial && v.timestamp >= 0 && range.contains(v.timestamp as u64)
                        })
                        .cloned()
                        .collect(),
                })
                .collect(),
        })
        .collect();

    Some(
        QueryResult::new(ResultValue::TimeSeries(TimeSeriesData {
            query_name: data.query_name.clone(),
            aggregations,
        }))
        .with_stats(result.stats.clone())
        .with_warnings(result.warnings.clone()),
    )
}

/// Emptiness of a time-series payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emptiness {
    /// Has at least one point
    NonEmpty,
    /// Aggregations exist but hold no points
    FilteredEmpty,
    /// No aggregations at all
    Empty,
}

/// Classify a time-series payload
pub fn classify_emptiness(data: &TimeSeriesData) -> Emptiness {
    if data.aggregations.is_empty() {
        return Emptiness::Empty;
    }
    let has_values = data
        .aggregations
        .iter()
        .flat_map(|a| a.series.iter())
        .any(|s| !s.values.is_empty());
    if has_values {
        Emptiness::NonEmpty
    } else {
        Emptiness::FilteredEmpty
    }
}

/// One bucket spanning `range`, or `None` for a truly empty result
fn result_to_bucket(result: &QueryResult, range: TimeRange) -> Option<CachedBucket> {
    let ResultValue::TimeSeries(data) = &result.value else {
        return None;
    };
    if classify_emptiness(data) == Emptiness::Empty {
        debug!("Skipping cache for empty non-filtered result");
        return None;
    }

    let value = match serde_json::to_value(data) {
        Ok(value) => value,
        Err(e) => {
            error!(error = %e, "Failed to encode result value");
            return None;
        }
    };

    Some(CachedBucket {
        start_ms: range.from,
        end_ms: range.to,
        kind: result.request_type(),
        value,
        stats: result.stats.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::result::{Label, TimeSeriesValue};

    fn bucket(start: u64, end: u64) -> CachedBucket {
        CachedBucket {
            start_ms: start,
            end_ms: end,
            kind: RequestType::TimeSeries,
            value: serde_json::Value::Null,
            stats: ExecStats::default(),
        }
    }

    fn ts_data(points: &[(i64, f64)]) -> TimeSeriesData {
        let mut agg = AggregationBucket::new(0);
        agg.series.push(TimeSeries::new(
            vec![Label::new("service", "api")],
            points
                .iter()
                .map(|&(t, v)| TimeSeriesValue::new(t, v))
                .collect(),
        ));
        TimeSeriesData {
            query_name: "A".to_string(),
            aggregations: vec![agg],
        }
    }

    #[test]
    fn test_cache_key() {
        assert_eq!(cache_key("abc"), "v5:query:abc");
        assert_eq!(cache_key(""), "v5:query:");
    }

    #[test]
    fn test_basic_scan_reports_gaps() {
        let buckets = vec![bucket(2000, 3000), bucket(4000, 5000)];
        let missing = find_missing_ranges(&buckets, TimeRange::new(1000, 6000), 0, u64::MAX);
        assert_eq!(
            missing,
            vec![
                TimeRange::new(1000, 2000),
                TimeRange::new(3000, 4000),
                TimeRange::new(5000, 6000),
            ]
        );
    }

    #[test]
    fn test_basic_scan_splits_at_flux_boundary() {
        let buckets = vec![bucket(1000, 2000)];
        let missing = find_missing_ranges(&buckets, TimeRange::new(1000, 5000), 0, 3000);
        assert_eq!(
            missing,
            vec![TimeRange::new(2000, 3000), TimeRange::new(3000, 5000)]
        );
    }

    #[test]
    fn test_step_scan_keeps_partial_edges_separate() {
        let step = 300_000;
        let base = 12 * 3_600_000;
        let buckets = vec![bucket(base + 5 * 60_000, base + 55 * 60_000)];
        let window = TimeRange::new(base + 2 * 60_000, base + 58 * 60_000);
        let missing = find_missing_ranges(&buckets, window, step, u64::MAX);
        assert_eq!(
            missing,
            vec![
                TimeRange::new(base + 2 * 60_000, base + 5 * 60_000),
                TimeRange::new(base + 55 * 60_000, base + 58 * 60_000),
            ]
        );
    }

    #[test]
    fn test_step_scan_aligns_bucket_edges_inward() {
        let buckets = vec![bucket(1500, 3500)];
        let missing = find_missing_ranges(&buckets, TimeRange::new(0, 5000), 1000, u64::MAX);
        assert_eq!(
            missing,
            vec![TimeRange::new(0, 2000), TimeRange::new(3000, 5000)]
        );
    }

    #[test]
    fn test_step_scan_without_buckets() {
        let missing = find_missing_ranges(&[], TimeRange::new(1500, 5000), 1000, u64::MAX);
        assert_eq!(
            missing,
            vec![TimeRange::new(1500, 2000), TimeRange::new(2000, 5000)]
        );
    }

    #[test]
    fn test_cachable_range() {
        assert_eq!(
            cachable_range(TimeRange::new(1500, 9000), 1000, 7500),
            Some(TimeRange::new(2000, 7000))
        );
        assert_eq!(cachable_range(TimeRange::new(1500, 1900), 1000, u64::MAX), None);
        assert_eq!(
            cachable_range(TimeRange::new(1500, 1900), 0, u64::MAX),
            Some(TimeRange::new(1500, 1900))
        );
    }

    #[test]
    fn test_trim_drops_partial_and_out_of_range_points() {
        let mut data = ts_data(&[(1000, 1.0), (2000, 2.0), (3000, 3.0)]);
        data.aggregations[0].series[0].values[0].partial = true;
        let result = QueryResult::new(ResultValue::TimeSeries(data));

        let trimmed = trim_result(&result, TimeRange::new(1000, 3000)).unwrap();
        let ts = trimmed.as_time_series().unwrap();
        let stamps: Vec<i64> = ts.aggregations[0].series[0]
            .values
            .iter()
            .map(|v| v.timestamp)
            .collect();
        assert_eq!(stamps, vec![2000]);
    }

    #[test]
    fn test_trim_refuses_scalar() {
        let result = QueryResult::new(ResultValue::Scalar(Default::default()));
        assert!(trim_result(&result, TimeRange::new(0, 1000)).is_none());
    }

    #[test]
    fn test_emptiness_classification() {
        assert_eq!(
            classify_emptiness(&TimeSeriesData::new("A")),
            Emptiness::Empty
        );

        let mut no_series = TimeSeriesData::new("A");
        no_series.aggregations.push(AggregationBucket::new(0));
        assert_eq!(classify_emptiness(&no_series), Emptiness::FilteredEmpty);

        assert_eq!(classify_emptiness(&ts_data(&[])), Emptiness::FilteredEmpty);
        assert_eq!(
            classify_emptiness(&ts_data(&[(1, 1.0)])),
            Emptiness::NonEmpty
        );
    }

    #[test]
    fn test_merger_first_seen_wins() {
        let mut merger = SeriesMerger::new();
        merger.add(&ts_data(&[(1000, 1.0), (2000, 2.0)]), false);
        merger.add(&ts_data(&[(2000, 20.0), (3000, 30.0)]), false);
        let merged = merger.finish("A");

        let values: Vec<(i64, f64)> = merged.aggregations[0].series[0]
            .values
            .iter()
            .map(|v| (v.timestamp, v.value))
            .collect();
        assert_eq!(values, vec![(1000, 1.0), (2000, 2.0), (3000, 30.0)]);
        assert_eq!(merged.aggregations[0].series.len(), 1);
    }

    #[test]
    fn test_merger_prefers_fresh_metadata() {
        let mut cached = ts_data(&[(1000, 1.0)]);
        cached.aggregations[0].alias = "old".to_string();
        let mut fresh = ts_data(&[(2000, 2.0)]);
        fresh.aggregations[0].alias = "new".to_string();
        fresh.aggregations[0].meta.unit = "ms".to_string();

        let mut merger = SeriesMerger::new();
        merger.add(&cached, false);
        merger.add(&fresh, true);
        let merged = merger.finish("A");
        assert_eq!(merged.aggregations[0].alias, "new");
        assert_eq!(merged.aggregations[0].meta.unit, "ms");
    }

    #[test]
    fn test_merge_and_deduplicate_buckets_fresh_wins() {
        let mut old = bucket(0, 1000);
        old.stats.rows_scanned = 1;
        let mut new = bucket(0, 1000);
        new.stats.rows_scanned = 2;

        let merged = merge_and_deduplicate_buckets(vec![bucket(1000, 2000), old], vec![new]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].start_ms, 0);
        assert_eq!(merged[0].stats.rows_scanned, 2);
    }

    #[test]
    fn test_deduplicate_warnings_keeps_order() {
        let out = deduplicate_warnings(vec!["b".into(), "a".into(), "b".into()]);
        assert_eq!(out, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_filter_keeps_emptied_series() {
        let result = QueryResult::new(ResultValue::TimeSeries(ts_data(&[(5000, 1.0)])));
        let filtered = filter_result_to_range(result, TimeRange::new(0, 1000));
        let ts = filtered.as_time_series().unwrap();
        assert_eq!(ts.aggregations.len(), 1);
        assert!(ts.aggregations[0].series[0].values.is_empty());
    }

    #[test]
    fn test_persisted_record_shape() {
        let data = CachedData {
            buckets: vec![bucket(1000, 2000)],
            warnings: vec!["w".to_string()],
        };
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["buckets"][0]["startMs"], 1000);
        assert_eq!(json["buckets"][0]["endMs"], 2000);
        assert_eq!(json["buckets"][0]["type"], "time_series");
        assert_eq!(json["warnings"][0], "w");
    }
}
