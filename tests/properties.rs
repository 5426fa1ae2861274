//! Property tests for missing-range computation and flux handling
//!
//! Uses proptest to check that missing ranges partition the uncached part
//! of a window, stay step-aligned inside the window, and that nothing
//! inside the flux interval is ever served from cache.

use async_trait::async_trait;
use kuba_querier::cache::{
    find_missing_ranges, BucketCache, BucketCacheConfig, CachedBucket, MemoryCacheStore,
    TimeBucketCache,
};
use kuba_querier::query::{
    AggregationBucket, ExecStats, Label, Query, QueryError, QueryResult, ResultValue, TimeSeries,
    TimeSeriesData, TimeSeriesValue,
};
use kuba_querier::{FixedClock, RequestType, Step, TimeRange};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

const UNIT: u64 = 100;

// =============================================================================
// Test Data Strategies
// =============================================================================

/// Sorted, non-overlapping buckets built from `(gap, length)` pairs in units
fn bucket_layout() -> impl Strategy<Value = Vec<CachedBucket>> {
    prop::collection::vec((0u64..20, 1u64..20), 0..6).prop_map(|pairs| {
        let mut cursor = 0;
        pairs
            .into_iter()
            .map(|(gap, len)| {
                let start = cursor + gap * UNIT;
                cursor = start + len * UNIT;
                CachedBucket {
                    start_ms: start,
                    end_ms: cursor,
                    kind: RequestType::TimeSeries,
                    value: serde_json::Value::Null,
                    stats: ExecStats::default(),
                }
            })
            .collect()
    })
}

/// Window `[start, end)` on the unit grid, at least one unit long
fn window() -> impl Strategy<Value = TimeRange> {
    (0u64..100, 1u64..100).prop_map(|(start, len)| {
        TimeRange::new(start * UNIT, (start + len) * UNIT)
    })
}

fn assert_sorted_disjoint(missing: &[TimeRange]) -> Result<(), TestCaseError> {
    for range in missing {
        prop_assert!(range.from < range.to, "empty range {:?}", range);
    }
    for pair in missing.windows(2) {
        prop_assert!(pair[0].to <= pair[1].from, "overlap {:?}", pair);
    }
    Ok(())
}

// =============================================================================
// Missing Range Properties
// =============================================================================

proptest! {
    /// Every grid instant of the window is either cached or missing, never both
    #[test]
    fn missing_ranges_partition_window(
        buckets in bucket_layout(),
        window in window(),
        flux in 0u64..20_000,
    ) {
        let missing = find_missing_ranges(&buckets, window, 0, flux);
        assert_sorted_disjoint(&missing)?;

        let mut t = window.from;
        while t < window.to {
            let cached = buckets.iter().any(|b| b.range().contains(t));
            let missed = missing.iter().filter(|r| r.contains(t)).count();
            prop_assert_eq!(missed, usize::from(!cached), "instant {}", t);
            t += UNIT;
        }
        for range in &missing {
            prop_assert!(range.from >= window.from && range.to <= window.to);
        }
    }

    /// Interior boundaries of missing ranges fall on step multiples
    #[test]
    fn missing_ranges_are_step_aligned(
        buckets in bucket_layout(),
        start in 0u64..10_000,
        len in 1u64..10_000,
        step_units in 1u64..8,
    ) {
        let step = step_units * UNIT;
        let window = TimeRange::new(start, start + step + len);
        let missing = find_missing_ranges(&buckets, window, step, u64::MAX);
        assert_sorted_disjoint(&missing)?;

        for range in &missing {
            if range.from != window.from {
                prop_assert_eq!(range.from % step, 0, "start of {:?}", range);
            }
            if range.to != window.to {
                prop_assert_eq!(range.to % step, 0, "end of {:?}", range);
            }
        }
    }

    /// Without buckets the whole window is reported, split only by alignment
    #[test]
    fn empty_cache_reports_whole_window(window in window(), step_units in 0u64..5) {
        let step = step_units * UNIT;
        let missing = find_missing_ranges(&[], window, step, u64::MAX);
        prop_assert_eq!(missing.first().map(|r| r.from), Some(window.from));
        prop_assert_eq!(missing.last().map(|r| r.to), Some(window.to));
        let covered: u64 = missing.iter().map(|r| r.duration_ms()).sum();
        prop_assert_eq!(covered, window.duration_ms());
    }
}

// =============================================================================
// Flux Interval Property
// =============================================================================

#[derive(Debug)]
struct FixedQuery(TimeRange);

#[async_trait]
impl Query for FixedQuery {
    fn name(&self) -> &str {
        "A"
    }

    fn fingerprint(&self) -> String {
        "builder_query&signal=traces&agg=count()".to_string()
    }

    fn window(&self) -> TimeRange {
        self.0
    }

    fn request_type(&self) -> RequestType {
        RequestType::TimeSeries
    }

    fn step(&self) -> Step {
        Step::from_millis(UNIT)
    }

    async fn execute(&self) -> Result<QueryResult, QueryError> {
        Err(QueryError::internal("not executed"))
    }

    fn with_window(&self, window: TimeRange) -> Option<Arc<dyn Query>> {
        Some(Arc::new(FixedQuery(window)))
    }
}

fn dense_result(window: TimeRange) -> QueryResult {
    let mut bucket = AggregationBucket::new(0);
    bucket.series.push(TimeSeries::new(
        vec![Label::new("service", "api")],
        (window.from..window.to)
            .step_by(UNIT as usize)
            .map(|ts| TimeSeriesValue::new(ts as i64, 1.0))
            .collect(),
    ));
    QueryResult::new(ResultValue::TimeSeries(TimeSeriesData {
        query_name: "A".to_string(),
        aggregations: vec![bucket],
    }))
}

proptest! {
    /// Points at or after `now - flux_interval` never come back from cache
    #[test]
    fn flux_interval_is_never_cached(
        window in window(),
        now_units in 0u64..200,
        flux_units in 1u64..50,
    ) {
        let now = now_units * UNIT;
        let flux = flux_units * UNIT;
        let boundary = now.saturating_sub(flux);
        let cache = TimeBucketCache::with_clock(
            Arc::new(MemoryCacheStore::new(16)),
            BucketCacheConfig::default().with_flux_interval(Duration::from_millis(flux)),
            Arc::new(FixedClock::new(now)),
        );
        let query = FixedQuery(window);
        let step = Step::from_millis(UNIT);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let (cached, _) = runtime.block_on(async {
            cache.put("org", &query, step, &dense_result(window)).await;
            cache.get_miss_ranges("org", &query, step).await
        });

        if let Some(cached) = cached {
            let data = cached.as_time_series().unwrap();
            let values = data
                .aggregations
                .iter()
                .flat_map(|a| a.series.iter())
                .flat_map(|s| s.values.iter());
            for value in values {
                prop_assert!(
                    (value.timestamp as u64) < boundary,
                    "cached {} past {}",
                    value.timestamp,
                    boundary
                );
            }
        }
    }
}
