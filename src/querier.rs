//! Composite request orchestration
//!
//! The querier turns one [`QueryRangeRequest`] into a [`QueryRangeResponse`]:
//!
//! ```text
//! QueryRangeRequest
//!      │ normalize_steps()
//!      ▼
//! ┌──────────────┐
//! │   Resolve    │  envelope → Arc<dyn Query> (formulas resolve to nothing)
//! └──────────────┘
//!      │
//!      ▼
//! ┌──────────────┐     ┌─────────────┐
//! │   Execute    │ ◄─► │ BucketCache │  cached part + missing ranges
//! └──────────────┘     └─────────────┘
//!      │ one task per query, bounded by a semaphore
//!      ▼
//! ┌──────────────┐
//! │ PostProcess  │  functions, limit, reduce, formulas, table, gaps
//! └──────────────┘
//!      │
//!      ▼
//! QueryRangeResponse
//! ```
//!
//! The first failing sub-query aborts the request and cancels the rest.
//! Failures inside the cache layer never fail a request: a broken range
//! execution falls back to running the whole window.

use crate::cache::bucket::SeriesMerger;
use crate::cache::{BucketCache, CacheStore, MemoryCacheStore, RedisCacheStore, TimeBucketCache};
use crate::config::{ExecutionConfig, QuerierConfig};
use crate::metrics::{self, INFLIGHT_QUERIES};
use crate::postprocess::{PostProcessor, ResultMap};
use crate::query::adapter::{Query, QueryResolver};
use crate::query::error::QueryError;
use crate::query::request::QueryRangeRequest;
use crate::query::result::{ExecStats, QueryResult, ResultValue};
use crate::types::{RequestType, TimeRange};
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Message of the aggregated response warning
pub const WARNINGS_MESSAGE: &str = "Encountered warnings";

// ============================================================================
// Response
// ============================================================================

/// Result of a composite request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRangeResponse {
    /// Shape the request asked for
    pub request_type: RequestType,
    /// Post-processed results by query name
    pub results: ResultMap,
    /// Execution statistics summed over every executed query
    pub meta: ExecStats,
    /// Warnings raised by any query, if there were some
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<QueryWarning>,
}

/// Aggregated warnings of a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryWarning {
    /// Summary message
    pub message: String,
    /// Documentation link for the warnings
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    /// Individual warnings in query order
    pub warnings: Vec<WarningMessage>,
}

/// One warning entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarningMessage {
    /// Warning text
    pub message: String,
}

impl QueryWarning {
    fn from_messages(messages: Vec<String>, url: &str) -> Option<Self> {
        if messages.is_empty() {
            return None;
        }
        Some(Self {
            message: WARNINGS_MESSAGE.to_string(),
            url: url.to_string(),
            warnings: messages
                .into_iter()
                .map(|message| WarningMessage { message })
                .collect(),
        })
    }
}

// ============================================================================
// Options
// ============================================================================

/// Execution limits of a [`Querier`]
#[derive(Debug, Clone)]
pub struct QuerierOptions {
    /// Sub-queries executed at the same time
    pub max_concurrency: usize,
    /// Missing ranges of one query executed at the same time
    pub missing_range_parallelism: usize,
    /// Deadline for one sub-query, cache work included
    pub query_timeout: Duration,
    /// Documentation link attached to response warnings
    pub warnings_doc_url: String,
}

impl Default for QuerierOptions {
    fn default() -> Self {
        Self {
            max_concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            missing_range_parallelism: 4,
            query_timeout: Duration::from_secs(60),
            warnings_doc_url: String::new(),
        }
    }
}

impl QuerierOptions {
    /// Set sub-query concurrency
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Set missing-range parallelism
    pub fn with_missing_range_parallelism(mut self, parallelism: usize) -> Self {
        self.missing_range_parallelism = parallelism;
        self
    }

    /// Set the per-query deadline
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Set the warnings documentation link
    pub fn with_warnings_doc_url(mut self, url: impl Into<String>) -> Self {
        self.warnings_doc_url = url.into();
        self
    }
}

impl From<&ExecutionConfig> for QuerierOptions {
    fn from(config: &ExecutionConfig) -> Self {
        Self {
            max_concurrency: config.max_concurrency,
            missing_range_parallelism: config.missing_range_parallelism,
            query_timeout: Duration::from_millis(config.query_timeout_ms),
            warnings_doc_url: config.warnings_doc_url.clone(),
        }
    }
}

// ============================================================================
// Querier
// ============================================================================

/// Runs composite requests against resolved queries and the bucket cache
#[derive(Clone)]
pub struct Querier {
    resolver: Arc<dyn QueryResolver>,
    cache: Option<Arc<dyn BucketCache>>,
    post_processor: PostProcessor,
    options: QuerierOptions,
}

impl Querier {
    /// Querier without a cache
    pub fn new(resolver: Arc<dyn QueryResolver>, options: QuerierOptions) -> Self {
        Self {
            resolver,
            cache: None,
            post_processor: PostProcessor::new(),
            options,
        }
    }

    /// Querier built from configuration
    ///
    /// The cache store is Redis when a URL is configured and in-process
    /// otherwise; a disabled cache leaves every query uncached.
    pub async fn from_config(
        resolver: Arc<dyn QueryResolver>,
        config: &QuerierConfig,
    ) -> crate::error::Result<Self> {
        config.validate()?;
        let querier = Self::new(resolver, QuerierOptions::from(&config.execution));
        if !config.cache.enabled {
            return Ok(querier);
        }

        let store: Arc<dyn CacheStore> = match config.redis.store_config() {
            Some(redis) => {
                info!(
                    url = %crate::cache::redis::sanitize_url(&redis.url),
                    "Using redis cache store"
                );
                Arc::new(RedisCacheStore::connect(redis).await?)
            }
            None => Arc::new(MemoryCacheStore::new(config.cache.memory_max_entries)),
        };
        let cache = TimeBucketCache::new(store, config.cache.bucket_cache_config());
        Ok(querier.with_cache(Arc::new(cache)))
    }

    /// Whether a bucket cache is attached
    pub fn has_cache(&self) -> bool {
        self.cache.is_some()
    }

    /// Consult `cache` for cacheable queries
    pub fn with_cache(mut self, cache: Arc<dyn BucketCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Replace the post-processor
    pub fn with_post_processor(mut self, post_processor: PostProcessor) -> Self {
        self.post_processor = post_processor;
        self
    }

    /// Execution limits
    pub fn options(&self) -> &QuerierOptions {
        &self.options
    }

    /// Run a composite request for `org_id`
    pub async fn query_range(
        &self,
        org_id: &str,
        req: QueryRangeRequest,
    ) -> Result<QueryRangeResponse, QueryError> {
        let result = self.run(org_id, req).await;
        metrics::record_request(result.is_ok());
        match &result {
            Err(e) if e.kind.is_client_error() => {
                warn!(org_id, kind = e.kind.as_str(), error = %e, "Query range request rejected");
            }
            Err(e) => {
                error!(org_id, kind = e.kind.as_str(), error = %e, "Query range request failed");
            }
            Ok(_) => {}
        }
        result
    }

    async fn run(
        &self,
        org_id: &str,
        mut req: QueryRangeRequest,
    ) -> Result<QueryRangeResponse, QueryError> {
        if req.composite_query.queries.is_empty() {
            return Err(QueryError::validation(
                "composite query must contain at least one query",
            ));
        }
        if req.start >= req.end {
            return Err(QueryError::validation(format!(
                "start {} must be before end {}",
                req.start, req.end
            )));
        }

        let started = Instant::now();
        let interval_warnings = req.normalize_steps();

        let mut queries = Vec::new();
        for envelope in &req.composite_query.queries {
            if let Some(query) = self.resolver.resolve(envelope, &req)? {
                queries.push(query);
            }
        }
        debug!(
            org_id,
            request_type = %req.request_type,
            queries = queries.len(),
            start = req.start,
            end = req.end,
            "Executing composite request"
        );

        let executed = self.execute_all(org_id, &req, queries).await?;

        let mut meta = ExecStats::default();
        let mut warnings = Vec::new();
        let mut results = ResultMap::new();
        for (name, step_secs, mut result) in executed {
            meta.merge(&result.stats);
            if step_secs > 0 {
                meta.step_intervals.insert(name.clone(), step_secs);
            }
            warnings.append(&mut result.warnings);
            set_query_name(&mut result.value, &name);
            results.insert(name, result);
        }

        if req.request_type == RequestType::TimeSeries && warnings.is_empty() {
            warnings = interval_warnings;
        }

        let results = self.post_processor.process(results, &req);

        info!(
            org_id,
            request_type = %req.request_type,
            results = results.len(),
            warnings = warnings.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Composite request complete"
        );

        Ok(QueryRangeResponse {
            request_type: req.request_type,
            results,
            meta,
            warning: QueryWarning::from_messages(warnings, &self.options.warnings_doc_url),
        })
    }

    /// Execute every query concurrently; results come back in request order
    async fn execute_all(
        &self,
        org_id: &str,
        req: &QueryRangeRequest,
        queries: Vec<Arc<dyn Query>>,
    ) -> Result<Vec<(String, u64, QueryResult)>, QueryError> {
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrency.max(1)));
        let ctx = Arc::new(ExecContext {
            org_id: org_id.to_string(),
            cache: self.cache.clone().filter(|_| !req.no_cache),
            range_parallelism: self.options.missing_range_parallelism.max(1),
        });
        let timeout = self.options.query_timeout;

        let mut join_set = JoinSet::new();
        let total = queries.len();
        for (idx, query) in queries.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let ctx = ctx.clone();
            join_set.spawn(async move {
                let _permit = semaphore.acquire().await;
                let name = query.name().to_string();
                let step_secs = query.step().as_secs();

                let _inflight = InflightGuard::new();
                let outcome = tokio::time::timeout(timeout, ctx.execute(query)).await;

                let result = match outcome {
                    Ok(result) => result,
                    Err(_) => Err(QueryError::timeout(format!(
                        "query {} exceeded {}ms",
                        name,
                        timeout.as_millis()
                    ))),
                };
                (idx, name, step_secs, result)
            });
        }

        let mut slots: Vec<Option<(String, u64, QueryResult)>> =
            (0..total).map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            let (idx, name, step_secs, result) = joined.map_err(task_error)?;
            match result {
                Ok(result) => slots[idx] = Some((name, step_secs, result)),
                Err(e) => {
                    warn!(query = %name, error = %e, "Query failed, cancelling remaining queries");
                    join_set.abort_all();
                    return Err(e);
                }
            }
        }

        Ok(slots.into_iter().flatten().collect())
    }
}

/// Map a task that panicked or was aborted to a query error
fn task_error(err: tokio::task::JoinError) -> QueryError {
    if err.is_cancelled() {
        QueryError::cancelled("query task was cancelled")
    } else {
        QueryError::internal(format!("query task failed: {}", err)).with_source(err)
    }
}

impl std::fmt::Debug for Querier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Querier")
            .field("cached", &self.cache.is_some())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Per-query execution
// ============================================================================

/// Keeps the in-flight gauge raised while a query task is alive
struct InflightGuard;

impl InflightGuard {
    fn new() -> Self {
        INFLIGHT_QUERIES.inc();
        Self
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        INFLIGHT_QUERIES.dec();
    }
}

type RangeExecution = BoxFuture<'static, Result<QueryResult, QueryError>>;

struct ExecContext {
    org_id: String,
    cache: Option<Arc<dyn BucketCache>>,
    range_parallelism: usize,
}

impl ExecContext {
    async fn execute(&self, query: Arc<dyn Query>) -> Result<QueryResult, QueryError> {
        let cacheable = query.request_type().is_cacheable() && !query.fingerprint().is_empty();
        match &self.cache {
            Some(cache) if cacheable => self.execute_with_cache(cache.as_ref(), query).await,
            _ => query.execute().await,
        }
    }

    async fn execute_with_cache(
        &self,
        cache: &dyn BucketCache,
        query: Arc<dyn Query>,
    ) -> Result<QueryResult, QueryError> {
        let step = query.step();
        let window = query.window();
        let (cached, missing) = cache.get_miss_ranges(&self.org_id, query.as_ref(), step).await;

        let cached = match cached {
            Some(cached) if missing.is_empty() => {
                debug!(query = query.name(), "Served entirely from cache");
                return Ok(cached);
            }
            None if missing.is_empty() || (missing.len() == 1 && missing[0] == window) => {
                return self.execute_and_put(cache, query.as_ref()).await;
            }
            other => other,
        };

        match self.execute_ranges(query.as_ref(), &missing).await {
            Some(fresh) => {
                let merged = merge_results(query.name(), cached, fresh);
                cache.put(&self.org_id, query.as_ref(), step, &merged).await;
                Ok(merged)
            }
            None => self.execute_and_put(cache, query.as_ref()).await,
        }
    }

    async fn execute_and_put(
        &self,
        cache: &dyn BucketCache,
        query: &dyn Query,
    ) -> Result<QueryResult, QueryError> {
        let result = query.execute().await?;
        cache.put(&self.org_id, query, query.step(), &result).await;
        Ok(result)
    }

    /// Run one ranged copy per missing range; `None` when any of them cannot
    /// be built or fails
    async fn execute_ranges(
        &self,
        query: &dyn Query,
        missing: &[TimeRange],
    ) -> Option<Vec<QueryResult>> {
        let ranged: Option<Vec<Arc<dyn Query>>> =
            missing.iter().map(|range| query.with_window(*range)).collect();
        let Some(ranged) = ranged else {
            debug!(query = query.name(), "Query cannot be ranged, executing full window");
            return None;
        };

        let executions: Vec<RangeExecution> = ranged
            .into_iter()
            .map(|q| Box::pin(async move { q.execute().await }) as RangeExecution)
            .collect();
        let fresh = stream::iter(executions)
            .buffered(self.range_parallelism)
            .try_collect::<Vec<_>>()
            .await;

        match fresh {
            Ok(fresh) => Some(fresh),
            Err(e) => {
                warn!(
                    query = query.name(),
                    ranges = missing.len(),
                    error = %e,
                    "Missing range execution failed, executing full window"
                );
                None
            }
        }
    }
}

/// Combine the cached part of a result with freshly executed ranges
///
/// Time series are merged per series with cached points winning on shared
/// timestamps; fresh aggregation metadata replaces cached metadata. Other
/// shapes keep the last fresh payload.
fn merge_results(name: &str, cached: Option<QueryResult>, fresh: Vec<QueryResult>) -> QueryResult {
    let mut stats = ExecStats::default();
    let mut warnings = Vec::new();
    let mut merger = SeriesMerger::new();
    let mut other = None;

    if let Some(cached) = &cached {
        stats.merge(&cached.stats);
        warnings.extend(cached.warnings.iter().cloned());
        if let ResultValue::TimeSeries(data) = &cached.value {
            merger.add(data, false);
        }
    }

    for result in fresh {
        stats.merge(&result.stats);
        for warning in result.warnings {
            if !warnings.contains(&warning) {
                warnings.push(warning);
            }
        }
        match result.value {
            ResultValue::TimeSeries(data) => merger.add(&data, true),
            value => other = Some(value),
        }
    }

    let value = other.unwrap_or_else(|| ResultValue::TimeSeries(merger.finish(name)));
    QueryResult::new(value)
        .with_stats(stats)
        .with_warnings(warnings)
}

fn set_query_name(value: &mut ResultValue, name: &str) {
    let slot = match value {
        ResultValue::TimeSeries(v) => &mut v.query_name,
        ResultValue::Scalar(v) => &mut v.query_name,
        ResultValue::Raw(v) => &mut v.query_name,
        ResultValue::Distribution(v) => &mut v.query_name,
    };
    if *slot != name {
        *slot = name.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{BucketCacheConfig, MemoryCacheStore, TimeBucketCache};
    use crate::query::request::{BuilderQuerySpec, CompositeQuery, QueryEnvelope, Signal};
    use crate::query::result::{
        AggregationBucket, Label, TimeSeries, TimeSeriesData, TimeSeriesValue,
    };
    use crate::types::{FixedClock, Step};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Debug, Clone)]
    struct CountingQuery {
        name: String,
        window: TimeRange,
        executions: Arc<Mutex<Vec<TimeRange>>>,
        fail_ranged: bool,
    }

    #[async_trait]
    impl Query for CountingQuery {
        fn name(&self) -> &str {
            &self.name
        }

        fn fingerprint(&self) -> String {
            format!("counting&{}", self.name)
        }

        fn window(&self) -> TimeRange {
            self.window
        }

        fn request_type(&self) -> RequestType {
            RequestType::TimeSeries
        }

        fn step(&self) -> Step {
            Step::from_secs(1)
        }

        async fn execute(&self) -> Result<QueryResult, QueryError> {
            self.executions.lock().push(self.window);
            let values = (self.window.from..self.window.to)
                .step_by(1000)
                .map(|ts| TimeSeriesValue::new(ts as i64, 1.0))
                .collect();
            let mut bucket = AggregationBucket::new(0);
            bucket.series.push(TimeSeries::new(vec![Label::new("service", "api")], values));
            Ok(QueryResult::new(ResultValue::TimeSeries(TimeSeriesData {
                query_name: self.name.clone(),
                aggregations: vec![bucket],
            })))
        }

        fn with_window(&self, window: TimeRange) -> Option<Arc<dyn Query>> {
            if self.fail_ranged {
                return None;
            }
            Some(Arc::new(Self {
                window,
                ..self.clone()
            }))
        }
    }

    fn cache() -> Arc<dyn BucketCache> {
        Arc::new(TimeBucketCache::with_clock(
            Arc::new(MemoryCacheStore::new(100)),
            BucketCacheConfig::default(),
            Arc::new(FixedClock::new(10_000_000)),
        ))
    }

    fn counting(
        window: TimeRange,
        fail_ranged: bool,
    ) -> (CountingQuery, Arc<Mutex<Vec<TimeRange>>>) {
        let executions = Arc::new(Mutex::new(Vec::new()));
        let query = CountingQuery {
            name: "A".to_string(),
            window,
            executions: executions.clone(),
            fail_ranged,
        };
        (query, executions)
    }

    fn ctx(cache: Arc<dyn BucketCache>) -> ExecContext {
        ExecContext {
            org_id: "org".to_string(),
            cache: Some(cache),
            range_parallelism: 4,
        }
    }

    fn point_count(result: &QueryResult) -> usize {
        result.as_time_series().unwrap().aggregations[0].series[0].values.len()
    }

    #[tokio::test]
    async fn test_only_missing_range_executes() {
        let cache = cache();
        let ctx = ctx(cache);
        let (first, _) = counting(TimeRange::new(0, 10_000), false);
        ctx.execute(Arc::new(first)).await.unwrap();

        let (second, executions) = counting(TimeRange::new(0, 15_000), false);
        let result = ctx.execute(Arc::new(second)).await.unwrap();

        assert_eq!(*executions.lock(), vec![TimeRange::new(10_000, 15_000)]);
        assert_eq!(point_count(&result), 15);
    }

    #[tokio::test]
    async fn test_full_hit_skips_execution() {
        let ctx = ctx(cache());
        let (first, _) = counting(TimeRange::new(0, 10_000), false);
        ctx.execute(Arc::new(first)).await.unwrap();

        let (again, executions) = counting(TimeRange::new(0, 10_000), false);
        let result = ctx.execute(Arc::new(again)).await.unwrap();

        assert!(executions.lock().is_empty());
        assert_eq!(point_count(&result), 10);
    }

    #[tokio::test]
    async fn test_unrangeable_query_runs_full_window() {
        let ctx = ctx(cache());
        let (first, _) = counting(TimeRange::new(0, 10_000), false);
        ctx.execute(Arc::new(first)).await.unwrap();

        let (second, executions) = counting(TimeRange::new(0, 15_000), true);
        let result = ctx.execute(Arc::new(second)).await.unwrap();

        assert_eq!(*executions.lock(), vec![TimeRange::new(0, 15_000)]);
        assert_eq!(point_count(&result), 15);
    }

    #[test]
    fn test_merge_prefers_cached_points() {
        let mut cached_bucket = AggregationBucket::new(0);
        cached_bucket.series.push(TimeSeries::new(
            vec![Label::new("service", "api")],
            vec![TimeSeriesValue::new(1000, 1.0)],
        ));
        let cached = QueryResult::new(ResultValue::TimeSeries(TimeSeriesData {
            query_name: "A".to_string(),
            aggregations: vec![cached_bucket],
        }))
        .with_warnings(vec!["w".to_string()]);

        let mut fresh_bucket = AggregationBucket::new(0);
        fresh_bucket.alias = "requests".to_string();
        fresh_bucket.series.push(TimeSeries::new(
            vec![Label::new("service", "api")],
            vec![TimeSeriesValue::new(1000, 9.0), TimeSeriesValue::new(2000, 2.0)],
        ));
        let fresh = QueryResult::new(ResultValue::TimeSeries(TimeSeriesData {
            query_name: "A".to_string(),
            aggregations: vec![fresh_bucket],
        }))
        .with_warnings(vec!["w".to_string()]);

        let merged = merge_results("A", Some(cached), vec![fresh]);
        let data = merged.as_time_series().unwrap();
        assert_eq!(data.aggregations[0].alias, "requests");
        let values: Vec<(i64, f64)> = data.aggregations[0].series[0]
            .values
            .iter()
            .map(|v| (v.timestamp, v.value))
            .collect();
        assert_eq!(values, vec![(1000, 1.0), (2000, 2.0)]);
        assert_eq!(merged.warnings, vec!["w".to_string()]);
    }

    #[test]
    fn test_warning_envelope() {
        assert!(QueryWarning::from_messages(vec![], "https://docs").is_none());

        let warning =
            QueryWarning::from_messages(vec!["a".to_string(), "b".to_string()], "https://docs")
                .unwrap();
        assert_eq!(warning.message, WARNINGS_MESSAGE);
        assert_eq!(warning.url, "https://docs");
        assert_eq!(warning.warnings.len(), 2);
    }

    #[test]
    fn test_set_query_name() {
        let mut value = ResultValue::TimeSeries(TimeSeriesData::new("backend"));
        set_query_name(&mut value, "A");
        assert_eq!(value.query_name(), "A");
    }

    struct NoopResolver;

    impl QueryResolver for NoopResolver {
        fn resolve(
            &self,
            _envelope: &QueryEnvelope,
            _request: &QueryRangeRequest,
        ) -> Result<Option<Arc<dyn Query>>, QueryError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_from_config_builds_memory_cache() {
        let mut config = QuerierConfig::default();
        let querier = Querier::from_config(Arc::new(NoopResolver), &config)
            .await
            .unwrap();
        assert!(querier.has_cache());

        config.cache.enabled = false;
        config.execution.max_concurrency = 2;
        let querier = Querier::from_config(Arc::new(NoopResolver), &config)
            .await
            .unwrap();
        assert!(!querier.has_cache());
        assert_eq!(querier.options().max_concurrency, 2);
    }

    #[tokio::test]
    async fn test_empty_request_rejected() {
        let querier = Querier::new(Arc::new(NoopResolver), QuerierOptions::default());
        let err = querier
            .query_range("org", QueryRangeRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::query::error::QueryErrorKind::ValidationError);
    }

    #[tokio::test]
    async fn test_interval_warning_surfaces_for_time_series() {
        let querier = Querier::new(Arc::new(NoopResolver), QuerierOptions::default())
            .with_post_processor(PostProcessor::new());
        let req = QueryRangeRequest {
            start: 0,
            end: 30 * 86_400_000,
            request_type: RequestType::TimeSeries,
            composite_query: CompositeQuery {
                queries: vec![QueryEnvelope::BuilderQuery(BuilderQuerySpec {
                    name: "A".to_string(),
                    signal: Signal::Traces,
                    step_interval: Step::from_secs(1),
                    ..Default::default()
                })],
            },
            ..Default::default()
        };

        let response = querier.query_range("org", req).await.unwrap();
        let warning = response.warning.unwrap();
        assert_eq!(warning.warnings.len(), 1);
        assert!(warning.warnings[0].message.contains("Query A"));
    }

    #[tokio::test]
    async fn test_aborted_task_maps_to_cancelled() {
        let mut join_set = JoinSet::new();
        join_set.spawn(std::future::pending::<()>());
        join_set.abort_all();

        let joined = join_set.join_next().await.unwrap();
        let err = task_error(joined.unwrap_err());
        assert_eq!(err.kind, crate::query::error::QueryErrorKind::Cancelled);
    }
}
