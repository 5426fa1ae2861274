//! Composite range request model
//!
//! A `QueryRangeRequest` bundles named sub-queries and formulas over one
//! `[start, end]` window. This module owns the request-level helpers the
//! querier and post-processor need:
//!
//! - step normalization (recommended / minimum allowed steps)
//! - time-shift extraction for builder queries
//! - per-query lookups (step, aggregation count, zero-default support)
//! - deterministic fingerprints used as cache identity

use crate::types::{RequestType, Step, TimeRange};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Write as _;

/// Target number of points per series for recommended steps
pub const RECOMMENDED_NUMBER_OF_POINTS: u64 = 300;

/// Upper bound on points per series before the step is raised
pub const MAX_ALLOWED_NUMBER_OF_POINTS: u64 = 1500;

/// Default step (ms) when no referenced query carries one
pub const DEFAULT_STEP_MS: i64 = 60_000;

// ============================================================================
// Request
// ============================================================================

/// Composite query-range request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRangeRequest {
    /// Window start (ms)
    pub start: u64,
    /// Window end (ms)
    pub end: u64,
    /// Requested result shape
    pub request_type: RequestType,
    /// Named sub-queries and formulas
    pub composite_query: CompositeQuery,
    /// Response formatting options
    #[serde(default)]
    pub format_options: Option<FormatOptions>,
    /// Bypass the bucket cache
    #[serde(default)]
    pub no_cache: bool,
}

/// Ordered list of query envelopes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompositeQuery {
    /// Queries in request order
    pub queries: Vec<QueryEnvelope>,
}

/// Response formatting switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatOptions {
    /// Densify time series with zeros
    #[serde(default)]
    pub fill_gaps: bool,
    /// Merge scalar results into one UI table
    #[serde(default, rename = "formatTableResultForUI")]
    pub format_table_result_for_ui: bool,
}

impl QueryRangeRequest {
    /// Request window as a time range
    pub fn window(&self) -> TimeRange {
        TimeRange::new(self.start, self.end)
    }

    /// Format options, defaulted when absent
    pub fn format(&self) -> FormatOptions {
        self.format_options.unwrap_or_default()
    }

    /// Find an envelope by name
    pub fn find(&self, name: &str) -> Option<&QueryEnvelope> {
        self.composite_query.queries.iter().find(|q| q.name() == name)
    }

    /// Name of the first query in the request
    pub fn first_query_name(&self) -> Option<&str> {
        self.composite_query.queries.first().map(|q| q.name())
    }

    /// Step (ms) of a named query, `0` when unknown
    pub fn step_for(&self, name: &str) -> i64 {
        self.find(name)
            .map(|q| q.step().as_millis() as i64)
            .unwrap_or(0)
    }

    /// Number of aggregations a named query produces (at least one)
    pub fn num_aggregations_for(&self, name: &str) -> usize {
        match self.find(name) {
            Some(QueryEnvelope::BuilderQuery(spec)) => spec.aggregations.len().max(1),
            _ => 1,
        }
    }

    /// Whether gap filling should leave a named result untouched
    ///
    /// PromQL and raw SQL results keep the backend's own point layout.
    pub fn skip_fill_gaps(&self, name: &str) -> bool {
        match self.find(name) {
            Some(QueryEnvelope::Promql(_)) | Some(QueryEnvelope::ClickhouseSql(_)) => true,
            Some(q) => q.is_disabled(),
            None => true,
        }
    }

    /// Names of queries whose missing points may be treated as zero in formulas
    pub fn queries_supporting_zero_default(&self) -> HashSet<String> {
        self.composite_query
            .queries
            .iter()
            .filter_map(|q| match q {
                QueryEnvelope::BuilderQuery(spec) if spec.can_default_zero() => {
                    Some(spec.name.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Whether any query is a single raw SQL query
    pub fn is_single_raw_sql(&self) -> bool {
        self.composite_query.queries.len() == 1
            && matches!(
                self.composite_query.queries[0],
                QueryEnvelope::ClickhouseSql(_)
            )
    }

    /// Fill missing or too-small builder and PromQL steps
    ///
    /// Returns one interval warning per builder query whose step was raised.
    pub fn normalize_steps(&mut self) -> Vec<String> {
        let (start, end) = (self.start, self.end);
        let mut warnings = Vec::new();

        for query in &mut self.composite_query.queries {
            match query {
                QueryEnvelope::BuilderQuery(spec) => {
                    let metrics = spec.signal == Signal::Metrics;
                    if spec.step_interval.is_zero() {
                        let secs = if metrics {
                            recommended_step_for_metric(start, end)
                        } else {
                            recommended_step(start, end)
                        };
                        spec.step_interval = Step::from_secs(secs);
                    }

                    let min_secs = min_allowed_step(start, end);
                    if spec.step_interval.as_secs() < min_secs {
                        let raised = Step::from_secs(min_secs);
                        warnings.push(interval_warning(
                            &spec.name,
                            spec.step_interval.0.as_secs_f64(),
                            min_secs as f64,
                        ));
                        spec.step_interval = raised;
                    }
                }
                QueryEnvelope::Promql(spec) => {
                    if spec.step.is_zero() {
                        spec.step = Step::from_secs(recommended_step_for_metric(start, end));
                    }
                }
                _ => {}
            }
        }

        warnings
    }
}

fn interval_warning(name: &str, requested_secs: f64, used_secs: f64) -> String {
    format!(
        "Query {} is requesting aggregation interval {} seconds, which is smaller than the minimum allowed interval of {} seconds for selected time range. Using the minimum instead",
        name, requested_secs, used_secs
    )
}

/// Recommended step (seconds): `max(5, span/300)` rounded down to a multiple of 5
pub fn recommended_step(start_ms: u64, end_ms: u64) -> u64 {
    let step = end_ms.saturating_sub(start_ms) / 1000 / RECOMMENDED_NUMBER_OF_POINTS;
    if step < 5 {
        5
    } else {
        step - step % 5
    }
}

/// Recommended metric step (seconds): `max(60, span/300)` rounded down to a multiple of 60
pub fn recommended_step_for_metric(start_ms: u64, end_ms: u64) -> u64 {
    let step = end_ms.saturating_sub(start_ms) / 1000 / RECOMMENDED_NUMBER_OF_POINTS;
    if step < 60 {
        60
    } else {
        step - step % 60
    }
}

/// Smallest step (seconds) that keeps a series under the point limit
pub fn min_allowed_step(start_ms: u64, end_ms: u64) -> u64 {
    end_ms.saturating_sub(start_ms) / 1000 / MAX_ALLOWED_NUMBER_OF_POINTS
}

// ============================================================================
// Envelopes
// ============================================================================

/// One named entry of a composite query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "spec", rename_all = "snake_case")]
pub enum QueryEnvelope {
    /// Structured builder query
    BuilderQuery(BuilderQuerySpec),
    /// Formula over other named queries
    BuilderFormula(FormulaSpec),
    /// PromQL text
    Promql(PromQuerySpec),
    /// Raw SQL text
    ClickhouseSql(RawQuerySpec),
}

impl QueryEnvelope {
    /// Query name
    pub fn name(&self) -> &str {
        match self {
            QueryEnvelope::BuilderQuery(s) => &s.name,
            QueryEnvelope::BuilderFormula(s) => &s.name,
            QueryEnvelope::Promql(s) => &s.name,
            QueryEnvelope::ClickhouseSql(s) => &s.name,
        }
    }

    /// Whether the result should be dropped from the response
    pub fn is_disabled(&self) -> bool {
        match self {
            QueryEnvelope::BuilderQuery(s) => s.disabled,
            QueryEnvelope::BuilderFormula(s) => s.disabled,
            QueryEnvelope::Promql(s) => s.disabled,
            QueryEnvelope::ClickhouseSql(s) => s.disabled,
        }
    }

    /// Aggregation step, zero for queries without one
    pub fn step(&self) -> Step {
        match self {
            QueryEnvelope::BuilderQuery(s) => s.step_interval,
            QueryEnvelope::Promql(s) => s.step,
            _ => Step::ZERO,
        }
    }

    /// Whether the envelope is a formula
    pub fn is_formula(&self) -> bool {
        matches!(self, QueryEnvelope::BuilderFormula(_))
    }
}

/// Telemetry signal a builder query reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    /// Spans
    #[default]
    Traces,
    /// Log records
    Logs,
    /// Metric samples
    Metrics,
}

impl Signal {
    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Traces => "traces",
            Signal::Logs => "logs",
            Signal::Metrics => "metrics",
        }
    }
}

/// One aggregation of a builder query
///
/// Trace and log aggregations use `expression` (`count()`, `p99(duration_nano)`).
/// Metric aggregations use the metric name with time/space aggregations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationSpec {
    /// Aggregation expression
    #[serde(default)]
    pub expression: String,
    /// Result alias
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub alias: String,
    /// Metric name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub metric_name: String,
    /// Aggregation over time within a series
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub time_aggregation: String,
    /// Aggregation across series
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub space_aggregation: String,
    /// Reduction for scalar metric requests
    #[serde(default)]
    pub reduce_to: ReduceTo,
}

impl AggregationSpec {
    /// Whether a missing point of this aggregation means zero
    pub fn is_additive(&self) -> bool {
        const ADDITIVE: [&str; 5] = ["count", "count_distinct", "sum", "rate", "increase"];
        if !self.metric_name.is_empty() {
            let time = self.time_aggregation.to_ascii_lowercase();
            let space = self.space_aggregation.to_ascii_lowercase();
            return ADDITIVE.contains(&time.as_str())
                && (space.is_empty() || space == "sum" || space == "count");
        }
        let expr = self.expression.trim().to_ascii_lowercase();
        let func = expr.split('(').next().unwrap_or("").trim();
        ADDITIVE.contains(&func)
            || func == "countif"
            || func == "sumif"
            || func == "count_distinctif"
    }

    /// Order-by names that refer to this metric aggregation's value
    pub fn metric_order_aliases(&self) -> Vec<String> {
        if self.metric_name.is_empty() {
            return Vec::new();
        }
        let m = &self.metric_name;
        vec![
            format!("{}({})", self.space_aggregation, m),
            format!("{}({})", self.time_aggregation, m),
            format!("{}({}({}))", self.space_aggregation, self.time_aggregation, m),
        ]
    }
}

/// Structured builder query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuilderQuerySpec {
    /// Query name (`A`, `B`, ...)
    pub name: String,
    /// Signal to read
    #[serde(default)]
    pub signal: Signal,
    /// Aggregation step
    #[serde(default)]
    pub step_interval: Step,
    /// Drop from the response
    #[serde(default)]
    pub disabled: bool,
    /// Aggregations in output order
    #[serde(default)]
    pub aggregations: Vec<AggregationSpec>,
    /// Filter expression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    /// Group-by keys
    #[serde(default)]
    pub group_by: Vec<String>,
    /// Series ordering
    #[serde(default)]
    pub order: Vec<OrderBy>,
    /// Maximum series per aggregation, `0` for unlimited
    #[serde(default)]
    pub limit: usize,
    /// Having clause
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub having: Option<Having>,
    /// Post-processing function chain
    #[serde(default)]
    pub functions: Vec<Function>,
    /// Time shift (seconds), derived from a `timeShift` function
    #[serde(default, skip_serializing_if = "is_zero")]
    pub shift_by: i64,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

impl BuilderQuerySpec {
    /// Shift (seconds) requested through `shift_by` or a `timeShift` function
    pub fn extract_shift(&self) -> i64 {
        if self.shift_by != 0 {
            return self.shift_by;
        }
        self.functions
            .iter()
            .find(|f| f.name == FunctionName::TimeShift)
            .and_then(|f| f.args.first())
            .and_then(FunctionArg::as_f64)
            .map(|v| v as i64)
            .unwrap_or(0)
    }

    /// Execution window for this query: the request window moved back by the shift
    ///
    /// Only time-series and scalar requests honor the shift.
    pub fn shifted_window(&self, window: TimeRange, kind: RequestType) -> TimeRange {
        if !matches!(kind, RequestType::TimeSeries | RequestType::Scalar) {
            return window;
        }
        let shift = self.extract_shift();
        if shift <= 0 {
            return window;
        }
        window.shifted_back(shift as u64 * 1000)
    }

    /// All aggregations are additive, so missing points may default to zero
    pub fn can_default_zero(&self) -> bool {
        !self.aggregations.is_empty() && self.aggregations.iter().all(|a| a.is_additive())
    }

    /// Deterministic identity of the query shape, independent of its window
    pub fn fingerprint(&self, kind: RequestType) -> String {
        let mut fp = String::new();
        let _ = write!(
            fp,
            "builder&signal={}&kind={}&step={}",
            self.signal.as_str(),
            kind,
            self.step_interval.as_millis()
        );
        for (idx, agg) in self.aggregations.iter().enumerate() {
            let _ = write!(
                fp,
                "&agg{}={}|{}|{}|{}|{}",
                idx,
                agg.expression,
                agg.alias,
                agg.metric_name,
                agg.time_aggregation,
                agg.space_aggregation
            );
        }
        if let Some(filter) = &self.filter {
            let _ = write!(fp, "&filter={}", filter);
        }
        if !self.group_by.is_empty() {
            let _ = write!(fp, "&groupBy={}", self.group_by.join(","));
        }
        if let Some(having) = &self.having {
            let _ = write!(fp, "&having={}", having.expression);
        }
        if !self.order.is_empty() {
            let order: Vec<String> = self
                .order
                .iter()
                .map(|o| format!("{}:{}", o.key.name, o.direction.as_str()))
                .collect();
            let _ = write!(fp, "&order={}", order.join(","));
        }
        if self.limit > 0 {
            let _ = write!(fp, "&limit={}", self.limit);
        }
        let shift = self.extract_shift();
        if shift != 0 {
            let _ = write!(fp, "&shiftBy={}", shift);
        }
        fp
    }
}

/// Formula over other named queries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormulaSpec {
    /// Formula name (`F1`, ...)
    pub name: String,
    /// Arithmetic expression over query references
    pub expression: String,
    /// Drop from the response
    #[serde(default)]
    pub disabled: bool,
    /// Post-processing function chain
    #[serde(default)]
    pub functions: Vec<Function>,
    /// Series ordering
    #[serde(default)]
    pub order: Vec<OrderBy>,
    /// Maximum series, `0` for unlimited
    #[serde(default)]
    pub limit: usize,
}

/// PromQL query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromQuerySpec {
    /// Query name
    pub name: String,
    /// PromQL text
    pub query: String,
    /// Evaluation step
    #[serde(default)]
    pub step: Step,
    /// Drop from the response
    #[serde(default)]
    pub disabled: bool,
}

impl PromQuerySpec {
    /// Deterministic identity of the query, independent of its window
    pub fn fingerprint(&self) -> String {
        format!("promql&query={}&step={}", self.query, self.step.as_millis())
    }
}

/// Raw SQL query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawQuerySpec {
    /// Query name
    pub name: String,
    /// SQL text
    pub query: String,
    /// Drop from the response
    #[serde(default)]
    pub disabled: bool,
}

// ============================================================================
// Query Elements
// ============================================================================

/// Having clause
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Having {
    /// Filter expression over aggregation results
    pub expression: String,
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    /// Ascending
    Asc,
    /// Descending
    #[default]
    Desc,
}

impl OrderDirection {
    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderDirection::Asc => "asc",
            OrderDirection::Desc => "desc",
        }
    }
}

/// Key an order-by refers to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderByKey {
    /// Label name, or `#value` for the series value
    pub name: String,
}

/// One order-by term
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    /// Key to order by
    pub key: OrderByKey,
    /// Direction
    #[serde(default)]
    pub direction: OrderDirection,
}

impl OrderBy {
    /// Create an order-by term
    pub fn new(name: impl Into<String>, direction: OrderDirection) -> Self {
        Self {
            key: OrderByKey { name: name.into() },
            direction,
        }
    }
}

/// Reduction applied to collapse a series into one point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReduceTo {
    /// Sum of non-NaN values
    Sum,
    /// Number of non-NaN values
    Count,
    /// Mean of non-NaN values
    Avg,
    /// Minimum value
    Min,
    /// Maximum value
    Max,
    /// Last point
    Last,
    /// Median value
    Median,
    /// Unrecognized or absent; leaves the series unchanged
    #[default]
    #[serde(other)]
    #[serde(rename = "")]
    Unknown,
}

/// Name of a post-processing function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FunctionName {
    /// Values below the threshold become NaN
    CutOffMin,
    /// Values above the threshold become NaN
    CutOffMax,
    /// Raise values to at least the threshold
    ClampMin,
    /// Lower values to at most the threshold
    ClampMax,
    /// Absolute value
    Absolute,
    /// Difference to the previous point
    RunningDiff,
    /// Base-2 logarithm
    Log2,
    /// Base-10 logarithm
    Log10,
    /// Running total
    #[serde(alias = "cumSum")]
    CumulativeSum,
    /// Exponential moving average, window 3
    Ewma3,
    /// Exponential moving average, window 5
    Ewma5,
    /// Exponential moving average, window 7
    Ewma7,
    /// Moving median, window 3
    Median3,
    /// Moving median, window 5
    Median5,
    /// Moving median, window 7
    Median7,
    /// Shift timestamps forward
    TimeShift,
    /// Anomaly detection marker
    Anomaly,
    /// Densify with zeros
    FillZero,
}

/// Argument to a function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionArg {
    /// Optional argument name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Numeric or numeric-string value
    pub value: serde_json::Value,
}

impl FunctionArg {
    /// Create an unnamed numeric argument
    pub fn number(value: f64) -> Self {
        Self {
            name: String::new(),
            value: serde_json::Value::from(value),
        }
    }

    /// Numeric view of the argument
    pub fn as_f64(&self) -> Option<f64> {
        match &self.value {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// One function of a post-processing chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    /// Function name
    pub name: FunctionName,
    /// Arguments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<FunctionArg>,
}

impl Function {
    /// Create a function without arguments
    pub fn new(name: FunctionName) -> Self {
        Self {
            name,
            args: Vec::new(),
        }
    }

    /// Add a numeric argument
    pub fn with_arg(mut self, value: f64) -> Self {
        self.args.push(FunctionArg::number(value));
        self
    }

    /// Numeric argument at `idx`
    pub fn arg(&self, idx: usize) -> Option<f64> {
        self.args.get(idx).and_then(FunctionArg::as_f64)
    }
}
