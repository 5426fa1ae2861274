//! Query result types
//!
//! A `QueryResult` is the outcome of one sub-query execution, either fresh
//! from a backend or reassembled from cached buckets. The payload takes one of
//! four shapes:
//!
//! ```text
//! ResultValue
//! ├── TimeSeries   ── AggregationBucket[index] ── TimeSeries(labels) ── TimeSeriesValue
//! ├── Scalar       ── ColumnDescriptor[] + rows of Value
//! ├── Raw          ── RawRow { timestamp, data: name -> Value }
//! └── Distribution ── DistributionBucket[timestamp] ── bounds + count
//! ```

use crate::query::value::Value;
use crate::types::RequestType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

// ============================================================================
// Query Result
// ============================================================================

/// Outcome of one query execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Shape-specific payload
    pub value: ResultValue,

    /// Execution statistics
    #[serde(default)]
    pub stats: ExecStats,

    /// Non-fatal messages raised while building or running the query
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl QueryResult {
    /// Wrap a payload with empty stats and no warnings
    pub fn new(value: ResultValue) -> Self {
        Self {
            value,
            stats: ExecStats::default(),
            warnings: Vec::new(),
        }
    }

    /// Set execution statistics
    pub fn with_stats(mut self, stats: ExecStats) -> Self {
        self.stats = stats;
        self
    }

    /// Set warnings
    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    /// Shape of the payload
    pub fn request_type(&self) -> RequestType {
        self.value.request_type()
    }

    /// Name of the query that produced the payload
    pub fn query_name(&self) -> &str {
        self.value.query_name()
    }

    /// Time-series payload, if any
    pub fn as_time_series(&self) -> Option<&TimeSeriesData> {
        match &self.value {
            ResultValue::TimeSeries(ts) => Some(ts),
            _ => None,
        }
    }

    /// Scalar payload, if any
    pub fn as_scalar(&self) -> Option<&ScalarData> {
        match &self.value {
            ResultValue::Scalar(sc) => Some(sc),
            _ => None,
        }
    }
}

/// Shape-specific payload of a result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ResultValue {
    /// Labeled series grouped by aggregation
    TimeSeries(TimeSeriesData),
    /// Group columns plus aggregation columns
    Scalar(ScalarData),
    /// Untransformed rows
    Raw(RawData),
    /// Per-timestamp buckets
    Distribution(DistributionData),
}

impl ResultValue {
    /// Request type matching this payload
    pub fn request_type(&self) -> RequestType {
        match self {
            ResultValue::TimeSeries(_) => RequestType::TimeSeries,
            ResultValue::Scalar(_) => RequestType::Scalar,
            ResultValue::Raw(_) => RequestType::Raw,
            ResultValue::Distribution(_) => RequestType::Distribution,
        }
    }

    /// Name of the producing query
    pub fn query_name(&self) -> &str {
        match self {
            ResultValue::TimeSeries(v) => &v.query_name,
            ResultValue::Scalar(v) => &v.query_name,
            ResultValue::Raw(v) => &v.query_name,
            ResultValue::Distribution(v) => &v.query_name,
        }
    }
}

// ============================================================================
// Execution Statistics
// ============================================================================

/// Backend execution statistics, summed across merged buckets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecStats {
    /// Rows read by the backend
    pub rows_scanned: u64,
    /// Bytes read by the backend
    pub bytes_scanned: u64,
    /// Wall time spent in the backend
    pub duration_ms: u64,
    /// Effective step (seconds) per query name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub step_intervals: BTreeMap<String, u64>,
}

impl ExecStats {
    /// Add another set of statistics into this one
    pub fn merge(&mut self, other: &ExecStats) {
        self.rows_scanned += other.rows_scanned;
        self.bytes_scanned += other.bytes_scanned;
        self.duration_ms += other.duration_ms;
        for (name, step) in &other.step_intervals {
            self.step_intervals.entry(name.clone()).or_insert(*step);
        }
    }
}

// ============================================================================
// Time Series
// ============================================================================

/// Time-series payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesData {
    /// Producing query name
    #[serde(default)]
    pub query_name: String,
    /// One bucket per aggregation expression
    #[serde(default)]
    pub aggregations: Vec<AggregationBucket>,
}

impl TimeSeriesData {
    /// Create an empty payload for a query
    pub fn new(query_name: impl Into<String>) -> Self {
        Self {
            query_name: query_name.into(),
            aggregations: Vec::new(),
        }
    }

    /// Total number of series across aggregations
    pub fn series_count(&self) -> usize {
        self.aggregations.iter().map(|a| a.series.len()).sum()
    }
}

/// Display metadata for an aggregation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationMeta {
    /// Unit of the aggregated values
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub unit: String,
}

/// All series produced by one aggregation expression
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregationBucket {
    /// Position of the aggregation in the query
    pub index: usize,
    /// Alias (`__result_<index>` unless the user named it)
    #[serde(default)]
    pub alias: String,
    /// Display metadata
    #[serde(default)]
    pub meta: AggregationMeta,
    /// Series for this aggregation
    #[serde(default)]
    pub series: Vec<TimeSeries>,
}

impl AggregationBucket {
    /// Create a bucket with the default alias
    pub fn new(index: usize) -> Self {
        Self {
            index,
            alias: format!("__result_{}", index),
            meta: AggregationMeta::default(),
            series: Vec::new(),
        }
    }
}

/// One label of a series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    /// Label name
    pub key: String,
    /// Label value
    pub value: Value,
}

impl Label {
    /// Create a label
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Histogram bin bounds carried by heatmap points
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramBucket {
    /// Sorted upper bounds; bin `i` covers `(bounds[i], bounds[i+1]]`
    pub bounds: Vec<f64>,
}

/// One data point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesValue {
    /// Milliseconds since the epoch
    pub timestamp: i64,
    /// Point value
    pub value: f64,
    /// Covering step interval was not complete
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub partial: bool,
    /// Heatmap bin counts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<f64>,
    /// Heatmap bin bounds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<HistogramBucket>,
}

impl TimeSeriesValue {
    /// Create a complete point
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self {
            timestamp,
            value,
            partial: false,
            values: Vec::new(),
            bucket: None,
        }
    }

    /// Mark the point partial
    pub fn partial(mut self) -> Self {
        self.partial = true;
        self
    }
}

/// One labeled series
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    /// Ordered labels
    #[serde(default)]
    pub labels: Vec<Label>,
    /// Points ordered by timestamp
    #[serde(default)]
    pub values: Vec<TimeSeriesValue>,
}

impl TimeSeries {
    /// Create a series from labels and points
    pub fn new(labels: Vec<Label>, values: Vec<TimeSeriesValue>) -> Self {
        Self { labels, values }
    }

    /// Identity of the series independent of label order
    pub fn series_key(&self) -> String {
        series_key(&self.labels)
    }

    /// Label lookup as a name -> rendered value map
    pub fn label_map(&self) -> HashMap<String, String> {
        self.labels
            .iter()
            .map(|l| (l.key.clone(), l.value.to_string()))
            .collect()
    }

    /// Sort points by timestamp if they are not already ordered
    pub fn sort_values(&mut self) {
        let sorted = self
            .values
            .windows(2)
            .all(|w| w[0].timestamp <= w[1].timestamp);
        if !sorted {
            self.values.sort_by_key(|v| v.timestamp);
        }
    }
}

/// Deterministic `key=value` join of labels sorted by key
pub fn series_key(labels: &[Label]) -> String {
    let mut pairs: Vec<(&str, String)> = labels
        .iter()
        .map(|l| (l.key.as_str(), l.value.to_string()))
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

// ============================================================================
// Scalar
// ============================================================================

/// Role of a scalar column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    /// Group-by column
    Group,
    /// Aggregation output column
    Aggregation,
}

/// Description of one scalar column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    /// Column name
    pub name: String,
    /// Query that produced the column
    #[serde(default)]
    pub query_name: String,
    /// Index among aggregation columns
    #[serde(default)]
    pub aggregation_index: usize,
    /// Group or aggregation
    #[serde(rename = "columnType")]
    pub column_type: ColumnType,
    /// Unit of the column values
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub unit: String,
}

impl ColumnDescriptor {
    /// Create a group column
    pub fn group(name: impl Into<String>, query_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            query_name: query_name.into(),
            aggregation_index: 0,
            column_type: ColumnType::Group,
            unit: String::new(),
        }
    }

    /// Create an aggregation column
    pub fn aggregation(
        name: impl Into<String>,
        query_name: impl Into<String>,
        aggregation_index: usize,
    ) -> Self {
        Self {
            name: name.into(),
            query_name: query_name.into(),
            aggregation_index,
            column_type: ColumnType::Aggregation,
            unit: String::new(),
        }
    }

    /// Whether the column is an aggregation output
    pub fn is_aggregation(&self) -> bool {
        self.column_type == ColumnType::Aggregation
    }
}

/// Scalar payload: one row per group
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalarData {
    /// Producing query name
    #[serde(default)]
    pub query_name: String,
    /// Column descriptions
    pub columns: Vec<ColumnDescriptor>,
    /// Rows, each aligned with `columns`
    pub data: Vec<Vec<Value>>,
}

// ============================================================================
// Raw
// ============================================================================

/// One untransformed row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRow {
    /// Row timestamp, when the row has a timestamp column
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Every column by name
    pub data: BTreeMap<String, Value>,
}

/// Raw payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawData {
    /// Producing query name
    #[serde(default)]
    pub query_name: String,
    /// Pagination cursor for the next page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    /// Rows in backend order
    pub rows: Vec<RawRow>,
}

// ============================================================================
// Distribution
// ============================================================================

/// One distribution bin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionBin {
    /// Lower bound (exclusive)
    pub lower_bound: f64,
    /// Upper bound (inclusive)
    pub upper_bound: f64,
    /// Count or value in the bin
    pub count: f64,
}

/// All bins observed at one timestamp
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DistributionBucket {
    /// Milliseconds since the epoch
    pub timestamp: i64,
    /// Labels of the group, when present
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<Label>,
    /// Bins sorted by upper bound
    pub bins: Vec<DistributionBin>,
}

/// Distribution payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionData {
    /// Producing query name
    #[serde(default)]
    pub query_name: String,
    /// Buckets ordered by timestamp
    pub buckets: Vec<DistributionBucket>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_key_ignores_label_order() {
        let a = TimeSeries::new(
            vec![Label::new("service", "api"), Label::new("env", "prod")],
            vec![],
        );
        let b = TimeSeries::new(
            vec![Label::new("env", "prod"), Label::new("service", "api")],
            vec![],
        );
        assert_eq!(a.series_key(), b.series_key());
        assert_eq!(a.series_key(), "env=prod,service=api");
    }

    #[test]
    fn test_request_type_from_payload() {
        let result = QueryResult::new(ResultValue::Scalar(ScalarData::default()));
        assert_eq!(result.request_type(), RequestType::Scalar);
        assert!(result.as_time_series().is_none());
    }

    #[test]
    fn test_stats_merge_sums() {
        let mut a = ExecStats {
            rows_scanned: 10,
            bytes_scanned: 100,
            duration_ms: 5,
            ..Default::default()
        };
        let b = ExecStats {
            rows_scanned: 1,
            bytes_scanned: 2,
            duration_ms: 3,
            ..Default::default()
        };
        a.merge(&b);
        assert_eq!((a.rows_scanned, a.bytes_scanned, a.duration_ms), (11, 102, 8));
    }

    #[test]
    fn test_sort_values() {
        let mut series = TimeSeries::new(
            vec![],
            vec![TimeSeriesValue::new(3, 1.0), TimeSeriesValue::new(1, 2.0)],
        );
        series.sort_values();
        assert_eq!(series.values[0].timestamp, 1);
    }

    #[test]
    fn test_partial_flag_skipped_when_false() {
        let json = serde_json::to_string(&TimeSeriesValue::new(1000, 1.0)).unwrap();
        assert_eq!(json, r#"{"timestamp":1000,"value":1.0}"#);
        let json = serde_json::to_string(&TimeSeriesValue::new(1000, 1.0).partial()).unwrap();
        assert!(json.contains("\"partial\":true"));
    }
}
