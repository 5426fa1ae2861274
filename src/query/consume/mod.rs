//! Row-set consumers
//!
//! Backends return a tabular row-set: column metadata plus an iterator of
//! rows. `consume` reads every row and shapes it into the payload the request
//! asked for.
//!
//! | Request type             | Reader              | Payload            |
//! |--------------------------|---------------------|--------------------|
//! | time_series, heatmap     | `read_time_series`  | `TimeSeriesData`   |
//! | scalar                   | `read_scalar`       | `ScalarData`       |
//! | raw, trace               | `read_raw`          | `RawData`          |
//! | distribution             | `read_distribution` | `DistributionData` |
//!
//! Aggregation columns follow the `__result_<N>` naming convention; every
//! reader classifies columns by name first and by declared kind second.

mod distribution;
mod raw;
mod scalar;
mod time_series;

pub use distribution::read_distribution;
pub use raw::read_raw;
pub use scalar::read_scalar;
pub use time_series::read_time_series;

use crate::query::error::QueryError;
use crate::query::result::{ExecStats, ResultValue};
use crate::query::value::Value;
use crate::types::{RequestType, Step, TimeRange};
use lazy_static::lazy_static;
use regex::Regex;

/// Column aliases that mark the value column of hand-written SQL
pub const LEGACY_VALUE_ALIASES: [&str; 5] = ["__result", "__value", "result", "res", "value"];

/// Declared type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    /// Signed integer
    Int,
    /// Unsigned integer
    UInt,
    /// Floating point
    Float,
    /// Text
    String,
    /// Boolean
    Bool,
    /// Native timestamp
    DateTime,
    /// JSON document (may arrive as text)
    Json,
    /// Array (heatmap buckets arrive as arrays of `[lower, upper, count]`)
    Array,
}

impl ColumnKind {
    /// Whether the column holds numbers
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnKind::Int | ColumnKind::UInt | ColumnKind::Float)
    }
}

/// Name and type of one column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    /// Column name
    pub name: String,
    /// Declared kind
    pub kind: ColumnKind,
    /// Cells may be NULL
    pub nullable: bool,
}

impl ColumnMeta {
    /// Non-nullable column
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
        }
    }

    /// Nullable column
    pub fn nullable(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: true,
        }
    }
}

/// Forward-only row iterator returned by a backend
pub trait Rows: Send {
    /// Column metadata, aligned with every row
    fn columns(&self) -> &[ColumnMeta];

    /// Next row, `None` at the end, `Some(Err)` when the backend fails mid-stream
    fn next_row(&mut self) -> Option<Result<Vec<Value>, QueryError>>;

    /// Backend progress counters, read after the last row
    fn stats(&self) -> ExecStats {
        ExecStats::default()
    }
}

/// In-memory row-set
#[derive(Debug, Clone)]
pub struct VecRows {
    columns: Vec<ColumnMeta>,
    rows: std::vec::IntoIter<Vec<Value>>,
    stats: ExecStats,
}

impl VecRows {
    /// Build a row-set from columns and rows
    pub fn new(columns: Vec<ColumnMeta>, rows: Vec<Vec<Value>>) -> Self {
        let stats = ExecStats {
            rows_scanned: rows.len() as u64,
            ..Default::default()
        };
        Self {
            columns,
            rows: rows.into_iter(),
            stats,
        }
    }
}

impl Rows for VecRows {
    fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    fn next_row(&mut self) -> Option<Result<Vec<Value>, QueryError>> {
        self.rows.next().map(Ok)
    }

    fn stats(&self) -> ExecStats {
        self.stats.clone()
    }
}

lazy_static! {
    /// `__result_<N>` aggregation column names
    static ref AGGREGATION_COLUMN: Regex = Regex::new(r"^__result_(\d+)$").unwrap();
}

/// Aggregation index encoded in a `__result_<N>` column name
pub fn aggregation_index(name: &str) -> Option<usize> {
    AGGREGATION_COLUMN
        .captures(name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Read every row and shape it for `kind`
///
/// `window` and `step` drive partial-value detection for time series.
pub fn consume(
    rows: &mut dyn Rows,
    kind: RequestType,
    window: Option<TimeRange>,
    step: Step,
    query_name: &str,
) -> Result<ResultValue, QueryError> {
    match kind {
        RequestType::TimeSeries | RequestType::Heatmap => {
            read_time_series(rows, window, step, query_name).map(ResultValue::TimeSeries)
        }
        RequestType::Scalar => read_scalar(rows, query_name).map(ResultValue::Scalar),
        RequestType::Raw | RequestType::Trace => read_raw(rows, query_name).map(ResultValue::Raw),
        RequestType::Distribution => {
            read_distribution(rows, query_name).map(ResultValue::Distribution)
        }
    }
}
