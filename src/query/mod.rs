//! Query model and execution adapters
//!
//! This module provides everything the querier needs to run one sub-query:
//! - The composite request model (builder queries, formulas, PromQL, raw SQL)
//! - The result payloads (time series, scalar, raw, distribution)
//! - Row-set consumers that shape backend rows into payloads
//! - The `Query` contract and a statement-backed implementation
//!
//! # Architecture
//!
//! ```text
//! QueryRangeRequest
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Resolve    │  Envelope → Arc<dyn Query>
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Execute    │  Statement → TelemetryStore → Rows
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Consume    │  Rows → TimeSeries / Scalar / Raw / Distribution
//! └─────────────┘
//! ```

pub mod adapter;
pub mod consume;
pub mod error;
pub mod request;
pub mod result;
pub mod value;

// Re-export main types
pub use adapter::{
    Dialect, Query, QueryResolver, Statement, StatementBuilder, StatementQuery, StatementResolver,
    StatementSource, TelemetryStore,
};
pub use consume::{consume, ColumnKind, ColumnMeta, Rows, VecRows};
pub use error::{QueryError, QueryErrorKind};
pub use request::{
    AggregationSpec, BuilderQuerySpec, CompositeQuery, FormatOptions, FormulaSpec, Function,
    FunctionArg, FunctionName, OrderBy, OrderDirection, PromQuerySpec, QueryEnvelope,
    QueryRangeRequest, RawQuerySpec, ReduceTo, Signal,
};
pub use result::{
    AggregationBucket, ColumnDescriptor, ColumnType, DistributionData, ExecStats, Label,
    QueryResult, RawData, ResultValue, ScalarData, TimeSeries, TimeSeriesData, TimeSeriesValue,
};
pub use value::Value;
