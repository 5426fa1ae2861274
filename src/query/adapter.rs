//! Query adapters
//!
//! The querier runs anything that implements [`Query`]. The bundled
//! implementation, [`StatementQuery`], turns an envelope into a backend
//! statement, hands it to a [`TelemetryStore`], and consumes the returned
//! row-set into the requested payload shape.
//!
//! ```text
//! QueryEnvelope ──► QueryResolver ──► Arc<dyn Query>
//!                                          │ execute()
//!                                          ▼
//!                 StatementBuilder ──► Statement ──► TelemetryStore ──► Rows
//!                                                                       │
//!                                                        consume() ◄────┘
//! ```
//!
//! Cancellation is cooperative: dropping the `execute` future abandons the
//! backend call.

use crate::metrics;
use crate::query::consume::consume;
use crate::query::error::QueryError;
use crate::query::request::{
    BuilderQuerySpec, PromQuerySpec, QueryEnvelope, QueryRangeRequest, RawQuerySpec,
};
use crate::query::result::QueryResult;
use crate::query::value::Value;
use crate::query::consume::Rows;
use crate::types::{RequestType, Step, TimeRange};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

// ============================================================================
// Query contract
// ============================================================================

/// One executable sub-query of a composite request
#[async_trait]
pub trait Query: Send + Sync + fmt::Debug {
    /// Name of the envelope this query was built from
    fn name(&self) -> &str;

    /// Cache identity of the query shape; empty disables caching
    fn fingerprint(&self) -> String;

    /// Window the query reads, after any time shift
    fn window(&self) -> TimeRange;

    /// Shape of the result
    fn request_type(&self) -> RequestType;

    /// Aggregation step, zero when the query has none
    fn step(&self) -> Step;

    /// Run the query
    async fn execute(&self) -> Result<QueryResult, QueryError>;

    /// Copy of this query restricted to another window
    ///
    /// `None` when the query cannot be ranged; the caller then runs the
    /// whole window instead.
    fn with_window(&self, window: TimeRange) -> Option<Arc<dyn Query>>;
}

// ============================================================================
// Backend seams
// ============================================================================

/// Query language of a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// SQL for the columnar store
    Sql,
    /// PromQL for the metrics engine
    PromQl,
}

/// Backend-ready statement
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// Language of `query`
    pub dialect: Dialect,
    /// Statement text
    pub query: String,
    /// Bound parameters
    pub args: Vec<Value>,
    /// Window the statement covers
    pub window: TimeRange,
    /// Step for range evaluation
    pub step: Step,
    /// Non-fatal notes produced while building
    pub warnings: Vec<String>,
}

impl Statement {
    /// Statement with no arguments or warnings
    pub fn new(dialect: Dialect, query: impl Into<String>, window: TimeRange, step: Step) -> Self {
        Self {
            dialect,
            query: query.into(),
            args: Vec::new(),
            window,
            step,
            warnings: Vec::new(),
        }
    }
}

/// Translates a structured builder query into a statement
pub trait StatementBuilder: Send + Sync {
    /// Build the statement for `spec` over `window`
    fn build(
        &self,
        spec: &BuilderQuerySpec,
        window: TimeRange,
        kind: RequestType,
    ) -> Result<Statement, QueryError>;
}

/// Executes statements against the telemetry backend
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Run a statement and return its row-set
    async fn query(&self, statement: &Statement) -> Result<Box<dyn Rows>, QueryError>;
}

// ============================================================================
// StatementQuery
// ============================================================================

/// What a [`StatementQuery`] renders into a statement
#[derive(Clone)]
pub enum StatementSource {
    /// Builder spec, rendered by a statement builder
    Builder {
        /// Query spec
        spec: BuilderQuerySpec,
        /// Renderer
        builder: Arc<dyn StatementBuilder>,
    },
    /// PromQL text
    PromQl(PromQuerySpec),
    /// Raw SQL text
    Sql(RawQuerySpec),
}

impl fmt::Debug for StatementSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatementSource::Builder { spec, .. } => {
                f.debug_tuple("Builder").field(&spec.name).finish()
            }
            StatementSource::PromQl(spec) => f.debug_tuple("PromQl").field(&spec.name).finish(),
            StatementSource::Sql(spec) => f.debug_tuple("Sql").field(&spec.name).finish(),
        }
    }
}

/// Query backed by a statement and a telemetry store
#[derive(Clone)]
pub struct StatementQuery {
    name: String,
    source: StatementSource,
    store: Arc<dyn TelemetryStore>,
    window: TimeRange,
    kind: RequestType,
}

impl fmt::Debug for StatementQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatementQuery")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("window", &self.window)
            .field("kind", &self.kind)
            .finish()
    }
}

impl StatementQuery {
    /// Create a query over `window`
    pub fn new(
        name: impl Into<String>,
        source: StatementSource,
        store: Arc<dyn TelemetryStore>,
        window: TimeRange,
        kind: RequestType,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            store,
            window,
            kind,
        }
    }

    fn statement(&self) -> Result<Statement, QueryError> {
        match &self.source {
            StatementSource::Builder { spec, builder } => {
                builder.build(spec, self.window, self.kind)
            }
            StatementSource::PromQl(spec) => Ok(Statement::new(
                Dialect::PromQl,
                &spec.query,
                self.window,
                spec.step,
            )),
            StatementSource::Sql(spec) => Ok(Statement::new(
                Dialect::Sql,
                &spec.query,
                self.window,
                Step::ZERO,
            )),
        }
    }
}

#[async_trait]
impl Query for StatementQuery {
    fn name(&self) -> &str {
        &self.name
    }

    fn fingerprint(&self) -> String {
        if matches!(self.kind, RequestType::Raw | RequestType::Trace) {
            return String::new();
        }
        match &self.source {
            StatementSource::Builder { spec, .. } => spec.fingerprint(self.kind),
            StatementSource::PromQl(spec) => spec.fingerprint(),
            // free-form SQL may embed its own time bounds
            StatementSource::Sql(_) => String::new(),
        }
    }

    fn window(&self) -> TimeRange {
        self.window
    }

    fn request_type(&self) -> RequestType {
        self.kind
    }

    fn step(&self) -> Step {
        match &self.source {
            StatementSource::Builder { spec, .. } => spec.step_interval,
            StatementSource::PromQl(spec) => spec.step,
            StatementSource::Sql(_) => Step::ZERO,
        }
    }

    async fn execute(&self) -> Result<QueryResult, QueryError> {
        let start = Instant::now();
        let statement = self.statement()?;
        debug!(
            query = %self.name,
            window = %self.window,
            dialect = ?statement.dialect,
            "Executing statement"
        );

        let mut rows = self.store.query(&statement).await?;
        let value = consume(
            rows.as_mut(),
            self.kind,
            Some(self.window),
            self.step(),
            &self.name,
        )?;

        let mut stats = rows.stats();
        let elapsed = start.elapsed();
        stats.duration_ms = elapsed.as_millis() as u64;
        metrics::record_query_execution(self.kind.as_str(), elapsed.as_secs_f64());

        Ok(QueryResult::new(value)
            .with_stats(stats)
            .with_warnings(statement.warnings))
    }

    fn with_window(&self, window: TimeRange) -> Option<Arc<dyn Query>> {
        let mut ranged = self.clone();
        ranged.window = window;
        Some(Arc::new(ranged))
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// Turns request envelopes into executable queries
pub trait QueryResolver: Send + Sync {
    /// Resolve one envelope; `None` for envelopes that are not executed
    /// directly (formulas)
    fn resolve(
        &self,
        envelope: &QueryEnvelope,
        request: &QueryRangeRequest,
    ) -> Result<Option<Arc<dyn Query>>, QueryError>;
}

/// Resolver producing [`StatementQuery`] instances
#[derive(Clone)]
pub struct StatementResolver {
    builder: Arc<dyn StatementBuilder>,
    store: Arc<dyn TelemetryStore>,
}

impl StatementResolver {
    /// Create a resolver over a builder and a store
    pub fn new(builder: Arc<dyn StatementBuilder>, store: Arc<dyn TelemetryStore>) -> Self {
        Self { builder, store }
    }
}

impl QueryResolver for StatementResolver {
    fn resolve(
        &self,
        envelope: &QueryEnvelope,
        request: &QueryRangeRequest,
    ) -> Result<Option<Arc<dyn Query>>, QueryError> {
        let kind = request.request_type;
        let window = request.window();

        let (source, window) = match envelope {
            QueryEnvelope::BuilderFormula(_) => return Ok(None),
            QueryEnvelope::BuilderQuery(spec) => {
                if spec.aggregations.is_empty()
                    && !matches!(kind, RequestType::Raw | RequestType::Trace)
                {
                    return Err(QueryError::validation(format!(
                        "query {} has no aggregations",
                        spec.name
                    )));
                }
                (
                    StatementSource::Builder {
                        spec: spec.clone(),
                        builder: Arc::clone(&self.builder),
                    },
                    spec.shifted_window(window, kind),
                )
            }
            QueryEnvelope::Promql(spec) => {
                if spec.query.trim().is_empty() {
                    return Err(QueryError::validation(format!(
                        "promql query {} is empty",
                        spec.name
                    )));
                }
                (StatementSource::PromQl(spec.clone()), window)
            }
            QueryEnvelope::ClickhouseSql(spec) => {
                if spec.query.trim().is_empty() {
                    return Err(QueryError::validation(format!(
                        "sql query {} is empty",
                        spec.name
                    )));
                }
                (StatementSource::Sql(spec.clone()), window)
            }
        };

        Ok(Some(Arc::new(StatementQuery::new(
            envelope.name(),
            source,
            Arc::clone(&self.store),
            window,
            kind,
        ))))
    }
}
