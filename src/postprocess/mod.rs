//! Result post-processing
//!
//! Turns the raw per-query results of a composite request into the response
//! payloads. Every step is a pure function of the results and the request.
//!
//! | Step              | Applies to                                   |
//! |-------------------|----------------------------------------------|
//! | functions         | builder queries with a function chain        |
//! | having            | builder queries with a having clause (no-op) |
//! | series limit      | builder queries                              |
//! | reduce            | metric builder queries of scalar requests    |
//! | formulas          | formula envelopes                            |
//! | disabled filter   | every result                                 |
//! | table             | scalar requests asking for a UI table        |
//! | gap filling       | time-series requests asking for fill gaps    |
//!
//! Table formatting and gap filling are mutually exclusive: the first only
//! runs for scalar requests, the second only for time-series requests.

pub mod formula;
pub mod functions;
pub mod gaps;
pub mod limit;
pub mod reduce;
pub mod table;

pub use formula::{ExpressionEvaluator, FormulaEvaluator};
pub use functions::{apply_functions, prepare_fill_zero_args};
pub use gaps::{fill_gap_for_series, fill_gaps};
pub use limit::{apply_series_limit, VALUE_ORDER_KEY};
pub use reduce::{apply_metric_reduce_to, reduce_series};
pub use table::{format_table, round_to_two_decimal};

use crate::query::request::{
    BuilderQuerySpec, Having, QueryEnvelope, QueryRangeRequest, ReduceTo, Signal,
};
use crate::query::result::{QueryResult, ResultValue};
use crate::types::RequestType;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Results keyed by query name
pub type ResultMap = BTreeMap<String, QueryResult>;

/// Applies the post-processing pipeline to a request's results
#[derive(Clone)]
pub struct PostProcessor {
    evaluator: Arc<dyn FormulaEvaluator>,
}

impl PostProcessor {
    /// Post-processor with the default expression evaluator
    pub fn new() -> Self {
        Self::with_evaluator(Arc::new(ExpressionEvaluator::new()))
    }

    /// Post-processor with a custom formula evaluator
    pub fn with_evaluator(evaluator: Arc<dyn FormulaEvaluator>) -> Self {
        Self { evaluator }
    }

    /// Run the full pipeline
    pub fn process(&self, mut results: ResultMap, req: &QueryRangeRequest) -> ResultMap {
        for envelope in &req.composite_query.queries {
            if let QueryEnvelope::BuilderQuery(spec) = envelope {
                if let Some(result) = results.get_mut(&spec.name) {
                    process_builder_result(result, spec, req);
                }
            }
        }

        formula::apply_formulas(&mut results, req, self.evaluator.as_ref());
        let mut results = filter_disabled(results, req);

        let format = req.format();
        if req.request_type == RequestType::Scalar && format.format_table_result_for_ui {
            if req.is_single_raw_sql() {
                return results;
            }
            let default_name = req.first_query_name().unwrap_or("table");
            let (name, table) = format_table(&results, default_name);
            let mut tabled = ResultMap::new();
            tabled.insert(name, QueryResult::new(ResultValue::Scalar(table)));
            return tabled;
        }

        if req.request_type == RequestType::TimeSeries && format.fill_gaps {
            fill_gaps(&mut results, req);
        }

        results
    }
}

impl Default for PostProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PostProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostProcessor").finish_non_exhaustive()
    }
}

/// Functions, having, limit and reduction for one builder query result
pub fn process_builder_result(
    result: &mut QueryResult,
    spec: &BuilderQuerySpec,
    req: &QueryRangeRequest,
) {
    if !spec.functions.is_empty() {
        let step = spec.step_interval.as_millis() as i64;
        let functions = prepare_fill_zero_args(&spec.functions, req.start, req.end, step);
        apply_functions(result, &functions);
    }

    if let Some(having) = &spec.having {
        apply_having(result, having);
    }

    let metric = spec.signal == Signal::Metrics;
    let order = match spec.aggregations.first() {
        Some(agg) if metric => limit::normalize_order(&spec.order, &agg.metric_order_aliases()),
        _ => spec.order.clone(),
    };
    apply_series_limit(result, spec.limit, &order);

    if metric && req.request_type == RequestType::Scalar {
        if let Some(agg) = spec.aggregations.first() {
            if agg.reduce_to != ReduceTo::Unknown {
                apply_metric_reduce_to(result, agg.reduce_to);
            }
        }
    }
}

/// Having clauses are accepted but not evaluated here; every value passes
pub fn apply_having(_result: &mut QueryResult, having: &Having) {
    debug!(expression = %having.expression, "Having clause is not applied in post-processing");
}

/// Keep only results of enabled queries and formulas
pub fn filter_disabled(mut results: ResultMap, req: &QueryRangeRequest) -> ResultMap {
    let mut kept = ResultMap::new();
    for envelope in &req.composite_query.queries {
        if envelope.is_disabled() {
            continue;
        }
        if let Some(result) = results.remove(envelope.name()) {
            kept.insert(envelope.name().to_string(), result);
        }
    }
    kept
}
