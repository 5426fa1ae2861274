//! Formula queries
//!
//! A formula combines the results of other named queries with arithmetic
//! (`A / B * 100`). Formulas run after every sub-query result has been
//! post-processed, in request order, so a formula may reference the output
//! of an earlier formula.
//!
//! ```text
//!   results{A, B} ──► compile ──► evaluate ──► functions ──► limit ──► results{A, B, F1}
//!                        │            │
//!                        └── error ───┴──► logged, F1 omitted
//! ```
//!
//! Scalar requests lift scalar tables into single-point series at timestamp
//! zero, evaluate them the same way and render the output back as a table
//! with a `__result` column.

pub mod eval;
pub mod parser;

pub use eval::{evaluate_series, eval_expr};
pub use parser::{parse_expression, BinaryOp, Expr, MathFunction};

use crate::metrics;
use crate::postprocess::functions::{apply_functions, prepare_fill_zero_args};
use crate::postprocess::limit::{apply_series_limit, normalize_order};
use crate::postprocess::reduce::MISSING_CELL;
use crate::postprocess::ResultMap;
use crate::query::error::QueryError;
use crate::query::request::{FormulaSpec, QueryEnvelope, QueryRangeRequest, DEFAULT_STEP_MS};
use crate::query::result::{
    series_key, AggregationBucket, ColumnDescriptor, Label, QueryResult, ResultValue, ScalarData,
    TimeSeries, TimeSeriesData, TimeSeriesValue,
};
use crate::query::value::Value;
use crate::types::{Clock, RequestType, SystemClock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error};

/// Formula compiler and evaluator
pub trait FormulaEvaluator: Send + Sync {
    /// Parse and validate an expression
    fn compile(&self, expression: &str) -> Result<Expr, QueryError>;

    /// Evaluate a compiled expression over named time-series inputs
    fn evaluate(
        &self,
        formula: &Expr,
        inputs: &HashMap<String, TimeSeriesData>,
        can_default_zero: &HashSet<String>,
    ) -> Result<Vec<TimeSeries>, QueryError>;
}

/// Default evaluator for arithmetic expressions
pub struct ExpressionEvaluator {
    clock: Arc<dyn Clock>,
}

impl ExpressionEvaluator {
    /// Evaluator whose `now()` reads the wall clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Evaluator whose `now()` reads `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl Default for ExpressionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExpressionEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpressionEvaluator").finish_non_exhaustive()
    }
}

impl FormulaEvaluator for ExpressionEvaluator {
    fn compile(&self, expression: &str) -> Result<Expr, QueryError> {
        let expr = parse_expression(expression)?;
        check_arity(&expr)?;
        Ok(expr)
    }

    fn evaluate(
        &self,
        formula: &Expr,
        inputs: &HashMap<String, TimeSeriesData>,
        can_default_zero: &HashSet<String>,
    ) -> Result<Vec<TimeSeries>, QueryError> {
        let now_secs = (self.clock.now_ms() / 1000) as f64;
        evaluate_series(formula, inputs, can_default_zero, now_secs)
    }
}

fn check_arity(expr: &Expr) -> Result<(), QueryError> {
    match expr {
        Expr::Number(_) | Expr::Variable(_) => Ok(()),
        Expr::Neg(inner) => check_arity(inner),
        Expr::Binary { lhs, rhs, .. } => {
            check_arity(lhs)?;
            check_arity(rhs)
        }
        Expr::Call { func, args } => {
            if args.len() != func.arity() {
                return Err(QueryError::validation(format!(
                    "{:?} takes {} argument(s), got {}",
                    func,
                    func.arity(),
                    args.len()
                )));
            }
            args.iter().try_for_each(check_arity)
        }
    }
}

// ============================================================================
// Step
// ============================================================================

fn gcd(a: i64, b: i64) -> i64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Step (ms) for a formula: GCD of the steps of the queries it references
pub fn calculate_formula_step(formula: &Expr, req: &QueryRangeRequest) -> i64 {
    let referenced: HashSet<&str> = formula
        .variables()
        .iter()
        .map(|v| v.split('.').next().unwrap_or_default().to_string())
        .filter_map(|name| req.find(&name).map(QueryEnvelope::name))
        .collect();

    let step = referenced
        .iter()
        .map(|name| req.step_for(name))
        .filter(|s| *s > 0)
        .fold(0, gcd);

    if step > 0 {
        step
    } else {
        DEFAULT_STEP_MS
    }
}

// ============================================================================
// Application
// ============================================================================

/// Evaluate every formula of the request and store its result under its name
///
/// Failures are logged and recorded; the failing formula produces no result.
pub fn apply_formulas(
    results: &mut ResultMap,
    req: &QueryRangeRequest,
    evaluator: &dyn FormulaEvaluator,
) {
    for envelope in &req.composite_query.queries {
        let QueryEnvelope::BuilderFormula(formula) = envelope else {
            continue;
        };

        let expr = match evaluator.compile(&formula.expression) {
            Ok(expr) => expr,
            Err(e) => {
                error!(formula = %formula.name, error = %e, "Failed to compile formula");
                metrics::record_formula_failure("compile");
                continue;
            }
        };

        let outcome = match req.request_type {
            RequestType::TimeSeries => time_series_formula(results, formula, &expr, req, evaluator),
            RequestType::Scalar => scalar_formula(results, formula, &expr, req, evaluator),
            other => {
                debug!(
                    formula = %formula.name,
                    request_type = %other,
                    "Formulas not supported for request type"
                );
                continue;
            }
        };

        match outcome {
            Ok(mut result) => {
                let order = normalize_order(
                    &formula.order,
                    &[formula.name.clone(), formula.expression.clone()],
                );
                apply_series_limit(&mut result, formula.limit, &order);
                results.insert(formula.name.clone(), result);
            }
            Err(e) => {
                error!(formula = %formula.name, error = %e, "Failed to evaluate formula");
                metrics::record_formula_failure("evaluate");
            }
        }
    }
}

fn time_series_formula(
    results: &ResultMap,
    formula: &FormulaSpec,
    expr: &Expr,
    req: &QueryRangeRequest,
    evaluator: &dyn FormulaEvaluator,
) -> Result<QueryResult, QueryError> {
    let inputs: HashMap<String, TimeSeriesData> = results
        .iter()
        .filter_map(|(name, r)| r.as_time_series().map(|ts| (name.clone(), ts.clone())))
        .collect();

    let series = evaluator.evaluate(expr, &inputs, &req.queries_supporting_zero_default())?;
    let mut bucket = AggregationBucket::new(0);
    bucket.series = series;

    let mut result = QueryResult::new(ResultValue::TimeSeries(TimeSeriesData {
        query_name: formula.name.clone(),
        aggregations: vec![bucket],
    }));

    if !formula.functions.is_empty() {
        let step = calculate_formula_step(expr, req);
        let functions = prepare_fill_zero_args(&formula.functions, req.start, req.end, step);
        apply_functions(&mut result, &functions);
    }
    Ok(result)
}

fn scalar_formula(
    results: &ResultMap,
    formula: &FormulaSpec,
    expr: &Expr,
    req: &QueryRangeRequest,
    evaluator: &dyn FormulaEvaluator,
) -> Result<QueryResult, QueryError> {
    let inputs: HashMap<String, TimeSeriesData> = results
        .iter()
        .filter_map(|(name, r)| r.as_scalar().map(|sc| (name.clone(), scalar_to_series(sc))))
        .collect();

    let series = evaluator.evaluate(expr, &inputs, &req.queries_supporting_zero_default())?;
    Ok(QueryResult::new(ResultValue::Scalar(series_to_scalar(
        &formula.name,
        &series,
    ))))
}

/// Lift a scalar table into single-point series at timestamp zero
///
/// Each aggregation column becomes a bucket named after the column; each
/// distinct group-value combination becomes a series.
pub fn scalar_to_series(scalar: &ScalarData) -> TimeSeriesData {
    let aggregation_columns: BTreeMap<usize, usize> = scalar
        .columns
        .iter()
        .enumerate()
        .filter(|(_, c)| c.is_aggregation())
        .map(|(i, c)| (c.aggregation_index, i))
        .collect();

    // label key -> (labels, aggregation index -> value)
    let mut rows: BTreeMap<String, (Vec<Label>, HashMap<usize, f64>)> = BTreeMap::new();
    for row in &scalar.data {
        let labels: Vec<Label> = scalar
            .columns
            .iter()
            .zip(row)
            .filter(|(c, _)| !c.is_aggregation())
            .map(|(c, v)| Label::new(c.name.clone(), v.clone()))
            .collect();
        let entry = rows
            .entry(series_key(&labels))
            .or_insert_with(|| (labels, HashMap::new()));
        for (agg_idx, col_idx) in &aggregation_columns {
            match row.get(*col_idx).and_then(Value::as_f64) {
                Some(v) if !v.is_nan() => {
                    entry.1.insert(*agg_idx, v);
                }
                _ => debug!(query = %scalar.query_name, "Skipping non-numeric scalar cell"),
            }
        }
    }

    let aggregations = aggregation_columns
        .iter()
        .map(|(agg_idx, col_idx)| {
            let mut bucket = AggregationBucket::new(*agg_idx);
            bucket.alias = scalar.columns[*col_idx].name.clone();
            bucket.series = rows
                .values()
                .filter_map(|(labels, values)| {
                    values.get(agg_idx).map(|v| {
                        TimeSeries::new(labels.clone(), vec![TimeSeriesValue::new(0, *v)])
                    })
                })
                .collect();
            bucket
        })
        .collect();

    TimeSeriesData {
        query_name: scalar.query_name.clone(),
        aggregations,
    }
}

fn series_to_scalar(name: &str, series: &[TimeSeries]) -> ScalarData {
    let mut columns: Vec<ColumnDescriptor> = series
        .first()
        .map(|s| {
            s.labels
                .iter()
                .map(|l| ColumnDescriptor::group(l.key.clone(), name))
                .collect()
        })
        .unwrap_or_default();
    let group_count = columns.len();
    columns.push(ColumnDescriptor::aggregation("__result", name, 0));

    let data = series
        .iter()
        .map(|s| {
            let mut row: Vec<Value> = columns[..group_count]
                .iter()
                .map(|c| {
                    s.labels
                        .iter()
                        .find(|l| l.key == c.name)
                        .map(|l| l.value.clone())
                        .unwrap_or_default()
                })
                .collect();
            row.push(
                s.values
                    .first()
                    .map(|v| Value::Float(v.value))
                    .unwrap_or_else(|| Value::from(MISSING_CELL)),
            );
            row
        })
        .collect();

    ScalarData {
        query_name: name.to_string(),
        columns,
        data,
    }
}
