//! Integration tests for the post-processing pipeline
//!
//! Feeds hand-built results through `PostProcessor::process` the way the
//! querier does after execution.

use kuba_querier::postprocess::{PostProcessor, ResultMap};
use kuba_querier::query::{
    AggregationBucket, AggregationSpec, BuilderQuerySpec, CompositeQuery, FormatOptions,
    FormulaSpec, Function, FunctionName, Label, QueryEnvelope, QueryRangeRequest, QueryResult,
    ReduceTo, ResultValue, Signal, TimeSeries, TimeSeriesData, TimeSeriesValue, Value,
};
use kuba_querier::{RequestType, Step};

/// Helper to build a single-label series
fn service(name: &str, points: &[(i64, f64)]) -> TimeSeries {
    TimeSeries::new(
        vec![Label::new("service", name)],
        points
            .iter()
            .map(|&(ts, v)| TimeSeriesValue::new(ts, v))
            .collect(),
    )
}

fn ts_result(name: &str, series: Vec<TimeSeries>) -> QueryResult {
    let mut bucket = AggregationBucket::new(0);
    bucket.series = series;
    QueryResult::new(ResultValue::TimeSeries(TimeSeriesData {
        query_name: name.to_string(),
        aggregations: vec![bucket],
    }))
}

fn metric_query(name: &str, reduce_to: ReduceTo) -> BuilderQuerySpec {
    BuilderQuerySpec {
        name: name.to_string(),
        signal: Signal::Metrics,
        step_interval: Step::from_secs(1),
        aggregations: vec![AggregationSpec {
            metric_name: "latency".to_string(),
            time_aggregation: "avg".to_string(),
            space_aggregation: "avg".to_string(),
            reduce_to,
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn formula(name: &str, expression: &str) -> QueryEnvelope {
    QueryEnvelope::BuilderFormula(FormulaSpec {
        name: name.to_string(),
        expression: expression.to_string(),
        ..Default::default()
    })
}

fn request(
    kind: RequestType,
    queries: Vec<QueryEnvelope>,
    format: FormatOptions,
) -> QueryRangeRequest {
    QueryRangeRequest {
        start: 0,
        end: 3000,
        request_type: kind,
        composite_query: CompositeQuery { queries },
        format_options: Some(format),
        no_cache: false,
    }
}

// ============================================================================
// Integration Tests
// ============================================================================

/// Functions, limit and gap filling compose on a time-series request
#[test]
fn test_time_series_pipeline() {
    let mut spec = metric_query("A", ReduceTo::Unknown);
    spec.functions = vec![
        Function::new(FunctionName::ClampMax).with_arg(5.0),
        Function::new(FunctionName::CumulativeSum),
    ];
    spec.limit = 1;
    let req = request(
        RequestType::TimeSeries,
        vec![QueryEnvelope::BuilderQuery(spec)],
        FormatOptions {
            fill_gaps: true,
            format_table_result_for_ui: false,
        },
    );

    let mut results = ResultMap::new();
    results.insert(
        "A".to_string(),
        ts_result(
            "A",
            vec![
                service("web", &[(1000, 1.0), (2000, 1.0)]),
                service("api", &[(1000, 10.0), (2000, 10.0)]),
            ],
        ),
    );

    let out = PostProcessor::new().process(results, &req);

    let series = &out["A"].as_time_series().unwrap().aggregations[0].series;
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].labels[0].value.to_string(), "api");
    let values: Vec<(i64, f64)> = series[0]
        .values
        .iter()
        .map(|v| (v.timestamp, v.value))
        .collect();
    assert_eq!(values, vec![(0, 0.0), (1000, 5.0), (2000, 10.0), (3000, 0.0)]);
}

/// Reduced metric queries feed scalar formulas and merge into one table
#[test]
fn test_scalar_pipeline_with_formula_table() {
    let req = request(
        RequestType::Scalar,
        vec![
            QueryEnvelope::BuilderQuery(metric_query("A", ReduceTo::Avg)),
            formula("F1", "A * 2"),
        ],
        FormatOptions {
            fill_gaps: false,
            format_table_result_for_ui: true,
        },
    );

    let mut results = ResultMap::new();
    results.insert(
        "A".to_string(),
        ts_result(
            "A",
            vec![
                service("api", &[(1000, 2.0), (2000, 4.0)]),
                service("web", &[(1000, 1.0), (2000, 1.0)]),
            ],
        ),
    );

    let out = PostProcessor::new().process(results, &req);

    assert_eq!(out.keys().collect::<Vec<_>>(), vec!["A"]);
    let table = out["A"].as_scalar().unwrap();
    assert_eq!(table.columns.len(), 3);

    let api = table
        .data
        .iter()
        .find(|row| row[0] == Value::from("api"))
        .expect("api row");
    assert_eq!(api[1..], [Value::Float(3.0), Value::Float(6.0)]);

    let web = table
        .data
        .iter()
        .find(|row| row[0] == Value::from("web"))
        .expect("web row");
    assert_eq!(web[1..], [Value::Float(1.0), Value::Float(2.0)]);
}

/// A formula over an unknown query is dropped without affecting the rest
#[test]
fn test_formula_with_unknown_reference_is_skipped() {
    let req = request(
        RequestType::TimeSeries,
        vec![
            QueryEnvelope::BuilderQuery(metric_query("A", ReduceTo::Unknown)),
            formula("F1", "A + Z"),
            formula("F2", "A / 2"),
        ],
        FormatOptions::default(),
    );

    let mut results = ResultMap::new();
    results.insert(
        "A".to_string(),
        ts_result("A", vec![service("api", &[(1000, 8.0)])]),
    );

    let out = PostProcessor::new().process(results, &req);

    assert_eq!(out.keys().collect::<Vec<_>>(), vec!["A", "F2"]);
    let f2 = &out["F2"].as_time_series().unwrap().aggregations[0].series[0];
    assert_eq!(f2.values[0].value, 4.0);
}

/// Formulas can reference formulas declared before them
#[test]
fn test_formula_chain_in_request_order() {
    let req = request(
        RequestType::TimeSeries,
        vec![
            QueryEnvelope::BuilderQuery(metric_query("A", ReduceTo::Unknown)),
            formula("F1", "A * 3"),
            formula("F2", "F1 + 1"),
        ],
        FormatOptions::default(),
    );

    let mut results = ResultMap::new();
    results.insert(
        "A".to_string(),
        ts_result("A", vec![service("api", &[(1000, 2.0), (2000, 3.0)])]),
    );

    let out = PostProcessor::new().process(results, &req);

    let f2: Vec<f64> = out["F2"].as_time_series().unwrap().aggregations[0].series[0]
        .values
        .iter()
        .map(|v| v.value)
        .collect();
    assert_eq!(f2, vec![7.0, 10.0]);
}

/// Gap filling keeps backend points when the request start is off the step grid
#[test]
fn test_fill_gaps_with_unaligned_start() {
    let mut spec = metric_query("A", ReduceTo::Unknown);
    spec.functions = vec![Function::new(FunctionName::FillZero)];
    let mut req = request(
        RequestType::TimeSeries,
        vec![QueryEnvelope::BuilderQuery(spec)],
        FormatOptions {
            fill_gaps: true,
            format_table_result_for_ui: false,
        },
    );
    req.start = 1500;
    req.end = 4200;

    let mut results = ResultMap::new();
    results.insert(
        "A".to_string(),
        ts_result("A", vec![service("api", &[(2000, 2.0), (4000, 4.0)])]),
    );

    let out = PostProcessor::new().process(results, &req);

    let values: Vec<(i64, f64)> = out["A"].as_time_series().unwrap().aggregations[0].series[0]
        .values
        .iter()
        .map(|v| (v.timestamp, v.value))
        .collect();
    assert_eq!(
        values,
        vec![(1000, 0.0), (2000, 2.0), (3000, 0.0), (4000, 4.0)]
    );
}
