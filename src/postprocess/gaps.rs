//! Gap filling for time-series responses
//!
//! Densifies every series onto the step grid covering `[start, end]`. The
//! grid starts at `start` rounded down to a step multiple, the same boundary
//! the backend buckets points on. Positions the
//! backend did not return become zero; partial points are dropped and their
//! positions are zero-filled as well.

use crate::postprocess::functions::{apply_functions, prepare_fill_zero_args};
use crate::postprocess::ResultMap;
use crate::query::request::{Function, FunctionName, QueryRangeRequest};
use crate::query::result::{AggregationBucket, ResultValue, TimeSeries, TimeSeriesValue};
use crate::types::RequestType;
use std::collections::HashMap;

/// Step used when a series has no usable step
pub const DEFAULT_FILL_STEP_MS: i64 = 60_000;

/// Densify one series over `[start_ms, end_ms]` inclusive
///
/// Grid positions are step multiples, so an unaligned `start_ms` begins the
/// grid at the preceding boundary.
pub fn fill_gap_for_series(
    values: &[TimeSeriesValue],
    start_ms: i64,
    end_ms: i64,
    step_ms: i64,
) -> Vec<TimeSeriesValue> {
    let step = if step_ms <= 0 {
        DEFAULT_FILL_STEP_MS
    } else {
        step_ms
    };

    let existing: HashMap<i64, f64> = values
        .iter()
        .filter(|v| !v.partial)
        .map(|v| (v.timestamp, v.value))
        .collect();

    let mut filled = Vec::new();
    let mut ts = start_ms - start_ms.rem_euclid(step);
    while ts <= end_ms {
        let value = existing.get(&ts).copied().unwrap_or(0.0);
        filled.push(TimeSeriesValue::new(ts, value));
        ts += step;
    }
    filled
}

/// Fill gaps of every time-series result of a time-series request
///
/// Results whose query opts out of gap filling are left as is. A result
/// without aggregation buckets gets one placeholder bucket per aggregation
/// the query declares. Every bucket without series gets one empty series,
/// which is then filled.
pub fn fill_gaps(results: &mut ResultMap, req: &QueryRangeRequest) {
    if req.request_type != RequestType::TimeSeries {
        return;
    }

    for (name, result) in results.iter_mut() {
        if req.skip_fill_gaps(name) {
            continue;
        }
        let ResultValue::TimeSeries(data) = &mut result.value else {
            continue;
        };

        if data.aggregations.is_empty() {
            data.aggregations = (0..req.num_aggregations_for(name))
                .map(AggregationBucket::new)
                .collect();
        }
        for bucket in &mut data.aggregations {
            if bucket.series.is_empty() {
                bucket.series.push(TimeSeries::default());
            }
        }

        let functions = prepare_fill_zero_args(
            &[Function::new(FunctionName::FillZero)],
            req.start,
            req.end,
            req.step_for(name),
        );
        apply_functions(result, &functions);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::request::{
        AggregationSpec, BuilderQuerySpec, CompositeQuery, FormatOptions, PromQuerySpec,
        QueryEnvelope,
    };
    use crate::query::result::{QueryResult, TimeSeriesData};
    use crate::types::Step;

    fn request(queries: Vec<QueryEnvelope>) -> QueryRangeRequest {
        QueryRangeRequest {
            start: 0,
            end: 3000,
            request_type: RequestType::TimeSeries,
            composite_query: CompositeQuery { queries },
            format_options: Some(FormatOptions {
                fill_gaps: true,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn builder(name: &str, aggregations: usize) -> QueryEnvelope {
        QueryEnvelope::BuilderQuery(BuilderQuerySpec {
            name: name.to_string(),
            step_interval: Step::from_secs(1),
            aggregations: vec![AggregationSpec::default(); aggregations],
            ..Default::default()
        })
    }

    #[test]
    fn test_fill_gap_for_series() {
        let values = vec![
            TimeSeriesValue::new(1000, 5.0),
            TimeSeriesValue::new(2000, 7.0).partial(),
        ];
        let filled = fill_gap_for_series(&values, 0, 3000, 1000);
        let got: Vec<(i64, f64)> = filled.iter().map(|v| (v.timestamp, v.value)).collect();
        assert_eq!(got, vec![(0, 0.0), (1000, 5.0), (2000, 0.0), (3000, 0.0)]);
    }

    #[test]
    fn test_unaligned_start_keeps_backend_points() {
        let values = vec![
            TimeSeriesValue::new(60_000, 5.0),
            TimeSeriesValue::new(120_000, 7.0),
            TimeSeriesValue::new(180_000, 9.0),
        ];
        let filled = fill_gap_for_series(&values, 30_000, 210_000, 60_000);
        let got: Vec<(i64, f64)> = filled.iter().map(|v| (v.timestamp, v.value)).collect();
        assert_eq!(
            got,
            vec![(0, 0.0), (60_000, 5.0), (120_000, 7.0), (180_000, 9.0)]
        );
    }

    #[test]
    fn test_invalid_step_uses_default() {
        let filled = fill_gap_for_series(&[], 0, 120_000, 0);
        assert_eq!(filled.len(), 3);
    }

    #[test]
    fn test_empty_result_gets_placeholder_buckets() {
        let req = request(vec![builder("A", 2)]);
        let mut results = ResultMap::new();
        results.insert(
            "A".to_string(),
            QueryResult::new(ResultValue::TimeSeries(TimeSeriesData::new("A"))),
        );

        fill_gaps(&mut results, &req);

        let data = results["A"].as_time_series().unwrap();
        assert_eq!(data.aggregations.len(), 2);
        assert_eq!(data.aggregations[1].index, 1);
        assert_eq!(data.aggregations[0].series[0].values.len(), 4);
        assert!(data.aggregations[0].series[0]
            .values
            .iter()
            .all(|v| v.value == 0.0));
    }

    #[test]
    fn test_bucket_without_series_gets_placeholder() {
        let req = request(vec![builder("A", 1)]);
        let mut data = TimeSeriesData::new("A");
        data.aggregations.push(AggregationBucket::new(0));
        let mut results = ResultMap::new();
        results.insert(
            "A".to_string(),
            QueryResult::new(ResultValue::TimeSeries(data)),
        );

        fill_gaps(&mut results, &req);

        let series = &results["A"].as_time_series().unwrap().aggregations[0].series;
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].values.len(), 4);
    }

    #[test]
    fn test_promql_results_are_skipped() {
        let req = request(vec![QueryEnvelope::Promql(PromQuerySpec {
            name: "P".to_string(),
            query: "up".to_string(),
            step: Step::from_secs(1),
            ..Default::default()
        })]);
        let mut results = ResultMap::new();
        results.insert(
            "P".to_string(),
            QueryResult::new(ResultValue::TimeSeries(TimeSeriesData::new("P"))),
        );

        fill_gaps(&mut results, &req);
        assert!(results["P"].as_time_series().unwrap().aggregations.is_empty());
    }

    #[test]
    fn test_scalar_requests_untouched() {
        let mut req = request(vec![builder("A", 1)]);
        req.request_type = RequestType::Scalar;
        let mut results = ResultMap::new();
        results.insert(
            "A".to_string(),
            QueryResult::new(ResultValue::TimeSeries(TimeSeriesData::new("A"))),
        );
        fill_gaps(&mut results, &req);
        assert!(results["A"].as_time_series().unwrap().aggregations.is_empty());
    }
}
