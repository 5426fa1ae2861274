//! Per-series function chain
//!
//! Functions run in request order over every series of every aggregation
//! bucket of a time-series result. Other result shapes pass through.
//!
//! | Function        | Effect                                              |
//! |-----------------|-----------------------------------------------------|
//! | cutOffMin/Max   | Values below/above the threshold become NaN         |
//! | clampMin/Max    | Values raised/lowered to the threshold              |
//! | absolute        | Absolute value                                      |
//! | runningDiff     | Difference to the previous point, first point gone  |
//! | log2 / log10    | Logarithms                                          |
//! | cumulativeSum   | Running total, NaN contributes nothing              |
//! | ewma3/5/7       | Exponential moving average                          |
//! | median3/5/7     | Centered moving median, edges unchanged             |
//! | timeShift       | Timestamps moved forward by N seconds               |
//! | fillZero        | Dense `[start, end]` grid, absent points are zero   |
//! | anomaly         | Pass-through                                        |

use crate::postprocess::gaps::fill_gap_for_series;
use crate::query::request::{Function, FunctionArg, FunctionName};
use crate::query::result::{QueryResult, ResultValue, TimeSeries, TimeSeriesData};
use tracing::debug;

/// Apply a function chain to a result
pub fn apply_functions(result: &mut QueryResult, functions: &[Function]) {
    if functions.is_empty() {
        return;
    }
    if let ResultValue::TimeSeries(data) = &mut result.value {
        for function in functions {
            apply_function(data, function);
        }
    }
}

/// Apply one function to every series of a payload
pub fn apply_function(data: &mut TimeSeriesData, function: &Function) {
    for bucket in &mut data.aggregations {
        for series in &mut bucket.series {
            apply_to_series(series, function);
        }
    }
}

/// Give argument-less `fillZero` functions the request window and a step
pub fn prepare_fill_zero_args(
    functions: &[Function],
    start_ms: u64,
    end_ms: u64,
    step_ms: i64,
) -> Vec<Function> {
    functions
        .iter()
        .map(|f| {
            if f.name == FunctionName::FillZero && f.args.is_empty() {
                let mut f = f.clone();
                f.args = vec![
                    FunctionArg::number(start_ms as f64),
                    FunctionArg::number(end_ms as f64),
                    FunctionArg::number(step_ms as f64),
                ];
                f
            } else {
                f.clone()
            }
        })
        .collect()
}

fn apply_to_series(series: &mut TimeSeries, function: &Function) {
    match function.name {
        FunctionName::CutOffMin => with_threshold(series, function, |v, t| {
            if v < t {
                f64::NAN
            } else {
                v
            }
        }),
        FunctionName::CutOffMax => with_threshold(series, function, |v, t| {
            if v > t {
                f64::NAN
            } else {
                v
            }
        }),
        FunctionName::ClampMin => {
            with_threshold(series, function, |v, t| if v < t { t } else { v })
        }
        FunctionName::ClampMax => {
            with_threshold(series, function, |v, t| if v > t { t } else { v })
        }
        FunctionName::Absolute => map_values(series, f64::abs),
        FunctionName::Log2 => map_values(series, f64::log2),
        FunctionName::Log10 => map_values(series, f64::log10),
        FunctionName::RunningDiff => running_diff(series),
        FunctionName::CumulativeSum => cumulative_sum(series),
        FunctionName::Ewma3 => ewma(series, function, 3),
        FunctionName::Ewma5 => ewma(series, function, 5),
        FunctionName::Ewma7 => ewma(series, function, 7),
        FunctionName::Median3 => moving_median(series, 3),
        FunctionName::Median5 => moving_median(series, 5),
        FunctionName::Median7 => moving_median(series, 7),
        FunctionName::TimeShift => time_shift(series, function),
        FunctionName::FillZero => fill_zero(series, function),
        FunctionName::Anomaly => {}
    }
}

fn map_values(series: &mut TimeSeries, f: impl Fn(f64) -> f64) {
    for point in &mut series.values {
        point.value = f(point.value);
    }
}

fn with_threshold(series: &mut TimeSeries, function: &Function, f: impl Fn(f64, f64) -> f64) {
    match function.arg(0) {
        Some(threshold) => map_values(series, |v| f(v, threshold)),
        None => debug!(function = ?function.name, "Missing numeric threshold, skipping"),
    }
}

fn running_diff(series: &mut TimeSeries) {
    if series.values.is_empty() {
        return;
    }
    let mut prev = series.values[0].value;
    let mut diffed = Vec::with_capacity(series.values.len().saturating_sub(1));
    for point in series.values.iter().skip(1) {
        let mut point = point.clone();
        let current = point.value;
        point.value = current - prev;
        prev = current;
        diffed.push(point);
    }
    series.values = diffed;
}

fn cumulative_sum(series: &mut TimeSeries) {
    let mut total = 0.0;
    for point in &mut series.values {
        if !point.value.is_nan() {
            total += point.value;
        }
        point.value = total;
    }
}

fn ewma(series: &mut TimeSeries, function: &Function, window: usize) {
    let alpha = function
        .arg(0)
        .filter(|a| *a > 0.0 && *a <= 1.0)
        .unwrap_or(2.0 / (window as f64 + 1.0));

    let mut state: Option<f64> = None;
    for point in &mut series.values {
        let next = match (state, point.value.is_nan()) {
            (None, true) => None,
            (None, false) => Some(point.value),
            (Some(prev), true) => Some(prev),
            (Some(prev), false) => Some(prev * (1.0 - alpha) + alpha * point.value),
        };
        state = next;
        if let Some(v) = state {
            point.value = v;
        }
    }
}

fn moving_median(series: &mut TimeSeries, window: usize) {
    let half = window / 2;
    let n = series.values.len();
    if n < window {
        return;
    }

    let original: Vec<f64> = series.values.iter().map(|p| p.value).collect();
    let mut scratch = Vec::with_capacity(window);
    for i in half..n - half {
        scratch.clear();
        scratch.extend(
            original[i - half..=i + half]
                .iter()
                .copied()
                .filter(|v| !v.is_nan()),
        );
        series.values[i].value = median(&mut scratch);
    }
}

/// Median of a slice, NaN when empty; sorts in place
pub(crate) fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

fn time_shift(series: &mut TimeSeries, function: &Function) {
    let Some(shift) = function.arg(0) else {
        return;
    };
    let shift_ms = (shift * 1000.0) as i64;
    for point in &mut series.values {
        point.timestamp += shift_ms;
    }
}

fn fill_zero(series: &mut TimeSeries, function: &Function) {
    let (Some(start), Some(end)) = (function.arg(0), function.arg(1)) else {
        debug!("fillZero without a window, skipping");
        return;
    };
    let step = function.arg(2).unwrap_or(0.0);
    series.values = fill_gap_for_series(&series.values, start as i64, end as i64, step as i64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::result::{AggregationBucket, TimeSeriesValue};

    fn series(values: &[f64]) -> TimeSeries {
        TimeSeries::new(
            vec![],
            values
                .iter()
                .enumerate()
                .map(|(i, v)| TimeSeriesValue::new(i as i64 * 1000, *v))
                .collect(),
        )
    }

    fn run(values: &[f64], functions: &[Function]) -> Vec<f64> {
        let mut bucket = AggregationBucket::new(0);
        bucket.series.push(series(values));
        let mut result = QueryResult::new(ResultValue::TimeSeries(TimeSeriesData {
            query_name: "A".to_string(),
            aggregations: vec![bucket],
        }));
        apply_functions(&mut result, functions);
        result.as_time_series().unwrap().aggregations[0].series[0]
            .values
            .iter()
            .map(|p| p.value)
            .collect()
    }

    fn assert_close(got: &[f64], want: &[f64]) {
        assert_eq!(got.len(), want.len(), "got {:?}, want {:?}", got, want);
        for (g, w) in got.iter().zip(want) {
            if w.is_nan() {
                assert!(g.is_nan(), "got {:?}, want {:?}", got, want);
            } else {
                assert!((g - w).abs() < 1e-9, "got {:?}, want {:?}", got, want);
            }
        }
    }

    #[test]
    fn test_cut_off_min() {
        let got = run(
            &[0.5, 0.4, 0.3, 0.2, 0.1],
            &[Function::new(FunctionName::CutOffMin).with_arg(0.3)],
        );
        assert_close(&got, &[0.5, 0.4, 0.3, f64::NAN, f64::NAN]);
    }

    #[test]
    fn test_cut_off_max() {
        let got = run(
            &[0.5, 0.4, 0.3, 0.2, 0.1],
            &[Function::new(FunctionName::CutOffMax).with_arg(0.3)],
        );
        assert_close(&got, &[f64::NAN, f64::NAN, 0.3, 0.2, 0.1]);
    }

    #[test]
    fn test_clamp() {
        let got = run(
            &[0.5, 0.4, 0.3, 0.2, 0.1],
            &[Function::new(FunctionName::ClampMin).with_arg(0.3)],
        );
        assert_close(&got, &[0.5, 0.4, 0.3, 0.3, 0.3]);
        let got = run(
            &[0.5, 0.4, 0.3, 0.2, 0.1],
            &[Function::new(FunctionName::ClampMax).with_arg(0.3)],
        );
        assert_close(&got, &[0.3, 0.3, 0.3, 0.2, 0.1]);
    }

    #[test]
    fn test_missing_threshold_is_noop() {
        let got = run(&[1.0, 2.0], &[Function::new(FunctionName::ClampMin)]);
        assert_close(&got, &[1.0, 2.0]);
    }

    #[test]
    fn test_running_diff_drops_first_point() {
        let got = run(&[1.0, 2.0, 3.0], &[Function::new(FunctionName::RunningDiff)]);
        assert_close(&got, &[1.0, 1.0]);
        let got = run(&[8.0, 8.0, 8.0], &[Function::new(FunctionName::RunningDiff)]);
        assert_close(&got, &[0.0, 0.0]);
    }

    #[test]
    fn test_logs_and_absolute() {
        let got = run(&[1.0, 2.0, 4.0, 8.0, 16.0], &[Function::new(FunctionName::Log2)]);
        assert_close(&got, &[0.0, 1.0, 2.0, 3.0, 4.0]);
        let got = run(&[1.0, 10.0, 100.0, 1000.0], &[Function::new(FunctionName::Log10)]);
        assert_close(&got, &[0.0, 1.0, 2.0, 3.0]);
        let got = run(&[-1.5, 2.0], &[Function::new(FunctionName::Absolute)]);
        assert_close(&got, &[1.5, 2.0]);
    }

    #[test]
    fn test_cumulative_sum_ignores_nan() {
        let got = run(
            &[1.0, 2.0, 3.0, 4.0, 5.0],
            &[Function::new(FunctionName::CumulativeSum)],
        );
        assert_close(&got, &[1.0, 3.0, 6.0, 10.0, 15.0]);
        let got = run(
            &[1.0, f64::NAN, 3.0, 4.0, 5.0],
            &[Function::new(FunctionName::CumulativeSum)],
        );
        assert_close(&got, &[1.0, 1.0, 4.0, 8.0, 13.0]);
    }

    #[test]
    fn test_median3_with_nan() {
        let got = run(
            &[f64::NAN, 3.0, f64::NAN, 7.0, 9.0],
            &[Function::new(FunctionName::Median3)],
        );
        assert_close(&got, &[f64::NAN, 3.0, 5.0, 8.0, 9.0]);
    }

    #[test]
    fn test_median5() {
        let got = run(
            &[5.0, 3.0, 8.0, 2.0, 7.0, 9.0, 1.0, 4.0, 6.0, 10.0],
            &[Function::new(FunctionName::Median5)],
        );
        assert_close(&got, &[5.0, 3.0, 5.0, 7.0, 7.0, 4.0, 6.0, 6.0, 6.0, 10.0]);
    }

    #[test]
    fn test_ewma_default_alpha() {
        // alpha = 2 / (3 + 1) = 0.5
        let got = run(&[2.0, 4.0, f64::NAN, 8.0], &[Function::new(FunctionName::Ewma3)]);
        assert_close(&got, &[2.0, 3.0, 3.0, 5.5]);
    }

    #[test]
    fn test_ewma_explicit_alpha() {
        let got = run(&[10.0, 20.0], &[Function::new(FunctionName::Ewma5).with_arg(0.1)]);
        assert_close(&got, &[10.0, 11.0]);
    }

    #[test]
    fn test_time_shift_moves_timestamps() {
        let mut data = TimeSeriesData::new("A");
        let mut bucket = AggregationBucket::new(0);
        bucket.series.push(series(&[1.0, 2.0, 3.0]));
        data.aggregations.push(bucket);
        apply_function(&mut data, &Function::new(FunctionName::TimeShift).with_arg(5.0));
        let ts: Vec<i64> = data.aggregations[0].series[0]
            .values
            .iter()
            .map(|p| p.timestamp)
            .collect();
        assert_eq!(ts, vec![5000, 6000, 7000]);
    }

    #[test]
    fn test_chained_functions() {
        let got = run(
            &[0.5, 0.2, 0.1, 0.4, 0.3],
            &[
                Function::new(FunctionName::CutOffMin).with_arg(0.3),
                Function::new(FunctionName::CumulativeSum),
            ],
        );
        assert_close(&got, &[0.5, 0.5, 0.5, 0.9, 1.2]);
    }

    #[test]
    fn test_fill_zero_with_prepared_args() {
        let functions = prepare_fill_zero_args(
            &[Function::new(FunctionName::FillZero)],
            0,
            4000,
            1000,
        );
        assert_eq!(functions[0].arg(0), Some(0.0));
        assert_eq!(functions[0].arg(2), Some(1000.0));

        let mut data = TimeSeriesData::new("A");
        let mut bucket = AggregationBucket::new(0);
        bucket.series.push(TimeSeries::new(
            vec![],
            vec![TimeSeriesValue::new(1000, 3.0), TimeSeriesValue::new(3000, 4.0)],
        ));
        data.aggregations.push(bucket);
        apply_function(&mut data, &functions[0]);
        let values: Vec<(i64, f64)> = data.aggregations[0].series[0]
            .values
            .iter()
            .map(|p| (p.timestamp, p.value))
            .collect();
        assert_eq!(
            values,
            vec![(0, 0.0), (1000, 3.0), (2000, 0.0), (3000, 4.0), (4000, 0.0)]
        );
    }

    #[test]
    fn test_prepare_keeps_explicit_args() {
        let explicit = Function::new(FunctionName::FillZero)
            .with_arg(1.0)
            .with_arg(2.0)
            .with_arg(1.0);
        let prepared = prepare_fill_zero_args(&[explicit.clone()], 0, 10, 5);
        assert_eq!(prepared[0], explicit);
    }

    #[test]
    fn test_non_time_series_untouched() {
        let mut result = QueryResult::new(ResultValue::Scalar(Default::default()));
        let before = result.clone();
        apply_functions(&mut result, &[Function::new(FunctionName::Absolute)]);
        assert_eq!(result, before);
    }
}
