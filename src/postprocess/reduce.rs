//! Series reduction
//!
//! Scalar metric requests collapse each series to a single point and render
//! the reduced payload as a scalar table (group columns from labels, one
//! aggregation column per bucket).

use crate::query::request::ReduceTo;
use crate::query::result::{
    ColumnDescriptor, QueryResult, ResultValue, ScalarData, TimeSeries, TimeSeriesData,
    TimeSeriesValue,
};
use crate::query::value::Value;

/// Cell written when an aggregation has no value for a row
pub const MISSING_CELL: &str = "n/a";

/// Collapse a series into one point
///
/// The reduced point carries the timestamp of the series' last point. Labels
/// are kept. An empty series and [`ReduceTo::Unknown`] leave the series
/// unchanged.
pub fn reduce_series(series: &TimeSeries, reduce_to: ReduceTo) -> TimeSeries {
    let Some(last) = series.values.last() else {
        return series.clone();
    };
    let last_ts = last.timestamp;
    let finite = || series.values.iter().filter(|v| !v.value.is_nan());

    let value = match reduce_to {
        ReduceTo::Unknown => return series.clone(),
        ReduceTo::Last => last.value,
        ReduceTo::Sum => finite().map(|v| v.value).sum::<f64>(),
        ReduceTo::Count => finite().count() as f64,
        ReduceTo::Avg => {
            let count = finite().count();
            if count == 0 {
                f64::NAN
            } else {
                finite().map(|v| v.value).sum::<f64>() / count as f64
            }
        }
        ReduceTo::Min => finite()
            .map(|v| v.value)
            .min_by(f64::total_cmp)
            .unwrap_or(f64::NAN),
        ReduceTo::Max => finite()
            .map(|v| v.value)
            .max_by(f64::total_cmp)
            .unwrap_or(f64::NAN),
        ReduceTo::Median => {
            let mut sorted: Vec<f64> = finite().map(|v| v.value).collect();
            sorted.sort_by(f64::total_cmp);
            let n = sorted.len();
            if n == 0 {
                f64::NAN
            } else if n % 2 == 1 {
                sorted[n / 2]
            } else {
                (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
            }
        }
    };

    TimeSeries::new(
        series.labels.clone(),
        vec![TimeSeriesValue::new(last_ts, value)],
    )
}

/// Reduce every series of a time-series result and convert it to a scalar table
pub fn apply_metric_reduce_to(result: &mut QueryResult, reduce_to: ReduceTo) {
    let ResultValue::TimeSeries(data) = &mut result.value else {
        return;
    };
    for bucket in &mut data.aggregations {
        for series in &mut bucket.series {
            *series = reduce_series(series, reduce_to);
        }
    }
    let scalar = convert_time_series_to_scalar(data, &data.query_name);
    result.value = ResultValue::Scalar(scalar);
}

/// Render a time-series payload as a scalar table of last values
///
/// Rows follow the series of the first bucket; other buckets contribute the
/// series at the same position, or `"n/a"` when they have none.
pub fn convert_time_series_to_scalar(data: &TimeSeriesData, query_name: &str) -> ScalarData {
    scalar_from_last_values(data, query_name, |last| match last {
        Some(v) => Value::Float(v),
        None => Value::from(MISSING_CELL),
    })
}

/// Scalar table builder shared by reduction and table formatting
pub(crate) fn scalar_from_last_values(
    data: &TimeSeriesData,
    query_name: &str,
    cell: impl Fn(Option<f64>) -> Value,
) -> ScalarData {
    let mut scalar = ScalarData {
        query_name: query_name.to_string(),
        ..Default::default()
    };
    let Some(first) = data.aggregations.first() else {
        return scalar;
    };

    let group_keys: Vec<String> = first
        .series
        .first()
        .map(|s| s.labels.iter().map(|l| l.key.clone()).collect())
        .unwrap_or_default();
    for key in &group_keys {
        scalar
            .columns
            .push(ColumnDescriptor::group(key.clone(), query_name));
    }
    for bucket in &data.aggregations {
        let name = if bucket.alias.is_empty() {
            format!("__result_{}", bucket.index)
        } else {
            bucket.alias.clone()
        };
        let mut column = ColumnDescriptor::aggregation(name, query_name, bucket.index);
        column.unit = bucket.meta.unit.clone();
        scalar.columns.push(column);
    }

    for (idx, series) in first.series.iter().enumerate() {
        let mut row: Vec<Value> = group_keys
            .iter()
            .map(|key| {
                series
                    .labels
                    .iter()
                    .find(|l| &l.key == key)
                    .map(|l| l.value.clone())
                    .unwrap_or_default()
            })
            .collect();
        for bucket in &data.aggregations {
            let last = bucket
                .series
                .get(idx)
                .and_then(|s| s.values.last())
                .map(|v| v.value);
            row.push(cell(last));
        }
        scalar.data.push(row);
    }

    scalar
}
