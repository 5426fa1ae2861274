//! Time-series reader
//!
//! Columns are classified per row:
//!
//! - a `DateTime` cell, or a numeric `ts` column, is the timestamp
//! - `__result_<N>` numeric cells are values of aggregation `N`
//! - `__result_<N>` array cells are heatmap buckets `[lower, upper, count]`
//! - the only numeric column, or a legacy value alias, is aggregation 0
//!   when no `__result_<N>` value is present
//! - everything else is a label
//!
//! Points are grouped into series by `(aggregation index, sorted label values)`
//! in first-seen order.

use super::{aggregation_index, ColumnMeta, Rows, LEGACY_VALUE_ALIASES};
use crate::query::error::QueryError;
use crate::query::result::{
    AggregationBucket, HistogramBucket, Label, TimeSeries, TimeSeriesData, TimeSeriesValue,
};
use crate::query::value::Value;
use crate::types::{Step, TimeRange};
use std::collections::{BTreeMap, HashMap};

struct ParsedRow {
    ts: i64,
    label_key: String,
    labels: Vec<Label>,
    agg_values: BTreeMap<usize, f64>,
    agg_buckets: BTreeMap<usize, Vec<(f64, f64)>>,
}

/// Decides whether a point's covering step interval is incomplete
#[derive(Debug, Clone, Copy)]
struct PartialDetector {
    step_ms: u64,
    window: Option<TimeRange>,
}

impl PartialDetector {
    fn is_partial(&self, timestamp: i64) -> bool {
        let Some(window) = self.window else {
            return false;
        };
        if self.step_ms == 0 || timestamp < 0 {
            return false;
        }
        let ts = timestamp as u64;
        let step = Step::from_millis(self.step_ms);

        if ts < step.align_up(window.from) {
            return true;
        }
        if ts + self.step_ms > window.to {
            return !step.is_aligned(window.to);
        }
        false
    }
}

/// Read rows into a `TimeSeriesData`
pub fn read_time_series(
    rows: &mut dyn Rows,
    window: Option<TimeRange>,
    step: Step,
    query_name: &str,
) -> Result<TimeSeriesData, QueryError> {
    let columns: Vec<ColumnMeta> = rows.columns().to_vec();
    let numeric_columns = columns.iter().filter(|c| c.kind.is_numeric()).count();
    let detector = PartialDetector {
        step_ms: step.as_millis(),
        window,
    };

    let mut parsed = Vec::new();
    while let Some(row) = rows.next_row() {
        let row = row?;
        if let Some(p) = parse_row(&columns, row, numeric_columns) {
            parsed.push(p);
        }
    }

    let bounds = heatmap_bounds(&parsed);

    let mut order: Vec<(usize, String)> = Vec::new();
    let mut series_map: HashMap<(usize, String), TimeSeries> = HashMap::new();
    let mut series_for = |agg: usize, row: &ParsedRow| -> (usize, String) {
        let key = (agg, row.label_key.clone());
        if !series_map.contains_key(&key) {
            order.push(key.clone());
            series_map.insert(key.clone(), TimeSeries::new(row.labels.clone(), Vec::new()));
        }
        key
    };

    let mut points: Vec<((usize, String), TimeSeriesValue)> = Vec::new();
    for row in &parsed {
        for (&agg, &val) in &row.agg_values {
            if !val.is_finite() {
                continue;
            }
            let key = series_for(agg, row);
            let mut point = TimeSeriesValue::new(row.ts, val);
            point.partial = detector.is_partial(row.ts);
            points.push((key, point));
        }

        for (&agg, buckets) in &row.agg_buckets {
            let key = series_for(agg, row);
            let Some(bin_bounds) = bounds.get(&agg) else {
                continue;
            };
            if bin_bounds.is_empty() {
                continue;
            }
            let mut point = TimeSeriesValue::new(row.ts, 0.0);
            point.values = bin_counts(bin_bounds, buckets);
            point.bucket = Some(HistogramBucket {
                bounds: bin_bounds.clone(),
            });
            point.partial = detector.is_partial(row.ts);
            points.push((key, point));
        }
    }

    for (key, point) in points {
        if let Some(series) = series_map.get_mut(&key) {
            series.values.push(point);
        }
    }

    let max_agg = order
        .iter()
        .map(|(agg, _)| *agg)
        .chain(bounds.keys().copied())
        .max();

    let Some(max_agg) = max_agg else {
        return Ok(TimeSeriesData::new(query_name));
    };

    let mut aggregations: Vec<AggregationBucket> =
        (0..=max_agg).map(AggregationBucket::new).collect();
    for key in order {
        if let Some(series) = series_map.remove(&key) {
            aggregations[key.0].series.push(series);
        }
    }
    aggregations.retain(|b| !b.series.is_empty());

    Ok(TimeSeriesData {
        query_name: query_name.to_string(),
        aggregations,
    })
}

fn parse_row(columns: &[ColumnMeta], row: Vec<Value>, numeric_columns: usize) -> Option<ParsedRow> {
    let mut ts: i64 = 0;
    let mut label_values: Vec<String> = Vec::new();
    let mut labels: Vec<Label> = Vec::new();
    let mut agg_values = BTreeMap::new();
    let mut agg_buckets = BTreeMap::new();
    let mut fallback: Option<f64> = None;

    for (col, cell) in columns.iter().zip(row) {
        let name = col.name.as_str();
        match cell {
            Value::DateTime(dt) => ts = dt.timestamp_millis(),
            Value::Int(_) | Value::UInt(_) | Value::Float(_) => {
                let val = cell.as_f64().unwrap_or(f64::NAN);
                if name == "ts" {
                    ts = val as i64;
                } else if let Some(idx) = aggregation_index(name) {
                    agg_values.insert(idx, val);
                } else if numeric_columns == 1 || LEGACY_VALUE_ALIASES.contains(&name) {
                    fallback = Some(val);
                } else {
                    label_values.push(cell.to_string());
                    labels.push(Label::new(name, val));
                }
            }
            Value::Null if col.kind.is_numeric() => {}
            Value::Null => {
                label_values.push(String::new());
                labels.push(Label::new(name, ""));
            }
            Value::String(s) => {
                label_values.push(s.clone());
                labels.push(Label::new(name, s));
            }
            Value::Array(items) => {
                if let Some(idx) = aggregation_index(name) {
                    agg_buckets.insert(idx, parse_buckets(&items));
                }
            }
            _ => {}
        }
    }

    if agg_values.is_empty() && agg_buckets.is_empty() {
        if let Some(val) = fallback {
            agg_values.insert(0, val);
        }
    }

    if ts == 0 || (agg_values.is_empty() && agg_buckets.is_empty()) {
        return None;
    }

    label_values.sort();
    Some(ParsedRow {
        ts,
        label_key: label_values.join(","),
        labels,
        agg_values,
        agg_buckets,
    })
}

/// Extract `(upper, count)` pairs from `[lower, upper, count]` triples
fn parse_buckets(items: &[Value]) -> Vec<(f64, f64)> {
    let mut out = Vec::new();
    for item in items {
        let Value::Array(triple) = item else {
            continue;
        };
        if triple.len() < 3 {
            continue;
        }
        let num = |v: &Value| v.as_f64().unwrap_or(f64::NAN);
        let (lower, upper, count) = (num(&triple[0]), num(&triple[1]), num(&triple[2]));
        if lower == upper {
            continue;
        }
        if upper.is_finite() && count.is_finite() {
            out.push((upper, count));
        }
    }
    out
}

/// Sorted union of upper bounds per aggregation
fn heatmap_bounds(rows: &[ParsedRow]) -> BTreeMap<usize, Vec<f64>> {
    let mut bounds: BTreeMap<usize, Vec<f64>> = BTreeMap::new();
    for row in rows {
        for (&agg, buckets) in &row.agg_buckets {
            bounds
                .entry(agg)
                .or_default()
                .extend(buckets.iter().map(|&(upper, _)| upper));
        }
    }
    for list in bounds.values_mut() {
        list.sort_by(|a, b| a.total_cmp(b));
        list.dedup();
    }
    bounds.retain(|_, list| !list.is_empty());
    bounds
}

/// Assign bucket counts to the bins `(bounds[i], bounds[i+1]]`
fn bin_counts(bounds: &[f64], buckets: &[(f64, f64)]) -> Vec<f64> {
    let num_bins = bounds.len().saturating_sub(1);
    let mut counts = vec![0.0; num_bins];
    if num_bins == 0 {
        return counts;
    }
    for &(upper, count) in buckets {
        match (0..num_bins).find(|&i| upper > bounds[i] && upper <= bounds[i + 1]) {
            Some(i) => counts[i] += count,
            None if upper > bounds[num_bins] => counts[num_bins - 1] += count,
            None => {}
        }
    }
    counts
}
