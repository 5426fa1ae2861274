//! Distribution reader
//!
//! Each row is one bin: a timestamp, a lower and upper bound, and a count.
//! Bins sharing a timestamp and label set form one `DistributionBucket`.
//!
//! Recognized columns:
//!
//! - timestamp: any `DateTime` cell, or numeric `ts` / `timestamp` (ms)
//! - lower bound: `lower_bound`, `lower`, `bucket_start`
//! - upper bound: `upper_bound`, `upper`, `le`, `bucket_end`
//! - count: `count`, `value`, `__result_0`
//! - anything else textual: label

use super::Rows;
use crate::query::error::QueryError;
use crate::query::result::{DistributionBin, DistributionBucket, DistributionData, Label};
use crate::query::value::Value;
use std::collections::HashMap;

const LOWER: [&str; 3] = ["lower_bound", "lower", "bucket_start"];
const UPPER: [&str; 4] = ["upper_bound", "upper", "le", "bucket_end"];
const COUNT: [&str; 3] = ["count", "value", "__result_0"];

/// Read rows into a `DistributionData`
pub fn read_distribution(
    rows: &mut dyn Rows,
    query_name: &str,
) -> Result<DistributionData, QueryError> {
    let columns = rows.columns().to_vec();
    if !columns.iter().any(|c| UPPER.contains(&c.name.as_str())) {
        return Err(QueryError::validation(format!(
            "distribution query {} has no upper bound column",
            query_name
        )));
    }

    let mut index: HashMap<(i64, String), usize> = HashMap::new();
    let mut buckets: Vec<DistributionBucket> = Vec::new();

    while let Some(row) = rows.next_row() {
        let row = row?;
        let mut ts: Option<i64> = None;
        let mut lower = f64::NEG_INFINITY;
        let mut upper: Option<f64> = None;
        let mut count: Option<f64> = None;
        let mut labels = Vec::new();

        for (col, cell) in columns.iter().zip(row) {
            let name = col.name.as_str();
            match &cell {
                Value::DateTime(dt) => ts = Some(dt.timestamp_millis()),
                _ if name == "ts" || name == "timestamp" => ts = cell.as_f64().map(|v| v as i64),
                _ if LOWER.contains(&name) => {
                    lower = cell.as_f64().unwrap_or(f64::NEG_INFINITY);
                }
                _ if UPPER.contains(&name) => upper = cell.as_f64(),
                _ if COUNT.contains(&name) => count = cell.as_f64(),
                Value::String(_) | Value::Null => labels.push(Label::new(name, cell.clone())),
                _ => {}
            }
        }

        let (Some(ts), Some(upper), Some(count)) = (ts, upper, count) else {
            continue;
        };
        if !count.is_finite() {
            continue;
        }

        let key = (ts, crate::query::result::series_key(&labels));
        let slot = *index.entry(key).or_insert_with(|| {
            buckets.push(DistributionBucket {
                timestamp: ts,
                labels,
                bins: Vec::new(),
            });
            buckets.len() - 1
        });
        buckets[slot].bins.push(DistributionBin {
            lower_bound: lower,
            upper_bound: upper,
            count,
        });
    }

    for bucket in &mut buckets {
        bucket
            .bins
            .sort_by(|a, b| a.upper_bound.total_cmp(&b.upper_bound));
    }
    buckets.sort_by_key(|b| b.timestamp);

    Ok(DistributionData {
        query_name: query_name.to_string(),
        buckets,
    })
}
