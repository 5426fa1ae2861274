//! UI table formatting for scalar requests
//!
//! All results of a scalar request are folded into one table:
//!
//! ```text
//!   A: service | __result_0          B: service | __result_0
//!      api     | 10                     api     | 2
//!      web     | 4                      db      | 7
//!
//!   merged: service | A.__result_0 | B.__result_0
//!           api     | 10           | 2
//!           db      | n/a          | 7
//!           web     | 4            | n/a
//! ```
//!
//! Time-series inputs contribute their last value per series, rounded by
//! [`round_to_two_decimal`]. Rows are keyed by their group values; cells a
//! query has no value for hold `"n/a"`. The table is sorted descending by the
//! first aggregation column with `"n/a"` last.

use crate::postprocess::reduce::{scalar_from_last_values, MISSING_CELL};
use crate::postprocess::ResultMap;
use crate::query::result::{ColumnDescriptor, ResultValue, ScalarData};
use crate::query::value::Value;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Round to two decimals, keeping two significant digits for small magnitudes
///
/// Values under `1e-6` in magnitude become zero; values under `0.01` keep
/// enough decimals to show their first two significant digits.
pub fn round_to_two_decimal(value: f64) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let magnitude = value.abs();
    if magnitude < 1e-6 {
        return 0.0;
    }
    let decimals = if magnitude < 0.01 {
        (-magnitude.log10()).ceil() as i32 + 1
    } else {
        2
    };
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

/// Fold every result into one table
///
/// Returns the table together with the name it should be reported under:
/// a single self-joined result keeps its own name, a merged table takes
/// `default_name` (the request's first query).
pub fn format_table(results: &ResultMap, default_name: &str) -> (String, ScalarData) {
    let mut tables: Vec<(String, ScalarData)> = Vec::with_capacity(results.len());
    for (name, result) in results {
        match &result.value {
            ResultValue::TimeSeries(data) => {
                let scalar = scalar_from_last_values(data, name, |last| {
                    Value::Float(last.map(round_to_two_decimal).unwrap_or(0.0))
                });
                tables.push((name.clone(), scalar));
            }
            ResultValue::Scalar(scalar) => tables.push((name.clone(), scalar.clone())),
            _ => debug!(query = %name, "Skipping non-tabular result"),
        }
    }

    if tables.len() == 1 && aggregation_query_count(&tables[0].1) > 1 {
        let (name, scalar) = tables.remove(0);
        debug!(query = %name, rows = scalar.data.len(), "Deduplicating joined scalar rows");
        return (name, deduplicate_rows(&scalar));
    }

    (default_name.to_string(), merge_tables(&tables))
}

fn aggregation_query_count(scalar: &ScalarData) -> usize {
    scalar
        .columns
        .iter()
        .filter(|c| c.is_aggregation() && !c.query_name.is_empty())
        .map(|c| c.query_name.as_str())
        .collect::<BTreeSet<_>>()
        .len()
}

fn is_missing(value: &Value) -> bool {
    value.as_str() == Some(MISSING_CELL)
}

fn cell_key(value: Option<&Value>) -> String {
    match value {
        Some(Value::Null) | None => MISSING_CELL.to_string(),
        Some(v) => v.to_string(),
    }
}

/// Collapse rows sharing group values, letting real values replace `"n/a"`
pub fn deduplicate_rows(scalar: &ScalarData) -> ScalarData {
    let group_indices: Vec<usize> = scalar
        .columns
        .iter()
        .enumerate()
        .filter(|(_, c)| !c.is_aggregation())
        .map(|(i, _)| i)
        .collect();

    let mut order: Vec<String> = Vec::new();
    let mut unique: HashMap<String, Vec<Value>> = HashMap::new();
    for row in &scalar.data {
        let key = group_indices
            .iter()
            .map(|i| cell_key(row.get(*i)))
            .collect::<Vec<_>>()
            .join("|");
        match unique.get_mut(&key) {
            Some(existing) => {
                for (slot, value) in existing.iter_mut().zip(row) {
                    if is_missing(slot) && !is_missing(value) {
                        *slot = value.clone();
                    }
                }
            }
            None => {
                order.push(key.clone());
                unique.insert(key, row.clone());
            }
        }
    }

    let mut data: Vec<Vec<Value>> = order
        .iter()
        .filter_map(|key| unique.remove(key))
        .collect();
    sort_by_first_aggregation(&mut data, &scalar.columns);

    ScalarData {
        query_name: scalar.query_name.clone(),
        columns: scalar.columns.clone(),
        data,
    }
}

/// Merge per-query tables on their group columns
pub fn merge_tables(tables: &[(String, ScalarData)]) -> ScalarData {
    let mut group_columns: Vec<ColumnDescriptor> = Vec::new();
    for (_, scalar) in tables {
        for column in scalar.columns.iter().filter(|c| !c.is_aggregation()) {
            if !group_columns.iter().any(|g| g.name == column.name) {
                group_columns.push(column.clone());
            }
        }
    }

    let mut by_name: Vec<&(String, ScalarData)> = tables.iter().collect();
    by_name.sort_by(|a, b| a.0.cmp(&b.0));

    let mut columns = group_columns.clone();
    for (name, scalar) in &by_name {
        for column in scalar.columns.iter().filter(|c| c.is_aggregation()) {
            let mut column = column.clone();
            column.query_name = name.clone();
            columns.push(column);
        }
    }

    let width = columns.len();
    let group_count = group_columns.len();
    let mut order: Vec<String> = Vec::new();
    let mut rows: HashMap<String, Vec<Value>> = HashMap::new();

    for (name, scalar) in &by_name {
        let group_positions: Vec<Option<usize>> = group_columns
            .iter()
            .map(|g| {
                scalar
                    .columns
                    .iter()
                    .position(|c| !c.is_aggregation() && c.name == g.name)
            })
            .collect();

        for row in &scalar.data {
            let key = group_positions
                .iter()
                .map(|pos| cell_key(pos.and_then(|p| row.get(p))))
                .collect::<Vec<_>>()
                .join("|");

            let merged = rows.entry(key.clone()).or_insert_with(|| {
                order.push(key.clone());
                let mut fresh: Vec<Value> = group_positions
                    .iter()
                    .map(|pos| {
                        pos.and_then(|p| row.get(p))
                            .cloned()
                            .unwrap_or_else(|| Value::from(MISSING_CELL))
                    })
                    .collect();
                fresh.resize(width, Value::from(MISSING_CELL));
                fresh
            });

            for (offset, column) in columns[group_count..].iter().enumerate() {
                if column.query_name != *name {
                    continue;
                }
                let source = scalar.columns.iter().position(|c| {
                    c.is_aggregation() && c.aggregation_index == column.aggregation_index
                });
                if let Some(value) = source.and_then(|i| row.get(i)) {
                    merged[group_count + offset] = value.clone();
                }
            }
        }
    }

    let mut data: Vec<Vec<Value>> = order.iter().filter_map(|key| rows.remove(key)).collect();
    sort_by_first_aggregation(&mut data, &columns);

    ScalarData {
        query_name: String::new(),
        columns,
        data,
    }
}

fn sort_by_first_aggregation(data: &mut [Vec<Value>], columns: &[ColumnDescriptor]) {
    let Some(idx) = columns.iter().position(|c| c.is_aggregation()) else {
        return;
    };
    data.sort_by(|a, b| compare_cells(b.get(idx), a.get(idx)));
}

/// `"n/a"` sorts below everything; non-numeric cells compare equal
fn compare_cells(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let missing = |v: Option<&Value>| v.map_or(true, is_missing);
    match (missing(a), missing(b)) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        _ => {}
    }
    let numeric = |v: Option<&Value>| v.and_then(Value::as_f64).filter(|f| !f.is_nan());
    match (numeric(a), numeric(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}
