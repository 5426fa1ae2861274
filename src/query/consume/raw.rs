//! Raw reader: every column becomes a named cell of the row

use super::{ColumnKind, Rows};
use crate::query::error::QueryError;
use crate::query::result::{RawData, RawRow};
use crate::query::value::Value;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;

/// Columns that carry the row timestamp
const TIMESTAMP_COLUMNS: [&str; 2] = ["timestamp", "timestamp_datetime"];

/// Read rows into a `RawData`
///
/// JSON columns delivered as text are decoded into structured values; text
/// that fails to decode is kept as-is.
pub fn read_raw(rows: &mut dyn Rows, query_name: &str) -> Result<RawData, QueryError> {
    let columns = rows.columns().to_vec();
    let mut out = Vec::new();

    while let Some(row) = rows.next_row() {
        let row = row?;
        let mut raw = RawRow {
            timestamp: None,
            data: BTreeMap::new(),
        };

        for (col, cell) in columns.iter().zip(row) {
            let cell = match (col.kind, cell) {
                (ColumnKind::Json, Value::String(text)) if !text.is_empty() => {
                    match serde_json::from_str::<serde_json::Value>(&text) {
                        Ok(doc) => Value::Json(doc),
                        Err(_) => Value::String(text),
                    }
                }
                (_, cell) => cell,
            };

            if TIMESTAMP_COLUMNS.contains(&col.name.as_str()) {
                raw.timestamp = row_timestamp(&cell);
            }
            raw.data.insert(col.name.clone(), cell);
        }

        out.push(raw);
    }

    Ok(RawData {
        query_name: query_name.to_string(),
        next_cursor: None,
        rows: out,
    })
}

/// Native timestamps pass through; integers are epoch nanoseconds
fn row_timestamp(cell: &Value) -> Option<DateTime<Utc>> {
    match cell {
        Value::DateTime(dt) => Some(*dt),
        Value::UInt(ns) => Some(Utc.timestamp_nanos(*ns as i64)),
        Value::Int(ns) => Some(Utc.timestamp_nanos(*ns)),
        _ => None,
    }
}
