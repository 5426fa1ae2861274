//! Scalar reader: group columns plus `__result_<N>` aggregation columns

use super::{aggregation_index, Rows};
use crate::query::error::QueryError;
use crate::query::result::{ColumnDescriptor, ScalarData};

/// Read rows into a `ScalarData`
///
/// Cells are passed through unchanged; NULL cells stay `Value::Null`.
pub fn read_scalar(rows: &mut dyn Rows, query_name: &str) -> Result<ScalarData, QueryError> {
    let mut agg_index = 0;
    let columns: Vec<ColumnDescriptor> = rows
        .columns()
        .iter()
        .map(|col| {
            if aggregation_index(&col.name).is_some() {
                let desc = ColumnDescriptor::aggregation(&col.name, query_name, agg_index);
                agg_index += 1;
                desc
            } else {
                ColumnDescriptor::group(&col.name, query_name)
            }
        })
        .collect();

    let mut data = Vec::new();
    while let Some(row) = rows.next_row() {
        let mut row = row?;
        row.resize(columns.len(), Default::default());
        data.push(row);
    }

    Ok(ScalarData {
        query_name: query_name.to_string(),
        columns,
        data,
    })
}
