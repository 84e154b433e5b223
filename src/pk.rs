//! Composite Record ID / PK Assembler (§4.3).
//!
//! Builds the ordered primary-key value tuple that becomes a SurrealDB
//! composite record ID (`table:[pk1, pk2, ...]`) from a row's values. Order
//! follows the logical table's column declaration order; it is never
//! sorted, since the record ID's array is positional and a stored row's
//! key must always reassemble to the same array.

use std::collections::HashMap;

use crate::error::{ConnectorError, Result};
use crate::types::{LogicalTable, Value};

/// Extracts the ordered primary-key tuple for one row.
///
/// `row` maps column name to its already-coerced [`Value`]. Every
/// primary-key column declared on `table` must be present in `row`;
/// missing a PK column is a schema error, not a silent skip, since a
/// partial key would silently corrupt the record ID.
pub fn assemble(table: &LogicalTable, row: &HashMap<String, Value>) -> Result<Vec<Value>> {
    table
        .primary_key_columns()
        .into_iter()
        .map(|column| {
            row.get(&column.name)
                .cloned()
                .ok_or_else(|| ConnectorError::ColumnMissingFromRow(column.name.clone()))
        })
        .collect()
}

/// Returns the primary-key column names, in declaration order, without
/// requiring a row — used to build `_gte`/`_lt` range filters and the
/// composite PK index definition (§4.4, §4.7).
pub fn key_column_names(table: &LogicalTable) -> Vec<String> {
    table
        .primary_key_columns()
        .into_iter()
        .map(|c| c.name.clone())
        .collect()
}
