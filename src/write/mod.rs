//! Write-path modules: live/soft-delete replace-update-delete (§4.5), the
//! history range-query workaround (§4.7), and the history writer's
//! four-phase batch application (§4.6).

pub mod history;
pub mod live;
pub mod range_query;

use std::collections::HashMap;

use crate::csv_pipeline::Cell;
use crate::error::{ConnectorError, Result};
use crate::types::{coerce, ColumnTypeMap, Value};

/// Coerces an entire CSV row into typed values, skipping cells whose
/// column isn't part of the logical schema (extra CSV columns the batch
/// includes but the table doesn't declare are ignored rather than
/// rejected, matching the teacher's lenient decode-unknown-column
/// handling in its WAL decoder).
pub fn coerce_row(
    row: Vec<(String, Cell)>,
    column_types: &ColumnTypeMap,
) -> Result<HashMap<String, Option<Value>>> {
    let mut out = HashMap::with_capacity(row.len());
    for (name, cell) in row {
        let Some((logical_type, decimal)) = column_types.get(&name) else {
            continue;
        };
        let value = match cell {
            Cell::Null => None,
            Cell::Unmodified => continue,
            Cell::Value(raw) => Some(coerce(&raw, *logical_type, *decimal)?),
        };
        out.insert(name, value);
    }
    Ok(out)
}

/// Returns the set of column names present in `row` as an explicit
/// `Unmodified` sentinel, used by the update-row-fully-modified check and
/// by history's back-fill step.
pub fn unmodified_columns(row: &[(String, Cell)]) -> Vec<String> {
    row.iter()
        .filter(|(_, cell)| matches!(cell, Cell::Unmodified))
        .map(|(name, _)| name.clone())
        .collect()
}

pub(crate) fn require_non_empty_unmodified(row: &[(String, Cell)], pk_names: &[String]) -> Result<()> {
    let non_pk_unmodified = unmodified_columns(row)
        .into_iter()
        .filter(|c| !pk_names.contains(c))
        .count();
    if non_pk_unmodified == 0 {
        let columns: Vec<String> = row.iter().map(|(n, _)| n.clone()).collect();
        return Err(ConnectorError::UpdateRowFullyModified(columns));
    }
    Ok(())
}
