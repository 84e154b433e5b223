//! Live and soft-delete write operations (§4.5).
//!
//! `Replace` fully overwrites a row's non-key columns (a cell absent of
//! the sentinel values becomes the coerced value, a `null_string` cell
//! becomes an explicit null). `Update` behaves the same way when every
//! table column was given a concrete value, but switches to an
//! upsert-merge the moment any column is marked `unmodified_string` or
//! simply absent from the CSV header, so that column is left untouched
//! in storage rather than nulled out (§4.5; unlike history's phase 3, a
//! live/soft-delete update row with zero unmodified columns is not an
//! error — it's just a full replace). `Delete` removes the row outright
//! in live mode, or flips `_fivetran_deleted` in soft-delete mode.

use std::collections::HashMap;

use crate::csv_pipeline::Row;
use crate::error::Result;
use crate::pk;
use crate::store::RecordStore;
use crate::types::{column_type_map, LogicalTable, SyncMode, Value};

use super::coerce_row;

fn present_values(coerced: &HashMap<String, Option<Value>>) -> HashMap<String, Value> {
    coerced
        .iter()
        .filter_map(|(k, v)| v.clone().map(|v| (k.clone(), v)))
        .collect()
}

pub async fn apply_replace(store: &dyn RecordStore, table: &LogicalTable, row: Row) -> Result<()> {
    let column_types = column_type_map(table);
    let coerced = coerce_row(row, &column_types)?;
    let id = pk::assemble(table, &present_values(&coerced))?;

    // Primary-key columns are stored as regular fields too (not just as
    // components of the composite record id) so later full-table scans
    // (migration, history backfill) can recover a row's key without
    // knowing how the store renders it. Only the literal column named
    // `id` collides with SurrealDB's own meta field and is skipped.
    let mut data = HashMap::new();
    for (name, value) in coerced {
        if name == "id" {
            continue;
        }
        data.insert(name, value.unwrap_or(Value::Null));
    }
    store.upsert(&table.name, &id, &data).await
}

pub async fn apply_update(store: &dyn RecordStore, table: &LogicalTable, row: Row) -> Result<()> {
    let column_types = column_type_map(table);
    let coerced = coerce_row(row, &column_types)?;
    let id = pk::assemble(table, &present_values(&coerced))?;

    // A column left `Unmodified` (or absent from the header entirely)
    // never reaches `coerced` at all (`coerce_row` skips it), so "every
    // declared column is present" is exactly the condition under which a
    // full replace is equivalent to, and cheaper than, a merge.
    let fully_specified = table
        .columns
        .iter()
        .filter(|c| c.name != "id")
        .all(|c| coerced.contains_key(&c.name));

    let mut data = HashMap::new();
    for (name, value) in coerced {
        if name == "id" {
            continue;
        }
        data.insert(name, value.unwrap_or(Value::Null));
    }

    if fully_specified {
        store.upsert(&table.name, &id, &data).await
    } else {
        store.merge(&table.name, &id, &data).await
    }
}

pub async fn apply_delete(store: &dyn RecordStore, table: &LogicalTable, row: Row) -> Result<()> {
    let column_types = column_type_map(table);
    let coerced = coerce_row(row, &column_types)?;
    let id = pk::assemble(table, &present_values(&coerced))?;

    match table.sync_mode() {
        SyncMode::SoftDelete => {
            let mut data = HashMap::new();
            data.insert("_fivetran_deleted".to_string(), Value::Bool(true));
            store.merge(&table.name, &id, &data).await
        }
        _ => store.delete(&table.name, &id).await,
    }
}
