//! Table Definer/Describer (§4.2, §4.4).
//!
//! `define_table` is idempotent create-or-update: it defines the table,
//! skips the literal `id` column (SurrealDB owns record identity), emits
//! one `DEFINE FIELD` per remaining column with its metadata comment, and
//! — for history-mode tables — a `_fivetran_start` index plus a composite
//! index over the primary-key columns. `describe_table` reads those field
//! comments back and reconstructs the logical schema in original
//! declaration order.

use crate::error::{ConnectorError, Result};
use crate::pk::key_column_names;
use crate::store::RecordStore;
use crate::types::{self, LogicalColumn, LogicalTable};

/// Defines (or updates) `table` in storage. Per §4.4: an existing table is
/// never dropped, only reconciled field-by-field — this connector never
/// narrows a column's type, it only adds fields that are missing.
pub async fn define_table(store: &dyn RecordStore, table: &LogicalTable) -> Result<()> {
    store.define_table(&table.name).await?;

    let pk_names = key_column_names(table);
    let history_mode = table.is_history_mode();

    for (index, column) in table.columns.iter().enumerate() {
        if column.name == "id" {
            continue;
        }

        let is_history_key_field =
            column.is_primary_key || (history_mode && column.name == "_fivetran_start");

        let definition = types::emit_field_definition(column, index, is_history_key_field)?;
        store.define_field(&table.name, &definition).await?;
    }

    if history_mode {
        store
            .define_index(
                &table.name,
                &format!("{}__fivetran_start_idx", table.name),
                &["_fivetran_start".to_string()],
                false,
            )
            .await?;
    }

    if !pk_names.is_empty() {
        store
            .define_index(
                &table.name,
                &format!("{}_pkcol", table.name),
                &pk_names,
                !history_mode,
            )
            .await?;
    }

    Ok(())
}

/// Reconstructs the logical table definition stored for `table`, in
/// original declaration (`ft_index`) order. `NotFound` if the table has
/// no fields defined — distinguishing "never created" from "created but
/// empty" isn't possible from field metadata alone, so both collapse to
/// `NotFound` here per §4.2.
pub async fn describe_table(store: &dyn RecordStore, table: &str) -> Result<LogicalTable> {
    let info = store.table_info(table).await?;
    if info.is_empty() {
        return Err(ConnectorError::NotFound(table.to_string()));
    }

    let columns = types::reconstruct_columns(info.fields)?;
    Ok(LogicalTable::new(table, columns))
}

/// Columns not yet present in `existing` but declared on `incoming`,
/// preserving `incoming`'s order — the set `AlterTable` must add (§4.4).
pub fn columns_to_add<'a>(
    existing: &LogicalTable,
    incoming: &'a LogicalTable,
) -> Vec<&'a LogicalColumn> {
    incoming
        .columns
        .iter()
        .filter(|c| !existing.columns.iter().any(|e| e.name == c.name))
        .collect()
}
