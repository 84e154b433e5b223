//! `Truncate` RPC data operation (§6, SPEC_FULL §SUPPLEMENT-2): deletes or
//! closes every record synced before a cutoff, with per-sync-mode
//! semantics. Unlike the migration dispatcher this is a data operation, not
//! a schema change, and every sync mode is fully implemented.
//!
//! Grounded in the same scan-and-filter shape [`crate::migration`] uses for
//! its full-table operations — there is no per-PK range query involved,
//! since the cutoff applies uniformly across the whole table rather than to
//! one logical primary key.

use chrono::{DateTime, Utc};

use crate::error::{ConnectorError, Result};
use crate::pk;
use crate::store::RecordStore;
use crate::types::{column_type_map, LogicalTable, SyncMode, Value};

/// Applies a truncate-before-cutoff to every row of `table` currently
/// visible through `synced_column`. `soft` only affects soft-delete mode;
/// it is ignored in live and history mode (history always closes rather
/// than deletes, live always deletes).
pub async fn apply(
    store: &dyn RecordStore,
    table: &LogicalTable,
    synced_column: &str,
    cutoff: DateTime<Utc>,
    soft: bool,
) -> Result<()> {
    let column_types = column_type_map(table);
    let pk_names = pk::key_column_names(table);
    let rows = store.scan_all(&table.name, &column_types, &pk_names).await?;

    for row in rows {
        let Some(synced_at) = row.get(synced_column) else {
            return Err(ConnectorError::ColumnMissingFromTable(synced_column.to_string()));
        };
        let Value::DateTime(synced_at) = synced_at else {
            return Err(ConnectorError::ColumnMissingFromTable(synced_column.to_string()));
        };
        if *synced_at >= cutoff {
            continue;
        }

        match table.sync_mode() {
            SyncMode::History => close_if_open(store, table, &row, cutoff).await?,
            SyncMode::SoftDelete if soft => {
                let pk_values = pk::assemble(table, &row)?;
                let mut patch = std::collections::HashMap::new();
                patch.insert("_fivetran_deleted".to_string(), Value::Bool(true));
                store.merge(&table.name, &pk_values, &patch).await?;
            }
            _ => {
                let pk_values = pk::assemble(table, &row)?;
                store.delete(&table.name, &pk_values).await?;
            }
        }
    }

    Ok(())
}

async fn close_if_open(
    store: &dyn RecordStore,
    table: &LogicalTable,
    row: &std::collections::HashMap<String, Value>,
    cutoff: DateTime<Utc>,
) -> Result<()> {
    if !matches!(row.get("_fivetran_active"), Some(Value::Bool(true))) {
        return Ok(());
    }
    let Some(Value::DateTime(start)) = row.get("_fivetran_start") else {
        return Err(ConnectorError::ColumnMissingFromTable("_fivetran_start".to_string()));
    };
    if *start >= cutoff {
        return Ok(());
    }

    let pk_values = pk::assemble(table, row)?;
    let mut history_key = pk_values;
    history_key.push(Value::DateTime(*start));

    let mut patch = std::collections::HashMap::new();
    patch.insert("_fivetran_active".to_string(), Value::Bool(false));
    patch.insert(
        "_fivetran_end".to_string(),
        Value::DateTime(cutoff - chrono::Duration::milliseconds(1)),
    );
    store.merge(&table.name, &history_key, &patch).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::mock::MockStore;
    use crate::types::{LogicalColumn, LogicalType};
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn ts(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).unwrap()
    }

    #[tokio::test]
    async fn test_live_mode_deletes_rows_synced_before_cutoff() {
        let store = MockStore::new();
        let table = LogicalTable::new(
            "events",
            vec![
                LogicalColumn::new("id", LogicalType::Int).primary_key(),
                LogicalColumn::new("_fivetran_synced", LogicalType::UtcDateTime),
            ],
        );
        let mut row1 = HashMap::new();
        row1.insert("_fivetran_synced".to_string(), Value::DateTime(ts(100)));
        store.upsert("events", &[Value::Int(1)], &row1).await.unwrap();
        let mut row2 = HashMap::new();
        row2.insert("_fivetran_synced".to_string(), Value::DateTime(ts(300)));
        store.upsert("events", &[Value::Int(2)], &row2).await.unwrap();

        apply(&store, &table, "_fivetran_synced", ts(200), false).await.unwrap();
        assert_eq!(store.row_count("events"), 1);
    }

    #[tokio::test]
    async fn test_soft_delete_mode_marks_deleted_when_soft() {
        let store = MockStore::new();
        let table = LogicalTable::new(
            "events",
            vec![
                LogicalColumn::new("id", LogicalType::Int).primary_key(),
                LogicalColumn::new("_fivetran_synced", LogicalType::UtcDateTime),
                LogicalColumn::new("_fivetran_deleted", LogicalType::Bool),
            ],
        );
        let mut row = HashMap::new();
        row.insert("_fivetran_synced".to_string(), Value::DateTime(ts(100)));
        store.upsert("events", &[Value::Int(1)], &row).await.unwrap();

        apply(&store, &table, "_fivetran_synced", ts(200), true).await.unwrap();

        let column_types = column_type_map(&table);
        let pk_names = pk::key_column_names(&table);
        let stored = store
            .select_one("events", &[Value::Int(1)], &column_types, &pk_names)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.get("_fivetran_deleted"), Some(&Value::Bool(true)));
        assert_eq!(store.row_count("events"), 1);
    }

    #[tokio::test]
    async fn test_history_mode_closes_open_versions_before_cutoff() {
        let store = MockStore::new();
        let table = LogicalTable::new(
            "events",
            vec![
                LogicalColumn::new("event_id", LogicalType::Int).primary_key(),
                LogicalColumn::new("_fivetran_start", LogicalType::UtcDateTime),
                LogicalColumn::new("_fivetran_synced", LogicalType::UtcDateTime),
            ],
        );
        let mut row = HashMap::new();
        row.insert("_fivetran_start".to_string(), Value::DateTime(ts(100)));
        row.insert("_fivetran_end".to_string(), Value::DateTime(crate::types::max_datetime()));
        row.insert("_fivetran_active".to_string(), Value::Bool(true));
        row.insert("_fivetran_synced".to_string(), Value::DateTime(ts(100)));
        store
            .upsert("events", &[Value::Int(1), Value::DateTime(ts(100))], &row)
            .await
            .unwrap();

        apply(&store, &table, "_fivetran_synced", ts(200), false).await.unwrap();

        let column_types = column_type_map(&table);
        let pk_names = pk::key_column_names(&table);
        let stored = store
            .select_one(
                "events",
                &[Value::Int(1), Value::DateTime(ts(100))],
                &column_types,
                &pk_names,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.get("_fivetran_active"), Some(&Value::Bool(false)));
        assert_eq!(
            stored.get("_fivetran_end"),
            Some(&Value::DateTime(ts(200) - chrono::Duration::milliseconds(1)))
        );
    }
}
