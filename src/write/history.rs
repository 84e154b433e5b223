//! History Writer (§4.6): the four-phase algorithm that applies a history
//! batch file against a table whose composite record id carries a version
//! chain (`[pk_1, ..., pk_n, _fivetran_start]`). Phases run in a fixed
//! order — earliest-start, replace, update, delete — and are each
//! first-error-aborts-the-batch (§4.6 error policy; enforced by the
//! caller iterating files, not by this module).
//!
//! 1. **Earliest-start** — per logical PK, deletes every version whose
//!    `_fivetran_start >= cutoff`, then reopens whatever version survives
//!    as the new tail (closed at `cutoff - 1ms`) if one remains.
//! 2. **Replace** — upserts the new version exactly as given. No
//!    version-chain maintenance: a replace row is assumed to already
//!    carry a complete, correct version (including its own
//!    `_fivetran_active`/`_fivetran_end` if the source sends them);
//!    closing a now-superseded predecessor is update's job, not
//!    replace's.
//! 3. **Update** — the delicate path. Looks up the previously-active
//!    version; if none exists the row is skipped silently (a documented
//!    upstream-SDK edge case). Otherwise closes it at `new_start - 1ms`,
//!    back-fills this row's `unmodified_string` columns from it, and
//!    upserts the new version.
//! 4. **Delete** — finds the latest version for the PK (regardless of
//!    its active flag) via the range-query engine and merges the
//!    delete row's fields into it — typically `_fivetran_active=false`
//!    and `_fivetran_end=delete_time`. Skipped silently if no version
//!    exists for that PK.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::csv_pipeline::Row;
use crate::error::{ConnectorError, Result};
use crate::pk;
use crate::store::RecordStore;
use crate::types::{column_type_map, max_datetime, LogicalTable, Value};

use super::range_query::versions_of;
use super::{coerce_row, require_non_empty_unmodified, unmodified_columns};

/// One millisecond, for the `new_start - 1ms` boundary between versions
/// (§3 Version Chain invariant).
const ONE_MILLISECOND: chrono::Duration = chrono::Duration::milliseconds(1);

fn present_values(coerced: &HashMap<String, Option<Value>>) -> HashMap<String, Value> {
    coerced
        .iter()
        .filter_map(|(k, v)| v.clone().map(|v| (k.clone(), v)))
        .collect()
}

async fn find_active_version(
    store: &dyn RecordStore,
    table: &LogicalTable,
    pk: &[Value],
) -> Result<Option<HashMap<String, Value>>> {
    let range = versions_of(pk);
    let column_types = column_type_map(table);
    let pk_names = pk::key_column_names(table);
    let rows = store
        .query_range(&table.name, &range.gte, &range.lt, &column_types, &pk_names)
        .await?;
    Ok(rows
        .into_iter()
        .find(|r| matches!(r.get("_fivetran_active"), Some(Value::Bool(true)))))
}

/// The surviving version with the greatest `_fivetran_start`, regardless
/// of its `_fivetran_active` flag — used by phase 1, where the cutoff may
/// have deleted the previously-active tail and left an inactive version
/// as the new one to reopen.
async fn find_latest_version(
    store: &dyn RecordStore,
    table: &LogicalTable,
    pk: &[Value],
) -> Result<Option<HashMap<String, Value>>> {
    let range = versions_of(pk);
    let column_types = column_type_map(table);
    let pk_names = pk::key_column_names(table);
    let rows = store
        .query_range(&table.name, &range.gte, &range.lt, &column_types, &pk_names)
        .await?;
    Ok(rows.into_iter().max_by(|a, b| {
        match (a.get("_fivetran_start"), b.get("_fivetran_start")) {
            (Some(Value::DateTime(a)), Some(Value::DateTime(b))) => a.cmp(b),
            _ => std::cmp::Ordering::Equal,
        }
    }))
}

/// Closes `version` (a row already fetched via [`find_active_version`] or
/// [`find_latest_version`]) at `end`, via upsert-SET merge against its own
/// `[pk, _fivetran_start]` key.
async fn close_version(
    store: &dyn RecordStore,
    table: &LogicalTable,
    pk: &[Value],
    version: &HashMap<String, Value>,
    end: DateTime<Utc>,
) -> Result<()> {
    let Some(start) = version.get("_fivetran_start").cloned() else {
        return Err(ConnectorError::ColumnMissingFromTable("_fivetran_start".to_string()));
    };

    let mut history_key = pk.to_vec();
    history_key.push(start);

    let mut patch = HashMap::new();
    patch.insert("_fivetran_end".to_string(), Value::DateTime(end));
    patch.insert("_fivetran_active".to_string(), Value::Bool(false));
    store.merge(&table.name, &history_key, &patch).await
}

/// Phase 1: truncates the version chain for one logical PK above
/// `cutoff`, then reopens whatever survives as the new tail (§4.6 phase
/// 1). `(a)` deletes every version with `_fivetran_start >= cutoff`;
/// `(b)` finds the surviving latest start, if any; `(c)` if one exists,
/// marks it inactive with `_fivetran_end = cutoff - 1ms` — it is, after
/// truncation, never again the open tail, since the cutoff itself marks
/// where history resumes being written from scratch.
pub async fn apply_earliest_start(
    store: &dyn RecordStore,
    table: &LogicalTable,
    row: Row,
    cutoff: DateTime<Utc>,
) -> Result<()> {
    let column_types = column_type_map(table);
    let coerced = coerce_row(row, &column_types)?;
    let pk_values = pk::assemble(table, &present_values(&coerced))?;

    store
        .delete_from_start(&table.name, &pk_values, &Value::DateTime(cutoff))
        .await?;

    let Some(survivor) = find_latest_version(store, table, &pk_values).await? else {
        return Ok(());
    };

    close_version(store, table, &pk_values, &survivor, cutoff - ONE_MILLISECOND).await
}

/// Phase 2: upserts the new version exactly as given. No version-chain
/// maintenance — a predecessor is only closed by phase 3's update path,
/// never by replace (§4.6 phase 2).
pub async fn apply_replace(
    store: &dyn RecordStore,
    table: &LogicalTable,
    row: Row,
    start: DateTime<Utc>,
) -> Result<()> {
    let column_types = column_type_map(table);
    let coerced = coerce_row(row, &column_types)?;
    let pk_values = pk::assemble(table, &present_values(&coerced))?;

    let mut data = HashMap::new();
    for (name, value) in coerced {
        if name == "id" || name == "_fivetran_start" {
            continue;
        }
        data.insert(name, value.unwrap_or(Value::Null));
    }
    data.entry("_fivetran_end".to_string())
        .or_insert(Value::DateTime(max_datetime()));
    data.entry("_fivetran_active".to_string())
        .or_insert(Value::Bool(true));
    data.insert("_fivetran_start".to_string(), Value::DateTime(start));

    let mut history_key = pk_values;
    history_key.push(Value::DateTime(start));
    store.upsert(&table.name, &history_key, &data).await
}

/// Phase 3: the delicate path (§4.6 phase 3). Looks up the previously
/// active version; if none exists the row is a documented upstream-SDK
/// edge case and is skipped silently rather than treated as an error.
/// Otherwise closes it at `start - 1ms`, back-fills this row's
/// `unmodified_string` columns from it, and upserts the new version.
pub async fn apply_update(
    store: &dyn RecordStore,
    table: &LogicalTable,
    row: Row,
    start: DateTime<Utc>,
) -> Result<()> {
    let pk_names = pk::key_column_names(table);
    require_non_empty_unmodified(&row, &pk_names)?;

    let unmodified = unmodified_columns(&row);
    let column_types = column_type_map(table);
    let coerced = coerce_row(row, &column_types)?;
    let pk_values = pk::assemble(table, &present_values(&coerced))?;

    let Some(previous) = find_active_version(store, table, &pk_values).await? else {
        return Ok(());
    };
    close_version(store, table, &pk_values, &previous, start - ONE_MILLISECOND).await?;

    let mut data = HashMap::new();
    for name in &unmodified {
        if let Some(value) = previous.get(name) {
            data.insert(name.clone(), value.clone());
        }
    }
    for (name, value) in coerced {
        if name == "id" || name == "_fivetran_start" {
            continue;
        }
        data.insert(name, value.unwrap_or(Value::Null));
    }
    data.entry("_fivetran_end".to_string())
        .or_insert(Value::DateTime(max_datetime()));
    data.entry("_fivetran_active".to_string())
        .or_insert(Value::Bool(true));
    data.insert("_fivetran_start".to_string(), Value::DateTime(start));

    let mut history_key = pk_values;
    history_key.push(Value::DateTime(start));
    store.upsert(&table.name, &history_key, &data).await
}

/// Phase 4: finds the latest version for the PK (regardless of its
/// active flag) and merges the delete row's non-sentinel fields into it
/// — typically `_fivetran_active=false`/`_fivetran_end=delete_time`.
/// Skipped silently if no version exists for that PK (§4.6 phase 4).
pub async fn apply_delete(
    store: &dyn RecordStore,
    table: &LogicalTable,
    row: Row,
    delete_time: DateTime<Utc>,
) -> Result<()> {
    let column_types = column_type_map(table);
    let coerced = coerce_row(row, &column_types)?;
    let pk_values = pk::assemble(table, &present_values(&coerced))?;

    let Some(latest) = find_latest_version(store, table, &pk_values).await? else {
        return Ok(());
    };
    let Some(start) = latest.get("_fivetran_start").cloned() else {
        return Err(ConnectorError::ColumnMissingFromTable("_fivetran_start".to_string()));
    };

    let mut history_key = pk_values;
    history_key.push(start);

    let mut patch: HashMap<String, Value> = coerced
        .into_iter()
        .filter(|(name, _)| name != "id" && name != "_fivetran_start")
        .map(|(name, value)| (name, value.unwrap_or(Value::Null)))
        .collect();
    patch
        .entry("_fivetran_active".to_string())
        .or_insert(Value::Bool(false));
    patch
        .entry("_fivetran_end".to_string())
        .or_insert(Value::DateTime(delete_time));

    store.merge(&table.name, &history_key, &patch).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csv_pipeline::Cell;
    use crate::store::mock::MockStore;
    use crate::types::{LogicalColumn, LogicalType};
    use chrono::TimeZone;

    fn history_table() -> LogicalTable {
        LogicalTable::new(
            "events",
            vec![
                LogicalColumn::new("event_id", LogicalType::Int).primary_key(),
                LogicalColumn::new("status", LogicalType::String),
                LogicalColumn::new("_fivetran_start", LogicalType::UtcDateTime),
            ],
        )
    }

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Cell::Value(v.to_string())))
            .collect()
    }

    fn ts(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).unwrap()
    }

    #[tokio::test]
    async fn test_replace_opens_new_active_version() {
        let store = MockStore::new();
        let table = history_table();
        apply_replace(&store, &table, row(&[("event_id", "1"), ("status", "open")]), ts(100))
            .await
            .unwrap();

        let active = find_active_version(&store, &table, &[Value::Int(1)]).await.unwrap().unwrap();
        assert_eq!(active.get("status"), Some(&Value::String("open".into())));
        assert_eq!(active.get("_fivetran_active"), Some(&Value::Bool(true)));
    }

    #[tokio::test]
    async fn test_second_replace_does_not_close_first_version() {
        // §4.6 phase 2: replace carries no version-chain maintenance. Two
        // replace rows for the same PK leave two distinct active versions —
        // closing a predecessor is update's job, not replace's.
        let store = MockStore::new();
        let table = history_table();
        apply_replace(&store, &table, row(&[("event_id", "1"), ("status", "open")]), ts(100))
            .await
            .unwrap();
        apply_replace(&store, &table, row(&[("event_id", "1"), ("status", "closed")]), ts(200))
            .await
            .unwrap();

        let column_types = column_type_map(&table);
        let pk_names = pk::key_column_names(&table);
        let first_version = store
            .select_one(
                "events",
                &[Value::Int(1), Value::DateTime(ts(100))],
                &column_types,
                &pk_names,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first_version.get("_fivetran_active"), Some(&Value::Bool(true)));
        assert_eq!(first_version.get("_fivetran_end"), Some(&Value::DateTime(max_datetime())));

        let second_version = store
            .select_one(
                "events",
                &[Value::Int(1), Value::DateTime(ts(200))],
                &column_types,
                &pk_names,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second_version.get("_fivetran_active"), Some(&Value::Bool(true)));
        assert_eq!(store.row_count("events"), 2);
    }

    #[tokio::test]
    async fn test_update_closes_previous_version_one_millisecond_before_new_start() {
        let store = MockStore::new();
        let table = history_table();
        apply_replace(&store, &table, row(&[("event_id", "1"), ("status", "open")]), ts(100))
            .await
            .unwrap();

        let update_row: Row = vec![
            ("event_id".to_string(), Cell::Value("1".to_string())),
            ("status".to_string(), Cell::Unmodified),
        ];
        apply_update(&store, &table, update_row, ts(200)).await.unwrap();

        let active = find_active_version(&store, &table, &[Value::Int(1)]).await.unwrap().unwrap();
        assert_eq!(active.get("status"), Some(&Value::String("open".into())));

        let column_types = column_type_map(&table);
        let pk_names = pk::key_column_names(&table);
        let closed = store
            .select_one(
                "events",
                &[Value::Int(1), Value::DateTime(ts(100))],
                &column_types,
                &pk_names,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(closed.get("_fivetran_active"), Some(&Value::Bool(false)));
        assert_eq!(closed.get("_fivetran_end"), Some(&Value::DateTime(ts(200) - ONE_MILLISECOND)));
    }

    #[tokio::test]
    async fn test_update_skips_silently_when_no_previous_version() {
        let store = MockStore::new();
        let table = history_table();
        let update_row: Row = vec![
            ("event_id".to_string(), Cell::Value("1".to_string())),
            ("status".to_string(), Cell::Unmodified),
        ];
        apply_update(&store, &table, update_row, ts(200)).await.unwrap();
        assert_eq!(store.row_count("events"), 0);
    }

    #[tokio::test]
    async fn test_delete_closes_only_the_latest_of_several_open_versions() {
        let store = MockStore::new();
        let table = history_table();
        apply_replace(&store, &table, row(&[("event_id", "1"), ("status", "open")]), ts(100))
            .await
            .unwrap();
        apply_replace(&store, &table, row(&[("event_id", "1"), ("status", "reopened")]), ts(200))
            .await
            .unwrap();

        apply_delete(&store, &table, row(&[("event_id", "1")]), ts(300))
            .await
            .unwrap();

        assert!(find_active_version(&store, &table, &[Value::Int(1)]).await.unwrap().is_none());

        let column_types = column_type_map(&table);
        let pk_names = pk::key_column_names(&table);
        let latest = store
            .select_one(
                "events",
                &[Value::Int(1), Value::DateTime(ts(200))],
                &column_types,
                &pk_names,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.get("_fivetran_active"), Some(&Value::Bool(false)));
        assert_eq!(latest.get("_fivetran_end"), Some(&Value::DateTime(ts(300))));

        // The earlier, already-closed version is untouched by the delete.
        let first_version = store
            .select_one(
                "events",
                &[Value::Int(1), Value::DateTime(ts(100))],
                &column_types,
                &pk_names,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first_version.get("_fivetran_end"), Some(&Value::DateTime(max_datetime())));
    }

    #[tokio::test]
    async fn test_delete_skips_silently_when_no_version_exists() {
        let store = MockStore::new();
        let table = history_table();
        apply_delete(&store, &table, row(&[("event_id", "1")]), ts(300))
            .await
            .unwrap();
        assert_eq!(store.row_count("events"), 0);
    }

    #[tokio::test]
    async fn test_earliest_start_removes_versions_at_or_after_cutoff() {
        let store = MockStore::new();
        let table = history_table();
        apply_replace(&store, &table, row(&[("event_id", "1"), ("status", "open")]), ts(100))
            .await
            .unwrap();
        apply_earliest_start(&store, &table, row(&[("event_id", "1")]), ts(150))
            .await
            .unwrap();
        assert_eq!(store.row_count("events"), 0);
    }

    #[tokio::test]
    async fn test_earliest_start_reopens_surviving_version_as_closed_tail() {
        let store = MockStore::new();
        let table = history_table();
        apply_replace(&store, &table, row(&[("event_id", "1"), ("status", "open")]), ts(100))
            .await
            .unwrap();
        apply_replace(
            &store,
            &table,
            row(&[("event_id", "1"), ("status", "updated")]),
            ts(200),
        )
        .await
        .unwrap();

        // Cutoff between the two versions: the later one is truncated away,
        // the earlier one survives and must be (re-)closed rather than left
        // dangling as active.
        apply_earliest_start(&store, &table, row(&[("event_id", "1")]), ts(150))
            .await
            .unwrap();

        assert_eq!(store.row_count("events"), 1);
        assert!(find_active_version(&store, &table, &[Value::Int(1)]).await.unwrap().is_none());

        let column_types = column_type_map(&table);
        let pk_names = pk::key_column_names(&table);
        let survivor = store
            .select_one(
                "events",
                &[Value::Int(1), Value::DateTime(ts(100))],
                &column_types,
                &pk_names,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(survivor.get("_fivetran_active"), Some(&Value::Bool(false)));
        assert_eq!(
            survivor.get("_fivetran_end"),
            Some(&Value::DateTime(ts(150) - ONE_MILLISECOND))
        );
    }

    #[tokio::test]
    async fn test_earliest_start_before_all_existing_versions_deletes_everything() {
        let store = MockStore::new();
        let table = history_table();
        apply_replace(&store, &table, row(&[("event_id", "1"), ("status", "open")]), ts(100))
            .await
            .unwrap();
        apply_earliest_start(&store, &table, row(&[("event_id", "1")]), ts(50))
            .await
            .unwrap();
        assert_eq!(store.row_count("events"), 0);
    }
}
