//! `RecordStore` — the async boundary between the write/schema logic and
//! the actual SurrealDB driver (§4.2–§4.7).
//!
//! Grounded on the teacher's practice of putting a narrow trait between
//! domain logic and its storage engine so tests run against an in-memory
//! fake instead of a live server (the teacher tests its differential view
//! maintenance against `testcontainers`-backed Postgres; this crate has no
//! SurrealDB testcontainers module available, so [`MockStore`] plays that
//! role for unit tests while [`SurrealStore`] is the production
//! implementation).

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::json;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Root, Scope};
use surrealdb::Surreal;

use crate::config::{AuthLevel, Config, Credentials};
use crate::error::{ConnectorError, Result};
use crate::types::{FieldDefinition, Value};

/// A table's currently stored field definitions, as `(name, comment)`
/// pairs, plus the names of any indexes already defined — enough for
/// `schema.rs` to decide what's missing without re-parsing DDL text.
#[derive(Debug, Clone, Default)]
pub struct TableInfo {
    pub fields: Vec<(String, String)>,
    pub indexes: Vec<String>,
}

impl TableInfo {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Storage boundary used by the schema, write, and migration modules.
/// Every method takes already-assembled record-id components rather than
/// a pre-built key string, so implementations stay in control of how a
/// composite `table:[a, b]` record id is rendered.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn define_table(&self, table: &str) -> Result<()>;
    async fn define_field(&self, table: &str, field: &FieldDefinition) -> Result<()>;
    async fn define_index(&self, table: &str, index_name: &str, columns: &[String], unique: bool)
        -> Result<()>;
    async fn table_info(&self, table: &str) -> Result<TableInfo>;
    async fn table_exists(&self, table: &str) -> Result<bool>;

    async fn upsert(&self, table: &str, id: &[Value], data: &HashMap<String, Value>) -> Result<()>;
    async fn merge(&self, table: &str, id: &[Value], data: &HashMap<String, Value>) -> Result<()>;
    async fn delete(&self, table: &str, id: &[Value]) -> Result<()>;
    /// `pk_names` are the primary-key column names in declaration order,
    /// used to reconstruct those columns as named fields in the returned
    /// row — they are never stored as ordinary document fields when one
    /// of them is literally named `id` (§4.7), so the only place they
    /// can reliably come from is the composite record id itself.
    async fn select_one(
        &self,
        table: &str,
        id: &[Value],
        column_types: &crate::types::ColumnTypeMap,
        pk_names: &[String],
    ) -> Result<Option<HashMap<String, Value>>>;

    /// Inclusive-lower, exclusive-upper range scan over composite record
    /// ids, used by the history range-query engine (§4.7). `column_types`
    /// decodes each returned row's JSON back into typed values; `pk_names`
    /// reconstructs the primary-key columns the same way `select_one` does.
    async fn query_range(
        &self,
        table: &str,
        gte: &[Value],
        lt: &[Value],
        column_types: &crate::types::ColumnTypeMap,
        pk_names: &[String],
    ) -> Result<Vec<HashMap<String, Value>>>;

    async fn truncate_table(&self, table: &str) -> Result<()>;

    /// Deletes every version of the logical row `pk` whose
    /// `_fivetran_start >= cutoff`, for earliest-start truncation in
    /// history mode (§4.6 phase 1). Scoped to one logical primary key,
    /// never table-wide — the batch may carry earliest-start cutoffs for
    /// many distinct rows, each independent of the others.
    async fn delete_from_start(&self, table: &str, pk: &[Value], cutoff: &Value) -> Result<()>;

    /// Returns every row currently in `table`, with no ordering
    /// guarantee. Used by the migration dispatcher's
    /// `copy_table_to_history_mode` and `update_column_value` operations,
    /// which must visit an entire table rather than a single key (§4.8).
    async fn scan_all(
        &self,
        table: &str,
        column_types: &crate::types::ColumnTypeMap,
        pk_names: &[String],
    ) -> Result<Vec<HashMap<String, Value>>>;
}

/// Converts a connector [`Value`] into a bindable JSON value. `Decimal`
/// and date/time variants rely on their crates' serde implementations to
/// round-trip through SurrealDB's query binding.
fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => json!(b),
        Value::Int(i) => json!(i),
        Value::Float(f) => json!(f),
        Value::Decimal(d) => json!(d),
        Value::String(s) => json!(s),
        Value::Binary(b) => json!(b),
        Value::Json(v) => v.clone(),
        Value::DateTime(dt) => json!(dt),
        Value::NaiveDateTime(dt) => json!(dt),
        Value::TimeOfDay(d) => json!(d.num_milliseconds()),
    }
}

fn record_id_json(table: &str, id: &[Value]) -> serde_json::Value {
    json!({ "tb": table, "id": id.iter().map(value_to_json).collect::<Vec<_>>() })
}

/// Production [`RecordStore`] backed by a live SurrealDB WebSocket
/// connection (§3: `ws://.../rpc` endpoint, `SURREALDB_*` env vars,
/// `ns`/`auth_level` configuration).
pub struct SurrealStore {
    db: Surreal<Any>,
}

impl SurrealStore {
    /// Connects and authenticates against SurrealDB per the parsed
    /// [`Config`]. Connection errors are classified through
    /// [`ConnectorError::classify_connect_failure`] so token expiry is
    /// surfaced distinctly from a generic network failure.
    pub async fn connect(config: &Config) -> Result<Self> {
        let db = surrealdb::engine::any::connect(&config.url)
            .await
            .map_err(|e| ConnectorError::classify_connect_failure(&config.url, e))?;

        match (&config.credentials, config.auth_level) {
            (Credentials::Token(token), _) => {
                db.authenticate(token.as_str())
                    .await
                    .map_err(|e| ConnectorError::classify_connect_failure(&config.url, e))?;
            }
            (Credentials::UserPass { user, pass }, AuthLevel::Root) => {
                db.signin(Root {
                    username: user,
                    password: pass,
                })
                .await
                .map_err(|e| ConnectorError::classify_connect_failure(&config.url, e))?;
            }
            (Credentials::UserPass { user, pass }, AuthLevel::Namespace) => {
                db.signin(Scope {
                    namespace: &config.namespace,
                    database: &config.namespace,
                    scope: "namespace",
                    params: json!({ "user": user, "pass": pass }),
                })
                .await
                .map_err(|e| ConnectorError::classify_connect_failure(&config.url, e))?;
            }
        }

        db.use_ns(&config.namespace)
            .use_db(&config.namespace)
            .await
            .map_err(|e| ConnectorError::classify_connect_failure(&config.url, e))?;

        Ok(Self { db })
    }

    async fn run_rows(
        &self,
        sql: &str,
        bindings: Vec<(&str, serde_json::Value)>,
    ) -> Result<Vec<HashMap<String, serde_json::Value>>> {
        let mut query = self.db.query(sql);
        for (key, value) in bindings {
            query = query.bind((key, value));
        }
        let mut response = query.await?;
        let rows: Vec<HashMap<String, serde_json::Value>> = response.take(0)?;
        Ok(rows)
    }
}

#[async_trait]
impl RecordStore for SurrealStore {
    async fn define_table(&self, table: &str) -> Result<()> {
        crate::types::validate_identifier(table)?;
        self.db
            .query(format!("DEFINE TABLE IF NOT EXISTS `{table}` SCHEMALESS"))
            .await?;
        Ok(())
    }

    async fn define_field(&self, table: &str, field: &FieldDefinition) -> Result<()> {
        crate::types::validate_identifier(table)?;
        self.db
            .query(format!(
                "DEFINE FIELD `{name}` ON TABLE `{table}` TYPE {type_expr} COMMENT $comment",
                name = field.name,
                type_expr = field.type_expr,
            ))
            .bind(("comment", field.comment.clone()))
            .await?;

        if let Some(wildcard) = &field.wildcard_inner_field {
            self.db
                .query(format!(
                    "DEFINE FIELD `{wildcard}` ON TABLE `{table}` FLEXIBLE TYPE option<any>",
                ))
                .await?;
        }
        Ok(())
    }

    async fn define_index(
        &self,
        table: &str,
        index_name: &str,
        columns: &[String],
        unique: bool,
    ) -> Result<()> {
        crate::types::validate_identifier(table)?;
        crate::types::validate_identifier(index_name)?;
        let fields = columns
            .iter()
            .map(|c| format!("`{c}`"))
            .collect::<Vec<_>>()
            .join(", ");
        let uniqueness = if unique { " UNIQUE" } else { "" };
        self.db
            .query(format!(
                "DEFINE INDEX IF NOT EXISTS `{index_name}` ON TABLE `{table}` FIELDS {fields}{uniqueness}",
            ))
            .await?;
        Ok(())
    }

    async fn table_info(&self, table: &str) -> Result<TableInfo> {
        crate::types::validate_identifier(table)?;
        let rows = self
            .run_rows(&format!("INFO FOR TABLE `{table}`"), vec![])
            .await?;

        let Some(info) = rows.into_iter().next() else {
            return Ok(TableInfo::default());
        };

        let fields = info
            .get("fields")
            .and_then(|v| v.as_object())
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(|(name, definition)| {
                        definition
                            .as_str()
                            .and_then(|def| extract_comment(def))
                            .map(|comment| (name.clone(), comment))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let indexes = info
            .get("indexes")
            .and_then(|v| v.as_object())
            .map(|indexes| indexes.keys().cloned().collect())
            .unwrap_or_default();

        Ok(TableInfo { fields, indexes })
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(!self.table_info(table).await?.is_empty())
    }

    async fn upsert(&self, table: &str, id: &[Value], data: &HashMap<String, Value>) -> Result<()> {
        let payload: serde_json::Value = data
            .iter()
            .map(|(k, v)| (k.clone(), value_to_json(v)))
            .collect::<serde_json::Map<_, _>>()
            .into();
        self.db
            .query("UPSERT type::thing($tb, $id) CONTENT $data")
            .bind(("tb", table.to_string()))
            .bind(("id", id.iter().map(value_to_json).collect::<Vec<_>>()))
            .bind(("data", payload))
            .await?;
        Ok(())
    }

    async fn merge(&self, table: &str, id: &[Value], data: &HashMap<String, Value>) -> Result<()> {
        let payload: serde_json::Value = data
            .iter()
            .map(|(k, v)| (k.clone(), value_to_json(v)))
            .collect::<serde_json::Map<_, _>>()
            .into();
        self.db
            .query("UPDATE type::thing($tb, $id) MERGE $data")
            .bind(("tb", table.to_string()))
            .bind(("id", id.iter().map(value_to_json).collect::<Vec<_>>()))
            .bind(("data", payload))
            .await?;
        Ok(())
    }

    async fn delete(&self, table: &str, id: &[Value]) -> Result<()> {
        self.db
            .query("DELETE type::thing($tb, $id)")
            .bind(("tb", table.to_string()))
            .bind(("id", id.iter().map(value_to_json).collect::<Vec<_>>()))
            .await?;
        Ok(())
    }

    async fn select_one(
        &self,
        table: &str,
        id: &[Value],
        column_types: &crate::types::ColumnTypeMap,
        pk_names: &[String],
    ) -> Result<Option<HashMap<String, Value>>> {
        let rows = self
            .run_rows(
                "SELECT * FROM type::thing($tb, $id)",
                vec![
                    ("tb", json!(table)),
                    ("id", json!(id.iter().map(value_to_json).collect::<Vec<_>>())),
                ],
            )
            .await?;
        rows.into_iter()
            .next()
            .map(|row| {
                let mut decoded = crate::types::decode_row(row, column_types)?;
                for (name, value) in pk_names.iter().zip(id.iter()) {
                    decoded.insert(name.clone(), value.clone());
                }
                Ok(decoded)
            })
            .transpose()
    }

    async fn query_range(
        &self,
        table: &str,
        gte: &[Value],
        lt: &[Value],
        column_types: &crate::types::ColumnTypeMap,
        pk_names: &[String],
    ) -> Result<Vec<HashMap<String, Value>>> {
        let select = crate::write::range_query::select_clause(pk_names);
        let sql = format!(
            "{select} WHERE id >= type::thing($tb, $gte) AND id < type::thing($tb, $lt)"
        );
        let rows = self
            .run_rows(
                &sql,
                vec![
                    ("tb", json!(table)),
                    ("gte", json!(gte.iter().map(value_to_json).collect::<Vec<_>>())),
                    ("lt", json!(lt.iter().map(value_to_json).collect::<Vec<_>>())),
                ],
            )
            .await?;
        rows.into_iter()
            .map(|row| crate::types::decode_row(row, column_types))
            .collect()
    }

    async fn truncate_table(&self, table: &str) -> Result<()> {
        crate::types::validate_identifier(table)?;
        self.db
            .query(format!("DELETE FROM `{table}`"))
            .await?;
        Ok(())
    }

    async fn delete_from_start(&self, table: &str, pk: &[Value], cutoff: &Value) -> Result<()> {
        crate::types::validate_identifier(table)?;
        let range = crate::write::range_query::versions_of(pk);
        let gte = {
            let mut gte = pk.to_vec();
            gte.push(cutoff.clone());
            gte
        };
        self.db
            .query("DELETE FROM type::table($tb) WHERE id >= type::thing($tb, $gte) AND id < type::thing($tb, $lt)")
            .bind(("tb", table.to_string()))
            .bind(("gte", gte.iter().map(value_to_json).collect::<Vec<_>>()))
            .bind(("lt", range.lt.iter().map(value_to_json).collect::<Vec<_>>()))
            .await?;
        Ok(())
    }

    async fn scan_all(
        &self,
        table: &str,
        column_types: &crate::types::ColumnTypeMap,
        pk_names: &[String],
    ) -> Result<Vec<HashMap<String, Value>>> {
        crate::types::validate_identifier(table)?;
        let select = crate::write::range_query::select_clause(pk_names);
        let rows = self.run_rows(&select, vec![("tb", json!(table))]).await?;
        rows.into_iter()
            .map(|row| crate::types::decode_row(row, column_types))
            .collect()
    }
}

fn extract_comment(definition: &str) -> Option<String> {
    definition
        .split("COMMENT")
        .nth(1)
        .map(|tail| tail.trim().trim_matches('\'').trim_matches('"').to_string())
}

/// In-memory [`RecordStore`] fake for unit tests. Stores each table as a
/// list of `(record id components, row)` pairs; supports just enough
/// semantics (range scan ordering, truncation) to exercise the write path
/// without a live server.
#[cfg(any(test, feature = "test-support"))]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MockStore {
        tables: Mutex<HashMap<String, MockTable>>,
    }

    #[derive(Default, Clone)]
    struct MockTable {
        fields: Vec<(String, String)>,
        indexes: Vec<String>,
        rows: Vec<(Vec<Value>, HashMap<String, Value>)>,
    }

    impl MockStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn row_count(&self, table: &str) -> usize {
            self.tables
                .lock()
                .unwrap()
                .get(table)
                .map(|t| t.rows.len())
                .unwrap_or(0)
        }
    }

    fn key_ordering(key: &[Value]) -> Vec<String> {
        key.iter().map(debug_sortable).collect()
    }

    fn debug_sortable(value: &Value) -> String {
        match value {
            Value::Int(i) => format!("{:020}", i),
            Value::String(s) => s.clone(),
            other => format!("{other:?}"),
        }
    }

    #[async_trait]
    impl RecordStore for MockStore {
        async fn define_table(&self, table: &str) -> Result<()> {
            self.tables.lock().unwrap().entry(table.to_string()).or_default();
            Ok(())
        }

        async fn define_field(&self, table: &str, field: &FieldDefinition) -> Result<()> {
            let mut tables = self.tables.lock().unwrap();
            let entry = tables.entry(table.to_string()).or_default();
            entry.fields.retain(|(name, _)| name != &field.name);
            entry.fields.push((field.name.clone(), field.comment.clone()));
            Ok(())
        }

        async fn define_index(
            &self,
            table: &str,
            index_name: &str,
            _columns: &[String],
            _unique: bool,
        ) -> Result<()> {
            let mut tables = self.tables.lock().unwrap();
            let entry = tables.entry(table.to_string()).or_default();
            if !entry.indexes.contains(&index_name.to_string()) {
                entry.indexes.push(index_name.to_string());
            }
            Ok(())
        }

        async fn table_info(&self, table: &str) -> Result<TableInfo> {
            let tables = self.tables.lock().unwrap();
            Ok(tables
                .get(table)
                .map(|t| TableInfo {
                    fields: t.fields.clone(),
                    indexes: t.indexes.clone(),
                })
                .unwrap_or_default())
        }

        async fn table_exists(&self, table: &str) -> Result<bool> {
            Ok(self.tables.lock().unwrap().contains_key(table))
        }

        async fn upsert(&self, table: &str, id: &[Value], data: &HashMap<String, Value>) -> Result<()> {
            let mut tables = self.tables.lock().unwrap();
            let entry = tables.entry(table.to_string()).or_default();
            if let Some(existing) = entry.rows.iter_mut().find(|(k, _)| k == id) {
                existing.1 = data.clone();
            } else {
                entry.rows.push((id.to_vec(), data.clone()));
            }
            Ok(())
        }

        async fn merge(&self, table: &str, id: &[Value], data: &HashMap<String, Value>) -> Result<()> {
            let mut tables = self.tables.lock().unwrap();
            let entry = tables.entry(table.to_string()).or_default();
            if let Some(existing) = entry.rows.iter_mut().find(|(k, _)| k == id) {
                for (k, v) in data {
                    existing.1.insert(k.clone(), v.clone());
                }
            } else {
                entry.rows.push((id.to_vec(), data.clone()));
            }
            Ok(())
        }

        async fn delete(&self, table: &str, id: &[Value]) -> Result<()> {
            let mut tables = self.tables.lock().unwrap();
            if let Some(entry) = tables.get_mut(table) {
                entry.rows.retain(|(k, _)| k != id);
            }
            Ok(())
        }

        async fn select_one(
            &self,
            table: &str,
            id: &[Value],
            _column_types: &crate::types::ColumnTypeMap,
            pk_names: &[String],
        ) -> Result<Option<HashMap<String, Value>>> {
            let tables = self.tables.lock().unwrap();
            Ok(tables
                .get(table)
                .and_then(|t| t.rows.iter().find(|(k, _)| k == id))
                .map(|(key, row)| with_pk_fields(row, pk_names, key)))
        }

        async fn query_range(
            &self,
            table: &str,
            gte: &[Value],
            lt: &[Value],
            _column_types: &crate::types::ColumnTypeMap,
            pk_names: &[String],
        ) -> Result<Vec<HashMap<String, Value>>> {
            let tables = self.tables.lock().unwrap();
            let Some(entry) = tables.get(table) else {
                return Ok(vec![]);
            };
            let lower = key_ordering(gte);
            let upper = key_ordering(lt);
            let mut matches: Vec<_> = entry
                .rows
                .iter()
                .filter(|(k, _)| {
                    let ordering = key_ordering(k);
                    ordering >= lower && ordering < upper
                })
                .cloned()
                .collect();
            matches.sort_by(|a, b| key_ordering(&a.0).cmp(&key_ordering(&b.0)));
            Ok(matches
                .into_iter()
                .map(|(key, row)| with_pk_fields(&row, pk_names, &key))
                .collect())
        }

        async fn truncate_table(&self, table: &str) -> Result<()> {
            let mut tables = self.tables.lock().unwrap();
            if let Some(entry) = tables.get_mut(table) {
                entry.rows.clear();
            }
            Ok(())
        }

        async fn delete_from_start(&self, table: &str, pk: &[Value], cutoff: &Value) -> Result<()> {
            let mut tables = self.tables.lock().unwrap();
            if let Some(entry) = tables.get_mut(table) {
                entry.rows.retain(|(key, _)| {
                    if key.len() < pk.len() || &key[..pk.len()] != pk {
                        return true;
                    }
                    match (key.get(pk.len()), cutoff) {
                        (Some(Value::DateTime(start)), Value::DateTime(cut)) => start < cut,
                        _ => true,
                    }
                });
            }
            Ok(())
        }

        async fn scan_all(
            &self,
            table: &str,
            _column_types: &crate::types::ColumnTypeMap,
            pk_names: &[String],
        ) -> Result<Vec<HashMap<String, Value>>> {
            let tables = self.tables.lock().unwrap();
            Ok(tables
                .get(table)
                .map(|t| {
                    t.rows
                        .iter()
                        .map(|(key, row)| with_pk_fields(row, pk_names, key))
                        .collect()
                })
                .unwrap_or_default())
        }
    }

    /// Mirrors [`SurrealStore`]'s behavior of reconstructing primary-key
    /// columns from the composite record id rather than relying on them
    /// being present as ordinary document fields — needed for the `id`
    /// column-name collision case (§4.7).
    fn with_pk_fields(
        row: &HashMap<String, Value>,
        pk_names: &[String],
        key: &[Value],
    ) -> HashMap<String, Value> {
        let mut row = row.clone();
        for (name, value) in pk_names.iter().zip(key.iter()) {
            row.insert(name.clone(), value.clone());
        }
        row
    }

}
