//! History Range-Query Engine (§4.7).
//!
//! A history-mode table's composite record id is
//! `[pk_1, ..., pk_n, _fivetran_start]`. Finding "every version of this
//! logical row" is therefore a half-open range scan: `gte` fixes the pk
//! prefix and a minimum start time, `lt` fixes the same prefix with its
//! last component bumped to its immediate successor and no start-time
//! suffix at all — SurrealDB compares record-id arrays lexicographically,
//! so a shorter array with a bumped final element sorts above every
//! array that shares the unbumped prefix, regardless of what follows it.
//!
//! One additional wrinkle (§4.7): if a primary-key column is itself named
//! `id`, projecting it back out of the composite key collides with
//! SurrealDB's own `id` meta-field name. The standard single-level
//! `SELECT id[0] AS pk0 FROM ...` silently returns `NONE` for that
//! projection in that situation, so this engine instead nests the scan in
//! an inner query that aliases the record id to a neutral name before the
//! outer query splits it back into named columns.

use chrono::{DateTime, Utc};

use crate::types::Value;

/// Half-open range over composite record-id arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyRange {
    pub gte: Vec<Value>,
    pub lt: Vec<Value>,
}

/// The minimal value strictly greater than `value`, within the same
/// variant. Used only to build the exclusive upper bound of a pk-prefix
/// scan; never exposed as a real stored value.
pub fn successor(value: &Value) -> Value {
    match value {
        Value::Int(i) => Value::Int(i + 1),
        Value::String(s) => Value::String(format!("{s}\u{10FFFF}")),
        Value::DateTime(dt) => Value::DateTime(*dt + chrono::Duration::nanoseconds(1)),
        other => other.clone(),
    }
}

/// Builds the range that selects every version of the row identified by
/// `pk`, in declaration order, in a history-mode table.
pub fn versions_of(pk: &[Value]) -> KeyRange {
    assert!(!pk.is_empty(), "a primary key must have at least one column");

    let mut gte = pk.to_vec();
    gte.push(Value::DateTime(DateTime::<Utc>::MIN_UTC));

    let mut lt = pk[..pk.len() - 1].to_vec();
    lt.push(successor(&pk[pk.len() - 1]));

    KeyRange { gte, lt }
}

/// Whether any primary-key column is named `id`, which triggers the
/// nested-select workaround described above.
pub fn needs_nested_projection(pk_names: &[String]) -> bool {
    pk_names.iter().any(|name| name == "id")
}

/// Builds the `SELECT` projection clause for reading pk columns back out
/// of a row's composite record id. When no pk column collides with the
/// meta field name, a direct single-level projection is used; otherwise
/// the nested alias-then-split form is used instead.
pub fn select_clause(pk_names: &[String]) -> String {
    if !needs_nested_projection(pk_names) {
        let projections: Vec<String> = pk_names
            .iter()
            .enumerate()
            .map(|(i, name)| format!("id[{i}] AS `{name}`"))
            .collect();
        return format!("SELECT *, {} FROM type::table($tb)", projections.join(", "));
    }

    let inner_projections: Vec<String> = pk_names
        .iter()
        .enumerate()
        .map(|(i, _)| format!("id[{i}] AS `__pk_{i}`"))
        .collect();
    let outer_projections: Vec<String> = pk_names
        .iter()
        .enumerate()
        .map(|(i, name)| format!("__pk_{i} AS `{name}`"))
        .collect();

    format!(
        "SELECT *, {outer} FROM (SELECT *, {inner} FROM type::table($tb))",
        inner = inner_projections.join(", "),
        outer = outer_projections.join(", "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_successor_int_increments() {
        assert_eq!(successor(&Value::Int(5)), Value::Int(6));
    }

    #[test]
    fn test_versions_of_range_bounds_ignore_start_time_tail() {
        let pk = vec![Value::String("us-east".into()), Value::Int(42)];
        let range = versions_of(&pk);

        assert_eq!(range.gte.len(), 3);
        assert_eq!(range.lt.len(), 2);
        assert_eq!(range.lt[1], Value::Int(43));
    }

    #[test]
    fn test_single_column_key_range() {
        let pk = vec![Value::Int(7)];
        let range = versions_of(&pk);
        assert_eq!(range.gte[0], Value::Int(7));
        assert_eq!(range.lt[0], Value::Int(8));
    }

    #[test]
    fn test_nested_projection_triggered_only_by_id_named_column() {
        assert!(needs_nested_projection(&["id".to_string()]));
        assert!(!needs_nested_projection(&["user_id".to_string()]));
    }

    #[test]
    fn test_select_clause_shapes() {
        let plain = select_clause(&["user_id".to_string()]);
        assert!(plain.contains("id[0] AS `user_id`"));
        assert!(plain.contains("FROM type::table($tb)"));
        assert!(!plain.contains("__pk_0"));

        let nested = select_clause(&["id".to_string()]);
        assert!(nested.contains("__pk_0"));
        assert!(nested.contains("FROM (SELECT"));
        assert!(nested.contains("FROM type::table($tb))"));
    }
}
