//! Type Mapper — bidirectional translation between the source-side logical
//! type system and SurrealDB's native field types (§3, §4.1).
//!
//! No teacher counterpart: the teacher maps SQL types onto themselves
//! (materialized views reuse the source column types verbatim), whereas
//! this connector bridges sixteen source-agnostic logical categories
//! against SurrealDB's schema language and must additionally embed enough
//! metadata in each field's comment to reconstruct the logical schema
//! without a side catalog (§3 invariant).

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{ConnectorError, Result};

/// The maximum precision SurrealDB's native `decimal` type can hold before
/// this connector falls back to a lossy `float` representation (§4.1).
pub const MAX_NATIVE_DECIMAL_PRECISION: u32 = 28;

/// The sentinel `_fivetran_end` carried by the currently-active version of
/// a history chain (§3 Version Chain invariant). Returns a fresh value
/// each call since `DateTime` isn't `const`-constructible from its
/// component fields.
pub fn max_datetime() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59)
        .single()
        .expect("9999-12-31T23:59:59Z is representable")
}

/// Source-agnostic logical type categories (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogicalType {
    Bool,
    Short,
    Int,
    Long,
    Float,
    Double,
    Decimal,
    String,
    Binary,
    Xml,
    Json,
    NaiveDate,
    NaiveDateTime,
    UtcDateTime,
    NaiveTime,
}

impl LogicalType {
    /// Stable numeric code stored in the field comment's `ft_type`, so
    /// `DescribeTable` can reconstruct the logical type without relying on
    /// the string spelling remaining unchanged across versions.
    pub fn code(self) -> i32 {
        match self {
            LogicalType::Bool => 0,
            LogicalType::Short => 1,
            LogicalType::Int => 2,
            LogicalType::Long => 3,
            LogicalType::Float => 4,
            LogicalType::Double => 5,
            LogicalType::Decimal => 6,
            LogicalType::String => 7,
            LogicalType::Binary => 8,
            LogicalType::Xml => 9,
            LogicalType::Json => 10,
            LogicalType::NaiveDate => 11,
            LogicalType::NaiveDateTime => 12,
            LogicalType::UtcDateTime => 13,
            LogicalType::NaiveTime => 14,
        }
    }

    pub fn from_code(code: i32) -> Result<Self> {
        Ok(match code {
            0 => LogicalType::Bool,
            1 => LogicalType::Short,
            2 => LogicalType::Int,
            3 => LogicalType::Long,
            4 => LogicalType::Float,
            5 => LogicalType::Double,
            6 => LogicalType::Decimal,
            7 => LogicalType::String,
            8 => LogicalType::Binary,
            9 => LogicalType::Xml,
            10 => LogicalType::Json,
            11 => LogicalType::NaiveDate,
            12 => LogicalType::NaiveDateTime,
            13 => LogicalType::UtcDateTime,
            14 => LogicalType::NaiveTime,
            other => return Err(ConnectorError::UnknownLogicalType(other)),
        })
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// `(precision, scale)` for `DECIMAL` columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecimalParams {
    pub precision: u32,
    pub scale: u32,
}

/// A single logical column (§3).
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalColumn {
    pub name: String,
    pub logical_type: LogicalType,
    pub is_primary_key: bool,
    pub decimal: Option<DecimalParams>,
}

impl LogicalColumn {
    pub fn new(name: impl Into<String>, logical_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            logical_type,
            is_primary_key: false,
            decimal: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self
    }

    pub fn with_decimal(mut self, precision: u32, scale: u32) -> Self {
        self.decimal = Some(DecimalParams { precision, scale });
        self
    }
}

/// A logical table: an ordered sequence of columns, never reordered (§3 —
/// primary-key ordering and composite record identity depend on it).
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalTable {
    pub name: String,
    pub columns: Vec<LogicalColumn>,
}

impl LogicalTable {
    pub fn new(name: impl Into<String>, columns: Vec<LogicalColumn>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    /// Ordered primary-key columns, in declaration order (never sorted).
    pub fn primary_key_columns(&self) -> Vec<&LogicalColumn> {
        self.columns.iter().filter(|c| c.is_primary_key).collect()
    }

    /// Whether this table is in history mode: it declares `_fivetran_start`.
    pub fn is_history_mode(&self) -> bool {
        self.columns.iter().any(|c| c.name == "_fivetran_start")
    }

    /// Whether this table is in soft-delete mode: it declares
    /// `_fivetran_deleted` but is not itself history mode.
    pub fn is_soft_delete_mode(&self) -> bool {
        !self.is_history_mode() && self.columns.iter().any(|c| c.name == "_fivetran_deleted")
    }

    pub fn sync_mode(&self) -> SyncMode {
        if self.is_history_mode() {
            SyncMode::History
        } else if self.is_soft_delete_mode() {
            SyncMode::SoftDelete
        } else {
            SyncMode::Live
        }
    }
}

/// The three CDC sync modes a destination table can operate in (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Live,
    SoftDelete,
    History,
}

/// Database identifier validation. SurrealDB identifiers must start with a
/// letter or underscore and contain only ASCII letters, digits, and
/// underscores; this connector additionally caps length at 128 to keep
/// generated `DEFINE` statements reasonable.
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let first_ok = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if name.is_empty() || name.len() > 128 || !first_ok || !rest_ok {
        return Err(ConnectorError::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}

/// Structured payload stored in a field's comment so `DescribeTable` can
/// reconstruct the logical schema without a side catalog (§3 invariant:
/// "for every field defined by this connector, the comment deserializes to
/// valid metadata").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMetadata {
    pub ft_index: i64,
    pub ft_type: i32,
    pub decimal_precision: u32,
    pub is_primary_key: bool,
}

impl FieldMetadata {
    pub fn to_comment(&self) -> String {
        // Infallible: every field of this struct is directly serializable.
        serde_json::to_string(self).expect("FieldMetadata is always serializable")
    }

    pub fn from_comment(comment: &str) -> Result<Self> {
        serde_json::from_str(comment)
            .map_err(|e| ConnectorError::InvalidFieldMetadata(e.to_string()))
    }
}

/// A runtime value produced by coercing a CSV string cell, or read back
/// from SurrealDB. Deliberately separate from `serde_json::Value` since
/// `Decimal`/`Binary`/date-time variants need precise round-tripping that
/// JSON's number type cannot guarantee.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    String(String),
    Binary(Vec<u8>),
    Json(serde_json::Value),
    DateTime(DateTime<Utc>),
    NaiveDateTime(NaiveDateTime),
    /// Duration since midnight, for `NAIVE_TIME`.
    TimeOfDay(chrono::Duration),
}

/// The DEFINE FIELD TYPE clause emitted for a given logical type (§4.1).
/// JSON gets an additional wildcard inner-field declaration by the caller
/// (`schema.rs`) so unknown nested keys are accepted.
fn native_type_expr(logical_type: LogicalType, decimal: Option<DecimalParams>) -> Result<&'static str> {
    Ok(match logical_type {
        LogicalType::Bool => "bool",
        LogicalType::Short | LogicalType::Int | LogicalType::Long => "int",
        LogicalType::Float | LogicalType::Double => "float",
        LogicalType::Decimal => {
            let precision = decimal.map(|d| d.precision).unwrap_or(0);
            if precision <= MAX_NATIVE_DECIMAL_PRECISION {
                "decimal"
            } else {
                "float"
            }
        }
        LogicalType::String | LogicalType::Xml => "string",
        LogicalType::Binary => "bytes",
        LogicalType::Json => "object",
        LogicalType::NaiveDate | LogicalType::NaiveDateTime | LogicalType::UtcDateTime => {
            "datetime"
        }
        LogicalType::NaiveTime => "duration",
    })
}

/// A field-definition statement's shape, carrying the metadata comment
/// that makes `DescribeTable` possible (§3, §4.1).
#[derive(Debug, Clone)]
pub struct FieldDefinition {
    pub name: String,
    /// The full `TYPE` clause, e.g. `option<int>` or `array<any>`.
    pub type_expr: String,
    pub comment: String,
    /// Set for `JSON` fields: an additional wildcard inner-field
    /// declaration (`field.*`) so unknown nested keys are accepted.
    pub wildcard_inner_field: Option<String>,
}

/// Emits the field-definition statement shape for one logical column.
///
/// `ft_index` is the column's position in the logical table, used to
/// reconstruct declaration order on describe. `is_history_key_field` is
/// true for primary-key columns and `_fivetran_start` on history-mode
/// tables, which are always declared `array<any>` because the composite
/// key is an array (§4.1).
pub fn emit_field_definition(
    column: &LogicalColumn,
    ft_index: usize,
    is_history_key_field: bool,
) -> Result<FieldDefinition> {
    validate_identifier(&column.name)?;

    if let Some(params) = column.decimal {
        if params.precision == 0 {
            return Err(ConnectorError::InvalidConfigValue {
                field: "decimal.precision",
                value: params.precision.to_string(),
            });
        }
    }

    let metadata = FieldMetadata {
        ft_index: ft_index as i64,
        ft_type: column.logical_type.code(),
        decimal_precision: column.decimal.map(|d| d.precision).unwrap_or(0),
        is_primary_key: column.is_primary_key,
    };

    let type_expr = if is_history_key_field {
        "array<any>".to_string()
    } else {
        format!(
            "option<{}>",
            native_type_expr(column.logical_type, column.decimal)?
        )
    };

    let wildcard_inner_field = matches!(column.logical_type, LogicalType::Json)
        .then(|| format!("{}.*", column.name));

    Ok(FieldDefinition {
        name: column.name.clone(),
        type_expr,
        comment: metadata.to_comment(),
        wildcard_inner_field,
    })
}

/// Coerces a raw CSV string cell into a typed [`Value`], per the coercion
/// table in §4.1. Callers are expected to have already handled the
/// `null_string`/`unmodified_string` sentinels (§3) before calling this.
pub fn coerce(raw: &str, logical_type: LogicalType, decimal: Option<DecimalParams>) -> Result<Value> {
    let fail = |reason: String| ConnectorError::DecodeFailure {
        value: raw.to_string(),
        logical_type: logical_type.to_string(),
        reason,
    };

    Ok(match logical_type {
        LogicalType::Bool => match raw {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            other => return Err(fail(format!("expected `true`/`false`, got `{other}`"))),
        },
        LogicalType::Short | LogicalType::Int | LogicalType::Long => {
            Value::Int(raw.parse::<i64>().map_err(|e| fail(e.to_string()))?)
        }
        LogicalType::Float | LogicalType::Double => {
            Value::Float(raw.parse::<f64>().map_err(|e| fail(e.to_string()))?)
        }
        LogicalType::Decimal => {
            let precision = decimal.map(|d| d.precision).unwrap_or(0);
            if precision <= MAX_NATIVE_DECIMAL_PRECISION {
                Value::Decimal(raw.parse::<Decimal>().map_err(|e| fail(e.to_string()))?)
            } else {
                // Precision loss accepted per §4.1.
                Value::Float(raw.parse::<f64>().map_err(|e| fail(e.to_string()))?)
            }
        }
        LogicalType::String | LogicalType::Xml => Value::String(raw.to_string()),
        LogicalType::Binary => Value::Binary(raw.as_bytes().to_vec()),
        LogicalType::Json => {
            Value::Json(serde_json::from_str(raw).map_err(|e| fail(e.to_string()))?)
        }
        LogicalType::NaiveDate => {
            let date =
                NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| fail(e.to_string()))?;
            let datetime = date.and_hms_opt(0, 0, 0).ok_or_else(|| fail("invalid midnight".into()))?;
            Value::DateTime(Utc.from_utc_datetime(&datetime))
        }
        LogicalType::NaiveDateTime => {
            let datetime = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
                .map_err(|e| fail(e.to_string()))?;
            Value::NaiveDateTime(datetime)
        }
        LogicalType::UtcDateTime => {
            let datetime =
                DateTime::parse_from_rfc3339(raw).map_err(|e| fail(e.to_string()))?;
            Value::DateTime(datetime.with_timezone(&Utc))
        }
        LogicalType::NaiveTime => {
            let time =
                NaiveTime::parse_from_str(raw, "%H:%M:%S").map_err(|e| fail(e.to_string()))?;
            let midnight = NaiveTime::from_hms_opt(0, 0, 0).expect("midnight is always valid");
            Value::TimeOfDay(time - midnight)
        }
    })
}

/// Reconstructs a [`LogicalTable`]'s columns from stored field definitions
/// (name, comment) pairs, in original `ft_index` order (§4.2 `DescribeTable`,
/// §8 property 1: round-trip schema).
pub fn reconstruct_columns(fields: Vec<(String, String)>) -> Result<Vec<LogicalColumn>> {
    let mut indexed = Vec::with_capacity(fields.len());
    for (name, comment) in fields {
        let metadata = FieldMetadata::from_comment(&comment)?;
        let logical_type = LogicalType::from_code(metadata.ft_type)?;
        let decimal = (logical_type == LogicalType::Decimal && metadata.decimal_precision > 0)
            .then(|| DecimalParams {
                precision: metadata.decimal_precision,
                scale: 0,
            });
        indexed.push((
            metadata.ft_index,
            LogicalColumn {
                name,
                logical_type,
                is_primary_key: metadata.is_primary_key,
                decimal,
            },
        ));
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, column)| column).collect())
}

/// A lookup of a table's stored column types, keyed by column name — the
/// shape the CSV pipeline and PK assembler use to coerce each row without
/// re-parsing field comments per row.
pub type ColumnTypeMap = HashMap<String, (LogicalType, Option<DecimalParams>)>;

pub fn column_type_map(table: &LogicalTable) -> ColumnTypeMap {
    table
        .columns
        .iter()
        .map(|c| (c.name.clone(), (c.logical_type, c.decimal)))
        .collect()
}

/// Decodes a JSON value read back from storage into a typed [`Value`],
/// the read-path counterpart to [`coerce`]. Unlike `coerce`, the input is
/// already a `serde_json::Value` (SurrealDB's driver hands rows back as
/// JSON), not a raw CSV string.
fn value_from_json(json: &serde_json::Value, logical_type: LogicalType) -> Result<Value> {
    let fail = |reason: String| ConnectorError::DecodeFailure {
        value: json.to_string(),
        logical_type: logical_type.to_string(),
        reason,
    };

    if json.is_null() {
        return Ok(Value::Null);
    }

    Ok(match logical_type {
        LogicalType::Bool => Value::Bool(json.as_bool().ok_or_else(|| fail("not a bool".into()))?),
        LogicalType::Short | LogicalType::Int | LogicalType::Long => {
            Value::Int(json.as_i64().ok_or_else(|| fail("not an integer".into()))?)
        }
        LogicalType::Float | LogicalType::Double => {
            Value::Float(json.as_f64().ok_or_else(|| fail("not a float".into()))?)
        }
        LogicalType::Decimal => {
            if let Some(text) = json.as_str() {
                Value::Decimal(text.parse().map_err(|e: rust_decimal::Error| fail(e.to_string()))?)
            } else if let Some(f) = json.as_f64() {
                Value::Float(f)
            } else {
                return Err(fail("not a decimal-compatible value".into()));
            }
        }
        LogicalType::String | LogicalType::Xml => {
            Value::String(json.as_str().ok_or_else(|| fail("not a string".into()))?.to_string())
        }
        LogicalType::Binary => Value::Binary(
            json.as_array()
                .ok_or_else(|| fail("not a byte array".into()))?
                .iter()
                .map(|b| b.as_u64().map(|b| b as u8).ok_or_else(|| fail("not a byte".into())))
                .collect::<Result<Vec<u8>>>()?,
        ),
        LogicalType::Json => Value::Json(json.clone()),
        LogicalType::NaiveDate | LogicalType::NaiveDateTime | LogicalType::UtcDateTime => {
            let text = json.as_str().ok_or_else(|| fail("not a datetime string".into()))?;
            let datetime = DateTime::parse_from_rfc3339(text).map_err(|e| fail(e.to_string()))?;
            Value::DateTime(datetime.with_timezone(&Utc))
        }
        LogicalType::NaiveTime => {
            let millis = json.as_i64().ok_or_else(|| fail("not a duration".into()))?;
            Value::TimeOfDay(chrono::Duration::milliseconds(millis))
        }
    })
}

/// Decodes an entire row read back from storage, using `column_types` for
/// every recognized column and falling back to the raw JSON wrapped in
/// [`Value::Json`] for connector bookkeeping columns it doesn't own, or
/// any column absent from the logical schema.
pub fn decode_row(
    row: HashMap<String, serde_json::Value>,
    column_types: &ColumnTypeMap,
) -> Result<HashMap<String, Value>> {
    row.into_iter()
        .map(|(name, json)| {
            let value = match name.as_str() {
                "_fivetran_start" | "_fivetran_end" => {
                    value_from_json(&json, LogicalType::UtcDateTime)?
                }
                "_fivetran_active" => value_from_json(&json, LogicalType::Bool)?,
                _ => match column_types.get(&name) {
                    Some((logical_type, _)) => value_from_json(&json, *logical_type)?,
                    None => Value::Json(json),
                },
            };
            Ok((name, value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_bool() {
        assert_eq!(coerce("true", LogicalType::Bool, None).unwrap(), Value::Bool(true));
        assert_eq!(coerce("false", LogicalType::Bool, None).unwrap(), Value::Bool(false));
        assert!(coerce("yes", LogicalType::Bool, None).is_err());
    }

    #[test]
    fn test_coerce_decimal_native_vs_fallback() {
        let small = DecimalParams { precision: 10, scale: 2 };
        match coerce("123.45", LogicalType::Decimal, Some(small)).unwrap() {
            Value::Decimal(d) => assert_eq!(d.to_string(), "123.45"),
            other => panic!("expected Decimal, got {other:?}"),
        }

        let large = DecimalParams { precision: 40, scale: 2 };
        match coerce("123.45", LogicalType::Decimal, Some(large)).unwrap() {
            Value::Float(f) => assert!((f - 123.45).abs() < 1e-9),
            other => panic!("expected Float fallback, got {other:?}"),
        }
    }

    #[test]
    fn test_coerce_dates() {
        assert!(matches!(
            coerce("2024-01-02", LogicalType::NaiveDate, None).unwrap(),
            Value::DateTime(_)
        ));
        assert!(matches!(
            coerce("2024-01-02T03:04:05", LogicalType::NaiveDateTime, None).unwrap(),
            Value::NaiveDateTime(_)
        ));
        assert!(matches!(
            coerce("2024-01-02T03:04:05Z", LogicalType::UtcDateTime, None).unwrap(),
            Value::DateTime(_)
        ));
        assert!(matches!(
            coerce("03:04:05", LogicalType::NaiveTime, None).unwrap(),
            Value::TimeOfDay(_)
        ));
    }

    #[test]
    fn test_coerce_json_preserves_depth() {
        match coerce(r#"{"a":{"b":1}}"#, LogicalType::Json, None).unwrap() {
            Value::Json(v) => assert_eq!(v["a"]["b"], 1),
            other => panic!("expected Json, got {other:?}"),
        }
    }

    #[test]
    fn test_identifier_validation() {
        assert!(validate_identifier("user_id").is_ok());
        assert!(validate_identifier("_fivetran_start").is_ok());
        assert!(validate_identifier("1bad").is_err());
        assert!(validate_identifier("has space").is_err());
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn test_field_metadata_round_trip() {
        let metadata = FieldMetadata {
            ft_index: 3,
            ft_type: LogicalType::Decimal.code(),
            decimal_precision: 12,
            is_primary_key: false,
        };
        let comment = metadata.to_comment();
        let parsed = FieldMetadata::from_comment(&comment).unwrap();
        assert_eq!(parsed.ft_index, 3);
        assert_eq!(parsed.ft_type, LogicalType::Decimal.code());
        assert_eq!(parsed.decimal_precision, 12);
    }

    #[test]
    fn test_invalid_comment_is_rejected() {
        assert!(FieldMetadata::from_comment("not json").is_err());
    }

    #[test]
    fn test_history_key_fields_are_always_array_any() {
        let column = LogicalColumn::new("user_id", LogicalType::String).primary_key();
        let def = emit_field_definition(&column, 0, true).unwrap();
        assert_eq!(def.type_expr, "array<any>");
    }

    #[test]
    fn test_json_field_gets_wildcard_inner_field() {
        let column = LogicalColumn::new("payload", LogicalType::Json);
        let def = emit_field_definition(&column, 1, false).unwrap();
        assert_eq!(def.wildcard_inner_field.as_deref(), Some("payload.*"));
    }

    #[test]
    fn test_max_datetime_is_the_documented_sentinel() {
        let max = max_datetime();
        assert_eq!(max.to_rfc3339(), "9999-12-31T23:59:59+00:00");
    }

    #[test]
    fn test_sync_mode_detection() {
        let live = LogicalTable::new("t", vec![LogicalColumn::new("id", LogicalType::Int)]);
        assert_eq!(live.sync_mode(), SyncMode::Live);

        let soft_delete = LogicalTable::new(
            "t",
            vec![LogicalColumn::new("_fivetran_deleted", LogicalType::Bool)],
        );
        assert_eq!(soft_delete.sync_mode(), SyncMode::SoftDelete);

        let history = LogicalTable::new(
            "t",
            vec![LogicalColumn::new("_fivetran_start", LogicalType::UtcDateTime)],
        );
        assert_eq!(history.sync_mode(), SyncMode::History);
    }

    #[test]
    fn test_round_trip_schema_reconstructs_original_order() {
        let table = LogicalTable::new(
            "products",
            vec![
                LogicalColumn::new("id", LogicalType::Int).primary_key(),
                LogicalColumn::new("name", LogicalType::String),
                LogicalColumn::new("price", LogicalType::Float),
            ],
        );

        let mut fields = Vec::new();
        for (index, column) in table.columns.iter().enumerate() {
            let def = emit_field_definition(column, index, false).unwrap();
            fields.push((def.name, def.comment));
        }
        // Simulate storage returning fields out of declaration order.
        fields.reverse();

        let reconstructed = reconstruct_columns(fields).unwrap();
        let reconstructed_table = LogicalTable::new("products", reconstructed);
        assert_eq!(reconstructed_table, table);
    }
}
