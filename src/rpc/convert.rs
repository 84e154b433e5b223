//! Conversions between generated protobuf messages and this connector's
//! domain types (§4.1, §4.2). Kept separate from `types.rs` because the
//! wire-level `DataType` enum ordinals are a transport detail, distinct from
//! the `ft_type` codes [`crate::types::LogicalType::code`] persists into a
//! field's stored comment.

use std::collections::HashMap;

use crate::error::{ConnectorError, Result};
use crate::types::{DecimalParams, LogicalColumn, LogicalTable, LogicalType};

use super::pb;

/// Maps a wire `DataType` ordinal onto its logical type.
pub fn logical_type_from_wire(data_type: i32) -> Result<LogicalType> {
    Ok(match data_type {
        1 => LogicalType::Bool,
        2 => LogicalType::Short,
        3 => LogicalType::Int,
        4 => LogicalType::Long,
        5 => LogicalType::Float,
        6 => LogicalType::Double,
        7 => LogicalType::Decimal,
        8 => LogicalType::String,
        9 => LogicalType::Binary,
        10 => LogicalType::Xml,
        11 => LogicalType::Json,
        12 => LogicalType::NaiveDate,
        13 => LogicalType::NaiveDateTime,
        14 => LogicalType::UtcDateTime,
        15 => LogicalType::NaiveTime,
        other => return Err(ConnectorError::UnknownLogicalType(other)),
    })
}

/// The inverse of [`logical_type_from_wire`], for `DescribeTable` responses.
pub fn logical_type_to_wire(logical_type: LogicalType) -> i32 {
    match logical_type {
        LogicalType::Bool => 1,
        LogicalType::Short => 2,
        LogicalType::Int => 3,
        LogicalType::Long => 4,
        LogicalType::Float => 5,
        LogicalType::Double => 6,
        LogicalType::Decimal => 7,
        LogicalType::String => 8,
        LogicalType::Binary => 9,
        LogicalType::Xml => 10,
        LogicalType::Json => 11,
        LogicalType::NaiveDate => 12,
        LogicalType::NaiveDateTime => 13,
        LogicalType::UtcDateTime => 14,
        LogicalType::NaiveTime => 15,
    }
}

/// Converts a wire `Table` into the logical schema the write/migration
/// modules operate on.
pub fn table_from_wire(table: &pb::Table) -> Result<LogicalTable> {
    let columns = table
        .columns
        .iter()
        .map(column_from_wire)
        .collect::<Result<Vec<_>>>()?;
    Ok(LogicalTable::new(table.name.clone(), columns))
}

fn column_from_wire(column: &pb::Column) -> Result<LogicalColumn> {
    let logical_type = logical_type_from_wire(column.r#type)?;
    let mut logical = LogicalColumn::new(column.name.clone(), logical_type);
    if column.primary_key {
        logical = logical.primary_key();
    }
    if let Some(decimal) = &column.decimal {
        if decimal.precision > 0 {
            logical = logical.with_decimal(decimal.precision, decimal.scale);
        }
    }
    Ok(logical)
}

/// Converts a logical schema back into a wire `Table`, for `DescribeTable`
/// responses (§8 property 1: round-trip schema modulo `ft_index` order,
/// which `reconstruct_columns` already restores before this runs).
pub fn table_to_wire(table: &LogicalTable) -> pb::Table {
    pb::Table {
        name: table.name.clone(),
        columns: table.columns.iter().map(column_to_wire).collect(),
    }
}

fn column_to_wire(column: &LogicalColumn) -> pb::Column {
    pb::Column {
        name: column.name.clone(),
        r#type: logical_type_to_wire(column.logical_type),
        primary_key: column.is_primary_key,
        decimal: column.decimal.map(|d| pb::DecimalParams {
            precision: d.precision,
            scale: d.scale,
        }),
    }
}

/// Flattens the wire `Configuration` map into the plain map
/// [`crate::config::Config::from_map`] expects.
pub fn config_map(configuration: &Option<pb::Configuration>) -> HashMap<String, String> {
    configuration
        .as_ref()
        .map(|c| c.entries.clone())
        .unwrap_or_default()
}
