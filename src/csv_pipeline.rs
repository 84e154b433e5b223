//! CSV batch ingestion pipeline (§4.5).
//!
//! Per file: open → decrypt (IV-prefixed AES-256-CBC) → optional zstd
//! decompression → CSV parse with a header row → one callback invocation
//! per data row. The first row-processing error aborts the remaining rows
//! in that file; the file handle is released on every exit path. A
//! header-only file (zero data rows) is a successful, empty batch.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use crate::error::{ConnectorError, Result};

/// Sentinels a batch file may use in place of a literal value (§3).
#[derive(Debug, Clone)]
pub struct Sentinels {
    pub null_string: String,
    pub unmodified_string: String,
}

/// One parsed CSV cell, already resolved against the sentinel strings.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Unmodified,
    Value(String),
}

impl Cell {
    fn resolve(raw: &str, sentinels: &Sentinels) -> Self {
        if raw == sentinels.null_string {
            Cell::Null
        } else if !sentinels.unmodified_string.is_empty() && raw == sentinels.unmodified_string {
            Cell::Unmodified
        } else {
            Cell::Value(raw.to_string())
        }
    }
}

/// A single parsed data row: column name to resolved cell, preserving the
/// header's column order.
pub type Row = Vec<(String, Cell)>;

/// Reads, decrypts, optionally decompresses, and parses one batch file,
/// invoking `on_row` for each data row in file order. Returns the number
/// of rows processed. Aborts (returning the first error) without calling
/// `on_row` for subsequent rows.
pub fn process_file(
    path: &Path,
    key: &[u8],
    compressed: bool,
    sentinels: &Sentinels,
    mut on_row: impl FnMut(Row) -> Result<()>,
) -> Result<usize> {
    let path_str = path.display().to_string();

    let raw = std::fs::read(path).map_err(|e| ConnectorError::FileOpen {
        path: path_str.clone(),
        source: e,
    })?;

    let decrypted = crate::crypto::decrypt(&path_str, key, &raw)?;

    let plaintext = if compressed {
        zstd::stream::decode_all(decrypted.as_slice()).map_err(|e| ConnectorError::Decompress {
            path: path_str.clone(),
            source: e,
        })?
    } else {
        decrypted
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(plaintext.as_slice());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| ConnectorError::CsvParse {
            path: path_str.clone(),
            source: e,
        })?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows_processed = 0usize;
    for record in reader.records() {
        let record = record.map_err(|e| ConnectorError::CsvParse {
            path: path_str.clone(),
            source: e,
        })?;

        let row: Row = headers
            .iter()
            .zip(record.iter())
            .map(|(name, value)| (name.clone(), Cell::resolve(value, sentinels)))
            .collect();

        on_row(row)?;
        rows_processed += 1;
    }

    Ok(rows_processed)
}

/// Reads an arbitrary byte source rather than a filesystem path, used by
/// tests so a batch file never has to touch disk.
pub fn process_reader(
    path_label: &str,
    mut source: impl Read,
    sentinels: &Sentinels,
    mut on_row: impl FnMut(Row) -> Result<()>,
) -> Result<usize> {
    let mut plaintext = Vec::new();
    source
        .read_to_end(&mut plaintext)
        .map_err(|e| ConnectorError::FileOpen {
            path: path_label.to_string(),
            source: e,
        })?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(plaintext.as_slice());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| ConnectorError::CsvParse {
            path: path_label.to_string(),
            source: e,
        })?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows_processed = 0usize;
    for record in reader.records() {
        let record = record.map_err(|e| ConnectorError::CsvParse {
            path: path_label.to_string(),
            source: e,
        })?;

        let row: Row = headers
            .iter()
            .zip(record.iter())
            .map(|(name, value)| (name.clone(), Cell::resolve(value, sentinels)))
            .collect();

        on_row(row)?;
        rows_processed += 1;
    }

    Ok(rows_processed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentinels() -> Sentinels {
        Sentinels {
            null_string: "NULL_SENTINEL".to_string(),
            unmodified_string: "UNMODIFIED_SENTINEL".to_string(),
        }
    }

    #[test]
    fn test_header_only_file_succeeds_with_zero_rows() {
        let csv = "id,name\n";
        let mut seen = 0;
        let count =
            process_reader("t.csv", csv.as_bytes(), &sentinels(), |_| {
                seen += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(count, 0);
        assert_eq!(seen, 0);
    }

    #[test]
    fn test_sentinels_are_resolved() {
        let csv = "id,name,email\n1,NULL_SENTINEL,UNMODIFIED_SENTINEL\n";
        let mut rows = Vec::new();
        process_reader("t.csv", csv.as_bytes(), &sentinels(), |row| {
            rows.push(row);
            Ok(())
        })
        .unwrap();

        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row[1].1, Cell::Null);
        assert_eq!(row[2].1, Cell::Unmodified);
        assert_eq!(row[0].1, Cell::Value("1".to_string()));
    }

    #[test]
    fn test_first_error_aborts_remaining_rows() {
        let csv = "id\n1\n2\n3\n";
        let mut seen = Vec::new();
        let err = process_reader("t.csv", csv.as_bytes(), &sentinels(), |row| {
            let id = row[0].1.clone();
            if id == Cell::Value("2".to_string()) {
                return Err(ConnectorError::Internal("boom".to_string()));
            }
            seen.push(id);
            Ok(())
        })
        .unwrap_err();

        assert!(matches!(err, ConnectorError::Internal(_)));
        assert_eq!(seen, vec![Cell::Value("1".to_string())]);
    }

    #[test]
    fn test_empty_unmodified_string_disables_that_sentinel() {
        let sentinels = Sentinels {
            null_string: "NULL".to_string(),
            unmodified_string: String::new(),
        };
        let csv = "id,name\n1,\n";
        let mut rows = Vec::new();
        process_reader("t.csv", csv.as_bytes(), &sentinels, |row| {
            rows.push(row);
            Ok(())
        })
        .unwrap();
        assert_eq!(rows[0][1].1, Cell::Value(String::new()));
    }
}
