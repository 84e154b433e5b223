//! `DestinationService` (§6, §9): the generated `Destination` trait's sole
//! implementor. Every method follows the teacher's thin-wrapper-over-an-
//! `_impl`-function shape (`src/api.rs`'s pattern of delegating to a
//! `Result`-returning inner function and converting the error at the
//! boundary) adapted to gRPC's response-oneof idiom instead of a panicking
//! error macro: the inner function returns `crate::error::Result<T>`, and
//! the wrapper turns `Err` into both a `tracing::error!` log call and the
//! response message's `Warning` variant (§7 propagation rule), never a
//! `tonic::Status` failure — a destination connector reports failures as
//! data, not as transport errors, so a caller always gets a well-formed
//! response to act on.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use tonic::{Request, Response, Status};

use crate::config::Config;
use crate::csv_pipeline::{self, Cell, Row, Sentinels};
use crate::error::{ConnectorError, Result};
use crate::metrics::Metrics;
use crate::migration;
use crate::schema;
use crate::store::{RecordStore, SurrealStore};
use crate::truncate;
use crate::types::{self, LogicalTable, LogicalType, SyncMode, Value};
use crate::write::{history, live};

use super::convert;
use super::pb;

/// Destination gRPC service. Holds only the process-wide [`Metrics`]
/// counters (§5: "Shared state... a logger, an optional metrics sink");
/// every other piece of state (the database connection) is request-scoped,
/// constructed fresh per call via [`SurrealStore::connect`].
#[derive(Debug)]
pub struct DestinationService {
    metrics: Metrics,
}

impl DestinationService {
    pub fn new(metrics: Metrics) -> Self {
        Self { metrics }
    }
}

fn warning_of(err: ConnectorError) -> pb::Warning {
    tracing::error!(kind = %err.kind(), "{err}");
    pb::Warning {
        message: err.to_string(),
    }
}

fn key_for<'a>(keys: &'a HashMap<String, Vec<u8>>, path: &str) -> Result<&'a [u8]> {
    keys.get(path).map(Vec::as_slice).ok_or_else(|| {
        ConnectorError::Internal(format!("no decryption key supplied for file `{path}`"))
    })
}

fn read_rows(path: &str, key: &[u8], compressed: bool, sentinels: &Sentinels) -> Result<Vec<Row>> {
    let mut rows = Vec::new();
    csv_pipeline::process_file(Path::new(path), key, compressed, sentinels, |row| {
        rows.push(row);
        Ok(())
    })?;
    Ok(rows)
}

/// Reads a row's own `_fivetran_start` cell as a UTC timestamp — the
/// earliest-start cutoff (phase 1) and the new version's start (phases 2
/// and 3) are both carried on the row itself, never supplied separately by
/// the request (§4.6).
fn row_fivetran_start(row: &Row) -> Result<DateTime<Utc>> {
    let cell = row
        .iter()
        .find(|(name, _)| name == "_fivetran_start")
        .map(|(_, cell)| cell)
        .ok_or_else(|| ConnectorError::ColumnMissingFromRow("_fivetran_start".to_string()))?;
    match cell {
        Cell::Value(raw) => match types::coerce(raw, LogicalType::UtcDateTime, None)? {
            Value::DateTime(dt) => Ok(dt),
            _ => unreachable!("UtcDateTime coercion always yields Value::DateTime"),
        },
        Cell::Null | Cell::Unmodified => {
            Err(ConnectorError::ColumnMissingFromRow("_fivetran_start".to_string()))
        }
    }
}

fn sentinels_of(file_params: &pb::FileParams) -> Sentinels {
    Sentinels {
        null_string: file_params.null_string.clone(),
        unmodified_string: file_params.unmodified_string.clone(),
    }
}

/// Applies a live/soft-delete `WriteBatch` (§4.5). Phase order within the
/// batch is replace, then update, then delete; within each phase, file
/// order then row order (§5).
async fn apply_write_batch(
    store: &dyn RecordStore,
    table: &LogicalTable,
    replace_files: &[String],
    update_files: &[String],
    delete_files: &[String],
    keys: &HashMap<String, Vec<u8>>,
    file_params: &pb::FileParams,
    metrics: &Metrics,
) -> Result<()> {
    if table.sync_mode() == SyncMode::History {
        return Err(ConnectorError::Internal(
            "history-mode table written via WriteBatch; use WriteHistoryBatch".to_string(),
        ));
    }

    let sentinels = sentinels_of(file_params);
    let compressed = file_params.compression == "zstd";

    for path in replace_files {
        let key = key_for(keys, path)?;
        for row in read_rows(path, key, compressed, &sentinels)? {
            live::apply_replace(store, table, row).await?;
            metrics.record_row_written();
        }
    }
    for path in update_files {
        let key = key_for(keys, path)?;
        for row in read_rows(path, key, compressed, &sentinels)? {
            live::apply_update(store, table, row).await?;
            metrics.record_row_written();
        }
    }
    for path in delete_files {
        let key = key_for(keys, path)?;
        for row in read_rows(path, key, compressed, &sentinels)? {
            live::apply_delete(store, table, row).await?;
            metrics.record_row_deleted();
        }
    }

    metrics.record_batch_processed();
    Ok(())
}

/// Applies a history-mode `WriteHistoryBatch` (§4.6). Fixed phase order:
/// earliest-start, replace, update, delete.
async fn apply_write_history_batch(
    store: &dyn RecordStore,
    table: &LogicalTable,
    earliest_start_files: &[String],
    replace_files: &[String],
    update_files: &[String],
    delete_files: &[String],
    keys: &HashMap<String, Vec<u8>>,
    file_params: &pb::FileParams,
    metrics: &Metrics,
) -> Result<()> {
    if table.sync_mode() != SyncMode::History {
        return Err(ConnectorError::Internal(
            "non-history table written via WriteHistoryBatch".to_string(),
        ));
    }

    let sentinels = sentinels_of(file_params);
    let compressed = file_params.compression == "zstd";

    for path in earliest_start_files {
        let key = key_for(keys, path)?;
        for row in read_rows(path, key, compressed, &sentinels)? {
            let cutoff = row_fivetran_start(&row)?;
            history::apply_earliest_start(store, table, row, cutoff).await?;
        }
    }
    for path in replace_files {
        let key = key_for(keys, path)?;
        for row in read_rows(path, key, compressed, &sentinels)? {
            let start = row_fivetran_start(&row)?;
            history::apply_replace(store, table, row, start).await?;
            metrics.record_row_written();
        }
    }
    for path in update_files {
        let key = key_for(keys, path)?;
        for row in read_rows(path, key, compressed, &sentinels)? {
            let start = row_fivetran_start(&row)?;
            history::apply_update(store, table, row, start).await?;
            metrics.record_row_written();
        }
    }
    for path in delete_files {
        let key = key_for(keys, path)?;
        for row in read_rows(path, key, compressed, &sentinels)? {
            history::apply_delete(store, table, row, Utc::now()).await?;
            metrics.record_row_deleted();
        }
    }

    metrics.record_batch_processed();
    Ok(())
}

async fn run_test(config_map: &HashMap<String, String>) -> Result<()> {
    let config = Config::from_map(config_map)?;
    SurrealStore::connect(&config).await?;
    Ok(())
}

async fn run_describe_table(config_map: &HashMap<String, String>, table_name: &str) -> Result<LogicalTable> {
    let config = Config::from_map(config_map)?;
    let store = SurrealStore::connect(&config).await?;
    schema::describe_table(&store, table_name).await
}

async fn run_create_table(config_map: &HashMap<String, String>, table_wire: &pb::Table) -> Result<()> {
    let config = Config::from_map(config_map)?;
    let table = convert::table_from_wire(table_wire)?;
    let store = SurrealStore::connect(&config).await?;
    schema::define_table(&store, &table).await
}

async fn run_alter_table(config_map: &HashMap<String, String>, table_wire: &pb::Table) -> Result<()> {
    let config = Config::from_map(config_map)?;
    let incoming = convert::table_from_wire(table_wire)?;
    let store = SurrealStore::connect(&config).await?;
    let existing = schema::describe_table(&store, &incoming.name).await?;
    migration::apply(&store, &existing, &incoming).await
}

async fn run_truncate(
    config_map: &HashMap<String, String>,
    table_name: &str,
    cutoff_millis: i64,
    synced_column: &str,
    soft: bool,
) -> Result<()> {
    let config = Config::from_map(config_map)?;
    let store = SurrealStore::connect(&config).await?;
    let table = schema::describe_table(&store, table_name).await?;
    let cutoff = Utc.timestamp_millis_opt(cutoff_millis).single().ok_or_else(|| {
        ConnectorError::InvalidConfigValue {
            field: "utc_delete_before_epoch_millis",
            value: cutoff_millis.to_string(),
        }
    })?;
    truncate::apply(&store, &table, synced_column, cutoff, soft).await
}

#[tonic::async_trait]
impl pb::destination_server::Destination for DestinationService {
    async fn configuration_form(
        &self,
        _request: Request<pb::ConfigurationFormRequest>,
    ) -> std::result::Result<Response<pb::ConfigurationFormResponse>, Status> {
        Ok(Response::new(pb::ConfigurationFormResponse {
            fields: vec![
                "url".to_string(),
                "ns".to_string(),
                "auth_level".to_string(),
                "user".to_string(),
                "pass".to_string(),
                "token".to_string(),
            ],
        }))
    }

    async fn test(
        &self,
        request: Request<pb::TestRequest>,
    ) -> std::result::Result<Response<pb::TestResponse>, Status> {
        let req = request.into_inner();
        let config_map = convert::config_map(&req.configuration);
        let response = match run_test(&config_map).await {
            Ok(()) => pb::test_response::Response::Success(true),
            Err(err) => {
                tracing::error!(kind = %err.kind(), "{err}");
                pb::test_response::Response::Failure(err.to_string())
            }
        };
        Ok(Response::new(pb::TestResponse {
            response: Some(response),
        }))
    }

    async fn describe_table(
        &self,
        request: Request<pb::DescribeTableRequest>,
    ) -> std::result::Result<Response<pb::DescribeTableResponse>, Status> {
        let req = request.into_inner();
        let config_map = convert::config_map(&req.configuration);
        let response = match run_describe_table(&config_map, &req.table_name).await {
            Ok(table) => pb::describe_table_response::Response::Table(convert::table_to_wire(&table)),
            Err(err) if err.is_not_found() => {
                tracing::debug!("table `{}` not found", req.table_name);
                pb::describe_table_response::Response::NotFound(pb::NotFound {
                    message: err.to_string(),
                })
            }
            Err(err) => pb::describe_table_response::Response::Warning(warning_of(err)),
        };
        Ok(Response::new(pb::DescribeTableResponse {
            response: Some(response),
        }))
    }

    async fn create_table(
        &self,
        request: Request<pb::CreateTableRequest>,
    ) -> std::result::Result<Response<pb::CreateTableResponse>, Status> {
        let req = request.into_inner();
        let config_map = convert::config_map(&req.configuration);
        let response = match &req.table {
            Some(table_wire) => match run_create_table(&config_map, table_wire).await {
                Ok(()) => pb::create_table_response::Response::Success(true),
                Err(err) => pb::create_table_response::Response::Warning(warning_of(err)),
            },
            None => pb::create_table_response::Response::Warning(warning_of(
                ConnectorError::MissingConfigField("table"),
            )),
        };
        Ok(Response::new(pb::CreateTableResponse {
            response: Some(response),
        }))
    }

    async fn alter_table(
        &self,
        request: Request<pb::AlterTableRequest>,
    ) -> std::result::Result<Response<pb::AlterTableResponse>, Status> {
        let req = request.into_inner();
        let config_map = convert::config_map(&req.configuration);
        let response = match &req.table {
            Some(table_wire) => match run_alter_table(&config_map, table_wire).await {
                Ok(()) => pb::alter_table_response::Response::Success(true),
                Err(err) => pb::alter_table_response::Response::Warning(warning_of(err)),
            },
            None => pb::alter_table_response::Response::Warning(warning_of(
                ConnectorError::MissingConfigField("table"),
            )),
        };
        Ok(Response::new(pb::AlterTableResponse {
            response: Some(response),
        }))
    }

    async fn truncate(
        &self,
        request: Request<pb::TruncateRequest>,
    ) -> std::result::Result<Response<pb::TruncateResponse>, Status> {
        let req = request.into_inner();
        let config_map = convert::config_map(&req.configuration);
        let response = match run_truncate(
            &config_map,
            &req.table_name,
            req.utc_delete_before_epoch_millis,
            &req.synced_column,
            req.soft.unwrap_or(false),
        )
        .await
        {
            Ok(()) => pb::truncate_response::Response::Success(true),
            Err(err) => pb::truncate_response::Response::Warning(warning_of(err)),
        };
        Ok(Response::new(pb::TruncateResponse {
            response: Some(response),
        }))
    }

    async fn write_batch(
        &self,
        request: Request<pb::WriteBatchRequest>,
    ) -> std::result::Result<Response<pb::WriteBatchResponse>, Status> {
        let req = request.into_inner();
        let config_map = convert::config_map(&req.configuration);
        let response = match run_write_batch(&config_map, &req, &self.metrics).await {
            Ok(()) => pb::write_batch_response::Response::Success(true),
            Err(err) => {
                self.metrics.record_batch_error();
                pb::write_batch_response::Response::Warning(warning_of(err))
            }
        };
        Ok(Response::new(pb::WriteBatchResponse {
            response: Some(response),
        }))
    }

    async fn write_history_batch(
        &self,
        request: Request<pb::WriteHistoryBatchRequest>,
    ) -> std::result::Result<Response<pb::WriteBatchResponse>, Status> {
        let req = request.into_inner();
        let config_map = convert::config_map(&req.configuration);
        let response = match run_write_history_batch(&config_map, &req, &self.metrics).await {
            Ok(()) => pb::write_batch_response::Response::Success(true),
            Err(err) => {
                self.metrics.record_batch_error();
                pb::write_batch_response::Response::Warning(warning_of(err))
            }
        };
        Ok(Response::new(pb::WriteBatchResponse {
            response: Some(response),
        }))
    }

    async fn capabilities(
        &self,
        _request: Request<pb::CapabilitiesRequest>,
    ) -> std::result::Result<Response<pb::CapabilitiesResponse>, Status> {
        // §[SUPPLEMENT-1]: a fixed capability set reflecting what this
        // connector actually implements, not a negotiated subset.
        Ok(Response::new(pb::CapabilitiesResponse {
            supported_selection_types: vec![
                "COMPOSITE_PRIMARY_KEY".to_string(),
                "HISTORY_MODE".to_string(),
                "SOFT_DELETE".to_string(),
            ],
        }))
    }
}

async fn run_write_batch(
    config_map: &HashMap<String, String>,
    req: &pb::WriteBatchRequest,
    metrics: &Metrics,
) -> Result<()> {
    let config = Config::from_map(config_map)?;
    let table_wire = req
        .table
        .as_ref()
        .ok_or(ConnectorError::MissingConfigField("table"))?;
    let table = convert::table_from_wire(table_wire)?;
    let store = SurrealStore::connect(&config).await?;
    let file_params = req.file_params.clone().unwrap_or_default();
    apply_write_batch(
        &store,
        &table,
        &req.replace_files,
        &req.update_files,
        &req.delete_files,
        &req.keys,
        &file_params,
        metrics,
    )
    .await
}

async fn run_write_history_batch(
    config_map: &HashMap<String, String>,
    req: &pb::WriteHistoryBatchRequest,
    metrics: &Metrics,
) -> Result<()> {
    let config = Config::from_map(config_map)?;
    let table_wire = req
        .table
        .as_ref()
        .ok_or(ConnectorError::MissingConfigField("table"))?;
    let table = convert::table_from_wire(table_wire)?;
    let store = SurrealStore::connect(&config).await?;
    let file_params = req.file_params.clone().unwrap_or_default();
    apply_write_history_batch(
        &store,
        &table,
        &req.earliest_start_files,
        &req.replace_files,
        &req.update_files,
        &req.delete_files,
        &req.keys,
        &file_params,
        metrics,
    )
    .await
}
