//! surreal-fivetran-destination — a Fivetran destination connector for
//! SurrealDB.
//!
//! Applies encrypted, compressed CSV batches delivered by the Fivetran
//! pipeline against a SurrealDB database idempotently, in three sync
//! modes: live (current row state only), soft-delete (current state plus
//! a deletion marker), and history (every version of every row, bounded
//! by `[_fivetran_start, _fivetran_end]` with one `_fivetran_active` tail
//! per logical primary key).
//!
//! # Module map
//!
//! - [`types`] — the Type Mapper: logical ↔ SurrealDB type translation,
//!   value coercion, and field-metadata-comment encoding.
//! - [`schema`] — Table Definer/Describer built on [`store`].
//! - [`pk`] — Composite Record ID / PK Assembler.
//! - [`csv_pipeline`] + [`crypto`] — decrypt, decompress, parse batch
//!   files.
//! - [`write`] — live/soft-delete and history write operations, plus the
//!   history range-query engine.
//! - [`migration`] — the schema-migration dispatcher.
//! - [`truncate`] — the `Truncate` RPC's per-sync-mode data operation.
//! - [`store`] — the async `RecordStore` boundary to the SurrealDB driver.
//! - [`config`] — per-request configuration parsing.
//! - [`error`] — the connector-wide error taxonomy.
//! - [`metrics`] — process-wide atomic counters.
//! - [`rpc`] — the generated `Destination` gRPC service and its
//!   request/domain-type conversions.

pub mod config;
pub mod crypto;
pub mod csv_pipeline;
pub mod error;
pub mod metrics;
pub mod migration;
pub mod pk;
pub mod rpc;
pub mod schema;
pub mod store;
pub mod truncate;
pub mod types;
pub mod write;
