//! Dataset storage.
//!
//! The ingestion pipeline only talks to storage through [`DatasetStore`] and the
//! transactional [`UploadSession`] it hands out. Two backends implement them:
//! Postgres for real deployments and an in-process store for local runs and
//! tests.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::error::Result;
use crate::domain::{DatasetRecord, RegistryEntry, Row, SchemaDefinition, TableName};

pub use memory::MemoryDatasetStore;
pub use postgres::PgDatasetStore;

/// Rows sent by [`DatasetStore::stream_rows`]. A failed read ends the stream
/// with one `Err`.
pub type RowSender = mpsc::Sender<Result<Row>>;

#[async_trait]
pub trait DatasetStore: Send + Sync {
    /// Open the unit of work for one upload. The name-scoped lock for `table`
    /// is held until the session commits, rolls back or is dropped.
    async fn begin_upload(&self, table: &TableName) -> Result<Box<dyn UploadSession>>;

    /// Registry entries, most recent upload first.
    async fn list_entries(&self) -> Result<Vec<RegistryEntry>>;

    async fn find_entry(&self, table: &TableName) -> Result<Option<RegistryEntry>>;

    /// Drop the table and its registry entry together. `NotFound` when the
    /// table is not registered.
    async fn drop_dataset(&self, table: &TableName) -> Result<()>;

    /// Rows whose `column` equals `value`, ordered by the schema's sort key.
    async fn find_rows(
        &self,
        table: &TableName,
        schema: &'static SchemaDefinition,
        column: &'static str,
        value: &str,
    ) -> Result<Vec<DatasetRecord>>;

    /// Push every row of `table` in schema column order into `sink`. Blocks
    /// while the sink is full and stops early once its receiver is gone.
    async fn stream_rows(
        &self,
        table: &TableName,
        schema: &'static SchemaDefinition,
        sink: RowSender,
    ) -> Result<()>;
}

/// Storage side of one upload. Nothing written through a session is visible
/// to other readers before [`UploadSession::commit`]; dropping a session
/// without committing discards its work.
#[async_trait]
pub trait UploadSession: Send {
    /// Create the dataset table. With `replace`, an existing table of the same
    /// name is dropped first; otherwise an existing table is `TableExists`.
    async fn create_table(
        &mut self,
        table: &TableName,
        schema: &'static SchemaDefinition,
        replace: bool,
    ) -> Result<()>;

    /// Bulk-load one batch, returning the number of rows the engine accepted.
    async fn copy_batch(
        &mut self,
        table: &TableName,
        schema: &'static SchemaDefinition,
        rows: &[Row],
    ) -> Result<u64>;

    async fn upsert_registry(
        &mut self,
        table: &TableName,
        dataset_type: &str,
        row_count: u64,
    ) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
