// ============================================================
// RETRIEVER
// ============================================================
// Registry listing, dataset deletion, point lookups and streamed export
// against already-committed dataset tables

use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::stream::{self, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::domain::error::{IngestError, Result};
use crate::domain::{
    RegistryEntry, SchemaDefinition, SearchResult, TableName, SEARCHABLE_COLUMNS,
};
use crate::infrastructure::csv::encode_record;
use crate::infrastructure::db::DatasetStore;

pub type ExportBody = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// A dataset export ready to be written to a client. Rows are produced lazily.
pub struct CsvExport {
    pub file_name: String,
    pub body: ExportBody,
}

pub struct Retriever {
    store: Arc<dyn DatasetStore>,
    buffer_rows: usize,
}

impl Retriever {
    pub fn new(store: Arc<dyn DatasetStore>, buffer_rows: usize) -> Self {
        Self {
            store,
            buffer_rows: buffer_rows.max(1),
        }
    }

    pub async fn list(&self) -> Result<Vec<RegistryEntry>> {
        self.store.list_entries().await
    }

    pub async fn delete(&self, table: &str) -> Result<()> {
        let table = TableName::parse(table)?;
        self.store.drop_dataset(&table).await?;
        info!(table = %table, "dataset deleted");
        Ok(())
    }

    /// Rows of `table` whose `field` equals `value` (surrounding whitespace
    /// ignored). No match is an empty result, not an error.
    pub async fn search(&self, table: &str, field: &str, value: &str) -> Result<SearchResult> {
        let table = TableName::parse(table)?;
        if !SEARCHABLE_COLUMNS.contains(&field) {
            return Err(IngestError::InvalidField(field.to_string()));
        }

        let schema = self.registered_schema(&table).await?;
        let column = schema
            .column(field)
            .ok_or_else(|| IngestError::InvalidField(field.to_string()))?;

        let records = self
            .store
            .find_rows(&table, schema, column, value.trim())
            .await?;
        debug!(table = %table, column, hits = records.len(), "point lookup");

        Ok(SearchResult {
            columns: schema.columns,
            records,
        })
    }

    /// Header line in canonical column order, then one line per stored row.
    /// Storage reads run ahead of the consumer by at most `buffer_rows` rows.
    pub async fn export(&self, table: &str) -> Result<CsvExport> {
        let table = TableName::parse(table)?;
        let schema = self.registered_schema(&table).await?;
        let header = Bytes::from(encode_record(schema.columns)?);

        let (tx, rx) = mpsc::channel(self.buffer_rows);
        let store = Arc::clone(&self.store);
        let producer_table = table.clone();
        tokio::spawn(async move {
            let errors = tx.clone();
            if let Err(e) = store.stream_rows(&producer_table, schema, tx).await {
                warn!(table = %producer_table, error = %e, "export read failed");
                let _ = errors.send(Err(e)).await;
            }
        });

        let rows = ReceiverStream::new(rx)
            .map(|row| row.and_then(|values| encode_record(&values)).map(Bytes::from));
        let body = stream::iter([Ok::<_, IngestError>(header)]).chain(rows);

        info!(table = %table, "export started");
        Ok(CsvExport {
            file_name: format!("{}.csv", table),
            body: Box::pin(body),
        })
    }

    /// Registry is the source of truth for which dataset tables exist; other
    /// tables are never reachable through retrieval.
    async fn registered_schema(&self, table: &TableName) -> Result<&'static SchemaDefinition> {
        let entry = self
            .store
            .find_entry(table)
            .await?
            .ok_or_else(|| IngestError::NotFound(format!("dataset {}", table)))?;

        SchemaDefinition::by_name(&entry.dataset_type).ok_or_else(|| {
            IngestError::Database(format!(
                "dataset {} has unknown type {}",
                table, entry.dataset_type
            ))
        })
    }
}
