//! Postgres-backed dataset storage.
//!
//! - One pooled connection and one transaction per upload
//! - Name-scoped `pg_advisory_xact_lock`, released with the transaction
//! - `COPY ... FROM STDIN (FORMAT csv)` per batch
//! - Registry upsert in the same transaction as the load

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow, PgSslMode};
use sqlx::{Postgres, Row as _, Transaction};
use tracing::{debug, error, info};

use super::{DatasetStore, RowSender, UploadSession};
use crate::domain::error::{IngestError, Result};
use crate::domain::{DatasetRecord, RegistryEntry, Row, SchemaDefinition, TableName};
use crate::infrastructure::config::StorageSettings;
use crate::infrastructure::csv::encode_copy_rows;

const REGISTRY_SCHEMA: &str = include_str!("../../../resources/schema/registry.sql");

pub struct PgDatasetStore {
    pool: PgPool,
}

impl PgDatasetStore {
    pub async fn connect(settings: &StorageSettings) -> Result<Self> {
        let url = settings.database_url.as_deref().ok_or_else(|| {
            IngestError::Config(
                "storage.database_url (or DATABASE_URL) is required for the postgres backend"
                    .to_string(),
            )
        })?;

        let mut options = PgConnectOptions::from_str(url)
            .map_err(|e| IngestError::Config(format!("Failed to parse database URL: {}", e)))?;
        if let Some(mode) = settings.ssl_mode.as_deref() {
            options = options.ssl_mode(parse_ssl_mode(mode));
        }

        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
            .connect_with(options)
            .await
            .map_err(|e| {
                error!("Failed to connect to PostgreSQL: {}", e);
                IngestError::Database(format!("Failed to connect to PostgreSQL: {}", e))
            })?;

        info!(
            max_connections = settings.max_connections,
            "Created PostgreSQL connection pool"
        );

        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the registry table if it does not exist yet.
    pub async fn init_registry(&self) -> Result<()> {
        sqlx::raw_sql(REGISTRY_SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("apply registry schema", e))?;
        Ok(())
    }
}

fn parse_ssl_mode(ssl_mode: &str) -> PgSslMode {
    match ssl_mode.to_lowercase().as_str() {
        "disable" => PgSslMode::Disable,
        "allow" => PgSslMode::Allow,
        "prefer" => PgSslMode::Prefer,
        "require" => PgSslMode::Require,
        "verify-ca" => PgSslMode::VerifyCa,
        "verify-full" => PgSslMode::VerifyFull,
        _ => PgSslMode::Prefer,
    }
}

fn db_error(action: &str, err: sqlx::Error) -> IngestError {
    error!(error = %err, "Failed to {}", action);
    IngestError::Database(format!("Failed to {}: {}", action, err))
}

async fn lock_name(tx: &mut Transaction<'static, Postgres>, table: &TableName) -> Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(table.as_str())
        .execute(&mut **tx)
        .await
        .map_err(|e| db_error("acquire table name lock", e))?;
    debug!(table = %table, "acquired table name lock");
    Ok(())
}

fn record_from_row(row: &PgRow, schema: &SchemaDefinition) -> Result<DatasetRecord> {
    let id: i64 = row
        .try_get("id")
        .map_err(|e| db_error("decode row id", e))?;
    let values = schema
        .columns
        .iter()
        .map(|column| {
            row.try_get::<Option<String>, _>(*column)
                .map(|value| value.unwrap_or_default())
        })
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| db_error("decode row values", e))?;
    Ok(DatasetRecord { id, values })
}

#[derive(sqlx::FromRow)]
struct RegistryEntity {
    table_name: String,
    dataset_type: String,
    row_count: i64,
    uploaded_at: DateTime<Utc>,
}

impl From<RegistryEntity> for RegistryEntry {
    fn from(entity: RegistryEntity) -> Self {
        Self {
            table_name: entity.table_name,
            dataset_type: entity.dataset_type,
            row_count: entity.row_count,
            uploaded_at: entity.uploaded_at,
        }
    }
}

#[async_trait]
impl DatasetStore for PgDatasetStore {
    async fn begin_upload(&self, table: &TableName) -> Result<Box<dyn UploadSession>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("begin upload transaction", e))?;
        lock_name(&mut tx, table).await?;
        Ok(Box::new(PgUploadSession { tx }))
    }

    async fn list_entries(&self) -> Result<Vec<RegistryEntry>> {
        let rows = sqlx::query_as::<_, RegistryEntity>(
            "SELECT table_name, dataset_type, row_count, uploaded_at
             FROM dataset_registry
             ORDER BY uploaded_at DESC, table_name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list datasets", e))?;

        Ok(rows.into_iter().map(RegistryEntry::from).collect())
    }

    async fn find_entry(&self, table: &TableName) -> Result<Option<RegistryEntry>> {
        let row = sqlx::query_as::<_, RegistryEntity>(
            "SELECT table_name, dataset_type, row_count, uploaded_at
             FROM dataset_registry
             WHERE table_name = $1",
        )
        .bind(table.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("fetch registry entry", e))?;

        Ok(row.map(RegistryEntry::from))
    }

    async fn drop_dataset(&self, table: &TableName) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("begin delete transaction", e))?;
        lock_name(&mut tx, table).await?;

        let removed = sqlx::query("DELETE FROM dataset_registry WHERE table_name = $1")
            .bind(table.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("delete registry entry", e))?
            .rows_affected();

        if removed == 0 {
            tx.rollback()
                .await
                .map_err(|e| db_error("roll back delete", e))?;
            return Err(IngestError::NotFound(format!("dataset {}", table)));
        }

        let sql = format!("DROP TABLE IF EXISTS {}", table.quoted());
        sqlx::query(&sql)
            .persistent(false)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("drop dataset table", e))?;

        tx.commit()
            .await
            .map_err(|e| db_error("commit delete", e))?;

        info!(table = %table, "dropped dataset");
        Ok(())
    }

    async fn find_rows(
        &self,
        table: &TableName,
        schema: &'static SchemaDefinition,
        column: &'static str,
        value: &str,
    ) -> Result<Vec<DatasetRecord>> {
        let sql = format!(
            "SELECT id, {} FROM {} WHERE {} = $1 ORDER BY {}, id",
            schema.column_list(),
            table.quoted(),
            column,
            schema.sort_key
        );

        let rows = sqlx::query(&sql)
            .persistent(false)
            .bind(value)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("search dataset", e))?;

        rows.iter()
            .map(|row| record_from_row(row, schema))
            .collect()
    }

    async fn stream_rows(
        &self,
        table: &TableName,
        schema: &'static SchemaDefinition,
        sink: RowSender,
    ) -> Result<()> {
        let sql = format!(
            "SELECT id, {} FROM {} ORDER BY id",
            schema.column_list(),
            table.quoted()
        );

        let mut rows = sqlx::query(&sql).persistent(false).fetch(&self.pool);
        while let Some(row) = rows
            .try_next()
            .await
            .map_err(|e| db_error("read dataset rows", e))?
        {
            let record = record_from_row(&row, schema)?;
            if sink.send(Ok(record.values)).await.is_err() {
                debug!(table = %table, "export consumer went away, closing cursor");
                break;
            }
        }

        Ok(())
    }
}

struct PgUploadSession {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UploadSession for PgUploadSession {
    async fn create_table(
        &mut self,
        table: &TableName,
        schema: &'static SchemaDefinition,
        replace: bool,
    ) -> Result<()> {
        if replace {
            let sql = format!("DROP TABLE IF EXISTS {}", table.quoted());
            sqlx::query(&sql)
                .persistent(false)
                .execute(&mut *self.tx)
                .await
                .map_err(|e| db_error("drop previous dataset table", e))?;
        } else {
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS (
                     SELECT 1 FROM pg_catalog.pg_tables
                     WHERE schemaname = current_schema() AND tablename = $1
                 )",
            )
            .bind(table.as_str())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| db_error("check for existing table", e))?;
            if exists {
                return Err(IngestError::TableExists(table.to_string()));
            }
        }

        let columns = schema
            .columns
            .iter()
            .map(|column| format!("{} TEXT", column))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "CREATE TABLE {} (id BIGSERIAL PRIMARY KEY, {})",
            table.quoted(),
            columns
        );
        sqlx::query(&sql)
            .persistent(false)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("create dataset table", e))?;

        for column in schema.searchable_columns() {
            let sql = format!("CREATE INDEX ON {} ({})", table.quoted(), column);
            sqlx::query(&sql)
                .persistent(false)
                .execute(&mut *self.tx)
                .await
                .map_err(|e| db_error("index dataset table", e))?;
        }

        Ok(())
    }

    async fn copy_batch(
        &mut self,
        table: &TableName,
        schema: &'static SchemaDefinition,
        rows: &[Row],
    ) -> Result<u64> {
        let statement = format!(
            "COPY {} ({}) FROM STDIN WITH (FORMAT csv)",
            table.quoted(),
            schema.column_list()
        );
        let payload = encode_copy_rows(rows)?;
        let bulk_error = |e: sqlx::Error| IngestError::BulkLoad {
            table: table.to_string(),
            message: e.to_string(),
        };

        let mut copy = self.tx.copy_in_raw(&statement).await.map_err(bulk_error)?;
        if let Err(e) = copy.send(payload).await {
            let message = e.to_string();
            if let Err(abort_err) = copy.abort(message.clone()).await {
                debug!(error = %abort_err, "COPY abort reported an error");
            }
            return Err(IngestError::BulkLoad {
                table: table.to_string(),
                message,
            });
        }

        copy.finish().await.map_err(bulk_error)
    }

    async fn upsert_registry(
        &mut self,
        table: &TableName,
        dataset_type: &str,
        row_count: u64,
    ) -> Result<()> {
        let row_count = i64::try_from(row_count)
            .map_err(|_| IngestError::Database(format!("row count {} out of range", row_count)))?;

        sqlx::query(
            "INSERT INTO dataset_registry (table_name, dataset_type, row_count, uploaded_at)
             VALUES ($1, $2, $3, now())
             ON CONFLICT (table_name) DO UPDATE
             SET dataset_type = EXCLUDED.dataset_type,
                 row_count = EXCLUDED.row_count,
                 uploaded_at = EXCLUDED.uploaded_at",
        )
        .bind(table.as_str())
        .bind(dataset_type)
        .bind(row_count)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("upsert registry entry", e))?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let PgUploadSession { tx } = *self;
        tx.commit()
            .await
            .map_err(|e| db_error("commit upload", e))
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let PgUploadSession { tx } = *self;
        tx.rollback()
            .await
            .map_err(|e| db_error("roll back upload", e))
    }
}
