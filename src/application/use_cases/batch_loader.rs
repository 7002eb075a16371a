// ============================================================
// BATCH LOADER
// ============================================================
// Validates, projects and cleans parsed rows, then bulk-loads them in
// fixed-size batches through the upload session

use tracing::{debug, info, warn};

use crate::domain::error::{IngestError, Result};
use crate::domain::{FieldTruncation, Row, SchemaDefinition, TableName};
use crate::infrastructure::config::IngestSettings;
use crate::infrastructure::csv::CsvDocument;
use crate::infrastructure::db::UploadSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadLimits {
    /// Rows handed to one bulk-load call
    pub batch_size: usize,
    /// Per-field byte clamp, below the engine's single-field limit
    pub max_field_bytes: usize,
}

impl Default for LoadLimits {
    fn default() -> Self {
        Self::from(&IngestSettings::default())
    }
}

impl From<&IngestSettings> for LoadLimits {
    fn from(settings: &IngestSettings) -> Self {
        Self {
            batch_size: settings.batch_size.max(1),
            max_field_bytes: settings.max_field_bytes,
        }
    }
}

/// Positions of the schema's columns inside the uploaded header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    positions: Vec<usize>,
    header_len: usize,
}

impl ColumnMap {
    /// Map each schema column to its first occurrence in the normalized
    /// header. Later duplicates are ignored like any other extra column.
    pub fn resolve(headers: &[String], schema: &SchemaDefinition) -> Result<Self> {
        let positions = schema
            .columns
            .iter()
            .map(|column| headers.iter().position(|h| h == column))
            .collect::<Option<Vec<usize>>>()
            .ok_or_else(|| IngestError::UnrecognizedSchema {
                observed: headers.to_vec(),
            })?;

        Ok(Self {
            positions,
            header_len: headers.len(),
        })
    }
}

/// What one load pass did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub rows: u64,
    pub batches: usize,
    pub truncations: Vec<FieldTruncation>,
}

/// Clean one raw field for the bulk-load wire format.
///
/// Control characters other than line breaks are removed, surrounding
/// whitespace is trimmed and the result is cut to at most `max_bytes` on a
/// character boundary, then trimmed again. Returns the original byte length when it had to cut.
pub fn sanitize_field(raw: &str, max_bytes: usize) -> (String, Option<usize>) {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r'))
        .collect();
    let trimmed = cleaned.trim();

    if trimmed.len() <= max_bytes {
        return (trimmed.to_string(), None);
    }

    let mut end = max_bytes;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    // A cut can land just after inner whitespace.
    (trimmed[..end].trim_end().to_string(), Some(trimmed.len()))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BatchLoader {
    limits: LoadLimits,
}

impl BatchLoader {
    pub fn new(limits: LoadLimits) -> Self {
        Self { limits }
    }

    /// Load every remaining record of `document` into `table`. Any failure
    /// aborts the pass; the caller owns rollback of the session.
    pub async fn load(
        &self,
        document: &mut CsvDocument<'_>,
        columns: &ColumnMap,
        table: &TableName,
        schema: &'static SchemaDefinition,
        session: &mut dyn UploadSession,
    ) -> Result<LoadReport> {
        let mut report = LoadReport::default();
        let mut batch: Vec<Row> = Vec::with_capacity(self.limits.batch_size);

        for (index, record) in document.records().enumerate() {
            let row_number = index + 1;
            let record = record.map_err(|e| IngestError::Parse {
                row: row_number,
                message: e.to_string(),
            })?;

            if record.len() != columns.header_len {
                return Err(IngestError::MalformedRow {
                    row: row_number,
                    expected: columns.header_len,
                    actual: record.len(),
                });
            }

            let mut row = Vec::with_capacity(columns.positions.len());
            for (&position, &column) in columns.positions.iter().zip(schema.columns) {
                let (value, truncated_from) =
                    sanitize_field(&record[position], self.limits.max_field_bytes);
                if let Some(original_bytes) = truncated_from {
                    warn!(
                        table = %table,
                        row = row_number,
                        column,
                        original_bytes,
                        kept_bytes = value.len(),
                        "field exceeded byte limit and was truncated"
                    );
                    report.truncations.push(FieldTruncation {
                        row: row_number,
                        column,
                        original_bytes,
                        kept_bytes: value.len(),
                    });
                }
                row.push(value);
            }
            batch.push(row);

            if batch.len() == self.limits.batch_size {
                report.rows += self.flush(&mut batch, table, schema, session).await?;
                report.batches += 1;
            }
        }

        if !batch.is_empty() {
            report.rows += self.flush(&mut batch, table, schema, session).await?;
            report.batches += 1;
        }

        info!(
            table = %table,
            rows = report.rows,
            batches = report.batches,
            truncated = report.truncations.len(),
            "loaded rows"
        );
        Ok(report)
    }

    async fn flush(
        &self,
        batch: &mut Vec<Row>,
        table: &TableName,
        schema: &'static SchemaDefinition,
        session: &mut dyn UploadSession,
    ) -> Result<u64> {
        let expected = batch.len() as u64;
        let accepted = session.copy_batch(table, schema, batch).await?;
        if accepted != expected {
            return Err(IngestError::BulkLoad {
                table: table.to_string(),
                message: format!("engine accepted {} of {} rows", accepted, expected),
            });
        }
        debug!(table = %table, rows = accepted, "flushed batch");
        batch.clear();
        Ok(accepted)
    }
}
