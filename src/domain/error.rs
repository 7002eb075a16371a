use thiserror::Error;

use super::schema::{SCHEMAS, SEARCHABLE_COLUMNS};
use super::stage::Stage;

/// Every failure an ingestion or retrieval request can terminate with.
///
/// Variants carry the structured detail a client needs to fix its input
/// without access to server logs (row index, field counts, observed headers).
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("unable to decode file: {0}")]
    Decoding(String),

    #[error("unrecognized CSV schema (headers: {})", .observed.join(", "))]
    UnrecognizedSchema { observed: Vec<String> },

    #[error("row {row} has {actual} fields, expected {expected}")]
    MalformedRow {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("failed to parse row {row}: {message}")]
    Parse { row: usize, message: String },

    #[error("bulk load into {table} failed: {message}")]
    BulkLoad { table: String, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid table name: {0:?}")]
    InvalidIdentifier(String),

    #[error("field {0:?} is not searchable")]
    InvalidField(String),

    #[error("invalid upload: {0}")]
    InvalidUpload(String),

    #[error("table {0} already exists")]
    TableExists(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IngestError {
    /// Short machine-readable code used in error responses.
    pub fn code(&self) -> &'static str {
        match self {
            IngestError::Decoding(_) => "decoding_error",
            IngestError::UnrecognizedSchema { .. } => "unrecognized_schema",
            IngestError::MalformedRow { .. } => "malformed_row",
            IngestError::Parse { .. } => "parse_error",
            IngestError::BulkLoad { .. } => "bulk_load_error",
            IngestError::NotFound(_) => "not_found",
            IngestError::InvalidIdentifier(_) => "invalid_identifier",
            IngestError::InvalidField(_) => "invalid_field",
            IngestError::InvalidUpload(_) => "invalid_upload",
            IngestError::TableExists(_) => "table_exists",
            IngestError::Database(_) => "database_error",
            IngestError::Config(_) => "config_error",
            IngestError::Io(_) => "io_error",
        }
    }

    /// Pipeline stage the error belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            IngestError::InvalidUpload(_) | IngestError::Io(_) => Stage::File,
            IngestError::Decoding(_) => Stage::Encoding,
            IngestError::UnrecognizedSchema { .. } => Stage::Schema,
            IngestError::Parse { row: 0, .. } => Stage::Header,
            IngestError::MalformedRow { .. } | IngestError::Parse { .. } => Stage::Row,
            IngestError::BulkLoad { .. } => Stage::Copy,
            IngestError::InvalidIdentifier(_) | IngestError::InvalidField(_) => Stage::Request,
            IngestError::NotFound(_) | IngestError::TableExists(_) | IngestError::Database(_) => {
                Stage::Db
            }
            IngestError::Config(_) => Stage::Startup,
        }
    }

    pub fn hint(&self) -> Option<String> {
        match self {
            IngestError::Decoding(_) => {
                Some("save the file as UTF-8 or UTF-16 CSV and upload it again".to_string())
            }
            IngestError::UnrecognizedSchema { .. } => Some(format!(
                "the header must contain every column of one known layout: {}",
                SCHEMAS
                    .iter()
                    .map(|s| format!("{} ({})", s.name, s.columns.join(", ")))
                    .collect::<Vec<_>>()
                    .join("; ")
            )),
            IngestError::MalformedRow { row, .. } => Some(format!(
                "check data row {} for an unquoted comma or a missing field",
                row
            )),
            IngestError::InvalidIdentifier(_) => Some(
                "table names use letters, digits and underscores and cannot start with a digit"
                    .to_string(),
            ),
            IngestError::InvalidField(_) => Some(format!(
                "searchable fields: {}",
                SEARCHABLE_COLUMNS.join(", ")
            )),
            IngestError::InvalidUpload(_) => Some("upload a single `.csv` file".to_string()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
