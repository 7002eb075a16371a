use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One data line of an upload: raw field strings in file order.
pub type Row = Vec<String>;

/// Uploaded bytes together with the client's file name.
#[derive(Debug, Clone)]
pub struct RawPayload {
    pub source_name: String,
    pub bytes: Vec<u8>,
}

impl RawPayload {
    pub fn new(source_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            source_name: source_name.into(),
            bytes: bytes.into(),
        }
    }
}

/// Text recovered from a payload and the label of the encoding that read it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedText {
    pub text: String,
    pub encoding: &'static str,
}

/// How table names are derived for repeated uploads of the same file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamingPolicy {
    /// `{schema}_{stem}_{YYYYMMDD_HHMMSS}`: every upload creates a new dataset.
    #[default]
    Timestamped,
    /// `{schema}_{stem}`: a new upload replaces the previous table in place.
    Replace,
}

/// Registry metadata for one dataset table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistryEntry {
    #[serde(rename = "table")]
    pub table_name: String,
    #[serde(rename = "type")]
    pub dataset_type: String,
    #[serde(rename = "rows")]
    pub row_count: i64,
    pub uploaded_at: DateTime<Utc>,
}

/// A field shortened by the byte clamp. Reported, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldTruncation {
    pub row: usize,
    pub column: &'static str,
    pub original_bytes: usize,
    pub kept_bytes: usize,
}

/// Result of a committed upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    #[serde(rename = "table")]
    pub table_name: String,
    #[serde(rename = "type")]
    pub dataset_type: &'static str,
    #[serde(rename = "rows")]
    pub row_count: u64,
    pub encoding: &'static str,
    pub truncated_fields: Vec<FieldTruncation>,
}

/// A stored row: surrogate id plus values in schema column order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRecord {
    pub id: i64,
    pub values: Vec<String>,
}

/// Point lookup result, possibly empty.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub columns: &'static [&'static str],
    pub records: Vec<DatasetRecord>,
}

impl SearchResult {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
