// ============================================================
// TABLE PROVISIONER
// ============================================================
// Derives the destination table name and creates the table inside the
// upload's unit of work

use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::info;

use super::header_normalizer::collapse_identifier_chars;
use crate::domain::error::Result;
use crate::domain::{NamingPolicy, SchemaDefinition, TableName};
use crate::infrastructure::db::UploadSession;

const FALLBACK_STEM: &str = "upload";
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone, Copy, Default)]
pub struct TableProvisioner {
    policy: NamingPolicy,
}

impl TableProvisioner {
    pub fn new(policy: NamingPolicy) -> Self {
        Self { policy }
    }

    /// `{schema}_{stem}` plus `_{YYYYMMDD_HHMMSS}` (UTC) under the timestamped
    /// policy. The stem is shortened so the whole name fits the identifier
    /// length limit.
    pub fn derive_name(
        &self,
        schema: &SchemaDefinition,
        source_name: &str,
        at: DateTime<Utc>,
    ) -> Result<TableName> {
        let prefix = format!("{}_", schema.name);
        let suffix = match self.policy {
            NamingPolicy::Timestamped => format!("_{}", at.format(TIMESTAMP_FORMAT)),
            NamingPolicy::Replace => String::new(),
        };

        let budget = TableName::MAX_LEN.saturating_sub(prefix.len() + suffix.len());
        let stem = source_stem(source_name);
        // The stem is ASCII after collapsing, so byte slicing is safe.
        let stem = stem[..stem.len().min(budget)].trim_end_matches('_');
        let stem = if stem.is_empty() { FALLBACK_STEM } else { stem };

        TableName::parse(&format!("{}{}{}", prefix, stem, suffix))
    }

    pub async fn provision(
        &self,
        session: &mut dyn UploadSession,
        table: &TableName,
        schema: &'static SchemaDefinition,
    ) -> Result<()> {
        let replace = self.policy == NamingPolicy::Replace;
        session.create_table(table, schema, replace).await?;
        info!(table = %table, schema = schema.name, replace, "provisioned dataset table");
        Ok(())
    }
}

/// Identifier-safe stem of an uploaded file name: final path component,
/// extension removed, lowercased and collapsed to `[a-z0-9_]`.
pub fn source_stem(source_name: &str) -> String {
    // Clients on Windows send backslash paths.
    let base = source_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(source_name);
    let stem = Path::new(base)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(base);

    let collapsed = collapse_identifier_chars(&stem.to_lowercase());
    let trimmed = collapsed.trim_matches('_');
    if trimmed.is_empty() {
        FALLBACK_STEM.to_string()
    } else {
        trimmed.to_string()
    }
}
