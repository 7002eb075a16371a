use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn, Span};

use super::batch_loader::{BatchLoader, ColumnMap, LoadLimits, LoadReport};
use super::decoder::decode;
use super::header_normalizer::normalize_headers;
use super::schema_detector::SchemaDetector;
use super::table_provisioner::TableProvisioner;
use crate::domain::error::Result;
use crate::domain::{
    RawPayload, SchemaDefinition, TableName, UploadOutcome, UploadProgress, UploadState,
};
use crate::infrastructure::config::IngestSettings;
use crate::infrastructure::csv::{CsvDocument, CsvParser};
use crate::infrastructure::db::{DatasetStore, UploadSession};

/// Runs one upload from raw bytes to a committed, registered dataset table.
pub struct IngestUseCase {
    store: Arc<dyn DatasetStore>,
    parser: CsvParser,
    detector: SchemaDetector,
    provisioner: TableProvisioner,
    loader: BatchLoader,
}

impl IngestUseCase {
    pub fn new(store: Arc<dyn DatasetStore>, settings: &IngestSettings) -> Self {
        Self {
            store,
            parser: CsvParser::new(),
            detector: SchemaDetector::new(),
            provisioner: TableProvisioner::new(settings.naming),
            loader: BatchLoader::new(LoadLimits::from(settings)),
        }
    }

    #[instrument(
        name = "upload",
        skip_all,
        fields(
            source = %payload.source_name,
            bytes = payload.bytes.len(),
            table = tracing::field::Empty
        )
    )]
    pub async fn execute(&self, payload: RawPayload) -> Result<UploadOutcome> {
        let mut progress = UploadProgress::new();
        let result = self.run(&payload, &mut progress).await;
        if let Err(e) = &result {
            let from = progress.state();
            let rolled_back = progress.fail();
            warn!(error = %e, stage = ?e.stage(), %from, rolled_back, "upload failed");
        }
        result
    }

    async fn run(
        &self,
        payload: &RawPayload,
        progress: &mut UploadProgress,
    ) -> Result<UploadOutcome> {
        let decoded = decode(&payload.bytes)?;
        progress.advance(UploadState::Decoded);

        let mut document = self.parser.open(&decoded.text)?;
        let headers = normalize_headers(document.headers());
        progress.advance(UploadState::HeaderNormalized);

        let schema = self.detector.detect(&headers)?;
        let columns = ColumnMap::resolve(&headers, schema)?;
        progress.advance(UploadState::SchemaMatched);

        let table = self
            .provisioner
            .derive_name(schema, &payload.source_name, Utc::now())?;
        Span::current().record("table", table.as_str());

        // Holds the name-scoped lock until commit or rollback.
        let mut session = self.store.begin_upload(&table).await?;
        let loaded = self
            .load_into(session.as_mut(), &mut document, &columns, &table, schema, progress)
            .await;

        let report = match loaded {
            Ok(report) => report,
            Err(e) => {
                if let Err(rollback_err) = session.rollback().await {
                    warn!(error = %rollback_err, "rollback after failed upload also failed");
                }
                return Err(e);
            }
        };

        session.commit().await?;
        progress.advance(UploadState::Committed);
        info!(rows = report.rows, schema = schema.name, "upload committed");

        Ok(UploadOutcome {
            table_name: table.to_string(),
            dataset_type: schema.name,
            row_count: report.rows,
            encoding: decoded.encoding,
            truncated_fields: report.truncations,
        })
    }

    async fn load_into(
        &self,
        session: &mut dyn UploadSession,
        document: &mut CsvDocument<'_>,
        columns: &ColumnMap,
        table: &TableName,
        schema: &'static SchemaDefinition,
        progress: &mut UploadProgress,
    ) -> Result<LoadReport> {
        self.provisioner.provision(session, table, schema).await?;
        progress.advance(UploadState::TableProvisioned);

        progress.advance(UploadState::Loading);
        let report = self
            .loader
            .load(document, columns, table, schema, session)
            .await?;

        session
            .upsert_registry(table, schema.name, report.rows)
            .await?;
        progress.advance(UploadState::Registered);

        Ok(report)
    }
}
