use std::sync::Arc;

use crate::application::{IngestUseCase, Retriever};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::db::DatasetStore;

/// Shared by every worker of the HTTP server.
pub struct HttpState {
    pub ingest: IngestUseCase,
    pub retriever: Retriever,
    pub max_upload_bytes: usize,
}

impl HttpState {
    pub fn new(store: Arc<dyn DatasetStore>, config: &AppConfig) -> Self {
        Self {
            ingest: IngestUseCase::new(Arc::clone(&store), &config.ingest),
            retriever: Retriever::new(store, config.download.buffer_rows),
            max_upload_bytes: config.ingest.max_upload_bytes,
        }
    }
}
