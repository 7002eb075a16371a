use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::error::Result;
use crate::infrastructure::config::{StorageBackend, StorageSettings};
use crate::infrastructure::db::{DatasetStore, MemoryDatasetStore, PgDatasetStore};

/// Build the configured storage backend. For Postgres this connects the pool
/// and makes sure the registry table exists.
pub async fn build_store(settings: &StorageSettings) -> Result<Arc<dyn DatasetStore>> {
    match settings.backend {
        StorageBackend::Postgres => {
            let store = PgDatasetStore::connect(settings).await?;
            store.init_registry().await?;
            info!("PostgreSQL dataset store ready");
            Ok(Arc::new(store))
        }
        StorageBackend::Memory => {
            warn!("using in-memory dataset store; datasets are lost on restart");
            Ok(Arc::new(MemoryDatasetStore::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::IngestError;

    #[tokio::test]
    async fn test_memory_backend_needs_no_database() {
        let settings = StorageSettings {
            backend: StorageBackend::Memory,
            ..StorageSettings::default()
        };
        let store = build_store(&settings).await.unwrap();
        assert!(store.list_entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_postgres_backend_requires_url() {
        let settings = StorageSettings::default();
        match build_store(&settings).await {
            Err(IngestError::Config(_)) => {}
            Err(other) => panic!("expected Config error, got {other:?}"),
            Ok(_) => panic!("expected Config error"),
        }
    }
}
