//! Process configuration.
//!
//! Layers, later wins: built-in defaults, `tabingest.toml`, `TABINGEST_*`
//! environment variables (nested keys split on `__`, e.g.
//! `TABINGEST_INGEST__BATCH_SIZE`), and `DATABASE_URL` for the storage URL.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::domain::error::{IngestError, Result};
use crate::domain::NamingPolicy;

pub const CONFIG_FILE: &str = "tabingest.toml";
pub const ENV_PREFIX: &str = "TABINGEST_";

/// Postgres rejects single COPY fields larger than this.
pub const COPY_FIELD_LIMIT: usize = 131_072;

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub server: ServerSettings,
    #[validate(nested)]
    pub storage: StorageSettings,
    #[validate(nested)]
    pub ingest: IngestSettings,
    #[validate(nested)]
    pub download: DownloadSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerSettings {
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub database_url: Option<String>,
    #[validate(range(min = 1, max = 100))]
    pub max_connections: u32,
    #[validate(range(min = 1))]
    pub acquire_timeout_secs: u64,
    /// Overrides the URL's `sslmode` when set
    pub ssl_mode: Option<String>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Postgres,
            database_url: None,
            max_connections: 5,
            acquire_timeout_secs: 10,
            ssl_mode: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct IngestSettings {
    #[validate(range(min = 1, max = 1_000_000))]
    pub batch_size: usize,
    #[validate(range(min = 1, max = 131_071))]
    pub max_field_bytes: usize,
    /// Largest uploaded file accepted, in bytes
    #[validate(range(min = 1))]
    pub max_upload_bytes: usize,
    pub naming: NamingPolicy,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            batch_size: 5000,
            // Safely below COPY_FIELD_LIMIT
            max_field_bytes: 120_000,
            max_upload_bytes: 64 * 1024 * 1024,
            naming: NamingPolicy::Timestamped,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DownloadSettings {
    /// Rows buffered between the storage reader and the response writer
    #[validate(range(min = 1, max = 65_536))]
    pub buffer_rows: usize,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self { buffer_rows: 256 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    /// `tracing` env-filter directive; `RUST_LOG` takes precedence
    pub filter: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl AppConfig {
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(
                Env::raw()
                    .only(&["DATABASE_URL"])
                    .map(|_| "storage.database_url".into()),
            )
    }

    pub fn load() -> Result<Self> {
        Self::from_figment(Self::figment())
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: AppConfig = figment
            .extract()
            .map_err(|e| IngestError::Config(format!("Failed to load configuration: {}", e)))?;
        config
            .validate()
            .map_err(|e| IngestError::Config(format!("Invalid configuration: {}", e)))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(toml: &str) -> Result<AppConfig> {
        AppConfig::from_figment(
            Figment::from(Serialized::defaults(AppConfig::default())).merge(Toml::string(toml)),
        )
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = from_toml("").unwrap();
        assert_eq!(config.ingest.batch_size, 5000);
        assert_eq!(config.ingest.max_field_bytes, 120_000);
        assert!(config.ingest.max_field_bytes < COPY_FIELD_LIMIT);
        assert_eq!(config.ingest.naming, NamingPolicy::Timestamped);
        assert_eq!(config.storage.backend, StorageBackend::Postgres);
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn test_toml_overrides_nested_keys() {
        let config = from_toml(
            r#"
            [ingest]
            batch_size = 100
            naming = "replace"

            [storage]
            backend = "memory"
            "#,
        )
        .unwrap();
        assert_eq!(config.ingest.batch_size, 100);
        assert_eq!(config.ingest.naming, NamingPolicy::Replace);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.ingest.max_field_bytes, 120_000);
    }

    #[test]
    fn test_field_clamp_must_stay_below_copy_limit() {
        let err = from_toml("[ingest]\nmax_field_bytes = 131072").unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        assert!(from_toml("[ingest]\nbatch_size = 0").is_err());
    }

    #[test]
    fn test_upload_cap_is_configurable() {
        let config = from_toml("[ingest]\nmax_upload_bytes = 1024").unwrap();
        assert_eq!(config.ingest.max_upload_bytes, 1024);
        assert_eq!(AppConfig::default().ingest.max_upload_bytes, 64 * 1024 * 1024);
        assert!(from_toml("[ingest]\nmax_upload_bytes = 0").is_err());
    }

    #[test]
    fn test_unknown_naming_policy_is_rejected() {
        assert!(from_toml("[ingest]\nnaming = \"sometimes\"").is_err());
    }
}
