pub mod use_cases;

pub use use_cases::batch_loader::{BatchLoader, LoadLimits};
pub use use_cases::ingest::IngestUseCase;
pub use use_cases::retriever::{CsvExport, ExportBody, Retriever};
pub use use_cases::schema_detector::SchemaDetector;
pub use use_cases::table_provisioner::TableProvisioner;
