pub mod dataset;
pub mod error;
pub mod identifier;
pub mod schema;
pub mod stage;

pub use dataset::{
    DatasetRecord, DecodedText, FieldTruncation, NamingPolicy, RawPayload, RegistryEntry, Row,
    SearchResult, UploadOutcome,
};
pub use error::{IngestError, Result};
pub use identifier::TableName;
pub use schema::{SchemaDefinition, SCHEMAS, SEARCHABLE_COLUMNS};
pub use stage::{Stage, UploadProgress, UploadState};
