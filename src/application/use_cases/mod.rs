pub mod batch_loader;
pub mod decoder;
pub mod header_normalizer;
pub mod ingest;
pub mod retriever;
pub mod schema_detector;
pub mod table_provisioner;
