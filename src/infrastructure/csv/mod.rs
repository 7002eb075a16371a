// ============================================================
// CSV INFRASTRUCTURE LAYER
// ============================================================
// CSV reading for uploads and CSV encoding for COPY and downloads

mod csv_parser;
mod csv_writer;

pub use csv_parser::{CsvDocument, CsvParser};
pub use csv_writer::{encode_copy_rows, encode_record, encode_rows};
