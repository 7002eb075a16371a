// ============================================================
// CSV PARSER
// ============================================================
// Split decoded text into a header and a lazy record sequence

use csv::{Reader, ReaderBuilder, StringRecordsIter, Trim};

use crate::domain::error::{IngestError, Result};

/// CSV reader configuration for uploads
pub struct CsvParser {
    /// Delimiter character (default: comma)
    delimiter: u8,
}

impl Default for CsvParser {
    fn default() -> Self {
        Self { delimiter: b',' }
    }
}

impl CsvParser {
    /// Create a new CSV parser with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the header line and hand back a document positioned at the first
    /// data record. Records are not buffered.
    pub fn open<'a>(&self, text: &'a str) -> Result<CsvDocument<'a>> {
        let mut reader = ReaderBuilder::new()
            .delimiter(self.delimiter)
            .trim(Trim::None)
            // Field counts are checked by the loader so it can report them
            .flexible(true)
            .from_reader(text.as_bytes());

        let headers = reader
            .headers()
            .map_err(|e| IngestError::Parse {
                row: 0,
                message: format!("failed to read CSV header: {}", e),
            })?
            .iter()
            .map(str::to_string)
            .collect();

        Ok(CsvDocument { headers, reader })
    }
}

/// Header plus the not-yet-consumed data records of one upload.
pub struct CsvDocument<'a> {
    headers: Vec<String>,
    reader: Reader<&'a [u8]>,
}

impl<'a> CsvDocument<'a> {
    /// Raw header labels as they appear in the file
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn records(&mut self) -> StringRecordsIter<'_, &'a [u8]> {
        self.reader.records()
    }
}
