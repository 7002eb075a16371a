// ============================================================
// CSV WRITER
// ============================================================
// Comma-separated encoding shared by COPY payloads and downloads

use csv::{QuoteStyle, Terminator, WriterBuilder};

use crate::domain::error::{IngestError, Result};

/// Encode records as CSV: fields holding the delimiter, a quote or a line
/// break are quoted and embedded quotes doubled. Lines end with `\n`.
pub fn encode_rows<I, R, S>(rows: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = R>,
    R: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    write_rows(rows, QuoteStyle::Necessary)
}

/// Encode records as a `COPY ... (FORMAT csv)` payload. Every field is
/// quoted, so empty fields load as empty strings rather than NULL and no line
/// can read as the `\.` end-of-data marker.
pub fn encode_copy_rows<I, R, S>(rows: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = R>,
    R: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    write_rows(rows, QuoteStyle::Always)
}

fn write_rows<I, R, S>(rows: I, style: QuoteStyle) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = R>,
    R: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .quote_style(style)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    for row in rows {
        writer
            .write_record(row)
            .map_err(|e| IngestError::Io(e.into()))?;
    }

    writer
        .into_inner()
        .map_err(|e| IngestError::Io(e.into_error()))
}

pub fn encode_record<R, S>(record: R) -> Result<Vec<u8>>
where
    R: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    encode_rows(std::iter::once(record))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_fields_are_not_quoted() {
        let out = encode_record(["a", "b", "c"]).unwrap();
        assert_eq!(out, b"a,b,c\n");
    }

    #[test]
    fn test_quoting_rules() {
        let out = encode_record(["x, y", "say \"hi\"", "two\nlines"]).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "\"x, y\",\"say \"\"hi\"\"\",\"two\nlines\"\n"
        );
    }

    #[test]
    fn test_copy_payload_quotes_every_field() {
        let rows = vec![vec!["S1", "", "a \"b\""], vec!["\\.", "x,y", ""]];
        assert_eq!(
            String::from_utf8(encode_copy_rows(rows).unwrap()).unwrap(),
            "\"S1\",\"\",\"a \"\"b\"\"\"\n\"\\.\",\"x,y\",\"\"\n"
        );
    }

    #[test]
    fn test_multiple_rows() {
        let rows = vec![vec!["1", "2"], vec!["3", "4"]];
        assert_eq!(encode_rows(rows).unwrap(), b"1,2\n3,4\n");
    }
}
