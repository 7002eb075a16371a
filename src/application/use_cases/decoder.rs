// ============================================================
// DECODER
// ============================================================
// Recover legible text from upload bytes of unknown encoding

use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8};
use tracing::{debug, info};

use crate::domain::error::{IngestError, Result};
use crate::domain::DecodedText;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// How many leading bytes are inspected when sniffing BOM-less UTF-16.
const SNIFF_WINDOW: usize = 4096;

/// Decoding strategies, tried in this order. The first one that reads the
/// whole input without an invalid sequence wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStrategy {
    /// UTF-16 announced by a BOM, or BOM-less UTF-16 recognised by its
    /// interleaved zero bytes (spreadsheet "Unicode text" exports)
    WideChar,
    /// UTF-8, with or without a BOM
    Utf8,
    /// Byte-distribution detection for legacy single-byte encodings
    Statistical,
}

pub const STRATEGIES: [DecodeStrategy; 3] = [
    DecodeStrategy::WideChar,
    DecodeStrategy::Utf8,
    DecodeStrategy::Statistical,
];

impl DecodeStrategy {
    pub fn attempt(self, bytes: &[u8]) -> Option<DecodedText> {
        match self {
            DecodeStrategy::WideChar => decode_wide(bytes),
            DecodeStrategy::Utf8 => decode_utf8(bytes),
            DecodeStrategy::Statistical => decode_detected(bytes),
        }
    }
}

/// Decode an upload. Pure and deterministic: the same bytes always pick the
/// same strategy.
pub fn decode(bytes: &[u8]) -> Result<DecodedText> {
    if bytes.is_empty() {
        return Err(IngestError::Decoding("file is empty".to_string()));
    }

    for strategy in STRATEGIES {
        match strategy.attempt(bytes) {
            Some(decoded) => {
                info!(encoding = decoded.encoding, ?strategy, "decoded upload");
                return Ok(decoded);
            }
            None => debug!(?strategy, "decode strategy rejected input"),
        }
    }

    Err(IngestError::Decoding(
        "no supported encoding could read the file".to_string(),
    ))
}

fn decode_with(encoding: &'static Encoding, body: &[u8]) -> Option<DecodedText> {
    encoding
        .decode_without_bom_handling_and_without_replacement(body)
        .map(|text| DecodedText {
            text: text.into_owned(),
            encoding: encoding.name(),
        })
}

fn decode_wide(bytes: &[u8]) -> Option<DecodedText> {
    let (encoding, body) = match Encoding::for_bom(bytes) {
        Some((encoding, bom_len)) if encoding == UTF_16LE || encoding == UTF_16BE => {
            (encoding, &bytes[bom_len..])
        }
        Some(_) => return None,
        None => (sniff_utf16(bytes)?, bytes),
    };
    decode_with(encoding, body)
}

/// Minimum share of zero bytes (one in this many pairs) before BOM-less
/// UTF-16 is considered at all.
const SNIFF_MIN_ZERO_RATIO: usize = 16;

/// BOM-less UTF-16 keeps the zero high byte of every ASCII code unit on the
/// same side of each pair. Non-Latin text adds pairs without zeros but never
/// moves them to the other side, so byte order is read from where the zeros
/// fall, not from how many pairs contain one.
fn sniff_utf16(bytes: &[u8]) -> Option<&'static Encoding> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let window = &bytes[..bytes.len().min(SNIFF_WINDOW)];
    let pairs = window.len() / 2;

    let (mut even_zeros, mut odd_zeros) = (0usize, 0usize);
    for pair in window.chunks_exact(2) {
        even_zeros += usize::from(pair[0] == 0);
        odd_zeros += usize::from(pair[1] == 0);
    }

    let zeros = even_zeros + odd_zeros;
    if pairs == 0 || zeros * SNIFF_MIN_ZERO_RATIO < pairs {
        return None;
    }

    if odd_zeros * 10 >= zeros * 9 {
        Some(UTF_16LE)
    } else if even_zeros * 10 >= zeros * 9 {
        Some(UTF_16BE)
    } else {
        None
    }
}

/// NUL never appears in CSV text; a decode that produces one has misread
/// wide characters as bytes.
fn without_nul(decoded: DecodedText) -> Option<DecodedText> {
    (!decoded.text.contains('\0')).then_some(decoded)
}

fn decode_utf8(bytes: &[u8]) -> Option<DecodedText> {
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    decode_with(UTF_8, body).and_then(without_nul)
}

fn decode_detected(bytes: &[u8]) -> Option<DecodedText> {
    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let encoding = detector.guess(None, true);
    decode_with(encoding, bytes).and_then(without_nul)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16le(text: &str, bom: bool) -> Vec<u8> {
        let mut out = if bom { vec![0xFF, 0xFE] } else { Vec::new() };
        for unit in text.encode_utf16() {
            out.extend_from_slice(&unit.to_le_bytes());
        }
        out
    }

    fn utf16be(text: &str) -> Vec<u8> {
        let mut out = vec![0xFE, 0xFF];
        for unit in text.encode_utf16() {
            out.extend_from_slice(&unit.to_be_bytes());
        }
        out
    }

    #[test]
    fn test_empty_input_fails() {
        assert!(matches!(decode(b""), Err(IngestError::Decoding(_))));
    }

    #[test]
    fn test_utf16le_with_bom() {
        let decoded = decode(&utf16le("school_code,name\nS1,Ana\n", true)).unwrap();
        assert_eq!(decoded.text, "school_code,name\nS1,Ana\n");
        assert_eq!(decoded.encoding, "UTF-16LE");
    }

    #[test]
    fn test_utf16be_with_bom() {
        let decoded = decode(&utf16be("a,b\n1,2\n")).unwrap();
        assert_eq!(decoded.text, "a,b\n1,2\n");
        assert_eq!(decoded.encoding, "UTF-16BE");
    }

    #[test]
    fn test_utf16le_without_bom_is_sniffed() {
        let decoded = decode(&utf16le("school_code,school_name\n", false)).unwrap();
        assert_eq!(decoded.text, "school_code,school_name\n");
        assert_eq!(decoded.encoding, "UTF-16LE");
    }

    #[test]
    fn test_even_length_ascii_is_not_mistaken_for_utf16() {
        let decoded = decode(b"ab,cd\n").unwrap();
        assert_eq!(decoded.text, "ab,cd\n");
        assert_eq!(decoded.encoding, "UTF-8");
    }

    #[test]
    fn test_utf8_with_bom_strips_marker() {
        let decoded = decode(b"\xEF\xBB\xBFname\nJos\xC3\xA9\n").unwrap();
        assert_eq!(decoded.text, "name\nJosé\n");
        assert_eq!(decoded.encoding, "UTF-8");
    }

    #[test]
    fn test_legacy_single_byte_falls_back_to_detection() {
        let bytes = b"name,city\nJos\xE9,S\xE3o Paulo\nFran\xE7ois,Montr\xE9al\n";
        assert!(DecodeStrategy::Utf8.attempt(bytes).is_none());
        let decoded = decode(bytes).unwrap();
        assert!(decoded.text.contains("José"));
        assert!(decoded.text.contains("François"));
    }

    #[test]
    fn test_strategy_choice_is_deterministic() {
        let bytes = b"name\nM\xFCller\n".to_vec();
        let first = decode(&bytes).unwrap();
        for _ in 0..5 {
            assert_eq!(decode(&bytes).unwrap(), first);
        }
    }

    #[test]
    fn test_utf16le_without_bom_with_devanagari_body() {
        let mut text = String::from(
            "school_code,school_name,employee_name,employee_code,designation\n",
        );
        for i in 0..60 {
            text.push_str(&format!(
                "S{i},केंद्रीय विद्यालय,सुनीता देवी,E{i},शिक्षक\n"
            ));
        }
        let bytes = utf16le(&text, false);

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.encoding, "UTF-16LE");
        assert_eq!(decoded.text, text);
    }

    #[test]
    fn test_nul_bytes_are_not_accepted_as_utf8() {
        assert!(DecodeStrategy::Utf8.attempt(b"a\0b\0,\0c\0").is_none());
        assert!(DecodeStrategy::Statistical.attempt(b"a,b\n\0\x01\n").is_none());
    }

    #[test]
    fn test_scattered_zero_bytes_do_not_pick_a_byte_order() {
        let mut bytes = b"ab,cd,ef,gh\n".repeat(4);
        bytes[1] = 0;
        bytes[4] = 0;
        assert!(sniff_utf16(&bytes).is_none());
    }

    #[test]
    fn test_odd_length_utf16_is_rejected_by_wide_strategy() {
        let mut bytes = utf16le("ab", true);
        bytes.push(0x41);
        assert!(DecodeStrategy::WideChar.attempt(&bytes).is_none());
    }
}
