use once_cell::sync::Lazy;
use regex::Regex;

static NON_IDENTIFIER_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9_]+").unwrap());

/// Collapse every run of characters outside `[a-z0-9_]` into one underscore.
/// Input is expected to be lowercase already.
pub fn collapse_identifier_chars(lowered: &str) -> String {
    NON_IDENTIFIER_RUN.replace_all(lowered, "_").into_owned()
}

/// Canonicalize a header label: drop BOM artifacts, trim, lowercase and
/// collapse non-identifier runs. Idempotent. Pathological labels may come out
/// empty or as bare underscores; schema detection deals with that.
pub fn normalize_header(raw: &str) -> String {
    let label = raw.replace('\u{feff}', "");
    collapse_identifier_chars(&label.trim().to_lowercase())
}

pub fn normalize_headers<I, S>(labels: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    labels
        .into_iter()
        .map(|label| normalize_header(label.as_ref()))
        .collect()
}
