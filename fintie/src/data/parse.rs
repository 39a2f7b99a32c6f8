//! Shared parsing helpers for site adapters: HTML key/value tables,
//! delimited text downloads and JSONP payloads.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

use super::provider::SourceError;
use super::Table;

/// Separator used when a table cell holds several text fragments.
pub const FRAGMENT_SEPARATOR: &str = "||";

static TAG_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());

// ============================================================================
// HTML
// ============================================================================

pub fn selector(css: &str) -> Result<Selector, SourceError> {
    Selector::parse(css).map_err(|e| SourceError::schema(format!("invalid selector {css}: {e:?}")))
}

/// Text of an element: trimmed non-empty text nodes joined by `||`.
pub fn cell_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(FRAGMENT_SEPARATOR)
}

/// Strip surrounding whitespace and a trailing colon (ASCII or full-width).
pub fn normalize_key(key: &str) -> String {
    key.trim()
        .trim_end_matches([':', '：'])
        .trim()
        .to_string()
}

/// Label/value pairs from a table laid out as alternating cells.
///
/// Cells matched by `cells` are taken two at a time as (label, value),
/// after skipping the first `skip` cells.
#[derive(Debug, Clone, Default)]
pub struct KeyValues {
    pairs: HashMap<String, String>,
}

impl KeyValues {
    pub fn from_html(html: &str, cells: &str, skip: usize) -> Result<Self, SourceError> {
        let document = Html::parse_document(html);
        let cell_selector = selector(cells)?;

        let texts: Vec<String> = document
            .select(&cell_selector)
            .skip(skip)
            .map(cell_text)
            .collect();

        Ok(Self::from_cells(texts))
    }

    pub fn from_cells(texts: Vec<String>) -> Self {
        let mut pairs = HashMap::new();
        let mut iter = texts.into_iter();
        while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
            let key = normalize_key(&key);
            if !key.is_empty() {
                pairs.entry(key).or_insert(value);
            }
        }
        Self { pairs }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Value for a label; empty string when absent.
    pub fn text(&self, key: &str) -> &str {
        self.pairs.get(key).map_or("", String::as_str)
    }

    /// Value for a label, or a schema error naming the missing label.
    pub fn require(&self, key: &str) -> Result<&str, SourceError> {
        self.pairs
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| SourceError::schema(format!("missing field {key}")))
    }
}

/// Remove markup tags, keeping the text between them.
pub fn strip_tags(s: &str) -> String {
    let text = TAG_PATTERN.replace_all(s, "");
    text.replace("&nbsp;", " ").replace("&amp;", "&").trim().to_string()
}

// ============================================================================
// Delimited Text
// ============================================================================

/// Guess the delimiter from the first non-empty line: tab, comma, semicolon or pipe.
pub fn sniff_delimiter(text: &str) -> u8 {
    const CANDIDATES: [u8; 4] = [b'\t', b',', b';', b'|'];

    let Some(line) = text.lines().find(|l| !l.trim().is_empty()) else {
        return b',';
    };

    CANDIDATES
        .iter()
        .map(|&d| (d, line.bytes().filter(|&b| b == d).count()))
        .filter(|&(_, n)| n > 0)
        .max_by_key(|&(_, n)| n)
        .map_or(b',', |(d, _)| d)
}

/// Parse delimited text with a header row into a table of string cells.
///
/// Rows may be ragged; short rows are padded and blank lines skipped.
pub fn parse_delimited(text: &str, delimiter: Option<u8>) -> Result<Table, SourceError> {
    let delimiter = delimiter.unwrap_or_else(|| sniff_delimiter(text));
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.trim_start_matches('\u{feff}').as_bytes());

    let columns: Vec<String> = reader
        .headers()
        .map_err(|e| SourceError::schema(format!("unreadable header: {e}")))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut table = Table::new(columns);
    for record in reader.records() {
        let record = record.map_err(|e| SourceError::schema(format!("unreadable row: {e}")))?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        table.push_row(record.iter().map(|c| Value::String(c.to_string())).collect());
    }

    Ok(table)
}

/// Raw delimited rows without a header.
pub fn delimited_rows(text: &str, delimiter: u8) -> Result<Vec<Vec<String>>, SourceError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.trim_start_matches('\u{feff}').as_bytes());

    reader
        .records()
        .map(|r| {
            r.map(|rec| rec.iter().map(str::to_string).collect())
                .map_err(|e| SourceError::schema(format!("unreadable row: {e}")))
        })
        .collect()
}

// ============================================================================
// JSON
// ============================================================================

/// The JSON object inside a JSONP wrapper such as `cb({...});`.
pub fn strip_jsonp(body: &str) -> Result<&str, SourceError> {
    match (body.find('{'), body.rfind('}')) {
        (Some(start), Some(end)) if start < end => Ok(&body[start..=end]),
        _ => Err(SourceError::schema("no JSON object in JSONP payload")),
    }
}

/// Look up a dotted path (`data.items`) in a JSON value.
pub fn json_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |v, key| v.get(key))
}

/// Require an array at `path`.
pub fn json_array<'a>(value: &'a Value, path: &str) -> Result<&'a Vec<Value>, SourceError> {
    json_path(value, path)
        .and_then(Value::as_array)
        .ok_or_else(|| SourceError::schema(format!("missing array {path}")))
}

/// Number at `path`, accepting numeric strings.
pub fn json_u64(value: &Value, path: &str) -> Option<u64> {
    match json_path(value, path)? {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
