//! Utility functions for coercing scraped text and doing date/page arithmetic.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Weekday};

/// Truncate a string to at most `max_chars` characters, appending "..." if truncated.
///
/// Works on character boundaries, so CJK text is never split mid-character.
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => {
            let truncated = &s[..idx];
            format!("{}...", truncated.trim_end())
        }
        None => s.to_string(),
    }
}

/// Parse a scraped number.
///
/// Accepts thousand separators, surrounding whitespace, a trailing `%`,
/// and treats placeholders such as `--` or `-` as missing.
pub fn convert_number(s: &str) -> Option<f64> {
    let cleaned: String = s
        .trim()
        .trim_end_matches('%')
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '-') {
        return None;
    }

    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse an amount quoted in Chinese units (`万`, `亿`, optionally suffixed with `元`).
///
/// A `unit_hint` multiplier applies when the text carries no unit of its own,
/// e.g. a column labelled `注册资本(万元)` whose cells are plain numbers.
pub fn convert_cn_amount(s: &str, unit_hint: f64) -> Option<f64> {
    let text = s.trim().trim_end_matches('元').trim_end_matches("人民币").trim();

    if let Some(num) = text.strip_suffix('亿') {
        return convert_number(num).map(|v| v * 100_000_000.0);
    }
    if let Some(num) = text.strip_suffix('万') {
        return convert_number(num).map(|v| v * 10_000.0);
    }

    convert_number(text).map(|v| v * unit_hint)
}

/// Parse a date in any of the layouts the sites emit.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    const FORMATS: &[&str] = &["%Y-%m-%d", "%Y%m%d", "%Y/%m/%d", "%Y年%m月%d日", "%Y.%m.%d"];

    let s = s.trim();
    // Datetime strings: keep only the date part
    let s = s.split_whitespace().next().unwrap_or(s);

    FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

/// Parse a timestamp such as `2024-03-15 15:00:03` or `20240315150003`.
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    const FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y%m%d%H%M%S",
        "%Y/%m/%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
    ];

    let s = s.trim();
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

/// Convert an epoch-millisecond timestamp to China local time (UTC+8).
pub fn datetime_from_millis(ms: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(ms).map(|dt| (dt + Duration::hours(8)).naive_utc())
}

/// Number of pages needed to cover `total` items.
pub fn page_count(total: u64, page_size: u64) -> u64 {
    if page_size == 0 {
        return 0;
    }
    total.div_ceil(page_size)
}

/// Inclusive list of calendar days from `start` to `end`.
pub fn date_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start.iter_days().take_while(|d| *d <= end).collect()
}

/// Inclusive list of Monday-to-Friday days from `start` to `end`.
pub fn weekdays(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    date_range(start, end)
        .into_iter()
        .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
        .collect()
}
