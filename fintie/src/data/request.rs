//! Fetch requests: category, symbol and per-category parameters.
//!
//! A [`CategoryRequest`] is validated before any network call; malformed
//! input is rejected with a [`RequestError`].

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::symbol::Symbol;

// ============================================================================
// Request Error
// ============================================================================

/// Caller input rejected before fetching.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("unknown category: {0}")]
    UnknownCategory(String),

    #[error("unknown frequency: {0}")]
    UnknownFrequency(String),

    #[error("unknown adjustment type: {0}")]
    UnknownFqType(String),

    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("{0} requires a symbol")]
    MissingSymbol(Category),

    #[error("{0} requires a date")]
    MissingDate(Category),

    #[error("invalid date range: start {start} is after end {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("frequency {frequency} is not supported for {category}")]
    UnsupportedFrequency {
        category: Category,
        frequency: Frequency,
    },

    #[error("unsupported option '{value}' for {category}, expected one of {allowed:?}")]
    UnsupportedVariant {
        category: Category,
        value: String,
        allowed: &'static [&'static str],
    },

    #[error("page size must be greater than zero")]
    ZeroPageSize,
}

// ============================================================================
// Category
// ============================================================================

/// How a category's result is written to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    Json,
    Csv,
}

impl ArtifactFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }
}

/// Data category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Company profile
    StockInfo,
    /// Listed companies on both exchanges
    StockList,
    /// Delisted companies
    Delisted,
    /// Tick-by-tick trades for one day
    TickQuotes,
    /// Current snapshot quote with five-level book
    CurrentQuotes,
    /// K-line bars
    HistQuotes,
    /// Intraday trades, order book or detailed quote
    LiveQuotes,
    /// Market-wide quote lists (stocks, convertible bonds, ETFs, structured funds)
    ListQuotes,
    /// Shareholder tables
    Shareholders,
    /// Insider (executive) share changes
    InsiderTrades,
    /// Financial statement CSV tables
    Fundamentals,
    /// F10 financial indicator tables
    FinancialIndicators,
    /// Market event calendar for one day
    MarketEvents,
    /// Announcement metadata
    Announcements,
    /// Stock screener results
    StockPicker,
}

/// Announcement type codes accepted by the announcement query.
pub const ANNOUNCEMENT_KINDS: &[&str] = &[
    "ndbg", "bndbg", "yjdbg", "sjdbg", "scgkfx", "pg", "zf", "kzhz", "qzxg", "qtrz", "qyfpxzcs",
    "gqbd", "jy", "gddh", "cqfxyj", "tbclts", "bcgz", "zjjg", "ssgszd", "zqgg", "qtzdsx", "tzzgx",
    "dshgg", "jshgg",
];

impl Category {
    pub const ALL: [Category; 15] = [
        Self::StockInfo,
        Self::StockList,
        Self::Delisted,
        Self::TickQuotes,
        Self::CurrentQuotes,
        Self::HistQuotes,
        Self::LiveQuotes,
        Self::ListQuotes,
        Self::Shareholders,
        Self::InsiderTrades,
        Self::Fundamentals,
        Self::FinancialIndicators,
        Self::MarketEvents,
        Self::Announcements,
        Self::StockPicker,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StockInfo => "stock_info",
            Self::StockList => "stock_list",
            Self::Delisted => "delisted",
            Self::TickQuotes => "tick_quotes",
            Self::CurrentQuotes => "current_quotes",
            Self::HistQuotes => "hist_quotes",
            Self::LiveQuotes => "live_quotes",
            Self::ListQuotes => "list_quotes",
            Self::Shareholders => "shareholders",
            Self::InsiderTrades => "insider_trades",
            Self::Fundamentals => "fundamentals",
            Self::FinancialIndicators => "financial_indicators",
            Self::MarketEvents => "market_events",
            Self::Announcements => "announcements",
            Self::StockPicker => "stock_picker",
        }
    }

    /// Whether a request for this category must name a symbol.
    pub fn requires_symbol(&self) -> bool {
        !matches!(
            self,
            Self::StockList | Self::Delisted | Self::ListQuotes | Self::MarketEvents | Self::StockPicker
        )
    }

    /// Whether a request for this category must carry a single date.
    pub fn requires_date(&self) -> bool {
        matches!(self, Self::TickQuotes | Self::MarketEvents)
    }

    pub fn artifact_format(&self) -> ArtifactFormat {
        match self {
            Self::TickQuotes | Self::Fundamentals => ArtifactFormat::Csv,
            _ => ArtifactFormat::Json,
        }
    }

    /// Accepted `variant` values; empty when the category has none.
    pub fn variants(&self) -> &'static [&'static str] {
        match self {
            Self::LiveQuotes => &["trades", "pankou", "quote"],
            Self::ListQuotes => &["stock", "cb", "etf", "fenji"],
            Self::Shareholders => &["main", "public", "limit", "count"],
            Self::Fundamentals => &["lrb", "zcfzb", "xjllb", "cwbbzy", "zycwzb"],
            Self::FinancialIndicators => &["MRCWZB", "GPSYLZB", "ZYCWZB", "DJCWZB", "GSLRB", "ZCFZB", "XJLLB"],
            _ => &[],
        }
    }

    /// Variant used when the request names none.
    pub fn default_variant(&self) -> Option<&'static str> {
        self.variants().first().copied()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| RequestError::UnknownCategory(s.to_string()))
    }
}

// ============================================================================
// Frequency / Adjustment
// ============================================================================

/// K-line bar frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Frequency {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "60m")]
    M60,
    #[serde(rename = "120m")]
    M120,
    #[serde(rename = "day")]
    Day,
    #[serde(rename = "week")]
    Week,
    #[serde(rename = "month")]
    Month,
    #[serde(rename = "quarter")]
    Quarter,
    #[serde(rename = "year")]
    Year,
}

impl Frequency {
    pub const ALL: [Frequency; 11] = [
        Self::M1,
        Self::M5,
        Self::M15,
        Self::M30,
        Self::M60,
        Self::M120,
        Self::Day,
        Self::Week,
        Self::Month,
        Self::Quarter,
        Self::Year,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::M60 => "60m",
            Self::M120 => "120m",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Quarter => "quarter",
            Self::Year => "year",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| RequestError::UnknownFrequency(s.to_string()))
    }
}

/// Price adjustment for K-line bars.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FqType {
    /// Forward-adjusted
    #[default]
    Before,
    /// Backward-adjusted
    After,
    /// Unadjusted
    Normal,
}

impl FqType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::After => "after",
            Self::Normal => "normal",
        }
    }
}

impl FromStr for FqType {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "before" => Ok(Self::Before),
            "after" => Ok(Self::After),
            "normal" => Ok(Self::Normal),
            _ => Err(RequestError::UnknownFqType(s.to_string())),
        }
    }
}

// ============================================================================
// Category Request
// ============================================================================

/// Category-specific parameters. Unused fields are ignored by sources.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchParams {
    /// Range start (announcements, calendars)
    pub start: Option<NaiveDate>,
    /// Range end, also the reference date for K-line bars
    pub end: Option<NaiveDate>,
    /// Single trading day (ticks, calendar day)
    pub date: Option<NaiveDate>,
    pub frequency: Option<Frequency>,
    pub fq: Option<FqType>,
    /// Bar count; negative counts backwards from the reference date
    pub count: Option<i64>,
    /// Sub-table or list type, see [`Category::variants`]
    pub variant: Option<String>,
    /// Announcement type codes
    pub kinds: Vec<String>,
    pub search_key: Option<String>,
    /// 1-based page for paginated sources
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    /// Extra query filters passed through to the screener
    pub filters: BTreeMap<String, String>,
}

/// One fetch: a category, an optional symbol and its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryRequest {
    pub category: Category,
    pub symbol: Option<Symbol>,
    pub params: FetchParams,
}

impl CategoryRequest {
    /// Request without a symbol (market-wide categories).
    pub fn new(category: Category) -> Self {
        Self {
            category,
            symbol: None,
            params: FetchParams::default(),
        }
    }

    pub fn for_symbol(category: Category, symbol: Symbol) -> Self {
        Self {
            category,
            symbol: Some(symbol),
            params: FetchParams::default(),
        }
    }

    pub fn with_range(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.params.start = Some(start);
        self.params.end = Some(end);
        self
    }

    pub fn on_date(mut self, date: NaiveDate) -> Self {
        self.params.date = Some(date);
        self
    }

    pub fn with_frequency(mut self, frequency: Frequency) -> Self {
        self.params.frequency = Some(frequency);
        self
    }

    pub fn with_fq(mut self, fq: FqType) -> Self {
        self.params.fq = Some(fq);
        self
    }

    pub fn with_count(mut self, count: i64) -> Self {
        self.params.count = Some(count);
        self
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.params.variant = Some(variant.into());
        self
    }

    pub fn with_kinds<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params.kinds = kinds.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.params.page = Some(page);
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.params.page_size = Some(page_size);
        self
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.filters.insert(key.into(), value.into());
        self
    }

    /// The requested variant, or the category default.
    pub fn variant(&self) -> Option<&str> {
        self.params
            .variant
            .as_deref()
            .or_else(|| self.category.default_variant())
    }

    /// Short label for logs, e.g. `stock_info:000001.SZ`.
    pub fn label(&self) -> String {
        match &self.symbol {
            Some(symbol) => format!("{}:{}", self.category, symbol),
            None => self.category.to_string(),
        }
    }

    /// Check preconditions. Runs before any network call.
    pub fn validate(&self) -> Result<(), RequestError> {
        let category = self.category;
        let params = &self.params;

        if category.requires_symbol() && self.symbol.is_none() {
            return Err(RequestError::MissingSymbol(category));
        }

        if category.requires_date() && params.date.is_none() {
            return Err(RequestError::MissingDate(category));
        }

        if let (Some(start), Some(end)) = (params.start, params.end) {
            if start > end {
                return Err(RequestError::InvalidRange { start, end });
            }
        }

        if let Some(frequency) = params.frequency {
            if category != Category::HistQuotes {
                return Err(RequestError::UnsupportedFrequency { category, frequency });
            }
        }

        if let Some(variant) = &params.variant {
            let allowed = category.variants();
            if !allowed.contains(&variant.as_str()) {
                return Err(RequestError::UnsupportedVariant {
                    category,
                    value: variant.clone(),
                    allowed,
                });
            }
        }

        if let Some(kind) = params
            .kinds
            .iter()
            .find(|k| !ANNOUNCEMENT_KINDS.contains(&k.as_str()))
        {
            return Err(RequestError::UnsupportedVariant {
                category,
                value: kind.clone(),
                allowed: ANNOUNCEMENT_KINDS,
            });
        }

        if params.page_size == Some(0) {
            return Err(RequestError::ZeroPageSize);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym() -> Symbol {
        Symbol::parse("000001.sz").unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_category_names_roundtrip() {
        for category in Category::ALL {
            assert_eq!(category.as_str().parse::<Category>().unwrap(), category);
        }
        assert!("stock_infos".parse::<Category>().is_err());
    }

    #[test]
    fn test_frequency_parse() {
        assert_eq!("120m".parse::<Frequency>().unwrap(), Frequency::M120);
        assert_eq!("quarter".parse::<Frequency>().unwrap(), Frequency::Quarter);
        assert_eq!(
            "2h".parse::<Frequency>(),
            Err(RequestError::UnknownFrequency("2h".into()))
        );
    }

    #[test]
    fn test_missing_symbol_rejected() {
        let req = CategoryRequest::new(Category::StockInfo);
        assert_eq!(req.validate(), Err(RequestError::MissingSymbol(Category::StockInfo)));
        assert!(CategoryRequest::new(Category::StockList).validate().is_ok());
    }

    #[test]
    fn test_tick_quotes_need_a_date() {
        let req = CategoryRequest::for_symbol(Category::TickQuotes, sym());
        assert_eq!(req.validate(), Err(RequestError::MissingDate(Category::TickQuotes)));
        assert!(req.on_date(day(2018, 1, 5)).validate().is_ok());
    }

    #[test]
    fn test_reversed_range_rejected() {
        let req = CategoryRequest::for_symbol(Category::Announcements, sym())
            .with_range(day(2018, 2, 1), day(2018, 1, 1));
        assert!(matches!(req.validate(), Err(RequestError::InvalidRange { .. })));
    }

    #[test]
    fn test_frequency_only_for_bars() {
        let req = CategoryRequest::for_symbol(Category::StockInfo, sym()).with_frequency(Frequency::Day);
        assert!(matches!(
            req.validate(),
            Err(RequestError::UnsupportedFrequency { .. })
        ));
        let req = CategoryRequest::for_symbol(Category::HistQuotes, sym()).with_frequency(Frequency::Day);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_variant_checked() {
        let req = CategoryRequest::for_symbol(Category::Shareholders, sym()).with_variant("bogus");
        assert!(matches!(req.validate(), Err(RequestError::UnsupportedVariant { .. })));

        let req = CategoryRequest::for_symbol(Category::Shareholders, sym());
        assert_eq!(req.variant(), Some("main"));
        assert_eq!(CategoryRequest::new(Category::StockList).variant(), None);
    }

    #[test]
    fn test_announcement_kinds_checked() {
        let ok = CategoryRequest::for_symbol(Category::Announcements, sym()).with_kinds(["ndbg", "yjdbg"]);
        assert!(ok.validate().is_ok());
        let bad = CategoryRequest::for_symbol(Category::Announcements, sym()).with_kinds(["annual"]);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let req = CategoryRequest::new(Category::ListQuotes).with_page_size(0);
        assert_eq!(req.validate(), Err(RequestError::ZeroPageSize));
    }

    #[test]
    fn test_label() {
        assert_eq!(
            CategoryRequest::for_symbol(Category::StockInfo, sym()).label(),
            "stock_info:000001.SZ"
        );
        assert_eq!(CategoryRequest::new(Category::Delisted).label(), "delisted");
    }
}
