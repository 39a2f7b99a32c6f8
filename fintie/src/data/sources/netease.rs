//! NetEase (163) adapter: snapshot quotes and financial statement tables.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use fintie_common::util::{convert_number, parse_datetime};

use super::{unsupported, NETEASE};
use crate::data::model::{CurrentQuote, PriceLevel};
use crate::data::parse::{parse_delimited, strip_jsonp};
use crate::data::provider::{required_symbol, DataSource, SourceError};
use crate::data::request::{Category, CategoryRequest};
use crate::data::session::HttpSession;
use crate::data::symbol::Symbol;
use crate::data::{FetchResult, Table};

// ============================================================================
// Constants
// ============================================================================

const QUOTE_FEED_URL: &str = "http://api.money.126.net/data/feed";
const STATEMENT_URL: &str = "http://quotes.money.163.com/service";

const CATEGORIES: &[Category] = &[Category::CurrentQuotes, Category::Fundamentals];

// ============================================================================
// NetEase Adapter
// ============================================================================

pub struct NeteaseSource {
    feed_url: String,
    statement_url: String,
}

impl NeteaseSource {
    pub fn new() -> Self {
        Self {
            feed_url: QUOTE_FEED_URL.to_string(),
            statement_url: STATEMENT_URL.to_string(),
        }
    }

    pub fn with_base_url(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            feed_url: format!("{base}/data/feed"),
            statement_url: format!("{base}/service"),
        }
    }

    async fn current_quotes(&self, session: &HttpSession, symbol: &Symbol) -> Result<FetchResult, SourceError> {
        let code = symbol.netease();
        let url = format!("{}/{code},money.api", self.feed_url);
        debug!(url = %url, symbol = %symbol, "Fetching 163 snapshot");

        let body = session.text(session.get(&url)).await?;
        let feed: Map<String, Value> = serde_json::from_str(strip_jsonp(&body)?)
            .map_err(|e| SourceError::schema(format!("163 feed: {e}")))?;
        let entry = feed
            .get(&code)
            .and_then(Value::as_object)
            .ok_or_else(|| SourceError::Api(format!("163 feed has no entry for {code}")))?;

        FetchResult::from_serializable(&parse_quote(symbol, entry)?)
            .map_err(|e| SourceError::schema(e.to_string()))
    }

    async fn statement(
        &self,
        session: &HttpSession,
        symbol: &Symbol,
        table: &str,
    ) -> Result<FetchResult, SourceError> {
        let url = format!("{}/{table}_{}.html", self.statement_url, symbol.code());
        debug!(url = %url, symbol = %symbol, table, "Fetching 163 statement");

        let text = session.text_with_charset(session.get(&url), "gbk").await?;
        Ok(parse_statement(&text)?.into())
    }
}

impl Default for NeteaseSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataSource for NeteaseSource {
    fn name(&self) -> &'static str {
        NETEASE
    }

    fn categories(&self) -> &'static [Category] {
        CATEGORIES
    }

    async fn fetch(
        &self,
        session: &HttpSession,
        request: &CategoryRequest,
    ) -> Result<FetchResult, SourceError> {
        let symbol = required_symbol(NETEASE, request)?;
        match request.category {
            Category::CurrentQuotes => self.current_quotes(session, symbol).await,
            Category::Fundamentals => {
                let table = request.variant().unwrap_or("lrb");
                self.statement(session, symbol, table).await
            }
            other => Err(unsupported(NETEASE, other)),
        }
    }
}

// ============================================================================
// Parsing
// ============================================================================

fn parse_quote(symbol: &Symbol, entry: &Map<String, Value>) -> Result<CurrentQuote, SourceError> {
    let num = |key: &str| -> Option<f64> {
        match entry.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => convert_number(s),
            _ => None,
        }
    };
    let required = |key: &str| {
        num(key).ok_or_else(|| SourceError::schema(format!("163 feed missing {key}")))
    };
    let levels = |side: &str| -> Vec<PriceLevel> {
        (1..=5)
            .map(|i| PriceLevel {
                price: num(&format!("{side}{i}")).unwrap_or(0.0),
                volume: num(&format!("{side}vol{i}")).unwrap_or(0.0),
            })
            .collect()
    };

    Ok(CurrentQuote {
        code: symbol.prefixed(),
        name: entry
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        open: required("open")?,
        close: required("yestclose")?,
        now: required("price")?,
        high: required("high")?,
        low: required("low")?,
        turnover: num("turnover"),
        volume: required("volume")?,
        bids: levels("bid"),
        asks: levels("ask"),
        dt: entry
            .get("time")
            .and_then(Value::as_str)
            .and_then(parse_datetime),
    })
}

/// Statement CSVs list one line item per row and one report date per column.
fn parse_statement(text: &str) -> Result<Table, SourceError> {
    let raw = parse_delimited(text, Some(b','))?;

    // A trailing comma on every line leaves an unnamed empty column
    let keep: Vec<usize> = raw
        .columns
        .iter()
        .enumerate()
        .filter(|(_, c)| !c.is_empty())
        .map(|(i, _)| i)
        .collect();
    if keep.len() < 2 {
        return Err(SourceError::schema("163 statement has no report columns"));
    }

    let mut table = Table::new(keep.iter().map(|&i| raw.columns[i].clone()).collect());
    for row in &raw.rows {
        table.push_row(
            keep.iter()
                .map(|&i| row.get(i).cloned().unwrap_or(Value::Null))
                .collect(),
        );
    }
    Ok(table)
}
