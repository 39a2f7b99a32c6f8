//! Site adapters.
//!
//! One module per external site. Each adapter implements [`DataSource`] for
//! the categories that site serves and owns every markup and field-name
//! assumption about it.

pub mod cninfo;
pub mod exchange;
pub mod netease;
pub mod sina;
pub mod tencent;
pub mod xueqiu;

pub use cninfo::CninfoSource;
pub use exchange::ExchangeSource;
pub use netease::NeteaseSource;
pub use sina::SinaSource;
pub use tencent::TencentSource;
pub use xueqiu::XueqiuSource;

use chrono::{NaiveDate, NaiveTime};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use fintie_common::util::{convert_number, parse_date};

use super::model::{StockProfile, TickTrade, TradeSide};
use super::parse::{parse_delimited, KeyValues};
use super::provider::{DataSource, SourceError};
use super::request::Category;
use super::symbol::Symbol;
use super::{FetchResult, Table};

// ============================================================================
// Source Names
// ============================================================================

pub const QQ: &str = "qq";
pub const SINA: &str = "sina";
pub const CNINFO: &str = "cninfo";
pub const EXCHANGE: &str = "exchange";
pub const NETEASE: &str = "netease";
pub const XUEQIU: &str = "xueqiu";

/// Every built-in adapter with production endpoints.
pub fn all_sources() -> Vec<Arc<dyn DataSource>> {
    vec![
        Arc::new(TencentSource::new()),
        Arc::new(SinaSource::new()),
        Arc::new(CninfoSource::new()),
        Arc::new(ExchangeSource::new()),
        Arc::new(NeteaseSource::new()),
        Arc::new(XueqiuSource::new()),
    ]
}

/// Built-in fallback order for a category.
pub fn default_order(category: Category) -> &'static [&'static str] {
    match category {
        Category::StockInfo => &[QQ, SINA, CNINFO],
        Category::StockList => &[EXCHANGE, CNINFO],
        Category::TickQuotes => &[SINA, QQ],
        Category::CurrentQuotes => &[NETEASE, SINA, QQ],
        Category::Delisted | Category::MarketEvents | Category::Announcements => &[CNINFO],
        Category::Fundamentals => &[NETEASE],
        Category::HistQuotes
        | Category::LiveQuotes
        | Category::ListQuotes
        | Category::Shareholders
        | Category::InsiderTrades
        | Category::FinancialIndicators
        | Category::StockPicker => &[XUEQIU],
    }
}

/// Built-in orders for every category.
pub fn default_orders() -> HashMap<Category, Vec<String>> {
    Category::ALL
        .iter()
        .map(|&c| (c, default_order(c).iter().map(|s| s.to_string()).collect()))
        .collect()
}

// ============================================================================
// Shared Normalization
// ============================================================================

/// Error for a category an adapter was asked for but does not serve.
pub(crate) fn unsupported(name: &'static str, category: Category) -> SourceError {
    SourceError::Unsupported { name, category }
}

pub(crate) fn profile_result(profile: &StockProfile) -> Result<FetchResult, SourceError> {
    FetchResult::from_serializable(profile).map_err(|e| SourceError::schema(e.to_string()))
}

/// Required date label; a missing or malformed date is a schema error.
pub(crate) fn required_date(kv: &KeyValues, key: &str) -> Result<NaiveDate, SourceError> {
    let text = kv.require(key)?;
    parse_date(text).ok_or_else(|| SourceError::schema(format!("bad date in {key}: {text}")))
}

pub(crate) fn optional_date(kv: &KeyValues, key: &str) -> Option<NaiveDate> {
    parse_date(kv.text(key))
}

/// Listed-company table: `symbol, code, name, exchange`, sorted by code.
pub(crate) fn stock_list_table(mut entries: Vec<(Symbol, String)>) -> Table {
    entries.sort_by(|a, b| (a.0.code(), a.0.exchange()).cmp(&(b.0.code(), b.0.exchange())));
    entries.dedup_by(|a, b| a.0 == b.0);

    let mut table = Table::new(
        ["symbol", "code", "name", "exchange"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    );
    for (symbol, name) in entries {
        table.push_row(vec![
            json!(symbol.dotted()),
            json!(symbol.code()),
            json!(name),
            json!(symbol.exchange().as_str()),
        ]);
    }
    table
}

/// Parse a daily tick download (tab-separated, Chinese headers).
///
/// `reverse` flips rows into chronological order for sites that list the
/// latest trade first.
pub(crate) fn parse_tick_download(
    text: &str,
    day: NaiveDate,
    reverse: bool,
) -> Result<Table, SourceError> {
    let raw = parse_delimited(text, Some(b'\t'))?;
    let col = |name: &str| {
        raw.column(name)
            .ok_or_else(|| SourceError::schema(format!("tick download missing column {name}")))
    };
    let (time_col, price_col, change_col) = (col("成交时间")?, col("成交价格")?, col("价格变动")?);
    let (volume_col, turnover_col, side_col) = (col("成交量(手)")?, col("成交额(元)")?, col("性质")?);

    let cell = |row: &[Value], idx: usize| -> String {
        row.get(idx)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let mut trades = Vec::with_capacity(raw.len());
    for row in &raw.rows {
        let time_text = cell(row, time_col);
        let Ok(time) = NaiveTime::parse_from_str(&time_text, "%H:%M:%S") else {
            // Footer lines and notices carry no time
            continue;
        };

        let number = |idx: usize| convert_number(&cell(row, idx));
        trades.push(TickTrade {
            time: day.and_time(time),
            price: number(price_col)
                .ok_or_else(|| SourceError::schema(format!("bad price at {time_text}")))?,
            price_change: number(change_col),
            volume: number(volume_col).unwrap_or(0.0) * 100.0,
            turnover: number(turnover_col).unwrap_or(0.0),
            character: TradeSide::from_label(&cell(row, side_col)).unwrap_or(TradeSide::Neutral),
        });
    }

    if reverse {
        trades.reverse();
    }

    let mut table = Table::new(
        ["time", "price", "price_change", "volume", "turnover", "character"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    );
    for trade in trades {
        table.push_row(vec![
            json!(trade.time.format("%Y-%m-%d %H:%M:%S").to_string()),
            json!(trade.price),
            json!(trade.price_change),
            json!(trade.volume),
            json!(trade.turnover),
            json!(u8::from(trade.character)),
        ]);
    }

    Ok(table)
}
