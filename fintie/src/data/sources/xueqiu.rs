//! Xueqiu (雪球) adapter.
//!
//! Serves K-lines, live trades and order book, quote lists, shareholder and
//! insider tables, F10 financial tables and the stock screener.
//!
//! Every API call needs the cookies set by the home page, so the session is
//! warmed up once before the first request. All calls carry a `_`
//! millisecond timestamp to defeat caching.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use serde_json::Value;
use tracing::debug;

use fintie_common::util::page_count;

use super::{unsupported, XUEQIU};
use crate::data::batch::fetch_batch;
use crate::data::parse::{json_array, json_u64};
use crate::data::provider::{required_symbol, DataSource, SourceError};
use crate::data::request::{Category, CategoryRequest, FqType, Frequency};
use crate::data::session::HttpSession;
use crate::data::symbol::Symbol;
use crate::data::{FetchResult, Record, Table};

// ============================================================================
// Constants
// ============================================================================

const HOME_URL: &str = "https://xueqiu.com";
const STOCK_API_URL: &str = "https://stock.xueqiu.com";

const KLINE_PATH: &str = "/v5/stock/chart/kline.json";
const TRADES_PATH: &str = "/v5/stock/history/trade.json";
const PANKOU_PATH: &str = "/v5/stock/realtime/pankou.json";
const QUOTE_PATH: &str = "/v5/stock/quote.json";

const STOCK_LIST_PATH: &str = "/stock/cata/stocklist.json";
const FUND_LIST_PATH: &str = "/fund/quote/list.json";
const INSIDER_PATH: &str = "/stock/f10/skholderchg.json";
const SCREENER_PATH: &str = "/stock/screener/screen.json";

const KLINE_INDICATORS: &str = "kline,ma,macd,kdj,boll,rsi,wr,bias,cci,psy";
const DEFAULT_BAR_COUNT: i64 = -200;

const LIST_PAGE_SIZE: u32 = 90;
const LIST_PAGE_CONCURRENCY: usize = 5;
/// F10 tables are small; one oversized page holds them all
const F10_PAGE_SIZE: &str = "10000";
const SCREENER_PAGE_SIZE: u32 = 100_000;

const CATEGORIES: &[Category] = &[
    Category::HistQuotes,
    Category::LiveQuotes,
    Category::ListQuotes,
    Category::Shareholders,
    Category::InsiderTrades,
    Category::FinancialIndicators,
    Category::StockPicker,
];

type Query = Vec<(String, String)>;

fn query(pairs: &[(&str, &str)]) -> Query {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// ============================================================================
// Variant Mapping
// ============================================================================

fn shareholder_path(variant: &str) -> Option<&'static str> {
    match variant {
        "main" => Some("/stock/f10/shareholder.json"),
        "public" => Some("/stock/f10/otsholder.json"),
        "limit" => Some("/stock/f10/limskholder.json"),
        "count" => Some("/stock/f10/shareholdernum.json"),
        _ => None,
    }
}

fn f10_path(table: &str) -> Option<&'static str> {
    match table {
        "MRCWZB" => Some("/stock/f10/dailypriceextend.json"),
        "GPSYLZB" => Some("/stock/f10/yieldindic.json"),
        "ZYCWZB" => Some("/stock/f10/finmainindex.json"),
        "DJCWZB" => Some("/stock/f10/finqindic.json"),
        "GSLRB" => Some("/stock/f10/incstatement.json"),
        "ZCFZB" => Some("/stock/f10/balsheet.json"),
        "XJLLB" => Some("/stock/f10/cfstatement.json"),
        _ => None,
    }
}

/// Endpoint, fixed parameters and total-count path of a quote list.
fn list_spec(variant: &str) -> Option<(&'static str, Query, &'static str)> {
    match variant {
        "stock" => Some((STOCK_LIST_PATH, query(&[("type", "11,12")]), "count.count")),
        "cb" => Some((
            STOCK_LIST_PATH,
            query(&[("exchange", "CN"), ("industry", "可转债")]),
            "count.count",
        )),
        "etf" => Some((
            FUND_LIST_PATH,
            query(&[("parent_type", "13"), ("type", "135"), ("orderBy", "percent")]),
            "count",
        )),
        "fenji" => Some((
            FUND_LIST_PATH,
            query(&[("parent_type", "1"), ("type", "14"), ("orderBy", "percent")]),
            "count",
        )),
        _ => None,
    }
}

/// Millisecond timestamp of the K-line reference point (China time).
///
/// With a negative count the bars end at the reference day, so the whole
/// day is included.
fn kline_begin_millis(day: NaiveDate, count: i64) -> i64 {
    let day = if count < 0 { day + Duration::days(1) } else { day };
    day.and_hms_opt(0, 0, 0)
        .map_or(0, |dt| (dt - Duration::hours(8)).and_utc().timestamp_millis())
}

// ============================================================================
// Xueqiu Adapter
// ============================================================================

pub struct XueqiuSource {
    home_url: String,
    api_url: String,
}

impl XueqiuSource {
    pub fn new() -> Self {
        Self {
            home_url: HOME_URL.to_string(),
            api_url: STOCK_API_URL.to_string(),
        }
    }

    pub fn with_base_url(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        Self {
            home_url: base.clone(),
            api_url: base,
        }
    }

    /// GET a JSON endpoint after warming up the session.
    async fn get_json(&self, session: &HttpSession, url: &str, mut params: Query) -> Result<Value, SourceError> {
        session.warm_up(XUEQIU, &self.home_url).await?;

        params.push(("_".into(), Utc::now().timestamp_millis().to_string()));
        debug!(url = %url, "Fetching xueqiu");
        session.json(session.get(url).query(&params)).await
    }

    /// v5 APIs wrap payloads in `{data, error_code}`; only code 0 is success.
    async fn get_v5(&self, session: &HttpSession, path: &str, params: Query) -> Result<Value, SourceError> {
        let url = format!("{}{}", self.api_url, path);
        let mut value = self.get_json(session, &url, params).await?;
        check_error_code(&value)?;
        Ok(value.get_mut("data").map(Value::take).unwrap_or(Value::Null))
    }

    async fn hist_quotes(
        &self,
        session: &HttpSession,
        symbol: &Symbol,
        request: &CategoryRequest,
    ) -> Result<FetchResult, SourceError> {
        let params = &request.params;
        let count = params.count.unwrap_or(DEFAULT_BAR_COUNT);
        let day = params.end.unwrap_or_else(|| Utc::now().date_naive());
        let frequency = params.frequency.unwrap_or(Frequency::Day);
        let fq = params.fq.unwrap_or(FqType::Before);

        let code = symbol.upper_prefixed();
        let begin = kline_begin_millis(day, count).to_string();
        let count = count.to_string();
        let data = self
            .get_v5(
                session,
                KLINE_PATH,
                query(&[
                    ("symbol", code.as_str()),
                    ("begin", begin.as_str()),
                    ("period", frequency.as_str()),
                    ("type", fq.as_str()),
                    ("count", count.as_str()),
                    ("indicator", KLINE_INDICATORS),
                ]),
            )
            .await?;

        Ok(kline_table(&data)?.into())
    }

    async fn live_quotes(
        &self,
        session: &HttpSession,
        symbol: &Symbol,
        variant: &str,
    ) -> Result<FetchResult, SourceError> {
        let code = symbol.upper_prefixed();
        match variant {
            "trades" => {
                let data = self.get_v5(session, TRADES_PATH, query(&[("symbol", code.as_str())])).await?;
                Ok(Table::from_values(json_array(&data, "items")?).into())
            }
            "pankou" => {
                let data = self.get_v5(session, PANKOU_PATH, query(&[("symbol", code.as_str())])).await?;
                record_result(data)
            }
            "quote" => {
                let data = self
                    .get_v5(session, QUOTE_PATH, query(&[("symbol", code.as_str()), ("extend", "detail")]))
                    .await?;
                record_result(data)
            }
            other => Err(SourceError::InvalidRequest(format!("unknown live quote type {other}"))),
        }
    }

    async fn list_quotes(&self, session: &HttpSession, request: &CategoryRequest) -> Result<FetchResult, SourceError> {
        let variant = request.variant().unwrap_or("stock");
        let (path, fixed, total_path) = list_spec(variant)
            .ok_or_else(|| SourceError::InvalidRequest(format!("unknown quote list {variant}")))?;
        let url = format!("{}{}", self.home_url, path);
        let page_size = request.params.page_size.unwrap_or(LIST_PAGE_SIZE);

        let size = page_size.to_string();
        let page_query = |page: u32| {
            let page = page.to_string();
            let mut params = fixed.clone();
            params.extend(query(&[
                ("order", "desc"),
                ("orderby", "percent"),
                ("page", page.as_str()),
                ("size", size.as_str()),
            ]));
            params
        };
        let fetch_page = |page: u32| {
            let url = url.as_str();
            let params = page_query(page);
            async move {
                let value = self.get_json(session, url, params).await?;
                check_list_success(&value)?;
                Ok::<_, SourceError>(value)
            }
        };

        let first = fetch_page(1).await?;
        let total = json_u64(&first, total_path)
            .ok_or_else(|| SourceError::schema(format!("quote list has no {total_path}")))?;
        let pages = page_count(total, u64::from(page_size));
        debug!(variant, total, pages, "Quote list paged");

        let mut table = Table::from_values(json_array(&first, "stocks")?);
        let rest: Vec<u32> = (2..=pages).filter_map(|p| u32::try_from(p).ok()).collect();
        for item in fetch_batch(rest, LIST_PAGE_CONCURRENCY, fetch_page).await {
            let page = item
                .value
                .ok_or_else(|| SourceError::Network(format!("quote list page {} failed", item.key)))?;
            table.extend(Table::from_values(json_array(&page, "stocks")?));
        }

        Ok(table.into())
    }

    async fn shareholders(
        &self,
        session: &HttpSession,
        symbol: &Symbol,
        variant: &str,
    ) -> Result<FetchResult, SourceError> {
        let path = shareholder_path(variant)
            .ok_or_else(|| SourceError::InvalidRequest(format!("unknown shareholder table {variant}")))?;
        self.f10_list(session, symbol, path).await
    }

    async fn f10_list(&self, session: &HttpSession, symbol: &Symbol, path: &str) -> Result<FetchResult, SourceError> {
        let value = self.f10(session, symbol, path).await?;
        Ok(Table::from_values(json_array(&value, "list")?).into())
    }

    async fn f10(&self, session: &HttpSession, symbol: &Symbol, path: &str) -> Result<Value, SourceError> {
        let url = format!("{}{}", self.home_url, path);
        let code = symbol.upper_prefixed();
        self.get_json(
            session,
            &url,
            query(&[("symbol", code.as_str()), ("page", "1"), ("size", F10_PAGE_SIZE)]),
        )
        .await
    }

    async fn financial_indicators(
        &self,
        session: &HttpSession,
        symbol: &Symbol,
        table: &str,
    ) -> Result<FetchResult, SourceError> {
        let path = f10_path(table)
            .ok_or_else(|| SourceError::InvalidRequest(format!("unknown F10 table {table}")))?;
        let value = self.f10(session, symbol, path).await?;

        match value.get("list") {
            Some(Value::Array(rows)) => Ok(Table::from_values(rows).into()),
            _ => record_result(value),
        }
    }

    async fn stock_picker(&self, session: &HttpSession, request: &CategoryRequest) -> Result<FetchResult, SourceError> {
        let url = format!("{}{}", self.home_url, SCREENER_PATH);
        let page_size = request.params.page_size.unwrap_or(SCREENER_PAGE_SIZE);

        let size = page_size.to_string();
        let page_query = |page: u32| {
            let page = page.to_string();
            let mut params = query(&[
                ("category", "SH"),
                ("orderby", "symbol"),
                ("order", "desc"),
                ("current", "ALL"),
                ("pct", "ALL"),
                ("volume", "ALL"),
                ("page", page.as_str()),
                ("size", size.as_str()),
            ]);
            for (key, value) in &request.params.filters {
                params.retain(|(k, _)| k != key);
                params.push((key.clone(), value.clone()));
            }
            params
        };

        let first_page = request.params.page.unwrap_or(1);
        let first = self.get_json(session, &url, page_query(first_page)).await?;
        let mut table = Table::from_values(json_array(&first, "list")?);
        if request.params.page.is_some() {
            return Ok(table.into());
        }

        let total = json_u64(&first, "count").unwrap_or(0);
        let pages = page_count(total, u64::from(page_size));
        for page in 2..=pages {
            let Ok(page) = u32::try_from(page) else { break };
            let value = self.get_json(session, &url, page_query(page)).await?;
            table.extend(Table::from_values(json_array(&value, "list")?));
        }

        Ok(table.into())
    }
}

impl Default for XueqiuSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataSource for XueqiuSource {
    fn name(&self) -> &'static str {
        XUEQIU
    }

    fn categories(&self) -> &'static [Category] {
        CATEGORIES
    }

    async fn fetch(
        &self,
        session: &HttpSession,
        request: &CategoryRequest,
    ) -> Result<FetchResult, SourceError> {
        let variant = request.variant().unwrap_or_default();
        match request.category {
            Category::HistQuotes => {
                self.hist_quotes(session, required_symbol(XUEQIU, request)?, request)
                    .await
            }
            Category::LiveQuotes => {
                self.live_quotes(session, required_symbol(XUEQIU, request)?, variant)
                    .await
            }
            Category::ListQuotes => self.list_quotes(session, request).await,
            Category::Shareholders => {
                self.shareholders(session, required_symbol(XUEQIU, request)?, variant)
                    .await
            }
            Category::InsiderTrades => {
                self.f10_list(session, required_symbol(XUEQIU, request)?, INSIDER_PATH)
                    .await
            }
            Category::FinancialIndicators => {
                self.financial_indicators(session, required_symbol(XUEQIU, request)?, variant)
                    .await
            }
            Category::StockPicker => self.stock_picker(session, request).await,
            other => Err(unsupported(XUEQIU, other)),
        }
    }
}

// ============================================================================
// Parsing
// ============================================================================

fn check_error_code(value: &Value) -> Result<(), SourceError> {
    match value.get("error_code").and_then(Value::as_i64) {
        Some(0) => Ok(()),
        code => Err(SourceError::Api(format!(
            "xueqiu error_code {}: {}",
            code.map_or_else(|| "missing".to_string(), |c| c.to_string()),
            value
                .get("error_description")
                .and_then(Value::as_str)
                .unwrap_or_default()
        ))),
    }
}

/// Stock lists report `success: false`; fund lists report an `error_code`.
fn check_list_success(value: &Value) -> Result<(), SourceError> {
    if value.get("success").and_then(Value::as_bool) == Some(false) {
        return Err(SourceError::Api(format!("xueqiu quote list failed: {value}")));
    }
    if let Some(code) = value.get("error_code") {
        return Err(SourceError::Api(format!("xueqiu quote list error_code {code}")));
    }
    Ok(())
}

/// `{column: [...], item: [[...], ...]}` into a table.
fn kline_table(data: &Value) -> Result<Table, SourceError> {
    let columns: Vec<String> = json_array(data, "column")?
        .iter()
        .map(|c| c.as_str().map_or_else(|| c.to_string(), str::to_string))
        .collect();

    let mut table = Table::new(columns);
    for item in json_array(data, "item")? {
        let row = item
            .as_array()
            .ok_or_else(|| SourceError::schema("kline item is not an array"))?;
        table.push_row(row.clone());
    }
    Ok(table)
}

fn record_result(value: Value) -> Result<FetchResult, SourceError> {
    match value {
        Value::Object(record) => Ok(FetchResult::Record(record)),
        Value::Null => Ok(FetchResult::Record(Record::new())),
        other => Err(SourceError::schema(format!("expected an object, got {other}"))),
    }
}
