//! Sina finance adapter.
//!
//! # Endpoints
//! - Company profile: `vip.stock.finance.sina.com.cn/corp/go.php/vCI_CorpInfo`
//! - Daily tick download: `market.finance.sina.com.cn/downxls.php` (GBK, latest first)
//! - Snapshot quote: `hq.sinajs.cn` (comma-separated fields)

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::debug;

use fintie_common::util::{convert_cn_amount, convert_number, parse_datetime};

use super::{
    optional_date, parse_tick_download, profile_result, required_date, unsupported, SINA,
};
use crate::data::model::{CurrentQuote, PriceLevel, StockProfile};
use crate::data::parse::KeyValues;
use crate::data::provider::{required_symbol, DataSource, SourceError};
use crate::data::request::{Category, CategoryRequest};
use crate::data::session::HttpSession;
use crate::data::symbol::Symbol;
use crate::data::FetchResult;

// ============================================================================
// Constants
// ============================================================================

const PROFILE_URL: &str = "http://vip.stock.finance.sina.com.cn/corp/go.php/vCI_CorpInfo/stockid";
const TICK_URL: &str = "http://market.finance.sina.com.cn/downxls.php";
const QUOTE_URL: &str = "http://hq.sinajs.cn/";

/// The quote server rejects requests without a finance.sina.com.cn referer.
const QUOTE_REFERER: &str = "https://finance.sina.com.cn/";

const CATEGORIES: &[Category] = &[
    Category::StockInfo,
    Category::TickQuotes,
    Category::CurrentQuotes,
];

/// Snapshot fields up to and including the time field.
const QUOTE_MIN_FIELDS: usize = 32;

// ============================================================================
// Sina Adapter
// ============================================================================

pub struct SinaSource {
    profile_url: String,
    tick_url: String,
    quote_url: String,
}

impl SinaSource {
    pub fn new() -> Self {
        Self {
            profile_url: PROFILE_URL.to_string(),
            tick_url: TICK_URL.to_string(),
            quote_url: QUOTE_URL.to_string(),
        }
    }

    /// Serve every endpoint from one base URL.
    pub fn with_base_url(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            profile_url: format!("{base}/corp/go.php/vCI_CorpInfo/stockid"),
            tick_url: format!("{base}/downxls.php"),
            quote_url: format!("{base}/"),
        }
    }

    async fn stock_info(&self, session: &HttpSession, symbol: &Symbol) -> Result<FetchResult, SourceError> {
        let url = format!("{}/{}.phtml", self.profile_url, symbol.code());
        debug!(url = %url, symbol = %symbol, "Fetching sina profile");

        let html = session.text_with_charset(session.get(&url), "gbk").await?;
        profile_result(&parse_profile(&html)?)
    }

    async fn tick_quotes(
        &self,
        session: &HttpSession,
        symbol: &Symbol,
        day: NaiveDate,
    ) -> Result<FetchResult, SourceError> {
        debug!(url = %self.tick_url, symbol = %symbol, day = %day, "Fetching sina ticks");

        let request = session.get(&self.tick_url).query(&[
            ("symbol", symbol.prefixed()),
            ("date", day.format("%Y-%m-%d").to_string()),
        ]);
        let text = session.text_with_charset(request, "gbk").await?;
        Ok(parse_tick_download(&text, day, true)?.into())
    }

    async fn current_quotes(&self, session: &HttpSession, symbol: &Symbol) -> Result<FetchResult, SourceError> {
        debug!(url = %self.quote_url, symbol = %symbol, "Fetching sina snapshot");

        let request = session
            .get(&self.quote_url)
            .header(reqwest::header::REFERER, QUOTE_REFERER)
            .query(&[("format", "text".to_string()), ("list", symbol.prefixed())]);
        let text = session.text_with_charset(request, "gbk").await?;
        FetchResult::from_serializable(&parse_quote(&text)?)
            .map_err(|e| SourceError::schema(e.to_string()))
    }
}

impl Default for SinaSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataSource for SinaSource {
    fn name(&self) -> &'static str {
        SINA
    }

    fn categories(&self) -> &'static [Category] {
        CATEGORIES
    }

    async fn fetch(
        &self,
        session: &HttpSession,
        request: &CategoryRequest,
    ) -> Result<FetchResult, SourceError> {
        let symbol = required_symbol(SINA, request)?;
        match request.category {
            Category::StockInfo => self.stock_info(session, symbol).await,
            Category::TickQuotes => {
                let day = request
                    .params
                    .date
                    .ok_or_else(|| SourceError::InvalidRequest("tick quotes need a date".into()))?;
                self.tick_quotes(session, symbol, day).await
            }
            Category::CurrentQuotes => self.current_quotes(session, symbol).await,
            other => Err(unsupported(SINA, other)),
        }
    }
}

// ============================================================================
// Parsing
// ============================================================================

fn parse_profile(html: &str) -> Result<StockProfile, SourceError> {
    let kv = KeyValues::from_html(html, "table#comInfo1 td", 0)?;
    if kv.is_empty() {
        return Err(SourceError::schema("sina profile table #comInfo1 not found"));
    }

    Ok(StockProfile {
        company_name: kv.require("公司名称")?.to_string(),
        list_date: Some(required_date(&kv, "上市日期")?),
        website: kv.text("公司网址").to_string(),
        intro: kv.text("公司简介").to_string(),
        business: kv.text("经营范围").to_string(),
        reg_addr: kv.text("注册地址").to_string(),
        work_addr: kv.text("办公地址").to_string(),
        issue_price: convert_number(kv.text("发行价格")),
        reg_cap: convert_cn_amount(kv.text("注册资本"), 1.0),
        concept: String::new(),
        industry: String::new(),
        found_date: optional_date(&kv, "成立日期"),
    })
}

/// Parse `sz000001=平安银行,10.45,10.40,...`.
fn parse_quote(text: &str) -> Result<CurrentQuote, SourceError> {
    let line = text
        .lines()
        .find(|l| l.contains('='))
        .ok_or_else(|| SourceError::schema("sina snapshot has no '='"))?;
    let (code, data) = line
        .split_once('=')
        .ok_or_else(|| SourceError::schema("sina snapshot has no '='"))?;
    let fields: Vec<&str> = data.trim().trim_matches(['"', ';']).split(',').collect();

    if fields.len() < QUOTE_MIN_FIELDS {
        return Err(SourceError::Api(format!(
            "sina snapshot has {} fields, symbol unknown?",
            fields.len()
        )));
    }

    let num = |idx: usize| -> Result<f64, SourceError> {
        convert_number(fields[idx])
            .ok_or_else(|| SourceError::schema(format!("sina snapshot field {idx} is not a number")))
    };
    // Volume precedes price for each book level
    let level = |idx: usize| -> Result<PriceLevel, SourceError> {
        Ok(PriceLevel {
            price: num(idx + 1)?,
            volume: num(idx)?,
        })
    };

    Ok(CurrentQuote {
        code: code.trim().trim_start_matches("var hq_str_").to_string(),
        name: fields[0].to_string(),
        open: num(1)?,
        close: num(2)?,
        now: num(3)?,
        high: num(4)?,
        low: num(5)?,
        turnover: Some(num(8)?),
        volume: num(9)?,
        bids: (0..5).map(|i| level(10 + 2 * i)).collect::<Result<_, _>>()?,
        asks: (0..5).map(|i| level(20 + 2 * i)).collect::<Result<_, _>>()?,
        dt: parse_datetime(&format!("{} {}", fields[30], fields[31])),
    })
}
