//! Tencent finance (qq) adapter.
//!
//! # Endpoints
//! - Company profile: `stock.finance.qq.com/corp1/profile.php` (GBK HTML)
//! - Daily tick download: `stock.gtimg.cn/data/index.php` (GBK, tab-separated)
//! - Snapshot quote: `qt.gtimg.cn` (`~`-separated fields)

use async_trait::async_trait;
use chrono::NaiveDate;
use scraper::Html;
use tracing::debug;

use fintie_common::util::{convert_cn_amount, convert_number, parse_datetime};

use super::{
    optional_date, parse_tick_download, profile_result, required_date, unsupported, QQ,
};
use crate::data::model::{CurrentQuote, PriceLevel, StockProfile};
use crate::data::parse::{cell_text, selector, KeyValues};
use crate::data::provider::{required_symbol, DataSource, SourceError};
use crate::data::request::{Category, CategoryRequest};
use crate::data::session::HttpSession;
use crate::data::symbol::Symbol;
use crate::data::FetchResult;

// ============================================================================
// Constants
// ============================================================================

const PROFILE_URL: &str = "http://stock.finance.qq.com/corp1/profile.php";
const TICK_URL: &str = "http://stock.gtimg.cn/data/index.php";
const QUOTE_URL: &str = "http://qt.gtimg.cn/";

const CATEGORIES: &[Category] = &[
    Category::StockInfo,
    Category::TickQuotes,
    Category::CurrentQuotes,
];

/// Minimum `~` fields in a snapshot line (up to the low price).
const QUOTE_MIN_FIELDS: usize = 35;

// ============================================================================
// Tencent Adapter
// ============================================================================

pub struct TencentSource {
    profile_url: String,
    tick_url: String,
    quote_url: String,
}

impl TencentSource {
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
            profile_url: format!("{base}/corp1/profile.php"),
            tick_url: format!("{base}/data/index.php"),
            quote_url: format!("{base}/"),
        }
    }

    async fn stock_info(&self, session: &HttpSession, symbol: &Symbol) -> Result<FetchResult, SourceError> {
        debug!(url = %self.profile_url, symbol = %symbol, "Fetching qq profile");

        let request = session.get(&self.profile_url).query(&[("zqdm", symbol.code())]);
        let html = session.text_with_charset(request, "gbk").await?;
        profile_result(&parse_profile(&html)?)
    }

    async fn tick_quotes(
        &self,
        session: &HttpSession,
        symbol: &Symbol,
        day: NaiveDate,
    ) -> Result<FetchResult, SourceError> {
        debug!(url = %self.tick_url, symbol = %symbol, day = %day, "Fetching qq ticks");

        let request = session.get(&self.tick_url).query(&[
            ("appn", "detail".to_string()),
            ("action", "download".to_string()),
            ("c", symbol.prefixed()),
            ("d", day.format("%Y%m%d").to_string()),
        ]);
        let text = session.text_with_charset(request, "gbk").await?;
        Ok(parse_tick_download(&text, day, false)?.into())
    }

    async fn current_quotes(&self, session: &HttpSession, symbol: &Symbol) -> Result<FetchResult, SourceError> {
        debug!(url = %self.quote_url, symbol = %symbol, "Fetching qq snapshot");

        let request = session.get(&self.quote_url).query(&[("q", symbol.prefixed())]);
        let text = session.text_with_charset(request, "gbk").await?;
        FetchResult::from_serializable(&parse_quote(&text)?)
            .map_err(|e| SourceError::schema(e.to_string()))
    }
}

impl Default for TencentSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataSource for TencentSource {
    fn name(&self) -> &'static str {
        QQ
    }

    fn categories(&self) -> &'static [Category] {
        CATEGORIES
    }

    async fn fetch(
        &self,
        session: &HttpSession,
        request: &CategoryRequest,
    ) -> Result<FetchResult, SourceError> {
        let symbol = required_symbol(QQ, request)?;
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
            other => Err(unsupported(QQ, other)),
        }
    }
}

// ============================================================================
// Parsing
// ============================================================================

/// The profile is the third table on the page; its first cell is a caption.
fn parse_profile(html: &str) -> Result<StockProfile, SourceError> {
    let document = Html::parse_document(html);
    let table = document
        .select(&selector("table")?)
        .nth(2)
        .ok_or_else(|| SourceError::schema("qq profile table not found"))?;

    let cells = table
        .select(&selector("td")?)
        .skip(1)
        .map(cell_text)
        .collect();
    let kv = KeyValues::from_cells(cells);

    Ok(StockProfile {
        company_name: kv.require("法定名称")?.to_string(),
        list_date: Some(required_date(&kv, "上市日期")?),
        website: kv.text("公司网址").to_string(),
        intro: kv.text("公司沿革").to_string(),
        business: kv.text("经营范围").to_string(),
        reg_addr: kv.text("注册地址").to_string(),
        work_addr: kv.text("办公地址").to_string(),
        issue_price: convert_number(kv.text("发行价格(元)")),
        reg_cap: convert_cn_amount(kv.text("注册资本(万元)"), 10_000.0),
        concept: kv.text("所属板块").to_string(),
        industry: kv.text("所属行业").to_string(),
        found_date: optional_date(&kv, "成立日期"),
    })
}

/// Parse `v_sz000001="51~平安银行~000001~10.50~...";`.
fn parse_quote(text: &str) -> Result<CurrentQuote, SourceError> {
    let (lhs, rhs) = text
        .trim()
        .split_once('=')
        .ok_or_else(|| SourceError::schema("qq snapshot has no '='"))?;
    let fields: Vec<&str> = rhs.trim().trim_end_matches(';').trim_matches('"').split('~').collect();

    if fields.len() < QUOTE_MIN_FIELDS {
        return Err(SourceError::Api(format!(
            "qq snapshot has {} fields, symbol unknown?",
            fields.len()
        )));
    }

    let num = |idx: usize| -> Result<f64, SourceError> {
        fields
            .get(idx)
            .and_then(|s| convert_number(s))
            .ok_or_else(|| SourceError::schema(format!("qq snapshot field {idx} is not a number")))
    };
    let level = |idx: usize| -> Result<PriceLevel, SourceError> {
        Ok(PriceLevel {
            price: num(idx)?,
            volume: num(idx + 1)? * 100.0,
        })
    };

    Ok(CurrentQuote {
        code: lhs.rsplit('_').next().unwrap_or(lhs).trim().to_string(),
        name: fields[1].to_string(),
        open: num(5)?,
        close: num(4)?,
        now: num(3)?,
        high: num(33)?,
        low: num(34)?,
        turnover: fields.get(38).and_then(|s| convert_number(s)),
        volume: num(6)? * 100.0,
        bids: (0..5).map(|i| level(9 + 2 * i)).collect::<Result<_, _>>()?,
        asks: (0..5).map(|i| level(19 + 2 * i)).collect::<Result<_, _>>()?,
        dt: fields.get(30).and_then(|s| parse_datetime(s)),
    })
}
