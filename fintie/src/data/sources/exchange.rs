//! Stock exchange adapter: the official SSE and SZSE listed-company lists.
//!
//! Both exchanges must answer; a partial list is reported as a failure so
//! the router falls back to the next source.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{stock_list_table, unsupported, EXCHANGE};
use crate::data::batch::fetch_batch;
use crate::data::parse::{delimited_rows, sniff_delimiter, strip_tags};
use crate::data::provider::{DataSource, SourceError};
use crate::data::request::{Category, CategoryRequest};
use crate::data::session::HttpSession;
use crate::data::symbol::{Exchange, Symbol};
use crate::data::FetchResult;

// ============================================================================
// Constants
// ============================================================================

const SSE_LIST_URL: &str = "http://query.sse.com.cn/security/stock/downloadStockListFile.do";
const SSE_REFERER: &str = "http://www.sse.com.cn/assortment/stock/list/share/";
/// 1: A shares, 2: B shares
const SSE_STOCK_TYPES: &[&str] = &["1", "2"];

const SZSE_REPORT_URL: &str = "http://www.szse.cn/api/report/ShowReport/data";
const SZSE_CATALOG_ID: &str = "1110";

const SZSE_PAGE_CONCURRENCY: usize = 4;

const CATEGORIES: &[Category] = &[Category::StockList];

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct SzseReport {
    #[serde(default)]
    metadata: SzseMetadata,
    #[serde(default)]
    data: Vec<SzseRow>,
}

#[derive(Debug, Default, Deserialize)]
struct SzseMetadata {
    #[serde(default)]
    pagecount: u32,
}

/// A row lists the company's A-share and B-share lines side by side.
#[derive(Debug, Default, Deserialize)]
struct SzseRow {
    #[serde(default)]
    agdm: String,
    #[serde(default)]
    agjc: String,
    #[serde(default)]
    bgdm: String,
    #[serde(default)]
    bgjc: String,
}

// ============================================================================
// Exchange Adapter
// ============================================================================

pub struct ExchangeSource {
    sse_url: String,
    szse_url: String,
}

impl ExchangeSource {
    pub fn new() -> Self {
        Self {
            sse_url: SSE_LIST_URL.to_string(),
            szse_url: SZSE_REPORT_URL.to_string(),
        }
    }

    pub fn with_base_url(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            sse_url: format!("{base}/security/stock/downloadStockListFile.do"),
            szse_url: format!("{base}/api/report/ShowReport/data"),
        }
    }

    async fn sse_list(&self, session: &HttpSession) -> Result<Vec<(Symbol, String)>, SourceError> {
        let mut entries = Vec::new();
        for &stock_type in SSE_STOCK_TYPES {
            debug!(url = %self.sse_url, stock_type, "Fetching SSE stock list");
            let request = session
                .get(&self.sse_url)
                .header(reqwest::header::REFERER, SSE_REFERER)
                .query(&[
                    ("csrcCode", ""),
                    ("stockCode", ""),
                    ("areaName", ""),
                    ("stockType", stock_type),
                ]);
            let text = session.text_with_charset(request, "gbk").await?;
            entries.extend(parse_sse_list(&text)?);
        }
        Ok(entries)
    }

    async fn szse_page(&self, session: &HttpSession, page: u32) -> Result<SzseReport, SourceError> {
        let request = session.get(&self.szse_url).query(&[
            ("SHOWTYPE", "JSON".to_string()),
            ("CATALOGID", SZSE_CATALOG_ID.to_string()),
            ("TABKEY", "tab1".to_string()),
            ("PAGENO", page.to_string()),
        ]);
        let mut reports: Vec<SzseReport> = session.json(request).await?;
        if reports.is_empty() {
            return Err(SourceError::schema("SZSE report returned no tabs"));
        }
        Ok(reports.swap_remove(0))
    }

    async fn szse_list(&self, session: &HttpSession) -> Result<Vec<(Symbol, String)>, SourceError> {
        debug!(url = %self.szse_url, "Fetching SZSE stock list");
        let first = self.szse_page(session, 1).await?;
        let pages = first.metadata.pagecount;
        let mut entries = szse_entries(&first.data);

        let rest = fetch_batch((2..=pages).collect(), SZSE_PAGE_CONCURRENCY, |page| {
            self.szse_page(session, page)
        })
        .await;
        for item in rest {
            let report = item
                .value
                .ok_or_else(|| SourceError::Network(format!("SZSE list page {} failed", item.key)))?;
            entries.extend(szse_entries(&report.data));
        }

        Ok(entries)
    }
}

impl Default for ExchangeSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataSource for ExchangeSource {
    fn name(&self) -> &'static str {
        EXCHANGE
    }

    fn categories(&self) -> &'static [Category] {
        CATEGORIES
    }

    async fn fetch(
        &self,
        session: &HttpSession,
        request: &CategoryRequest,
    ) -> Result<FetchResult, SourceError> {
        if request.category != Category::StockList {
            return Err(unsupported(EXCHANGE, request.category));
        }

        let mut entries = self.sse_list(session).await?;
        entries.extend(self.szse_list(session).await?);
        Ok(stock_list_table(entries).into())
    }
}

// ============================================================================
// Parsing
// ============================================================================

/// SSE download: code in column 3, short name in column 4.
fn parse_sse_list(text: &str) -> Result<Vec<(Symbol, String)>, SourceError> {
    let rows = delimited_rows(text, sniff_delimiter(text))?;
    Ok(rows
        .iter()
        .filter(|row| row.len() >= 7 && row[0] != "公司代码")
        .filter_map(|row| {
            Symbol::new(Exchange::Sh, &row[2])
                .ok()
                .map(|symbol| (symbol, row[3].clone()))
        })
        .collect())
}

fn szse_entries(rows: &[SzseRow]) -> Vec<(Symbol, String)> {
    rows.iter()
        .flat_map(|row| [(&row.agdm, &row.agjc), (&row.bgdm, &row.bgjc)])
        .filter(|(code, _)| !code.trim().is_empty())
        .filter_map(|(code, name)| {
            Symbol::new(Exchange::Sz, code.trim())
                .ok()
                .map(|symbol| (symbol, strip_tags(name)))
        })
        .collect()
}
