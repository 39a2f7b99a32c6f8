//! CNINFO (巨潮资讯) adapter.
//!
//! Serves company profiles, the listed-company and delisted-company lists,
//! the daily market event memo, and announcement metadata. Announcement
//! rows carry a `download_url` and `file_name` so callers can fetch the
//! documents themselves.

use async_trait::async_trait;
use chrono::NaiveDate;
use scraper::Html;
use serde_json::{json, Value};
use tracing::{debug, warn};

use fintie_common::util::{convert_cn_amount, convert_number, datetime_from_millis, page_count};

use super::{profile_result, required_date, stock_list_table, unsupported, CNINFO};
use crate::data::model::StockProfile;
use crate::data::parse::{cell_text, json_u64, selector, KeyValues};
use crate::data::provider::{required_symbol, DataSource, SourceError};
use crate::data::request::{Category, CategoryRequest};
use crate::data::session::HttpSession;
use crate::data::symbol::{Exchange, Symbol};
use crate::data::{FetchResult, Record, Table};

// ============================================================================
// Constants
// ============================================================================

const BASE_URL: &str = "http://www.cninfo.com.cn";

const BRIEF_PATH: &str = "/information/brief";
const COMPANY_LIST_PATH: &str = "/cninfo-new/information/companylist";
const DELIST_PATH: &str = "/cninfo-new/information/delistinglist-1";
const MEMO_PATH: &str = "/cninfo-new/memo/memoQuery";
const ANNOUNCEMENT_PATH: &str = "/cninfo-new/announcement/query";
/// Visited once per session before announcement queries
const ANNOUNCEMENT_HOME_PATH: &str = "/information/companyinfo_n.html";

/// Announcement kinds queried when the request names none.
pub const DEFAULT_ANNOUNCEMENT_KINDS: &[&str] = &["ndbg", "bndbg", "yjdbg", "sjdbg"];

const ANNOUNCEMENT_PAGE_SIZE: u32 = 30;

/// Company list blocks: main board, SME board, ChiNext (SZ), main board (SH).
const LIST_BLOCKS: &[(&str, Exchange)] = &[
    ("con-a-1", Exchange::Sz),
    ("con-a-2", Exchange::Sz),
    ("con-a-3", Exchange::Sz),
    ("con-a-4", Exchange::Sh),
];

const CATEGORIES: &[Category] = &[
    Category::StockInfo,
    Category::StockList,
    Category::Delisted,
    Category::MarketEvents,
    Category::Announcements,
];

// ============================================================================
// Code Mapping
// ============================================================================

/// Board-prefixed code used by the brief pages, e.g. `szmb000001`.
///
/// Returns `None` for boards the brief pages do not cover.
fn brief_code(symbol: &Symbol) -> Option<String> {
    let code = symbol.code();
    let board = match symbol.exchange() {
        Exchange::Sh if code.starts_with("60") || code.starts_with("90") => "shmb",
        Exchange::Sz if code.starts_with("300") => "szcn",
        Exchange::Sz if code.starts_with("002") => "szsme",
        Exchange::Sz if code.starts_with("00") || code.starts_with("200") => "szmb",
        _ => return None,
    };
    Some(format!("{board}{code}"))
}

// ============================================================================
// CNINFO Adapter
// ============================================================================

pub struct CninfoSource {
    base_url: String,
}

impl CninfoSource {
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL)
    }

    pub fn with_base_url(base: &str) -> Self {
        Self {
            base_url: base.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Absolute URL of an announcement document.
    pub fn document_url(&self, adjunct_url: &str) -> String {
        format!("{}/{}", self.base_url, adjunct_url.trim_start_matches('/'))
    }

    async fn stock_info(&self, session: &HttpSession, symbol: &Symbol) -> Result<FetchResult, SourceError> {
        let code = brief_code(symbol).ok_or(SourceError::Unsupported {
            name: CNINFO,
            category: Category::StockInfo,
        })?;
        let url = self.url(&format!("{BRIEF_PATH}/{code}.html"));
        debug!(url = %url, symbol = %symbol, "Fetching cninfo brief");

        let html = session.text_with_charset(session.get(&url), "gbk").await?;
        profile_result(&parse_brief(&html)?)
    }

    async fn stock_list(&self, session: &HttpSession) -> Result<FetchResult, SourceError> {
        let url = self.url(COMPANY_LIST_PATH);
        debug!(url = %url, "Fetching cninfo company list");

        let html = session.text(session.get(&url)).await?;
        Ok(parse_company_list(&html)?.into())
    }

    async fn delisted(&self, session: &HttpSession) -> Result<FetchResult, SourceError> {
        let url = self.url(DELIST_PATH);
        let mut table = Table::new(vec!["symbol".into(), "delist_date".into()]);

        for exchange in [Exchange::Sz, Exchange::Sh] {
            debug!(url = %url, market = exchange.as_str(), "Fetching cninfo delisted list");
            let request = session.get(&url).query(&[("market", exchange.as_str())]);
            let entries: Vec<Value> = session.json(request).await?;
            table.extend(parse_delisted(&entries, exchange));
        }

        Ok(table.into())
    }

    async fn market_events(&self, session: &HttpSession, day: NaiveDate) -> Result<FetchResult, SourceError> {
        let url = self.url(MEMO_PATH);
        let day_str = day.format("%Y-%m-%d").to_string();
        debug!(url = %url, day = %day_str, "Fetching cninfo market events");

        let request = session.post(&url).form(&[("queryDate", day_str.as_str())]);
        let value: Value = session.json(request).await?;

        Ok(match value {
            Value::Object(record) => FetchResult::Record(record),
            Value::Null => FetchResult::Record(Record::new()),
            other => {
                let mut record = Record::new();
                record.insert("events".into(), other);
                FetchResult::Record(record)
            }
        })
    }

    async fn announcements(
        &self,
        session: &HttpSession,
        symbol: &Symbol,
        request: &CategoryRequest,
    ) -> Result<FetchResult, SourceError> {
        session
            .warm_up(CNINFO, &self.url(ANNOUNCEMENT_HOME_PATH))
            .await?;

        let params = &request.params;
        let page_size = params.page_size.unwrap_or(ANNOUNCEMENT_PAGE_SIZE);
        let kinds: Vec<&str> = if params.kinds.is_empty() {
            DEFAULT_ANNOUNCEMENT_KINDS.to_vec()
        } else {
            params.kinds.iter().map(String::as_str).collect()
        };
        let query = AnnouncementQuery {
            stock: symbol.code().to_string(),
            category: kinds
                .iter()
                .map(|k| format!("category_{k}_szsh;"))
                .collect(),
            se_date: match (params.start, params.end) {
                (Some(start), Some(end)) => format!("{start}+~+{end}"),
                _ => String::new(),
            },
            search_key: params.search_key.clone().unwrap_or_default(),
            page_size,
        };

        // An explicit page fetches only that page
        if let Some(page) = params.page {
            let (_, rows) = self.announcement_page(session, &query, page).await?;
            return Ok(self.announcement_table(&rows).into());
        }

        let (total, mut rows) = self.announcement_page(session, &query, 1).await?;
        let pages = page_count(total, u64::from(page_size));
        debug!(symbol = %symbol, total, pages, "Announcement query paged");

        for page in 2..=pages {
            let Ok(page) = u32::try_from(page) else { break };
            match self.announcement_page(session, &query, page).await {
                Ok((_, more)) => rows.extend(more),
                Err(e) => {
                    warn!(symbol = %symbol, page, error = %e, "Announcement page failed, keeping earlier pages");
                    break;
                }
            }
        }

        Ok(self.announcement_table(&rows).into())
    }

    async fn announcement_page(
        &self,
        session: &HttpSession,
        query: &AnnouncementQuery,
        page: u32,
    ) -> Result<(u64, Vec<Value>), SourceError> {
        let page_num = page.to_string();
        let page_size = query.page_size.to_string();
        let form = [
            ("category", query.category.as_str()),
            ("column", ""),
            ("limit", ""),
            ("pageNum", page_num.as_str()),
            ("pageSize", page_size.as_str()),
            ("searchkey", query.search_key.as_str()),
            ("seDate", query.se_date.as_str()),
            ("sortName", ""),
            ("sortType", ""),
            ("stock", query.stock.as_str()),
            ("tabName", "fulltext"),
        ];

        let url = self.url(ANNOUNCEMENT_PATH);
        debug!(url = %url, stock = %query.stock, page, "Fetching announcement page");
        let data: Value = session.json(session.post(&url).form(&form)).await?;

        let total = json_u64(&data, "totalAnnouncement")
            .or_else(|| json_u64(&data, "totalRecordNum"))
            .ok_or_else(|| SourceError::schema("announcement query returned no total"))?;
        let rows = data
            .get("announcements")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok((total, rows))
    }

    /// Metadata rows plus the document URL and target file name.
    fn announcement_table(&self, rows: &[Value]) -> Table {
        let records: Vec<Record> = rows
            .iter()
            .filter_map(Value::as_object)
            .filter_map(|row| {
                let Some(file_name) = announcement_file_name(row) else {
                    warn!(announcement = %serde_json::Value::Object(row.clone()), "Announcement has no usable name, skipped");
                    return None;
                };
                let mut record = row.clone();
                if let Some(adjunct) = row.get("adjunctUrl").and_then(Value::as_str) {
                    record.insert("download_url".into(), json!(self.document_url(adjunct)));
                }
                record.insert("file_name".into(), json!(file_name));
                Some(record)
            })
            .collect();

        Table::from_records(&records)
    }
}

impl Default for CninfoSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataSource for CninfoSource {
    fn name(&self) -> &'static str {
        CNINFO
    }

    fn categories(&self) -> &'static [Category] {
        CATEGORIES
    }

    async fn fetch(
        &self,
        session: &HttpSession,
        request: &CategoryRequest,
    ) -> Result<FetchResult, SourceError> {
        match request.category {
            Category::StockInfo => {
                self.stock_info(session, required_symbol(CNINFO, request)?)
                    .await
            }
            Category::StockList => self.stock_list(session).await,
            Category::Delisted => self.delisted(session).await,
            Category::MarketEvents => {
                let day = request
                    .params
                    .date
                    .ok_or_else(|| SourceError::InvalidRequest("market events need a date".into()))?;
                self.market_events(session, day).await
            }
            Category::Announcements => {
                let symbol = required_symbol(CNINFO, request)?;
                self.announcements(session, symbol, request).await
            }
            other => Err(unsupported(CNINFO, other)),
        }
    }
}

struct AnnouncementQuery {
    stock: String,
    category: String,
    se_date: String,
    search_key: String,
    page_size: u32,
}

// ============================================================================
// Parsing
// ============================================================================

/// Brief pages put label/value text nodes in `div.clear table td`.
fn parse_brief(html: &str) -> Result<StockProfile, SourceError> {
    let kv = KeyValues::from_html(html, "div.clear table td", 0)?;
    if kv.is_empty() {
        return Err(SourceError::schema("cninfo brief table not found"));
    }

    Ok(StockProfile {
        company_name: kv.require("公司全称")?.to_string(),
        list_date: Some(required_date(&kv, "上市时间")?),
        website: kv.text("公司网址").to_string(),
        reg_addr: kv.text("注册地址").to_string(),
        work_addr: kv.text("办公地址").to_string(),
        issue_price: convert_number(kv.text("发行价格（元）")),
        reg_cap: convert_cn_amount(kv.text("注册资本(万元)"), 10_000.0),
        ..StockProfile::default()
    })
}

/// Each link text is `<code> <name>`.
fn parse_company_list(html: &str) -> Result<Table, SourceError> {
    let document = Html::parse_document(html);
    let mut entries = Vec::new();

    for (block, exchange) in LIST_BLOCKS {
        let links = selector(&format!("div#{block} ul li a"))?;
        for link in document.select(&links) {
            let text = cell_text(link);
            let Some((code, name)) = text.split_once(char::is_whitespace) else {
                continue;
            };
            match Symbol::new(*exchange, code) {
                Ok(symbol) => entries.push((symbol, name.trim().to_string())),
                Err(e) => debug!(entry = %text, error = %e, "Skipping company list entry"),
            }
        }
    }

    if entries.is_empty() {
        return Err(SourceError::schema("cninfo company list has no entries"));
    }
    Ok(stock_list_table(entries))
}

fn parse_delisted(entries: &[Value], exchange: Exchange) -> Table {
    let mut table = Table::new(vec!["symbol".into(), "delist_date".into()]);
    for entry in entries {
        let Some(code) = entry.get("y_seccode_0007").and_then(Value::as_str) else {
            continue;
        };
        let Ok(symbol) = Symbol::new(exchange, code.trim()) else {
            continue;
        };
        let date = entry.get("f008d_0007").cloned().unwrap_or(Value::Null);
        table.push_row(vec![json!(symbol.dotted()), date]);
    }
    table
}

/// `<title|id|orgId>-<YYYYmmddHHMMSS>.<adjunctType|raw>`
fn announcement_file_name(row: &Record) -> Option<String> {
    let name = ["announcementTitle", "announcementId", "orgId"]
        .iter()
        .find_map(|key| match row.get(*key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })?;

    let time = row
        .get("announcementTime")
        .and_then(Value::as_i64)
        .and_then(datetime_from_millis)
        .map(|dt| dt.format("%Y%m%d%H%M%S").to_string())
        .unwrap_or_default();
    let extension = row
        .get("adjunctType")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .unwrap_or("raw");

    Some(format!("{name}-{time}.{extension}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brief_code() {
        let code = |s: &str| brief_code(&Symbol::parse(s).unwrap());
        assert_eq!(code("600000.sh").as_deref(), Some("shmb600000"));
        assert_eq!(code("900901.sh").as_deref(), Some("shmb900901"));
        assert_eq!(code("300001.sz").as_deref(), Some("szcn300001"));
        assert_eq!(code("002001.sz").as_deref(), Some("szsme002001"));
        assert_eq!(code("000001.sz").as_deref(), Some("szmb000001"));
        assert_eq!(code("200011.sz").as_deref(), Some("szmb200011"));
        assert_eq!(code("688001.sh"), None);
    }

    #[test]
    fn test_parse_brief() {
        let html = r#"
            <div class="clear"><table>
              <tr><td>公司全称：</td><td>平安银行股份有限公司</td></tr>
              <tr><td>上市时间：</td><td>1991-04-03</td></tr>
              <tr><td>办公地址</td><td>深圳市福田区</td></tr>
              <tr><td>发行价格（元）：</td><td>40.00</td></tr>
              <tr><td>注册资本(万元)：</td><td>1,940,591.5</td></tr>
            </table></div>"#;

        let profile = parse_brief(html).unwrap();
        assert_eq!(profile.company_name, "平安银行股份有限公司");
        assert_eq!(profile.list_date, NaiveDate::from_ymd_opt(1991, 4, 3));
        assert_eq!(profile.work_addr, "深圳市福田区");
        assert_eq!(profile.issue_price, Some(40.0));
        assert_eq!(profile.reg_cap, Some(19_405_915_000.0));
        assert_eq!(profile.found_date, None);
    }

    #[test]
    fn test_parse_company_list() {
        let html = r##"
            <div id="con-a-1"><ul><li><a href="#">000001 平安银行</a></li></ul></div>
            <div id="con-a-3"><ul><li><a href="#">300001 特锐德</a></li><li><a>bad</a></li></ul></div>
            <div id="con-a-4"><ul><li><a href="#">600000 浦发银行</a></li></ul></div>"##;

        let table = parse_company_list(html).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.get(0, "symbol"), Some(&json!("000001.SZ")));
        assert_eq!(table.get(2, "name"), Some(&json!("浦发银行")));
        assert_eq!(table.get(2, "exchange"), Some(&json!("sh")));
    }

    #[test]
    fn test_parse_delisted() {
        let entries = vec![
            json!({"y_seccode_0007": "000003", "f008d_0007": "2002-06-14"}),
            json!({"unexpected": true}),
        ];
        let table = parse_delisted(&entries, Exchange::Sz);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(0, "symbol"), Some(&json!("000003.SZ")));
        assert_eq!(table.get(0, "delist_date"), Some(&json!("2002-06-14")));
    }

    #[test]
    fn test_announcement_file_name() {
        let row = json!({
            "announcementTitle": "2017年年度报告",
            "announcementTime": 1_521_561_600_000_i64,
            "adjunctType": "PDF"
        });
        assert_eq!(
            announcement_file_name(row.as_object().unwrap()).as_deref(),
            Some("2017年年度报告-20180321000000.PDF")
        );

        let fallback = json!({"announcementId": "1204512345"});
        assert_eq!(
            announcement_file_name(fallback.as_object().unwrap()).as_deref(),
            Some("1204512345-.raw")
        );

        assert_eq!(announcement_file_name(json!({}).as_object().unwrap()), None);
    }

    #[test]
    fn test_announcement_table_adds_download_url() {
        let source = CninfoSource::with_base_url("http://localhost:1234/");
        let rows = vec![
            json!({"announcementTitle": "年报", "adjunctUrl": "finalpage/2018-03-21/1204512345.PDF"}),
            json!({"adjunctUrl": "nameless.PDF"}),
        ];
        let table = source.announcement_table(&rows);
        assert_eq!(table.len(), 1);
        assert_eq!(
            table.get(0, "download_url"),
            Some(&json!("http://localhost:1234/finalpage/2018-03-21/1204512345.PDF"))
        );
    }
}
