//! HTTP-level tests for site adapters against a local mock server.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fintie::data::sources::{CninfoSource, SinaSource, XueqiuSource};
use fintie::data::{
    fetch_from, Category, CategoryRequest, DataSource, HttpSession, SourceError, SourceOutcome,
    Symbol,
};
use fintie_common::HttpConfig;

const BRIEF_HTML: &str = r#"
<html><body>
<div class="clear"><table>
  <tr><td>公司全称：</td><td>平安银行股份有限公司</td></tr>
  <tr><td>上市时间：</td><td>1991-04-03</td></tr>
  <tr><td>发行价格（元）：</td><td>40.00</td></tr>
</table></div>
</body></html>"#;

fn symbol() -> Symbol {
    Symbol::parse("000001.sz").unwrap()
}

fn fast_session() -> HttpSession {
    HttpSession::new(&HttpConfig {
        connect_timeout_secs: 1,
        read_timeout_secs: 1,
        ..HttpConfig::default()
    })
}

#[tokio::test]
async fn test_slow_source_reports_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/corp/go.php/vCI_CorpInfo/stockid/000001.phtml"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let sina = SinaSource::with_base_url(&server.uri());
    let request = CategoryRequest::for_symbol(Category::StockInfo, symbol());

    match fetch_from(&sina, &fast_session(), &request).await {
        SourceOutcome::Failed(err) => {
            assert!(err.is_timeout(), "expected timeout, got {err}");
            assert!(err.is_recoverable());
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_cninfo_brief_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/information/brief/szmb000001.html"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(BRIEF_HTML.as_bytes(), "text/html; charset=utf-8"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let cninfo = CninfoSource::with_base_url(&server.uri());
    let request = CategoryRequest::for_symbol(Category::StockInfo, symbol());
    let result = cninfo.fetch(&fast_session(), &request).await.unwrap();

    let record = result.as_record().unwrap();
    assert_eq!(record["company_name"], json!("平安银行股份有限公司"));
    assert_eq!(record["list_date"], json!("1991-04-03"));
    assert_eq!(record["issue_price"], json!(40.0));
}

#[tokio::test]
async fn test_http_error_status_is_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cninfo-new/information/companylist"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let cninfo = CninfoSource::with_base_url(&server.uri());
    let request = CategoryRequest::new(Category::StockList);
    let err = cninfo.fetch(&fast_session(), &request).await.unwrap_err();

    assert!(matches!(err, SourceError::Http { status: 503, .. }), "got {err:?}");
}

#[tokio::test]
async fn test_unexpected_markup_is_schema_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/information/brief/szmb000001.html"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "<html><body>maintenance</body></html>".as_bytes(),
            "text/html; charset=utf-8",
        ))
        .mount(&server)
        .await;

    let cninfo = CninfoSource::with_base_url(&server.uri());
    let request = CategoryRequest::for_symbol(Category::StockInfo, symbol());
    let err = cninfo.fetch(&fast_session(), &request).await.unwrap_err();

    assert!(matches!(err, SourceError::Schema(_)), "got {err:?}");
}

#[tokio::test]
async fn test_xueqiu_warms_up_once_per_session() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).insert_header("set-cookie", "xq_a_token=abc; Path=/"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/stock/f10/skholderchg.json"))
        .and(query_param("symbol", "SZ000001"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "list": [{"chg_date": 1711900800000_i64, "chg_shares_num": 1200}]
        })))
        .expect(2)
        .mount(&server)
        .await;

    let xueqiu = XueqiuSource::with_base_url(&server.uri());
    let session = fast_session();
    let request = CategoryRequest::for_symbol(Category::InsiderTrades, symbol());

    for _ in 0..2 {
        let result = xueqiu.fetch(&session, &request).await.unwrap();
        assert_eq!(result.as_table().map(|t| t.len()), Some(1));
    }
    assert!(session.is_warmed("xueqiu").await);
}

#[tokio::test]
async fn test_xueqiu_quote_list_fetches_every_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/stock/cata/stocklist.json"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "count": {"count": 3},
            "stocks": [{"symbol": "SZ000001"}, {"symbol": "SZ000002"}]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/stock/cata/stocklist.json"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "count": {"count": 3},
            "stocks": [{"symbol": "SH600000"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let xueqiu = XueqiuSource::with_base_url(&server.uri());
    let request = CategoryRequest::new(Category::ListQuotes)
        .with_variant("stock")
        .with_page_size(2);
    let result = xueqiu.fetch(&fast_session(), &request).await.unwrap();

    let table = result.as_table().unwrap();
    assert_eq!(table.len(), 3);
    assert_eq!(table.get(2, "symbol"), Some(&json!("SH600000")));
}

#[tokio::test]
async fn test_xueqiu_api_error_code_is_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v5/stock/history/trade.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": null,
            "error_code": 400016,
            "error_description": "重新登录帐号后再试"
        })))
        .mount(&server)
        .await;

    let xueqiu = XueqiuSource::with_base_url(&server.uri());
    let request = CategoryRequest::for_symbol(Category::LiveQuotes, symbol()).with_variant("trades");
    let err = xueqiu.fetch(&fast_session(), &request).await.unwrap_err();

    assert!(matches!(err, SourceError::Api(_)), "got {err:?}");
}
