//! Integration tests for source fallback.
//!
//! Verifies the ordering guarantees of the router: sources are tried one at
//! a time, the first non-empty result wins, and failing, empty, panicking
//! or hanging sources never leak an error to the caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use fintie::data::{
    fetch_category, Category, CategoryRequest, DataSource, FetchResult, HttpSession, Record,
    RequestError, RouterConfig, SourceError, SourceRouter, Symbol, Table,
};
use fintie_common::HttpConfig;

// ============================================================================
// Mock Sources
// ============================================================================

#[derive(Clone, Copy)]
enum Behavior {
    Succeed,
    Fail,
    Timeout,
    Empty,
    Panic,
    Hang,
}

/// Source with a fixed behavior and a call counter.
struct MockSource {
    name: &'static str,
    behavior: Behavior,
    calls: AtomicU32,
}

impl MockSource {
    fn new(name: &'static str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            name,
            behavior,
            calls: AtomicU32::new(0),
        })
    }

    fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSource for MockSource {
    fn name(&self) -> &'static str {
        self.name
    }

    fn categories(&self) -> &'static [Category] {
        &[Category::StockInfo, Category::CurrentQuotes]
    }

    async fn fetch(
        &self,
        _session: &HttpSession,
        _request: &CategoryRequest,
    ) -> Result<FetchResult, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Succeed => {
                let mut record = Record::new();
                record.insert("source".into(), json!(self.name));
                Ok(FetchResult::Record(record))
            }
            Behavior::Fail => Err(SourceError::Network("connection reset".into())),
            Behavior::Timeout => Err(SourceError::Timeout("read timed out".into())),
            Behavior::Empty => Ok(FetchResult::Table(Table::new(vec!["code".into()]))),
            Behavior::Panic => panic!("markup changed"),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(SourceError::Timeout("never".into()))
            }
        }
    }
}

fn session() -> HttpSession {
    HttpSession::new(&HttpConfig::default())
}

fn request() -> CategoryRequest {
    CategoryRequest::for_symbol(Category::StockInfo, Symbol::parse("000001.sz").unwrap())
}

fn winner(result: Option<FetchResult>) -> Option<String> {
    result?
        .as_record()?
        .get("source")?
        .as_str()
        .map(str::to_string)
}

fn as_sources(sources: &[Arc<MockSource>]) -> Vec<Arc<dyn DataSource>> {
    sources
        .iter()
        .map(|s| Arc::clone(s) as Arc<dyn DataSource>)
        .collect()
}

// ============================================================================
// Fallback Tests
// ============================================================================

#[tokio::test]
async fn test_first_success_short_circuits() {
    let a = MockSource::new("a", Behavior::Succeed);
    let b = MockSource::new("b", Behavior::Succeed);

    let result = fetch_category(&session(), &request(), &as_sources(&[a.clone(), b.clone()]), None).await;

    assert_eq!(winner(result).as_deref(), Some("a"));
    assert_eq!(a.call_count(), 1);
    assert_eq!(b.call_count(), 0, "later sources must not be called");
}

#[tokio::test]
async fn test_falls_back_past_failures() {
    let a = MockSource::new("a", Behavior::Timeout);
    let b = MockSource::new("b", Behavior::Fail);
    let c = MockSource::new("c", Behavior::Succeed);
    let d = MockSource::new("d", Behavior::Succeed);

    let sources = as_sources(&[a.clone(), b.clone(), c.clone(), d.clone()]);
    let result = fetch_category(&session(), &request(), &sources, None).await;

    assert_eq!(winner(result).as_deref(), Some("c"));
    assert_eq!(a.call_count(), 1);
    assert_eq!(b.call_count(), 1);
    assert_eq!(c.call_count(), 1);
    assert_eq!(d.call_count(), 0);
}

#[tokio::test]
async fn test_empty_result_falls_back() {
    let a = MockSource::new("a", Behavior::Empty);
    let b = MockSource::new("b", Behavior::Succeed);

    let result = fetch_category(&session(), &request(), &as_sources(&[a.clone(), b.clone()]), None).await;

    assert_eq!(winner(result).as_deref(), Some("b"));
    assert_eq!(a.call_count(), 1);
}

#[tokio::test]
async fn test_panicking_source_falls_back() {
    let a = MockSource::new("a", Behavior::Panic);
    let b = MockSource::new("b", Behavior::Succeed);

    let result = fetch_category(&session(), &request(), &as_sources(&[a.clone(), b.clone()]), None).await;

    assert_eq!(winner(result).as_deref(), Some("b"));
    assert_eq!(a.call_count(), 1);
}

#[tokio::test]
async fn test_all_sources_fail_returns_none() {
    let sources = [
        MockSource::new("a", Behavior::Fail),
        MockSource::new("b", Behavior::Timeout),
        MockSource::new("c", Behavior::Empty),
    ];

    let result = fetch_category(&session(), &request(), &as_sources(&sources), None).await;

    assert!(result.is_none());
    for source in &sources {
        assert_eq!(source.call_count(), 1, "{} should be tried exactly once", source.name);
    }
}

#[tokio::test]
async fn test_no_sources_returns_none() {
    assert!(fetch_category(&session(), &request(), &[], None).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_deadline_bounds_total_time() {
    let a = MockSource::new("a", Behavior::Hang);
    let b = MockSource::new("b", Behavior::Succeed);

    let started = tokio::time::Instant::now();
    let result = fetch_category(
        &session(),
        &request(),
        &as_sources(&[a.clone(), b.clone()]),
        Some(Duration::from_secs(5)),
    )
    .await;

    assert!(result.is_none());
    assert!(started.elapsed() < Duration::from_secs(6));
    assert_eq!(b.call_count(), 0);
}

// ============================================================================
// Router Tests
// ============================================================================

fn router_with_order(order: &[&str]) -> SourceRouter {
    SourceRouter::with_config(RouterConfig {
        deadline: Some(Duration::from_secs(30)),
        orders: HashMap::from([(
            Category::StockInfo,
            order.iter().map(|s| s.to_string()).collect(),
        )]),
    })
}

#[tokio::test]
async fn test_router_uses_configured_order() {
    let router = router_with_order(&["second", "first"]);
    let first = MockSource::new("first", Behavior::Succeed);
    let second = MockSource::new("second", Behavior::Succeed);
    router.register(first.clone()).await;
    router.register(second.clone()).await;

    let result = router.fetch(&session(), &request()).await.unwrap();

    assert_eq!(winner(result).as_deref(), Some("second"));
    assert_eq!(first.call_count(), 0);
}

#[tokio::test]
async fn test_router_skips_disabled_source() {
    let router = router_with_order(&["primary", "backup"]);
    let primary = MockSource::new("primary", Behavior::Succeed);
    let backup = MockSource::new("backup", Behavior::Succeed);
    router.register(primary.clone()).await;
    router.register(backup.clone()).await;
    router.set_enabled("primary", false).await;

    let result = router.fetch(&session(), &request()).await.unwrap();

    assert_eq!(winner(result).as_deref(), Some("backup"));
    assert_eq!(primary.call_count(), 0);
}

#[tokio::test]
async fn test_router_rejects_invalid_request_before_fetching() {
    let router = router_with_order(&["a"]);
    let a = MockSource::new("a", Behavior::Succeed);
    router.register(a.clone()).await;

    let err = router
        .fetch(&session(), &CategoryRequest::new(Category::StockInfo))
        .await
        .unwrap_err();

    assert_eq!(err, RequestError::MissingSymbol(Category::StockInfo));
    assert_eq!(a.call_count(), 0);
}

#[tokio::test]
async fn test_router_all_failed_is_ok_none() {
    let router = router_with_order(&["a", "b"]);
    router.register(MockSource::new("a", Behavior::Fail)).await;
    router.register(MockSource::new("b", Behavior::Panic)).await;

    let result = router.fetch(&session(), &request()).await.unwrap();
    assert!(result.is_none());
}
