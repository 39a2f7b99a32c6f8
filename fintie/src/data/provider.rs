//! Data source abstraction.
//!
//! Defines the `DataSource` trait every site adapter implements, and the
//! boundary (`fetch_from`) that turns whatever an adapter does into a
//! tagged [`SourceOutcome`] so fallback logic can treat all sources alike.

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tracing::{debug, warn};

use super::request::{Category, CategoryRequest};
use super::session::HttpSession;
use super::symbol::Symbol;
use super::FetchResult;

// ============================================================================
// Source Error
// ============================================================================

/// Why a single source could not produce a result.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    /// Connect or read timeout
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Connection refused, reset, DNS failure, closed session
    #[error("network error: {0}")]
    Network(String),

    /// Non-success HTTP status
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// Response did not have the expected shape (markup or JSON changed)
    #[error("unexpected response: {0}")]
    Schema(String),

    /// The site answered but reported an application-level error
    #[error("site error: {0}")]
    Api(String),

    /// The source does not serve this category or symbol
    #[error("{name} does not serve {category}")]
    Unsupported { name: &'static str, category: Category },

    /// Request parameters the source cannot use
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The adapter panicked
    #[error("source panicked: {0}")]
    Panicked(String),
}

impl SourceError {
    /// Map a transport error, keeping the URL for logs.
    pub fn from_reqwest(err: reqwest::Error, url: &str) -> Self {
        if err.is_timeout() {
            Self::Timeout(format!("{url}: {err}"))
        } else if let Some(status) = err.status() {
            Self::Http {
                status: status.as_u16(),
                url: url.to_string(),
            }
        } else if err.is_decode() {
            Self::Schema(format!("{url}: {err}"))
        } else {
            Self::Network(format!("{url}: {err}"))
        }
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Transient failures worth retrying later.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Network(_))
            || matches!(self, Self::Http { status, .. } if *status >= 500 || *status == 429)
    }
}

// ============================================================================
// Source Outcome
// ============================================================================

/// Tagged result of asking one source.
#[derive(Debug, Clone)]
pub enum SourceOutcome {
    Success(FetchResult),
    /// The source answered but had nothing for this request
    Empty,
    Failed(SourceError),
}

impl SourceOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn into_result(self) -> Option<FetchResult> {
        match self {
            Self::Success(result) => Some(result),
            Self::Empty | Self::Failed(_) => None,
        }
    }
}

// ============================================================================
// Data Source Trait
// ============================================================================

/// A site adapter.
///
/// Implementations hold all markup/field-name assumptions for one site and
/// never touch the filesystem.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Source name used in configuration and logs (e.g. "sina", "cninfo")
    fn name(&self) -> &'static str;

    /// Categories this source can serve
    fn categories(&self) -> &'static [Category];

    fn supports(&self, category: Category) -> bool {
        self.categories().contains(&category)
    }

    /// Fetch and normalize one request.
    async fn fetch(
        &self,
        session: &HttpSession,
        request: &CategoryRequest,
    ) -> Result<FetchResult, SourceError>;
}

/// Symbol of a request, or an error naming the source.
pub(crate) fn required_symbol<'a>(
    name: &'static str,
    request: &'a CategoryRequest,
) -> Result<&'a Symbol, SourceError> {
    request
        .symbol
        .as_ref()
        .ok_or_else(|| SourceError::InvalidRequest(format!("{name}: {} needs a symbol", request.category)))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Ask one source, converting every failure mode into a [`SourceOutcome`].
///
/// Errors, empty results and panics are logged at `warn` with the source
/// name; nothing propagates to the caller.
pub async fn fetch_from(
    source: &dyn DataSource,
    session: &HttpSession,
    request: &CategoryRequest,
) -> SourceOutcome {
    let name = source.name();
    let category = request.category;
    let symbol = request.symbol.as_ref().map(Symbol::dotted).unwrap_or_default();

    if !source.supports(category) {
        let err = SourceError::Unsupported { name, category };
        warn!(source = name, category = %category, error = %err, "Source skipped");
        return SourceOutcome::Failed(err);
    }

    debug!(source = name, category = %category, symbol = %symbol, "Fetching from source");

    match AssertUnwindSafe(source.fetch(session, request)).catch_unwind().await {
        Ok(Ok(result)) if result.is_empty() => {
            warn!(source = name, category = %category, symbol = %symbol, "Source returned no data");
            SourceOutcome::Empty
        }
        Ok(Ok(result)) => SourceOutcome::Success(result),
        Ok(Err(err)) => {
            warn!(
                source = name,
                category = %category,
                symbol = %symbol,
                timeout = err.is_timeout(),
                error = %err,
                "Source fetch failed"
            );
            SourceOutcome::Failed(err)
        }
        Err(payload) => {
            let err = SourceError::Panicked(panic_message(payload.as_ref()));
            warn!(source = name, category = %category, symbol = %symbol, error = %err, "Source panicked");
            SourceOutcome::Failed(err)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Record, SessionProvider};
    use fintie_common::config::HttpConfig;
    use serde_json::json;

    struct Scripted {
        reply: fn() -> Result<FetchResult, SourceError>,
    }

    #[async_trait]
    impl DataSource for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn categories(&self) -> &'static [Category] {
            &[Category::StockInfo]
        }

        async fn fetch(
            &self,
            _session: &HttpSession,
            _request: &CategoryRequest,
        ) -> Result<FetchResult, SourceError> {
            (self.reply)()
        }
    }

    fn request() -> CategoryRequest {
        CategoryRequest::for_symbol(Category::StockInfo, Symbol::parse("000001.sz").unwrap())
    }

    async fn outcome(reply: fn() -> Result<FetchResult, SourceError>) -> SourceOutcome {
        let sessions = SessionProvider::new(HttpConfig::default());
        let session = sessions.get_session().await;
        fetch_from(&Scripted { reply }, &session, &request()).await
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let out = outcome(|| {
            Ok(FetchResult::Record(
                json!({"company_name": "X"}).as_object().cloned().unwrap(),
            ))
        })
        .await;
        assert!(out.is_success());
    }

    #[tokio::test]
    async fn test_empty_result_is_tagged_empty() {
        let out = outcome(|| Ok(FetchResult::Record(Record::new()))).await;
        assert!(matches!(out, SourceOutcome::Empty));
    }

    #[tokio::test]
    async fn test_error_is_tagged_failed() {
        let out = outcome(|| Err(SourceError::Timeout("slow".into()))).await;
        assert!(matches!(out, SourceOutcome::Failed(SourceError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_panic_is_caught() {
        let out = outcome(|| panic!("markup changed")).await;
        match out {
            SourceOutcome::Failed(SourceError::Panicked(msg)) => assert!(msg.contains("markup changed")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unsupported_category() {
        let sessions = SessionProvider::new(HttpConfig::default());
        let session = sessions.get_session().await;
        let req = CategoryRequest::new(Category::StockList);
        let out = fetch_from(&Scripted { reply: || unreachable!() }, &session, &req).await;
        assert!(matches!(out, SourceOutcome::Failed(SourceError::Unsupported { .. })));
    }

    #[test]
    fn test_error_classification() {
        assert!(SourceError::Timeout("x".into()).is_timeout());
        assert!(SourceError::Network("reset".into()).is_recoverable());
        assert!(SourceError::Http { status: 503, url: "u".into() }.is_recoverable());
        assert!(!SourceError::Http { status: 404, url: "u".into() }.is_recoverable());
        assert!(!SourceError::schema("missing table").is_recoverable());
    }
}
