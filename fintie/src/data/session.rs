//! Shared HTTP session.
//!
//! One pooled `reqwest::Client` (browser User-Agent, cookie store, connect
//! and total timeouts) plus per-site warm-up flags. The session is an
//! explicit context object: [`SessionProvider`] creates it on first use and
//! releases it on [`SessionProvider::shutdown`].

use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use fintie_common::config::HttpConfig;
use fintie_common::util::truncate_with_ellipsis;

use super::provider::SourceError;

/// Body excerpt length in schema-error messages.
const BODY_EXCERPT_CHARS: usize = 200;

// ============================================================================
// HTTP Session
// ============================================================================

/// Shared HTTP client plus per-site warm-up state.
///
/// Safe for concurrent use; connection pooling is handled by the client.
pub struct HttpSession {
    client: reqwest::Client,
    warmed: Mutex<HashSet<String>>,
    closed: AtomicBool,
}

impl HttpSession {
    /// Build a session from HTTP settings.
    ///
    /// Never fails: if the configured client cannot be built, a client with
    /// the same User-Agent and default transport settings is used instead.
    pub fn new(config: &HttpConfig) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout())
            .timeout(config.read_timeout())
            .cookie_store(true)
            .gzip(true)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build configured HTTP client, using defaults");
                reqwest::Client::builder()
                    .user_agent(config.user_agent.clone())
                    .build()
                    .unwrap_or_else(|_| reqwest::Client::new())
            });

        Self {
            client,
            warmed: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.client.get(url)
    }

    pub fn post(&self, url: &str) -> RequestBuilder {
        self.client.post(url)
    }

    /// Visit `url` once per session so the site sets its cookies.
    ///
    /// The flag is only set after the visit got a response; a failed visit
    /// is retried by the next caller.
    pub async fn warm_up(&self, site: &str, url: &str) -> Result<(), SourceError> {
        let mut warmed = self.warmed.lock().await;
        if warmed.contains(site) {
            return Ok(());
        }

        debug!(site = site, url = %url, "Warming up site session");
        self.send(self.client.get(url)).await?;
        warmed.insert(site.to_string());
        Ok(())
    }

    pub async fn is_warmed(&self, site: &str) -> bool {
        self.warmed.lock().await.contains(site)
    }

    /// Forget a site's warm-up so the next request repeats it.
    pub async fn reset_warm_up(&self, site: &str) {
        self.warmed.lock().await.remove(site);
    }

    /// Send a request and require a success status.
    pub async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, SourceError> {
        if self.is_closed() {
            return Err(SourceError::Network("session closed".into()));
        }

        let request = request
            .build()
            .map_err(|e| SourceError::InvalidRequest(e.to_string()))?;
        let url = request.url().to_string();

        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| SourceError::from_reqwest(e, &url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Http {
                status: status.as_u16(),
                url,
            });
        }

        Ok(response)
    }

    /// Body as text, decoded per the response charset (UTF-8 if unspecified).
    pub async fn text(&self, request: RequestBuilder) -> Result<String, SourceError> {
        self.text_with_charset(request, "utf-8").await
    }

    /// Body as text, falling back to `charset` when the response names none.
    pub async fn text_with_charset(
        &self,
        request: RequestBuilder,
        charset: &str,
    ) -> Result<String, SourceError> {
        let response = self.send(request).await?;
        let url = response.url().to_string();
        response
            .text_with_charset(charset)
            .await
            .map_err(|e| SourceError::from_reqwest(e, &url))
    }

    /// Raw body bytes.
    pub async fn bytes(&self, request: RequestBuilder) -> Result<Vec<u8>, SourceError> {
        let response = self.send(request).await?;
        let url = response.url().to_string();
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| SourceError::from_reqwest(e, &url))
    }

    /// Body decoded as JSON; a shape mismatch is a schema error.
    pub async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, SourceError> {
        let body = self.text(request).await?;
        serde_json::from_str(&body).map_err(|e| {
            SourceError::Schema(format!(
                "{e}; body: {}",
                truncate_with_ellipsis(&body, BODY_EXCERPT_CHARS)
            ))
        })
    }

    /// Stop accepting requests. In-flight requests complete normally.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("HTTP session closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Session Provider
// ============================================================================

/// Creates the shared session on first use and releases it on shutdown.
pub struct SessionProvider {
    config: HttpConfig,
    session: Mutex<Option<Arc<HttpSession>>>,
}

impl SessionProvider {
    pub fn new(config: HttpConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
        }
    }

    /// Return the shared session, creating it on the first call.
    ///
    /// After [`shutdown`](Self::shutdown) the next call starts a fresh session.
    pub async fn get_session(&self) -> Arc<HttpSession> {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.as_ref() {
            return Arc::clone(session);
        }

        debug!(
            connect_timeout_secs = self.config.connect_timeout_secs,
            read_timeout_secs = self.config.read_timeout_secs,
            "Creating HTTP session"
        );
        let session = Arc::new(HttpSession::new(&self.config));
        *slot = Some(Arc::clone(&session));
        session
    }

    /// Whether a session is currently open.
    pub async fn is_active(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Close and drop the shared session.
    pub async fn shutdown(&self) {
        if let Some(session) = self.session.lock().await.take() {
            session.close();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
