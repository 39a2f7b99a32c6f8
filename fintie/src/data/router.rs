//! Fallback router.
//!
//! For each category, tries the registered sources one at a time in the
//! configured order and returns the first successful result. Sources are
//! never raced and results are never merged.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use fintie_common::config::Config;

use super::provider::{fetch_from, DataSource, SourceOutcome};
use super::request::{Category, CategoryRequest, RequestError};
use super::session::HttpSession;
use super::sources;
use super::FetchResult;

// ============================================================================
// Router Configuration
// ============================================================================

/// Configuration for the source router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Deadline for one `fetch_category` call across all sources
    pub deadline: Option<Duration>,
    /// Source order per category; categories not listed use registration order
    pub orders: HashMap<Category, Vec<String>>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            deadline: Some(Duration::from_secs(900)),
            orders: sources::default_orders(),
        }
    }
}

impl RouterConfig {
    /// Built-in orders overlaid with the `sources` section of the config file.
    pub fn from_config(config: &Config) -> Self {
        let mut router_config = Self {
            deadline: Some(config.fetch.deadline()),
            ..Self::default()
        };

        for (name, order) in &config.sources {
            match name.parse::<Category>() {
                Ok(category) => {
                    router_config.orders.insert(category, order.clone());
                }
                Err(e) => warn!(category = %name, error = %e, "Ignoring source order for unknown category"),
            }
        }

        router_config
    }
}

// ============================================================================
// Fallback Fetch
// ============================================================================

/// Try `sources` in order; return the first successful result.
///
/// A source that fails, times out, panics or returns nothing is logged and
/// skipped. When every source is exhausted (or `deadline` passes first) an
/// error is logged and `None` is returned.
pub async fn fetch_category(
    session: &HttpSession,
    request: &CategoryRequest,
    sources: &[Arc<dyn DataSource>],
    deadline: Option<Duration>,
) -> Option<FetchResult> {
    let label = request.label();

    let attempt = async {
        for (position, source) in sources.iter().enumerate() {
            if position > 0 {
                debug!(source = source.name(), request = %label, "Falling back to next source");
            }

            if let SourceOutcome::Success(result) = fetch_from(source.as_ref(), session, request).await {
                info!(source = source.name(), request = %label, "Fetched data");
                return Some(result);
            }
        }

        error!(request = %label, tried = sources.len(), "All sources exhausted, no data");
        None
    };

    match deadline {
        Some(limit) => match tokio::time::timeout(limit, attempt).await {
            Ok(result) => result,
            Err(_) => {
                error!(request = %label, deadline_secs = limit.as_secs_f64(), "Fetch deadline exceeded");
                None
            }
        },
        None => attempt.await,
    }
}

// ============================================================================
// Source Router
// ============================================================================

/// A registered source with its enabled flag.
struct SourceEntry {
    source: Arc<dyn DataSource>,
    enabled: bool,
}

/// Summary of a registered source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub name: String,
    pub enabled: bool,
    pub categories: Vec<Category>,
}

/// Registry of sources with per-category fallback order.
pub struct SourceRouter {
    sources: RwLock<Vec<SourceEntry>>,
    config: RouterConfig,
}

impl SourceRouter {
    /// Create a router with built-in orders and default deadline
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    pub fn with_config(config: RouterConfig) -> Self {
        Self {
            sources: RwLock::new(Vec::new()),
            config,
        }
    }

    /// Router with every built-in site adapter registered.
    pub async fn with_default_sources(config: RouterConfig) -> Self {
        let router = Self::with_config(config);
        for source in sources::all_sources() {
            router.register(source).await;
        }
        router
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Register a source. Re-registering a name replaces the old entry.
    pub async fn register(&self, source: Arc<dyn DataSource>) {
        let name = source.name();
        let mut sources = self.sources.write().await;
        sources.retain(|e| e.source.name() != name);
        sources.push(SourceEntry {
            source,
            enabled: true,
        });

        info!(source = name, "Registered data source");
    }

    pub async fn unregister(&self, name: &str) {
        let mut sources = self.sources.write().await;
        sources.retain(|e| e.source.name() != name);

        info!(source = name, "Unregistered data source");
    }

    pub async fn set_enabled(&self, name: &str, enabled: bool) {
        let mut sources = self.sources.write().await;
        if let Some(entry) = sources.iter_mut().find(|e| e.source.name() == name) {
            entry.enabled = enabled;
            info!(source = name, enabled, "Source enabled status changed");
        }
    }

    pub async fn get_sources_info(&self) -> Vec<SourceInfo> {
        self.sources
            .read()
            .await
            .iter()
            .map(|e| SourceInfo {
                name: e.source.name().to_string(),
                enabled: e.enabled,
                categories: e.source.categories().to_vec(),
            })
            .collect()
    }

    /// Enabled sources serving `category`, in fallback order.
    ///
    /// With a configured order only the named sources are used, in that
    /// order; otherwise registration order applies.
    pub async fn sources_for(&self, category: Category) -> Vec<Arc<dyn DataSource>> {
        let sources = self.sources.read().await;
        let capable = sources
            .iter()
            .filter(|e| e.enabled && e.source.supports(category));

        match self.config.orders.get(&category) {
            Some(order) => order
                .iter()
                .filter_map(|name| {
                    capable
                        .clone()
                        .find(|e| e.source.name() == name)
                        .map(|e| Arc::clone(&e.source))
                })
                .collect(),
            None => capable.map(|e| Arc::clone(&e.source)).collect(),
        }
    }

    /// Validate the request, then run the fallback fetch under the deadline.
    pub async fn fetch(
        &self,
        session: &HttpSession,
        request: &CategoryRequest,
    ) -> Result<Option<FetchResult>, RequestError> {
        request.validate()?;

        let sources = self.sources_for(request.category).await;
        if sources.is_empty() {
            warn!(category = %request.category, "No sources registered for category");
        }

        Ok(fetch_category(session, request, &sources, self.config.deadline).await)
    }
}

impl Default for SourceRouter {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
