//! Collector: fetch through the router and archive the results.
//!
//! Ties together the shared session, the fallback router and the artifact
//! writer. Multi-item jobs (several symbols, a range of days, announcement
//! documents) run as bounded-concurrency batches and keep whatever
//! succeeded.

use chrono::{Duration, Local, NaiveDate, NaiveDateTime};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use fintie_common::util::{date_range, weekdays};
use fintie_common::{Config, Error, Result};

use super::bars::{resample_ticks, tick_trades};
use super::batch::{fetch_batch, successes, BatchItem};
use super::request::{Category, CategoryRequest};
use super::router::{RouterConfig, SourceRouter};
use super::session::SessionProvider;
use super::symbol::Symbol;
use super::writer::ArtifactWriter;
use super::{FetchResult, Record};

/// Files written by [`Collector::collect_announcements`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnouncementArchive {
    /// Metadata of every announcement found
    pub metadata: PathBuf,
    /// Downloaded documents
    pub documents: Vec<PathBuf>,
    /// Documents that could not be downloaded or stored
    pub failed: usize,
}

pub struct Collector {
    sessions: Arc<SessionProvider>,
    router: Arc<SourceRouter>,
    writer: ArtifactWriter,
    batch_concurrency: usize,
}

impl Collector {
    pub fn new(
        sessions: Arc<SessionProvider>,
        router: Arc<SourceRouter>,
        writer: ArtifactWriter,
        batch_concurrency: usize,
    ) -> Self {
        Self {
            sessions,
            router,
            writer,
            batch_concurrency: batch_concurrency.max(1),
        }
    }

    /// Collector with every built-in source, configured from `config`.
    pub async fn from_config(config: &Config) -> Self {
        let router = SourceRouter::with_default_sources(RouterConfig::from_config(config)).await;
        Self::new(
            Arc::new(SessionProvider::new(config.http.clone())),
            Arc::new(router),
            ArtifactWriter::new(&config.data_path),
            config.fetch.batch_concurrency,
        )
    }

    pub fn router(&self) -> &SourceRouter {
        &self.router
    }

    pub fn writer(&self) -> &ArtifactWriter {
        &self.writer
    }

    /// Fetch without persisting.
    ///
    /// Returns `Ok(None)` when every source failed; an invalid request is an
    /// error.
    pub async fn fetch(&self, request: &CategoryRequest) -> Result<Option<FetchResult>> {
        let session = self.sessions.get_session().await;
        self.router
            .fetch(&session, request)
            .await
            .map_err(|e| Error::InvalidInput(e.to_string()))
    }

    /// Fetch one request and write the artifact.
    ///
    /// Returns `Ok(None)` when no source had data.
    pub async fn collect(&self, request: &CategoryRequest) -> Result<Option<PathBuf>> {
        let Some(result) = self.fetch(request).await? else {
            return Ok(None);
        };

        let tag = artifact_tag(request);
        let path = self.writer.persist_tagged(
            request.category,
            request.symbol.as_ref(),
            tag.as_deref(),
            &result,
            captured_now(),
        )?;
        Ok(Some(path))
    }

    /// Collect several requests concurrently; failures do not affect the rest.
    pub async fn collect_many(
        &self,
        requests: Vec<CategoryRequest>,
    ) -> Vec<BatchItem<CategoryRequest, PathBuf>> {
        let total = requests.len();
        let items = fetch_batch(requests, self.batch_concurrency, |request| async move {
            match self.collect(&request).await {
                Ok(Some(path)) => Ok(path),
                Ok(None) => Err(Error::External(format!("no data for {}", request.label()))),
                Err(e) => Err(e),
            }
        })
        .await;

        let written = items.iter().filter(|i| i.value.is_some()).count();
        info!(total, written, "Batch collection finished");
        items
    }

    /// One tick download per weekday in `[start, end]`.
    pub async fn collect_ticks(
        &self,
        symbol: &Symbol,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PathBuf>> {
        check_range(start, end)?;

        let requests = weekdays(start, end)
            .into_iter()
            .map(|day| CategoryRequest::for_symbol(Category::TickQuotes, symbol.clone()).on_date(day))
            .collect();
        let items = self.collect_many(requests).await;
        Ok(successes(items).into_iter().map(|(_, path)| path).collect())
    }

    /// Tick data for one day resampled into bars of `interval`.
    ///
    /// Bars are written as a tick-quotes artifact tagged with the day and
    /// interval. Returns `Ok(None)` when no source had ticks.
    pub async fn collect_bars(
        &self,
        symbol: &Symbol,
        day: NaiveDate,
        interval: Duration,
    ) -> Result<Option<PathBuf>> {
        if interval <= Duration::zero() {
            return Err(Error::InvalidInput(format!(
                "resample interval must be positive, got {interval}"
            )));
        }

        let request = CategoryRequest::for_symbol(Category::TickQuotes, symbol.clone()).on_date(day);
        let Some(result) = self.fetch(&request).await? else {
            return Ok(None);
        };

        let ticks = result.as_table().map(tick_trades).unwrap_or_default();
        let bars = resample_ticks(&ticks, interval);
        if bars.is_empty() {
            warn!(symbol = %symbol, %day, "No bars after resampling");
            return Ok(None);
        }

        let tag = format!("{}-{}", day.format("%Y%m%d"), interval_label(interval));
        let path = self.writer.persist_tagged(
            Category::TickQuotes,
            Some(symbol),
            Some(&tag),
            &FetchResult::Table(bars),
            captured_now(),
        )?;
        Ok(Some(path))
    }

    /// Market event memos for every day in `[start, end]`, merged into one
    /// record keyed by date.
    pub async fn collect_market_events(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Option<PathBuf>> {
        check_range(start, end)?;

        let days = date_range(start, end);
        let total = days.len();
        let items = fetch_batch(days, self.batch_concurrency, |day| async move {
            let request = CategoryRequest::new(Category::MarketEvents).on_date(day);
            self.fetch(&request)
                .await?
                .ok_or_else(|| Error::External(format!("no market events for {day}")))
        })
        .await;

        let mut merged = Record::new();
        for (day, result) in successes(items) {
            merged.insert(day.format("%Y-%m-%d").to_string(), result.to_json());
        }
        if merged.is_empty() {
            warn!(%start, %end, "No market events collected");
            return Ok(None);
        }
        info!(days = total, collected = merged.len(), "Market events collected");

        let tag = format!("{}-{}", start.format("%Y%m%d"), end.format("%Y%m%d"));
        let path = self.writer.persist_tagged(
            Category::MarketEvents,
            None,
            Some(&tag),
            &FetchResult::Record(merged),
            captured_now(),
        )?;
        Ok(Some(path))
    }

    /// Announcement metadata for `symbol` plus every referenced document.
    ///
    /// Empty `kinds` queries the periodic reports.
    pub async fn collect_announcements(
        &self,
        symbol: &Symbol,
        start: NaiveDate,
        end: NaiveDate,
        kinds: &[String],
    ) -> Result<Option<AnnouncementArchive>> {
        check_range(start, end)?;

        let request = CategoryRequest::for_symbol(Category::Announcements, symbol.clone())
            .with_range(start, end)
            .with_kinds(kinds.iter().cloned());
        let Some(result) = self.fetch(&request).await? else {
            return Ok(None);
        };

        let metadata = self.writer.persist(
            Category::Announcements,
            Some(symbol),
            &result,
            captured_now(),
        )?;

        let downloads: Vec<(String, String)> = result
            .as_table()
            .map(|t| t.to_records())
            .unwrap_or_default()
            .iter()
            .filter_map(|row| {
                let url = row.get("download_url").and_then(Value::as_str)?;
                let name = row.get("file_name").and_then(Value::as_str)?;
                Some((url.to_string(), name.to_string()))
            })
            .collect();

        info!(symbol = %symbol, documents = downloads.len(), "Downloading announcement documents");
        let session = self.sessions.get_session().await;
        let session = session.as_ref();
        let items = fetch_batch(downloads, self.batch_concurrency, |(url, name)| async move {
            let bytes = session
                .bytes(session.get(&url))
                .await
                .map_err(|e| Error::External(e.to_string()))?;
            self.writer
                .persist_raw(Category::Announcements, Some(symbol), &name, &bytes)
        })
        .await;

        let failed = items.iter().filter(|i| i.value.is_none()).count();
        let documents = successes(items).into_iter().map(|(_, path)| path).collect();

        Ok(Some(AnnouncementArchive {
            metadata,
            documents,
            failed,
        }))
    }

    /// Close the shared session.
    pub async fn shutdown(&self) {
        self.sessions.shutdown().await;
        info!("Collector shut down");
    }
}

fn captured_now() -> NaiveDateTime {
    Local::now().naive_local()
}

fn check_range(start: NaiveDate, end: NaiveDate) -> Result<()> {
    if start > end {
        return Err(Error::InvalidInput(format!(
            "start {start} is after end {end}"
        )));
    }
    Ok(())
}

/// `5min`, `1h` or `30s`.
fn interval_label(interval: Duration) -> String {
    let secs = interval.num_seconds();
    if secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs % 60 == 0 {
        format!("{}min", secs / 60)
    } else {
        format!("{secs}s")
    }
}

/// Extra file-name tag distinguishing artifacts of the same category.
fn artifact_tag(request: &CategoryRequest) -> Option<String> {
    let params = &request.params;
    let mut parts: Vec<String> = Vec::new();

    if let Some(variant) = request.variant() {
        parts.push(variant.to_string());
    }
    if request.category == Category::HistQuotes {
        if let Some(frequency) = params.frequency {
            parts.push(frequency.to_string());
        }
        if let Some(fq) = params.fq {
            parts.push(fq.as_str().to_string());
        }
    }
    if let Some(date) = params.date {
        parts.push(date.format("%Y%m%d").to_string());
    }
    if let Some(page) = params.page {
        parts.push(format!("p{page}"));
    }

    (!parts.is_empty()).then(|| parts.join("-"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Frequency, FqType};

    fn sym() -> Symbol {
        Symbol::parse("000001.sz").unwrap()
    }

    #[test]
    fn test_artifact_tag() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();

        let ticks = CategoryRequest::for_symbol(Category::TickQuotes, sym()).on_date(day);
        assert_eq!(artifact_tag(&ticks).as_deref(), Some("20240315"));

        let info = CategoryRequest::for_symbol(Category::StockInfo, sym());
        assert_eq!(artifact_tag(&info), None);

        let hist = CategoryRequest::for_symbol(Category::HistQuotes, sym())
            .with_frequency(Frequency::Day)
            .with_fq(FqType::After);
        assert_eq!(artifact_tag(&hist).as_deref(), Some("day-after"));

        let funda = CategoryRequest::for_symbol(Category::Fundamentals, sym()).with_variant("zcfzb");
        assert_eq!(artifact_tag(&funda).as_deref(), Some("zcfzb"));

        let live = CategoryRequest::for_symbol(Category::LiveQuotes, sym());
        assert_eq!(artifact_tag(&live).as_deref(), Some("trades"));
    }

    #[test]
    fn test_interval_label() {
        assert_eq!(interval_label(Duration::minutes(5)), "5min");
        assert_eq!(interval_label(Duration::hours(1)), "1h");
        assert_eq!(interval_label(Duration::seconds(30)), "30s");
    }

    #[test]
    fn test_check_range() {
        let a = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        let b = NaiveDate::from_ymd_opt(2024, 3, 14).unwrap();
        assert!(check_range(b, a).is_ok());
        assert!(check_range(a, a).is_ok());
        assert!(matches!(check_range(a, b), Err(Error::InvalidInput(_))));
    }
}
