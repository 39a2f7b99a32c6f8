//! Fintie Library
//!
//! Collects Chinese equity-market data (company profiles, listings, quotes,
//! ticks, financial statements, announcements) from public financial sites
//! and archives it as JSON or CSV files.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Collector                            │
//! ├──────────────────────────────────────────────────────────────┤
//! │  SessionProvider ──▶ SourceRouter ──▶ ArtifactWriter          │
//! │                          │                                   │
//! │        ┌────────┬────────┼────────┬─────────┬────────┐       │
//! │        qq     sina    cninfo  exchange  netease  xueqiu      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Concepts
//!
//! ## Fallback
//! Every category has an ordered list of sources. Sources are tried one at a
//! time; the first non-empty result wins and later sources are never called.
//! A failing, empty or panicking source only moves the router to the next.
//!
//! ## Artifacts
//! Results land under `<data_path>/<category>/<symbol>/` with a capture
//! timestamp in the name. Writes are atomic and never overwrite.
//!
//! # Example
//!
//! ```no_run
//! use fintie::data::{Category, CategoryRequest, Collector, Symbol};
//! use fintie_common::Config;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::load_with_env()?;
//! let collector = Collector::from_config(&config).await;
//!
//! let request = CategoryRequest::for_symbol(Category::StockInfo, Symbol::parse("000001.sz")?);
//! if let Some(path) = collector.collect(&request).await? {
//!     println!("saved {}", path.display());
//! }
//! collector.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod data;

pub use data::{
    Category, CategoryRequest, Collector, DataSource, FetchResult, Record, SourceRouter, Symbol,
    Table,
};
