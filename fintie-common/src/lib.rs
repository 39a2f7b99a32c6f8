//! Fintie Common - shared types and utilities for the fintie crates.
//!
//! This crate provides:
//! - Configuration types and loading
//! - Error types and handling utilities
//! - Logging setup
//! - Coercion helpers for scraped numbers and dates

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod util;

pub use config::{Config, FetchConfig, HttpConfig, ObservabilityConfig};
pub use error::{Error, Result, ResultExt};

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result, ResultExt};
    pub use crate::logging::init_logging;
}
