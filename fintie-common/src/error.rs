//! Error types shared by the fintie crates.

use thiserror::Error;

/// Result type alias using the fintie error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for fintie.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input or request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// External site returned something unusable
    #[error("External service error: {0}")]
    External(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Delimited text serialization error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Other error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create an error with additional context.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Check if this error originated from the filesystem.
    pub fn is_io(&self) -> bool {
        match self {
            Self::Io(_) => true,
            Self::WithContext { source, .. } => source.is_io(),
            _ => false,
        }
    }

    /// Check if this is a timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout => true,
            Self::WithContext { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

/// Extension trait for adding context to any error type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_with_context() {
        let err = Error::Internal("writer failed".into());
        let with_ctx = err.with_context("persisting stock_info");
        assert!(matches!(with_ctx, Error::WithContext { .. }));
        assert!(with_ctx.to_string().starts_with("persisting stock_info"));
    }

    #[test]
    fn test_is_io_through_context() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let result: std::result::Result<(), std::io::Error> = Err(io);
        let err = result.context("creating directory").unwrap_err();
        assert!(err.is_io());
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_is_timeout() {
        assert!(Error::Timeout.is_timeout());
        assert!(Error::Timeout.with_context("fetch").is_timeout());
        assert!(!Error::Config("bad".into()).is_timeout());
    }
}
