//! Error types for the modelwatch engine.
//!
//! Provider conditions that callers must branch on (rate limiting) get their
//! own variants; storage and serialization failures wrap their source errors.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the modelwatch library.
#[derive(Debug, Error)]
pub enum TrackerError {
    // Remote catalog errors
    #[error("Rate limited by {service}, retry after {retry_after_secs:?} seconds")]
    RateLimited {
        service: String,
        retry_after_secs: Option<u64>,
    },

    // Database errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("Schema migration failed: {message}")]
    Migration {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },
}

/// Result type alias for modelwatch operations.
pub type Result<T> = std::result::Result<T, TrackerError>;

impl From<std::io::Error> for TrackerError {
    fn from(err: std::io::Error) -> Self {
        TrackerError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for TrackerError {
    fn from(err: serde_json::Error) -> Self {
        TrackerError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for TrackerError {
    fn from(err: rusqlite::Error) -> Self {
        TrackerError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl TrackerError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        TrackerError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Wrap a rusqlite error raised while evolving the schema.
    pub(crate) fn migration(context: &str, err: rusqlite::Error) -> Self {
        TrackerError::Migration {
            message: format!("{}: {}", context, err),
            source: Some(err),
        }
    }

    /// Check if this error is a rate-limit signal from the remote catalog.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, TrackerError::RateLimited { .. })
    }
}
