// src/error.rs

//! Unified error handling for the crawler application.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for crawler operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed at the connection level
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Database error
    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// The service asked us to back off
    #[error("Rate limited, retry in {}s", wait.as_secs())]
    RateLimited { wait: Duration },

    /// A single request attempt failed in a way that may clear on retry
    #[error("Transient request failure: {0}")]
    Transient(String),

    /// Retry budget exhausted for a request
    #[error("Request failed after {attempts} attempts: {message}")]
    RequestFailed { attempts: u32, message: String },

    /// The service rejected the query itself
    #[error("Malformed query: {0}")]
    MalformedQuery(String),

    /// Persisting a batch failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// The crawl was cancelled
    #[error("Crawl cancelled")]
    Cancelled,
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a transient request error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Create a malformed query error.
    pub fn malformed_query(message: impl Into<String>) -> Self {
        Self::MalformedQuery(message.into())
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Whether this error belongs to a single request and should only abort
    /// the window being paginated, not the crawl.
    pub fn is_request_failure(&self) -> bool {
        matches!(
            self,
            Self::RequestFailed { .. }
                | Self::MalformedQuery(_)
                | Self::Transient(_)
                | Self::Http(_)
                | Self::Json(_)
        )
    }
}
