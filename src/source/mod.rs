// src/source/mod.rs

//! Range query sources.
//!
//! - `RangeSource`: what the partitioner consumes, one page per call
//! - `SearchTransport`: a single raw attempt against the search service,
//!   with the reply already classified
//! - `ResilientRangeSource`: turns a transport into a range source by
//!   absorbing rate limits and transient failures

mod resilient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{Page, Window};

pub use resilient::ResilientRangeSource;

/// One paginated request for a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeQuery {
    pub window: Window,
    pub cursor: Option<String>,
    pub page_size: usize,
}

/// An error reported inside an otherwise successful response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedError {
    /// Machine-readable type, e.g. `RATE_LIMITED`
    pub kind: Option<String>,
    pub message: String,
}

impl EmbeddedError {
    pub fn new(kind: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.map(str::to_string),
            message: message.into(),
        }
    }

    /// Rate-limit and timeout errors may clear on retry; anything else points
    /// at the query itself.
    pub fn is_retryable(&self) -> bool {
        self.kind.as_deref() == Some("RATE_LIMITED")
            || self.message.to_lowercase().contains("timeout")
    }
}

/// Classified outcome of one transport attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportReply {
    /// A page of results
    Page(Page),
    /// The service asked us to wait; `reset_at` is when the budget refills
    RateLimited { reset_at: Option<DateTime<Utc>> },
    /// Non-success status without a rate-limit signal
    Failed { status: u16, message: String },
    /// Success status carrying an error list
    Embedded(Vec<EmbeddedError>),
}

/// A single request attempt against the search service.
///
/// Connection-level failures are returned as `Err`.
#[async_trait]
pub trait SearchTransport: Send + Sync {
    async fn execute(&self, query: &RangeQuery) -> Result<TransportReply>;
}

/// Paginated range queries as seen by the partitioner.
#[async_trait]
pub trait RangeSource: Send + Sync {
    /// Fetch one page of `window`, continuing from `cursor`.
    ///
    /// Callers keep `page_size` at or below the service's page cap.
    async fn fetch_range(
        &self,
        window: &Window,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Page>;
}
