//! Crawl statistics returned by the partitioner.

use std::time::Duration;

use serde::Serialize;

use super::Window;

/// Why a crawl stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Termination {
    /// `target_count` entities were collected
    TargetReached,
    /// The domain end was reached first; not an error
    DomainExhausted,
    /// The shutdown signal fired
    Cancelled,
}

/// How a single window iteration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WindowKind {
    /// Pagination finished under the ceiling
    Accepted,
    /// Ceiling reached; credit rolled back and the window bisected
    Shrunk,
    /// A request failed for good; kept what was paged so far
    Aborted,
    /// Ceiling reached at the minimum width; nothing narrower can be queried
    AcceptedAtFloor,
}

/// Record of one window iteration.
#[derive(Debug, Clone, Serialize)]
pub struct WindowOutcome {
    pub window: Window,
    pub window_days: u32,
    pub collected: usize,
    pub kind: WindowKind,
}

/// Counters kept by the pending-writes queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteStats {
    pub batches_submitted: usize,
    pub batches_written: usize,
    pub entities_written: usize,
    pub failed_batches: usize,
}

/// Summary of a crawl run.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlReport {
    pub target_count: usize,
    pub total_collected: usize,
    pub termination: Termination,
    pub shrink_events: usize,
    pub pages_fetched: usize,
    pub failed_requests: usize,
    pub windows: Vec<WindowOutcome>,
    pub writes: WriteStats,
    pub elapsed: Duration,
}

impl CrawlReport {
    /// Windows whose chunk was kept.
    pub fn accepted_windows(&self) -> impl Iterator<Item = &WindowOutcome> {
        self.windows
            .iter()
            .filter(|w| !matches!(w.kind, WindowKind::Shrunk))
    }

    pub fn is_success(&self) -> bool {
        !matches!(self.termination, Termination::Cancelled)
    }
}
