// src/pipeline/partitioner.rs

//! Adaptive range partitioning.
//!
//! The domain is walked one window at a time. A window whose chunk reaches
//! the result ceiling cannot be trusted (anything past the ceiling is
//! unreachable), so its credit is rolled back and the same position is
//! retried with half the width. Windows that finish under the ceiling are
//! accepted and the width grows when density is low.
//!
//! ```text
//!   ADVANCING --ceiling breach--> SHRINKING
//!   SHRINKING --window under ceiling--> ADVANCING
//! ```

use std::sync::Arc;
use std::time::Instant;

use crate::error::{AppError, Result};
use crate::models::{
    CrawlReport, PartitionConfig, PartitionState, Termination, Window, WindowKind, WindowOutcome,
    WriteConfig, WriteStats,
};
use crate::pipeline::writer::WriteQueue;
use crate::source::RangeSource;
use crate::storage::EntityStore;
use crate::utils::shutdown::Shutdown;

/// How pagination of one window ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkEnd {
    /// No cursor left, or the target was met
    Exhausted,
    /// The chunk reached the ceiling
    Breached,
    /// A request failed for good after some pages
    Aborted,
}

/// Walks the domain and collects entities into a store.
pub struct SearchPartitioner {
    source: Arc<dyn RangeSource>,
    store: Arc<dyn EntityStore>,
    partition: PartitionConfig,
    writes: WriteConfig,
    shutdown: Shutdown,
    show_progress: bool,
}

impl SearchPartitioner {
    pub fn new(
        source: Arc<dyn RangeSource>,
        store: Arc<dyn EntityStore>,
        partition: PartitionConfig,
        writes: WriteConfig,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            source,
            store,
            partition,
            writes,
            shutdown,
            show_progress: false,
        }
    }

    /// Log every saved page, not just every window.
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Collect `target_count` entities, or everything the domain holds if
    /// there are fewer.
    ///
    /// Outstanding writes are drained on every exit path. Cancellation is
    /// reported through `Termination::Cancelled`; other errors escaping the
    /// loop are returned after the drain.
    pub async fn run(&self, target_count: usize) -> Result<CrawlReport> {
        let started = Instant::now();
        let mut queue = WriteQueue::new(Arc::clone(&self.store), self.writes.max_in_flight);
        let mut report = CrawlReport {
            target_count,
            total_collected: 0,
            termination: Termination::DomainExhausted,
            shrink_events: 0,
            pages_fetched: 0,
            failed_requests: 0,
            windows: Vec::new(),
            writes: WriteStats::default(),
            elapsed: Default::default(),
        };

        let outcome = self.walk(target_count, &mut queue, &mut report).await;

        report.writes = queue.drain(self.writes.drain_timeout()).await;
        report.elapsed = started.elapsed();

        match outcome {
            Ok(termination) => {
                report.termination = termination;
                Ok(report)
            }
            Err(AppError::Cancelled) => {
                log::warn!(
                    "Crawl cancelled with {}/{} collected",
                    report.total_collected,
                    target_count
                );
                report.termination = Termination::Cancelled;
                Ok(report)
            }
            Err(e) => Err(e),
        }
    }

    async fn walk(
        &self,
        target_count: usize,
        queue: &mut WriteQueue,
        report: &mut CrawlReport,
    ) -> Result<Termination> {
        let domain_end = self.partition.resolved_domain_end();
        let mut state = PartitionState::new(
            self.partition.domain_start,
            self.partition.seed_window_days,
        );

        loop {
            if state.total_collected >= target_count {
                return Ok(Termination::TargetReached);
            }
            if state.position >= domain_end {
                log::info!(
                    "Reached end of domain with {}/{} collected",
                    state.total_collected,
                    target_count
                );
                return Ok(Termination::DomainExhausted);
            }

            let window = state.begin_window(domain_end);
            let window_days = state.window_days;
            let end = self
                .collect_window(&window, target_count, &mut state, queue, report)
                .await;
            let collected = state.chunk_collected;
            report.total_collected = state.total_collected;

            let end = end?;
            let kind = self.decide(&window, end, &mut state);
            report.total_collected = state.total_collected;
            if kind == WindowKind::Shrunk {
                report.shrink_events += 1;
            }
            report.windows.push(WindowOutcome {
                window,
                window_days,
                collected,
                kind,
            });

            match kind {
                WindowKind::Shrunk => log::warn!(
                    "Window {} hit the {} result ceiling; retrying with {} days",
                    window,
                    self.partition.result_ceiling,
                    state.window_days
                ),
                _ => log::info!(
                    "Window {} ({} days): {} collected, total {}/{}",
                    window,
                    window.days(),
                    collected,
                    state.total_collected,
                    target_count
                ),
            }
        }
    }

    /// Page through `window`, forwarding each page to the write queue.
    async fn collect_window(
        &self,
        window: &Window,
        target_count: usize,
        state: &mut PartitionState,
        queue: &mut WriteQueue,
        report: &mut CrawlReport,
    ) -> Result<ChunkEnd> {
        let mut cursor: Option<String> = None;

        loop {
            if self.shutdown.is_cancelled() {
                return Err(AppError::Cancelled);
            }

            let page_size = self
                .partition
                .page_size
                .min(state.remaining(target_count))
                .max(1);
            let page = match self
                .source
                .fetch_range(window, cursor.as_deref(), page_size)
                .await
            {
                Ok(page) => page,
                Err(e) if e.is_request_failure() => {
                    report.failed_requests += 1;
                    log::error!(
                        "Giving up on window {} after {} entities: {}",
                        window,
                        state.chunk_collected,
                        e
                    );
                    return Ok(ChunkEnd::Aborted);
                }
                Err(e) => return Err(e),
            };

            report.pages_fetched += 1;
            let count = page.entities.len();
            state.credit(count);
            queue.submit(page.entities).await;

            if self.show_progress {
                log::debug!(
                    "Saved {} entities from {} (window {}, total {})",
                    count,
                    window,
                    state.chunk_collected,
                    state.total_collected
                );
            }

            if state.chunk_collected >= self.partition.result_ceiling {
                return Ok(ChunkEnd::Breached);
            }
            if state.total_collected >= target_count {
                return Ok(ChunkEnd::Exhausted);
            }
            match page.next_cursor {
                Some(next) if count > 0 => cursor = Some(next),
                _ => return Ok(ChunkEnd::Exhausted),
            }
        }
    }

    /// Apply the window-size decision and move the position if the chunk
    /// is kept.
    fn decide(&self, window: &Window, end: ChunkEnd, state: &mut PartitionState) -> WindowKind {
        let floor = self.partition.min_window_days;

        if end == ChunkEnd::Breached {
            if state.window_days > floor {
                // Halve the width actually queried; a window clipped at the
                // domain end may be narrower than `window_days`.
                let effective = u32::try_from(window.days())
                    .unwrap_or(state.window_days)
                    .min(state.window_days);
                state.rollback();
                state.window_days = (effective / 2).max(floor);
                return WindowKind::Shrunk;
            }

            log::warn!(
                "Window {} is at the minimum width and still hit the ceiling; \
                 entities past {} are unreachable",
                window,
                self.partition.result_ceiling
            );
            state.advance_past(window);
            return WindowKind::AcceptedAtFloor;
        }

        let collected = state.chunk_collected;
        state.advance_past(window);
        state.window_days = self.grown_width(state.window_days, collected);

        match end {
            ChunkEnd::Aborted => WindowKind::Aborted,
            _ => WindowKind::Accepted,
        }
    }

    /// Width for the next window after a chunk of `collected` entities.
    ///
    /// Sparse chunks scale the width toward `target_fill` of the ceiling,
    /// bounded by `max_growth_factor` and `max_window_days`. Chunks at or
    /// above `growth_threshold` of the ceiling keep the width.
    fn grown_width(&self, current: u32, collected: usize) -> u32 {
        let ceiling = self.partition.result_ceiling as f64;
        if collected as f64 >= self.partition.growth_threshold * ceiling {
            return current;
        }

        let factor = (self.partition.target_fill * ceiling / collected.max(1) as f64)
            .min(self.partition.max_growth_factor);
        if factor <= 1.0 {
            return current;
        }

        let grown = (f64::from(current) * factor).ceil() as u32;
        grown
            .max(current.saturating_add(1))
            .min(self.partition.max_window_days)
    }
}
