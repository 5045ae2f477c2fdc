// src/pipeline/writer.rs

//! Pipelined batch writes.
//!
//! Pages are handed to the store without waiting for the write, so the next
//! fetch overlaps the previous upsert. Every write is tracked in a bounded
//! set and `drain` awaits all of them; nothing is fire-and-forget.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinSet};

use crate::error::Result;
use crate::models::{Entity, WriteStats};
use crate::storage::EntityStore;

/// Bounded set of in-flight upserts.
pub struct WriteQueue {
    store: Arc<dyn EntityStore>,
    in_flight: JoinSet<Result<usize>>,
    max_in_flight: usize,
    stats: WriteStats,
}

impl WriteQueue {
    pub fn new(store: Arc<dyn EntityStore>, max_in_flight: usize) -> Self {
        Self {
            store,
            in_flight: JoinSet::new(),
            max_in_flight: max_in_flight.max(1),
            stats: WriteStats::default(),
        }
    }

    /// Queue a batch, first waiting for room if the set is full.
    pub async fn submit(&mut self, batch: Vec<Entity>) {
        if batch.is_empty() {
            return;
        }
        while self.in_flight.len() >= self.max_in_flight {
            self.reap_one().await;
        }

        let store = Arc::clone(&self.store);
        self.stats.batches_submitted += 1;
        self.in_flight.spawn(async move {
            store.upsert_batch(&batch).await?;
            Ok(batch.len())
        });
    }

    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }

    pub fn stats(&self) -> WriteStats {
        self.stats
    }

    /// Await every outstanding write, giving up after `timeout`.
    ///
    /// Writes still running at the deadline are aborted and counted as failed.
    pub async fn drain(&mut self, timeout: Duration) -> WriteStats {
        if self.in_flight.is_empty() {
            return self.stats;
        }

        log::debug!("Draining {} pending writes", self.in_flight.len());
        let drained = tokio::time::timeout(timeout, async {
            while !self.in_flight.is_empty() {
                self.reap_one().await;
            }
        })
        .await;

        if drained.is_err() {
            log::error!(
                "{} writes still pending after {}s; aborting them",
                self.in_flight.len(),
                timeout.as_secs()
            );
            self.in_flight.abort_all();
            // A write may still finish before its abort lands.
            while let Some(joined) = self.in_flight.join_next().await {
                self.record(joined);
            }
        }

        self.stats
    }

    async fn reap_one(&mut self) {
        if let Some(joined) = self.in_flight.join_next().await {
            self.record(joined);
        }
    }

    fn record(&mut self, joined: std::result::Result<Result<usize>, JoinError>) {
        match joined {
            Ok(Ok(count)) => {
                self.stats.batches_written += 1;
                self.stats.entities_written += count;
            }
            Ok(Err(e)) => {
                self.stats.failed_batches += 1;
                log::error!(
                    "Batch write failed ({} failed so far): {}",
                    self.stats.failed_batches,
                    e
                );
            }
            Err(e) => {
                self.stats.failed_batches += 1;
                log::error!("Batch write task did not complete: {}", e);
            }
        }
    }
}
