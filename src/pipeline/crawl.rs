// src/pipeline/crawl.rs

//! Repository crawling pipeline.

use std::sync::Arc;

use crate::error::Result;
use crate::models::{Config, CrawlReport, WindowKind};
use crate::pipeline::SearchPartitioner;
use crate::services::GithubSearchClient;
use crate::source::{RangeSource, ResilientRangeSource};
use crate::storage::EntityStore;
use crate::utils::log;
use crate::utils::shutdown::Shutdown;

/// Build the GitHub range source with retry handling.
pub fn build_source(config: &Config, shutdown: Shutdown) -> Result<Arc<dyn RangeSource>> {
    let client = GithubSearchClient::new(&config.github)?;
    Ok(Arc::new(ResilientRangeSource::new(
        client,
        config.retry.clone(),
        shutdown,
    )))
}

/// Run the crawler against `source`, persisting into `store`.
///
/// The store is closed on every path, including a failed crawl.
pub async fn run_crawler(
    config: &Config,
    source: Arc<dyn RangeSource>,
    store: Arc<dyn EntityStore>,
    target_count: usize,
    shutdown: Shutdown,
) -> Result<CrawlReport> {
    log::header("Star crawler starting");
    log::sub_item(&format!(
        "Domain: {} .. {} (exclusive)",
        config.partition.domain_start,
        config.partition.resolved_domain_end()
    ));
    log::sub_item(&format!("Target: {} repositories", target_count));

    log::step(1, 3, "Initializing storage");
    if let Err(e) = store.initialize_schema().await {
        if let Err(close_err) = store.close().await {
            ::log::warn!("Closing storage after failed setup: {}", close_err);
        }
        return Err(e);
    }

    log::step(2, 3, "Partitioning search windows");
    let partitioner = SearchPartitioner::new(
        source,
        Arc::clone(&store),
        config.partition.clone(),
        config.writes.clone(),
        shutdown,
    )
    .with_progress(config.logging.show_progress);
    let outcome = partitioner.run(target_count).await;

    log::step(3, 3, "Closing storage");
    let closed = store.close().await;

    let report = outcome?;
    closed?;

    print_summary(&report);
    Ok(report)
}

fn print_summary(report: &CrawlReport) {
    let at_floor = report
        .windows
        .iter()
        .filter(|w| w.kind == WindowKind::AcceptedAtFloor)
        .count();

    log::summary(
        "Crawl",
        &[
            ("Termination", format!("{:?}", report.termination)),
            ("Elapsed", log::format_duration(report.elapsed)),
            (
                "Collected",
                format!("{}/{}", report.total_collected, report.target_count),
            ),
            ("Windows", report.accepted_windows().count().to_string()),
            ("Shrinks", report.shrink_events.to_string()),
            ("Windows at floor", at_floor.to_string()),
            ("Pages", report.pages_fetched.to_string()),
            ("Failed requests", report.failed_requests.to_string()),
            (
                "Written",
                format!(
                    "{} entities in {} batches",
                    report.writes.entities_written, report.writes.batches_written
                ),
            ),
            ("Failed batches", report.writes.failed_batches.to_string()),
        ],
    );

    if report.writes.failed_batches > 0 {
        ::log::warn!(
            "{} batches were not stored; re-run the crawl to fill the gaps",
            report.writes.failed_batches
        );
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::NaiveDate;

    use super::*;
    use crate::error::AppError;
    use crate::models::{Entity, Page, Termination, Window};
    use crate::storage::LocalStore;

    struct TenPerDay;

    #[async_trait]
    impl RangeSource for TenPerDay {
        async fn fetch_range(
            &self,
            window: &Window,
            cursor: Option<&str>,
            page_size: usize,
        ) -> Result<Page> {
            let total = window.days() as usize * 10;
            let offset: usize = cursor.map_or(0, |c| c.parse().unwrap());
            let n = page_size.min(total - offset);
            Ok(Page {
                entities: (offset..offset + n)
                    .map(|i| Entity::new(format!("{}-{i}", window.start), "o/r", 1))
                    .collect(),
                next_cursor: (offset + n < total).then(|| (offset + n).to_string()),
                range_total_count: total as u64,
            })
        }
    }

    struct Unreachable;

    #[async_trait]
    impl RangeSource for Unreachable {
        async fn fetch_range(
            &self,
            _window: &Window,
            _cursor: Option<&str>,
            _page_size: usize,
        ) -> Result<Page> {
            Err(AppError::Io(std::io::Error::other("boom")))
        }
    }

    /// Refuses to set up and records whether it was closed.
    #[derive(Default)]
    struct UnavailableStore {
        closed: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl EntityStore for UnavailableStore {
        async fn initialize_schema(&self) -> Result<()> {
            Err(AppError::storage("database is starting up"))
        }
        async fn upsert_batch(&self, _entities: &[Entity]) -> Result<()> {
            Ok(())
        }
        async fn close(&self) -> Result<()> {
            self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
        async fn count(&self) -> Result<usize> {
            Ok(0)
        }
        async fn get(&self, _id: &str) -> Result<Option<Entity>> {
            Ok(None)
        }
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.partition.domain_start = NaiveDate::from_ymd_opt(2012, 1, 1).unwrap();
        config.partition.domain_end = NaiveDate::from_ymd_opt(2013, 1, 1);
        config.partition.seed_window_days = 90;
        config
    }

    #[tokio::test]
    async fn crawl_persists_into_local_store() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store: Arc<dyn EntityStore> = Arc::new(LocalStore::new(tmp.path()));

        let report = run_crawler(
            &config(),
            Arc::new(TenPerDay),
            Arc::clone(&store),
            2500,
            Shutdown::never(),
        )
        .await
        .unwrap();

        assert_eq!(report.termination, Termination::TargetReached);
        assert_eq!(report.total_collected, 2500);

        let reopened = LocalStore::new(tmp.path());
        reopened.initialize_schema().await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), 2500);
        assert!(tmp.path().join("entities.json").exists());
    }

    #[tokio::test]
    async fn unexpected_errors_abort_but_still_close_the_store() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store: Arc<dyn EntityStore> = Arc::new(LocalStore::new(tmp.path()));

        let result = run_crawler(
            &config(),
            Arc::new(Unreachable),
            store,
            100,
            Shutdown::never(),
        )
        .await;

        assert!(matches!(result, Err(AppError::Io(_))));
        assert!(tmp.path().join("entities.json").exists());
    }

    #[tokio::test]
    async fn failed_setup_still_closes_the_store() {
        let store = Arc::new(UnavailableStore::default());

        let result = run_crawler(
            &config(),
            Arc::new(TenPerDay),
            store.clone(),
            100,
            Shutdown::never(),
        )
        .await;

        assert!(matches!(result, Err(AppError::Storage(_))));
        assert!(store.closed.load(std::sync::atomic::Ordering::SeqCst));
    }
}
