// src/source/resilient.rs

//! Retry and backoff around a search transport.
//!
//! Three failure classes are absorbed here so the partitioner only sees
//! errors that survived the retry budget:
//!
//! 1. Rate-limit replies wait until the advertised reset (plus a margin, or a
//!    default wait without a hint) and retry without consuming the budget.
//! 2. Transient failures (non-success status, connection errors) retry up to
//!    `max_retries` times with a fixed delay.
//! 3. Embedded errors retry like (2) when they are rate-limit or timeout
//!    errors and fail immediately otherwise.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{AppError, Result};
use crate::models::{Page, RetryConfig, Window};
use crate::source::{EmbeddedError, RangeQuery, RangeSource, SearchTransport, TransportReply};
use crate::utils::shutdown::Shutdown;

/// Range source that retries a transport until it yields a page.
pub struct ResilientRangeSource<T> {
    transport: T,
    retry: RetryConfig,
    shutdown: Shutdown,
}

impl<T: SearchTransport> ResilientRangeSource<T> {
    pub fn new(transport: T, retry: RetryConfig, shutdown: Shutdown) -> Self {
        Self {
            transport,
            retry,
            shutdown,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// How long to wait after a rate-limit reply received at `now`.
    fn rate_limit_wait(&self, reset_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
        let default = Duration::from_secs(self.retry.rate_limit_default_wait_secs);
        let cap = Duration::from_secs(self.retry.max_rate_limit_wait_secs);

        let wait = reset_at
            .map(|reset| {
                reset + chrono::Duration::seconds(self.retry.rate_limit_margin_secs as i64) - now
            })
            .and_then(|delta| delta.to_std().ok())
            .filter(|wait| !wait.is_zero())
            .unwrap_or(default);

        wait.min(cap)
    }

    /// Execute `query` until it succeeds, fails for good, or the crawl is
    /// cancelled.
    pub async fn execute(&self, query: &RangeQuery) -> Result<Page> {
        let mut failures: u32 = 0;

        loop {
            let reply = self.shutdown.run(self.transport.execute(query)).await?;

            let failure = match reply {
                Ok(TransportReply::Page(page)) => return Ok(page),
                Ok(TransportReply::RateLimited { reset_at }) => {
                    let wait = self.rate_limit_wait(reset_at, Utc::now());
                    log::warn!("{} while fetching {}", AppError::RateLimited { wait }, query.window);
                    self.shutdown.sleep(wait).await?;
                    continue;
                }
                Ok(TransportReply::Failed { status, message }) => {
                    AppError::transient(format!("HTTP {status}: {message}"))
                }
                Ok(TransportReply::Embedded(errors)) => {
                    let summary = errors
                        .iter()
                        .map(|e| e.message.as_str())
                        .collect::<Vec<_>>()
                        .join("; ");
                    if !errors.iter().any(EmbeddedError::is_retryable) {
                        log::error!("Query for {} rejected: {}", query.window, summary);
                        return Err(AppError::malformed_query(summary));
                    }
                    AppError::transient(format!("embedded error: {summary}"))
                }
                Err(error) => error,
            };

            failures += 1;
            if failures > self.retry.max_retries {
                return Err(AppError::RequestFailed {
                    attempts: failures,
                    message: failure.to_string(),
                });
            }

            log::warn!(
                "{} for {}. Retrying in {}ms ({}/{})",
                failure,
                query.window,
                self.retry.retry_delay_ms,
                failures,
                self.retry.max_retries
            );
            self.shutdown.sleep(self.retry.retry_delay()).await?;
        }
    }
}

#[async_trait]
impl<T: SearchTransport> RangeSource for ResilientRangeSource<T> {
    async fn fetch_range(
        &self,
        window: &Window,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Page> {
        let query = RangeQuery {
            window: *window,
            cursor: cursor.map(str::to_string),
            page_size,
        };
        self.execute(&query).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use chrono::NaiveDate;
    use tokio::time::Instant;

    use super::*;
    use crate::models::Entity;
    use crate::utils::shutdown::ShutdownTrigger;

    enum Step {
        Reply(TransportReply),
        ConnectionReset,
    }

    struct ScriptedTransport {
        steps: Mutex<VecDeque<Step>>,
        calls: Mutex<Vec<Instant>>,
        cancel_on_call: Option<ShutdownTrigger>,
    }

    impl ScriptedTransport {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: Mutex::new(steps.into()),
                calls: Mutex::new(Vec::new()),
                cancel_on_call: None,
            }
        }

        fn calls(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SearchTransport for ScriptedTransport {
        async fn execute(&self, _query: &RangeQuery) -> Result<TransportReply> {
            self.calls.lock().unwrap().push(Instant::now());
            if let Some(trigger) = &self.cancel_on_call {
                trigger.trigger();
            }
            match self.steps.lock().unwrap().pop_front() {
                Some(Step::Reply(reply)) => Ok(reply),
                Some(Step::ConnectionReset) => Err(AppError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset by peer",
                ))),
                None => Ok(TransportReply::Failed {
                    status: 500,
                    message: "script exhausted".into(),
                }),
            }
        }
    }

    fn page(n: usize) -> TransportReply {
        TransportReply::Page(Page {
            entities: (0..n)
                .map(|i| Entity::new(format!("R_{i}"), format!("o/r{i}"), 10))
                .collect(),
            next_cursor: None,
            range_total_count: n as u64,
        })
    }

    fn bad_gateway() -> Step {
        Step::Reply(TransportReply::Failed {
            status: 502,
            message: "Bad Gateway".into(),
        })
    }

    fn window() -> Window {
        let start = NaiveDate::from_ymd_opt(2015, 1, 1).unwrap();
        Window::clipped(start, 30, NaiveDate::from_ymd_opt(2030, 1, 1).unwrap())
    }

    fn source(transport: ScriptedTransport) -> ResilientRangeSource<ScriptedTransport> {
        ResilientRangeSource::new(transport, RetryConfig::default(), Shutdown::never())
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_rate_limit_reset_before_retrying() {
        let reset_at = Utc::now() + chrono::Duration::seconds(10);
        let source = source(ScriptedTransport::new(vec![
            Step::Reply(TransportReply::RateLimited {
                reset_at: Some(reset_at),
            }),
            Step::Reply(page(3)),
        ]));

        let result = source.fetch_range(&window(), None, 100).await.unwrap();

        assert_eq!(result.entities.len(), 3);
        let calls = source.transport().calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1] - calls[0] >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limits_do_not_consume_retry_budget() {
        let mut steps: Vec<Step> = (0..10)
            .map(|_| Step::Reply(TransportReply::RateLimited { reset_at: None }))
            .collect();
        steps.push(Step::Reply(page(1)));
        let source = source(ScriptedTransport::new(steps));

        let result = source.fetch_range(&window(), None, 100).await;

        assert!(result.is_ok());
        let calls = source.transport().calls();
        assert_eq!(calls.len(), 11);
        // No hint: the default wait applies.
        assert!(calls[1] - calls[0] >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_exhaust_bounded_budget() {
        let source = source(ScriptedTransport::new(vec![
            bad_gateway(),
            Step::ConnectionReset,
            bad_gateway(),
            bad_gateway(),
            Step::Reply(page(1)),
        ]));

        let err = source.fetch_range(&window(), None, 100).await.unwrap_err();

        assert!(matches!(err, AppError::RequestFailed { attempts: 4, .. }));
        assert!(err.is_request_failure());
        assert_eq!(source.transport().calls().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_recovers_after_fixed_delay() {
        let source = source(ScriptedTransport::new(vec![
            Step::ConnectionReset,
            bad_gateway(),
            Step::Reply(page(2)),
        ]));

        let result = source.fetch_range(&window(), None, 100).await.unwrap();

        assert_eq!(result.entities.len(), 2);
        let calls = source.transport().calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[1] - calls[0] >= Duration::from_secs(1));
        assert!(calls[2] - calls[1] >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_embedded_error_fails_without_retry() {
        let source = source(ScriptedTransport::new(vec![Step::Reply(
            TransportReply::Embedded(vec![EmbeddedError::new(
                Some("INVALID"),
                "Invalid search qualifier",
            )]),
        )]));

        let err = source.fetch_range(&window(), None, 100).await.unwrap_err();

        assert!(matches!(err, AppError::MalformedQuery(ref m) if m.contains("qualifier")));
        assert_eq!(source.transport().calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn embedded_rate_limit_shares_transient_budget() {
        let embedded = || {
            Step::Reply(TransportReply::Embedded(vec![EmbeddedError::new(
                Some("RATE_LIMITED"),
                "API rate limit exceeded",
            )]))
        };
        let source = source(ScriptedTransport::new(vec![
            embedded(),
            bad_gateway(),
            embedded(),
            embedded(),
            Step::Reply(page(1)),
        ]));

        let err = source.fetch_range(&window(), None, 100).await.unwrap_err();

        assert!(matches!(err, AppError::RequestFailed { attempts: 4, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_rate_limit_wait() {
        let (trigger, shutdown) = Shutdown::channel();
        let mut transport = ScriptedTransport::new(vec![Step::Reply(
            TransportReply::RateLimited {
                reset_at: Some(Utc::now() + chrono::Duration::seconds(600)),
            },
        )]);
        transport.cancel_on_call = Some(trigger);
        let source = ResilientRangeSource::new(transport, RetryConfig::default(), shutdown);

        let err = source.fetch_range(&window(), None, 100).await.unwrap_err();

        assert!(matches!(err, AppError::Cancelled));
        assert_eq!(source.transport().calls().len(), 1);
    }

    #[test]
    fn rate_limit_wait_uses_margin_default_and_cap() {
        let source = source(ScriptedTransport::new(Vec::new()));
        let now = Utc::now();

        let wait = source.rate_limit_wait(Some(now + chrono::Duration::seconds(30)), now);
        assert_eq!(wait, Duration::from_secs(31));

        // Reset already passed: fall back to the default wait.
        let wait = source.rate_limit_wait(Some(now - chrono::Duration::seconds(30)), now);
        assert_eq!(wait, Duration::from_secs(5));

        let wait = source.rate_limit_wait(None, now);
        assert_eq!(wait, Duration::from_secs(5));

        let wait = source.rate_limit_wait(Some(now + chrono::Duration::days(1)), now);
        assert_eq!(wait, Duration::from_secs(3600));
    }
}
