// src/utils/shutdown.rs

//! Crawl-wide cancellation signal.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::{AppError, Result};

/// Fires the shutdown signal.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Signal every `Shutdown` handle. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Cloneable receiving side of the shutdown signal.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
    // Keeps the channel open for handles that have no trigger.
    _owned: Option<Arc<watch::Sender<bool>>>,
}

impl Shutdown {
    /// Create a linked trigger/handle pair.
    pub fn channel() -> (ShutdownTrigger, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (ShutdownTrigger { tx }, Shutdown { rx, _owned: None })
    }

    /// A handle that never fires.
    pub fn never() -> Shutdown {
        let (tx, rx) = watch::channel(false);
        Shutdown {
            rx,
            _owned: Some(Arc::new(tx)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the signal fires.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // A closed channel counts as cancelled.
        let _ = rx.wait_for(|fired| *fired).await;
    }

    /// Sleep for `duration` unless cancelled first.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.run(tokio::time::sleep(duration)).await
    }

    /// Run `fut` unless cancelled first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output> {
        if self.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        tokio::select! {
            out = fut => Ok(out),
            _ = self.cancelled() => Err(AppError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_interrupts_sleep() {
        let (trigger, shutdown) = Shutdown::channel();

        let waiter = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { shutdown.sleep(Duration::from_secs(3600)).await }
        });
        tokio::task::yield_now().await;
        trigger.trigger();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(AppError::Cancelled)));
        assert!(shutdown.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn never_lets_sleep_complete() {
        let shutdown = Shutdown::never();
        assert!(shutdown.sleep(Duration::from_secs(5)).await.is_ok());
        assert!(!shutdown.is_cancelled());
    }
}
