//! Background polling loop that honors the governor.
//!
//! Before each request the loop waits out any active backoff. Failures are
//! reported to the governor; successes are forwarded over a channel. Between
//! requests the loop sleeps for the nominal interval stretched by the inverse
//! of the current request budget fraction, so rate-limit signals slow it down
//! for the rest of the process lifetime.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, watch};

use crate::governor::BackoffGovernor;
use crate::signal::FailureSignal;
use crate::time;

/// A remote endpoint the poller fetches from.
#[async_trait]
pub trait StatsSource: Send + Sync {
    /// What a successful fetch yields.
    type Output: Send + 'static;

    /// Performs one request, classifying any failure for the governor.
    async fn fetch(&self) -> Result<Self::Output, FailureSignal>;
}

/// Configuration for the polling loop.
#[derive(Debug, Clone, Copy)]
pub struct PollerConfig {
    /// Pause between requests at a full request budget.
    pub interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
        }
    }
}

/// Counters from one run of the loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollerStats {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub backoff_ms: u64,
}

// Resolves once shutdown is requested or the sender is gone; a change back to
// `false` keeps waiting.
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    while shutdown.changed().await.is_ok() {
        if *shutdown.borrow_and_update() {
            return;
        }
    }
}

/// Drives a [`StatsSource`] under a shared [`BackoffGovernor`].
pub struct Poller<S: StatsSource> {
    source: Arc<S>,
    governor: Arc<BackoffGovernor>,
    config: PollerConfig,
}

impl<S: StatsSource> Poller<S> {
    /// Creates a poller.
    pub fn new(source: S, governor: Arc<BackoffGovernor>, config: PollerConfig) -> Self {
        Self {
            source: Arc::new(source),
            governor,
            config,
        }
    }

    /// The governor this poller reports to.
    pub fn governor(&self) -> &Arc<BackoffGovernor> {
        &self.governor
    }

    /// Pause between requests at the current budget fraction.
    pub fn effective_interval(&self) -> Duration {
        let fraction = self.governor.request_budget_fraction();
        Duration::try_from_secs_f64(self.config.interval.as_secs_f64() / fraction)
            .unwrap_or(Duration::MAX)
    }

    /// Runs until `shutdown` flips to true, its sender is dropped, or the
    /// output receiver is dropped.
    pub async fn run(
        &self,
        output: mpsc::Sender<S::Output>,
        mut shutdown: watch::Receiver<bool>,
    ) -> PollerStats {
        let mut stats = PollerStats::default();

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                waited = self.governor.wait() => {
                    stats.backoff_ms += time::as_millis(waited);
                }
                _ = stop_requested(&mut shutdown) => break,
            }

            stats.requests += 1;
            match self.source.fetch().await {
                Ok(value) => {
                    stats.successes += 1;
                    if output.send(value).await.is_err() {
                        tracing::debug!("poller output closed");
                        break;
                    }
                }
                Err(signal) => {
                    stats.failures += 1;
                    tracing::warn!(%signal, "poll request failed");
                    self.governor.report(signal);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.effective_interval()) => {}
                _ = stop_requested(&mut shutdown) => break,
            }
        }

        tracing::info!(
            requests = stats.requests,
            failures = stats.failures,
            "poller stopped"
        );
        stats
    }
}
