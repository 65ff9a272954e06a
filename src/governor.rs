//! The backoff governor: merges per-category penalties into one resume time.
//!
//! A polling loop asks [`BackoffGovernor::is_timeout`] before each request and
//! sleeps for [`BackoffGovernor::get_timeout`] when it is set. Failed requests
//! are reported through the `add_*` methods, which charge the matching
//! category and push the shared resume time out to
//! `max(resume_after, now + penalty)`. The resume time therefore only moves
//! later; it goes stale once the clock passes it.
//!
//! Rate-limit signals additionally raise a sticky global-outage flag and
//! lower the request budget fraction by a fixed step, never below a floor.
//!
//! The governor may be shared with threads outside the Tokio runtime; every
//! clock read and deferred action goes through the runtime captured when the
//! governor was built.

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::runtime::Handle;

use crate::accumulator::{lock, AccumulatorSnapshot, TimeoutAccumulator};
use crate::category::Category;
use crate::config::GovernorConfig;
use crate::signal::{FailureSignal, RateLimitSignal};
use crate::time::{self, Instant};

// Budget fractions are held in basis points so each step is exact.
pub(crate) const BUDGET_SCALE: u32 = 10_000;

pub(crate) fn to_basis_points(fraction: f64) -> u32 {
    let clamped = fraction.clamp(0.0, 1.0);
    ((clamped * f64::from(BUDGET_SCALE)).round() as u32).max(1)
}

#[derive(Debug)]
struct Shared {
    resume_after: Option<Instant>,
    global_outage: bool,
    budget_bp: u32,
}

/// Point-in-time view of the governor, for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GovernorSnapshot {
    pub timed_out: bool,
    pub timeout_ms: u64,
    pub global_outage: bool,
    pub request_budget_fraction: f64,
    pub categories: Vec<AccumulatorSnapshot>,
}

/// Adaptive error/backoff governor for a background poller.
#[derive(Debug)]
pub struct BackoffGovernor {
    accumulators: [TimeoutAccumulator; Category::COUNT],
    shared: Mutex<Shared>,
    budget_step_bp: u32,
    budget_floor_bp: u32,
    runtime: Option<Handle>,
}

impl Default for BackoffGovernor {
    fn default() -> Self {
        Self::new(&GovernorConfig::default())
    }
}

impl BackoffGovernor {
    /// Creates a governor with one accumulator per category.
    ///
    /// Captures the current Tokio runtime, if any; outside a runtime, use
    /// [`BackoffGovernor::with_runtime`] so penalties still decay.
    pub fn new(config: &GovernorConfig) -> Self {
        Self::build(config, Handle::try_current().ok())
    }

    /// Creates a governor whose timers and clock reads use `runtime`.
    pub fn with_runtime(config: &GovernorConfig, runtime: Handle) -> Self {
        Self::build(config, Some(runtime))
    }

    fn build(config: &GovernorConfig, runtime: Option<Handle>) -> Self {
        Self {
            accumulators: Category::ALL.map(|category| {
                let settings = config.accumulator_settings(category);
                match &runtime {
                    Some(handle) => {
                        TimeoutAccumulator::with_runtime(category, settings, handle.clone())
                    }
                    None => TimeoutAccumulator::new(category, settings),
                }
            }),
            shared: Mutex::new(Shared {
                resume_after: None,
                global_outage: false,
                budget_bp: BUDGET_SCALE,
            }),
            budget_step_bp: to_basis_points(config.budget_step),
            budget_floor_bp: to_basis_points(config.budget_floor),
            runtime,
        }
    }

    /// Records a client-side abort.
    pub fn add_abort(&self) {
        self.charge(Category::Abort, None);
    }

    /// Records a generic request failure.
    pub fn add_generic_error(&self) {
        self.charge(Category::Generic, None);
    }

    /// Records a non-throttling HTTP error.
    pub fn add_http_error(&self) {
        self.charge(Category::Http, None);
    }

    /// Records a throttling response.
    ///
    /// A usable `reset_after_secs` hint sets this event's penalty to
    /// `(reset_after_secs + 1)` seconds; negative or non-finite hints are
    /// ignored. `is_global = true` raises the global-outage flag, which is
    /// never lowered here. The request budget fraction drops by one step.
    pub fn add_rate_limit(&self, is_global: bool, reset_after_secs: Option<f64>) {
        let hint = reset_after_secs.and_then(|secs| {
            let penalty = time::penalty_from_reset_hint(secs);
            if penalty.is_none() {
                tracing::debug!(reset_after_secs = secs, "ignoring malformed reset hint");
            }
            penalty
        });

        let penalty = self.record(Category::RateLimit, hint);
        let mut shared = lock(&self.shared);
        self.merge(&mut shared, Category::RateLimit, penalty);

        if is_global && !shared.global_outage {
            shared.global_outage = true;
            tracing::warn!("remote service reported a global rate limit");
        }

        let lowered = shared
            .budget_bp
            .saturating_sub(self.budget_step_bp)
            .max(self.budget_floor_bp);
        if lowered != shared.budget_bp && lowered == self.budget_floor_bp {
            tracing::warn!(
                fraction = f64::from(lowered) / f64::from(BUDGET_SCALE),
                "request budget reached its floor"
            );
        }
        shared.budget_bp = lowered;
    }

    /// Dispatches a classified failure to the matching `add_*` method.
    pub fn report(&self, signal: FailureSignal) {
        match signal {
            FailureSignal::Abort => self.add_abort(),
            FailureSignal::Generic => self.add_generic_error(),
            FailureSignal::Http { .. } => self.add_http_error(),
            FailureSignal::RateLimited(RateLimitSignal {
                is_global,
                reset_after_secs,
            }) => self.add_rate_limit(is_global, reset_after_secs),
        }
    }

    /// Whether the poller must hold off for now.
    pub fn is_timeout(&self) -> bool {
        let now = self.now();
        matches!(lock(&self.shared).resume_after, Some(resume) if now < resume)
    }

    /// How long the poller must still hold off; zero when it may proceed.
    pub fn get_timeout(&self) -> Duration {
        let now = self.now();
        lock(&self.shared)
            .resume_after
            .map_or(Duration::ZERO, |resume| time::remaining(resume, now))
    }

    /// The merged resume time, if any failure has been recorded.
    pub fn resume_after(&self) -> Option<Instant> {
        lock(&self.shared).resume_after
    }

    /// Share of the nominal request allowance currently usable, in (0, 1].
    pub fn request_budget_fraction(&self) -> f64 {
        f64::from(lock(&self.shared).budget_bp) / f64::from(BUDGET_SCALE)
    }

    /// Whether a rate limit has ever been reported as global.
    pub fn is_global_outage(&self) -> bool {
        lock(&self.shared).global_outage
    }

    /// The accumulator tracking `category`.
    pub fn accumulator(&self, category: Category) -> &TimeoutAccumulator {
        &self.accumulators[category.index()]
    }

    /// The penalty the next failure in `category` will impose.
    pub fn current_penalty(&self, category: Category) -> Duration {
        self.accumulator(category).current_penalty()
    }

    /// Sleeps until the governor allows the next request.
    ///
    /// Re-checks after every sleep, since failures reported meanwhile may have
    /// pushed the resume time out. Returns the total time waited.
    pub async fn wait(&self) -> Duration {
        let mut waited = Duration::ZERO;
        loop {
            let timeout = self.get_timeout();
            if timeout.is_zero() {
                return waited;
            }
            tracing::debug!(timeout_ms = time::as_millis(timeout), "waiting for backoff");
            tokio::time::sleep(timeout).await;
            waited += timeout;
        }
    }

    /// Captures governor-wide and per-category state.
    pub fn snapshot(&self) -> GovernorSnapshot {
        let timeout = self.get_timeout();
        let (global_outage, budget_bp) = {
            let shared = lock(&self.shared);
            (shared.global_outage, shared.budget_bp)
        };
        GovernorSnapshot {
            timed_out: !timeout.is_zero(),
            timeout_ms: time::as_millis(timeout),
            global_outage,
            request_budget_fraction: f64::from(budget_bp) / f64::from(BUDGET_SCALE),
            categories: self
                .accumulators
                .iter()
                .map(TimeoutAccumulator::snapshot)
                .collect(),
        }
    }

    fn now(&self) -> Instant {
        time::now_on(self.runtime.as_ref())
    }

    fn charge(&self, category: Category, penalty_override: Option<Duration>) {
        let penalty = self.record(category, penalty_override);
        self.merge(&mut lock(&self.shared), category, penalty);
    }

    fn record(&self, category: Category, penalty_override: Option<Duration>) -> Duration {
        let accumulator = self.accumulator(category);
        match penalty_override {
            Some(penalty) => accumulator.record_failure_with_override(penalty),
            None => accumulator.record_failure(),
        }
    }

    // Caller holds the shared lock, which makes the max-merge atomic.
    fn merge(&self, shared: &mut Shared, category: Category, penalty: Duration) {
        let now = self.now();
        let candidate = time::saturating_add(now, penalty);
        let merged = match shared.resume_after {
            Some(current) => current.max(candidate),
            None => candidate,
        };
        shared.resume_after = Some(merged);

        tracing::debug!(
            category = %category,
            penalty_ms = time::as_millis(penalty),
            timeout_ms = time::as_millis(time::remaining(merged, now)),
            "merged failure into resume time"
        );
    }
}
