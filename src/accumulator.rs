//! Per-category failure counter with exponential growth and scheduled decay.
//!
//! Each [`TimeoutAccumulator`] owns the mutable state of exactly one
//! [`Category`]. Two kinds of deferred action are armed on every failure:
//!
//! - a decrement of the rolling count, firing one decay window later
//!   regardless of what happens in between;
//! - a restore of the penalty to its baseline, firing `penalty + decay window`
//!   later. Only one restore is pending at a time; a new failure cancels the old
//!   one and arms a replacement.
//!
//! The two windows are independent: the rolling count answers "is this
//! category busy", the restore answers "is it still penalised".
//!
//! Deferred actions run on the Tokio runtime captured at construction, so
//! failures may be recorded from any thread, including plain `std::thread`s.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::category::Category;
use crate::time::{self, Instant};

/// Locks a mutex, recovering the guard if a previous holder panicked.
///
/// Every critical section in this crate leaves the state consistent between
/// statements, so a poisoned lock is still safe to reuse.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fixed parameters of one category's penalty curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccumulatorSettings {
    /// Penalty on the first failure and after a full cool-down.
    pub base_timeout: Duration,
    /// Penalty adopted when doubling a zero penalty.
    pub seed_timeout: Duration,
    /// Rolling count window, also the grace period added to restores.
    pub decay_window: Duration,
}

impl AccumulatorSettings {
    /// Settings with the given baseline and default seed and window.
    pub fn with_base(base_timeout: Duration) -> Self {
        Self {
            base_timeout,
            seed_timeout: Duration::from_secs(30),
            decay_window: time::DEFAULT_DECAY_WINDOW,
        }
    }
}

#[derive(Debug)]
struct State {
    current_timeout: Duration,
    count_last_minute: u32,
    count_total: u64,
    restore: Option<JoinHandle<()>>,
    // Bumped whenever a restore is armed; a restore only applies if it still
    // carries the latest generation.
    restore_generation: u64,
}

/// Point-in-time view of one category, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccumulatorSnapshot {
    pub category: Category,
    pub base_timeout_ms: u64,
    pub current_penalty_ms: u64,
    pub count_last_minute: u32,
    pub count_total: u64,
    pub restore_pending: bool,
}

/// Failure counter and penalty curve for a single category.
#[derive(Debug)]
pub struct TimeoutAccumulator {
    category: Category,
    settings: AccumulatorSettings,
    state: Arc<Mutex<State>>,
    runtime: Option<Handle>,
}

impl TimeoutAccumulator {
    /// Creates an idle accumulator whose penalty starts at the baseline.
    ///
    /// Captures the current Tokio runtime, if any, to run deferred actions.
    pub fn new(category: Category, settings: AccumulatorSettings) -> Self {
        Self::build(category, settings, Handle::try_current().ok())
    }

    /// Creates an idle accumulator whose deferred actions run on `runtime`.
    pub fn with_runtime(
        category: Category,
        settings: AccumulatorSettings,
        runtime: Handle,
    ) -> Self {
        Self::build(category, settings, Some(runtime))
    }

    fn build(
        category: Category,
        settings: AccumulatorSettings,
        runtime: Option<Handle>,
    ) -> Self {
        Self {
            category,
            settings,
            runtime,
            state: Arc::new(Mutex::new(State {
                current_timeout: settings.base_timeout,
                count_last_minute: 0,
                count_total: 0,
                restore: None,
                restore_generation: 0,
            })),
        }
    }

    /// The category this accumulator tracks.
    pub fn category(&self) -> Category {
        self.category
    }

    /// The fixed curve parameters.
    pub fn settings(&self) -> &AccumulatorSettings {
        &self.settings
    }

    /// Records one failure and returns the penalty it imposes.
    ///
    /// The returned penalty is the one that was pending before this event; the
    /// pending penalty then doubles for the next failure.
    pub fn record_failure(&self) -> Duration {
        self.record(None)
    }

    /// Records one failure whose penalty is dictated by the remote service.
    ///
    /// The override replaces the doubling curve for this event only. The next
    /// failure continues the curve from the override, never below baseline.
    pub fn record_failure_with_override(&self, penalty: Duration) -> Duration {
        self.record(Some(penalty))
    }

    /// The penalty the next failure will impose.
    pub fn current_penalty(&self) -> Duration {
        lock(&self.state).current_timeout
    }

    /// Failures recorded within the trailing decay window.
    pub fn count_last_minute(&self) -> u32 {
        lock(&self.state).count_last_minute
    }

    /// Failures recorded over the accumulator's lifetime.
    pub fn count_total(&self) -> u64 {
        lock(&self.state).count_total
    }

    /// Captures the accumulator's counters and penalty.
    pub fn snapshot(&self) -> AccumulatorSnapshot {
        let state = lock(&self.state);
        AccumulatorSnapshot {
            category: self.category,
            base_timeout_ms: time::as_millis(self.settings.base_timeout),
            current_penalty_ms: time::as_millis(state.current_timeout),
            count_last_minute: state.count_last_minute,
            count_total: state.count_total,
            restore_pending: state.restore.is_some(),
        }
    }

    fn record(&self, penalty_override: Option<Duration>) -> Duration {
        let runtime = self.runtime.clone().or_else(|| Handle::try_current().ok());
        let now = time::now_on(runtime.as_ref());
        let mut state = lock(&self.state);

        let applied = penalty_override.unwrap_or(state.current_timeout);
        let mut next = time::double(applied);
        if next.is_zero() {
            next = self.settings.seed_timeout;
        }
        state.current_timeout = next.max(self.settings.base_timeout);

        state.count_total += 1;
        state.count_last_minute += 1;

        match runtime {
            Some(runtime) => {
                self.schedule_decrement(&runtime, now);
                self.schedule_restore(&runtime, &mut state, now);
            }
            None => tracing::warn!(
                category = %self.category,
                "no tokio runtime; failure counts and penalty will not decay"
            ),
        }

        tracing::debug!(
            category = %self.category,
            applied_ms = time::as_millis(applied),
            next_ms = time::as_millis(state.current_timeout),
            last_minute = state.count_last_minute,
            total = state.count_total,
            "recorded failure"
        );

        applied
    }

    fn schedule_decrement(&self, runtime: &Handle, now: Instant) {
        let deadline = time::saturating_add(now, self.settings.decay_window);
        let state = Arc::downgrade(&self.state);

        runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(state) = Weak::upgrade(&state) {
                let mut state = lock(&state);
                state.count_last_minute = state.count_last_minute.saturating_sub(1);
            }
        });
    }

    fn schedule_restore(&self, runtime: &Handle, state: &mut State, now: Instant) {
        if let Some(stale) = state.restore.take() {
            stale.abort();
        }
        state.restore_generation += 1;

        let generation = state.restore_generation;
        let delay = state
            .current_timeout
            .saturating_add(self.settings.decay_window);
        let deadline = time::saturating_add(now, delay);
        let base = self.settings.base_timeout;
        let category = self.category;
        let shared = Arc::downgrade(&self.state);

        state.restore = Some(runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let Some(shared) = Weak::upgrade(&shared) else {
                return;
            };
            let mut state = lock(&shared);
            if state.restore_generation != generation {
                return;
            }
            state.current_timeout = base;
            state.restore = None;
            tracing::debug!(
                category = %category,
                base_ms = time::as_millis(base),
                "penalty restored to baseline"
            );
        }));
    }
}

impl Drop for TimeoutAccumulator {
    fn drop(&mut self) {
        if let Some(pending) = lock(&self.state).restore.take() {
            pending.abort();
        }
    }
}
