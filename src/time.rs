//! Time and duration helpers shared by the accumulator and the governor.
//!
//! All timestamps are [`tokio::time::Instant`] so that paused test runtimes
//! drive both the deferred actions and the `now()` reads.

use std::time::Duration;

use tokio::runtime::Handle;

pub use tokio::time::Instant;

/// Default length of the rolling failure window and of the restore grace period.
pub const DEFAULT_DECAY_WINDOW: Duration = Duration::from_secs(60);

/// Reads the clock of `runtime`, falling back to the caller's context.
///
/// Entering the runtime keeps paused test clocks consistent for callers on
/// threads the runtime does not own.
pub fn now_on(runtime: Option<&Handle>) -> Instant {
    match runtime {
        Some(runtime) => {
            let _entered = runtime.enter();
            Instant::now()
        }
        None => Instant::now(),
    }
}

/// Time left until `deadline`, or zero once it has passed.
pub fn remaining(deadline: Instant, now: Instant) -> Duration {
    deadline.saturating_duration_since(now)
}

/// Doubles a penalty, saturating instead of overflowing.
pub fn double(penalty: Duration) -> Duration {
    penalty.checked_mul(2).unwrap_or(Duration::MAX)
}

/// Adds a duration to an instant, saturating far in the future on overflow.
pub fn saturating_add(instant: Instant, by: Duration) -> Instant {
    instant.checked_add(by).unwrap_or_else(|| far_future(instant))
}

// Roughly thirty years; comfortably past any process lifetime.
fn far_future(from: Instant) -> Instant {
    from + Duration::from_secs(86_400 * 365 * 30)
}

/// Converts a remote "reset after N seconds" hint into a penalty of `(N + 1) s`.
///
/// Negative, NaN, infinite, or unrepresentable hints yield `None`, meaning the
/// category's doubling curve applies instead.
pub fn penalty_from_reset_hint(reset_after_secs: f64) -> Option<Duration> {
    if !reset_after_secs.is_finite() || reset_after_secs < 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(reset_after_secs + 1.0).ok()
}

/// Whole milliseconds in `duration`, clamped to `u64`.
pub fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
