//! Backoff Governor - adaptive error/backoff governor for background pollers
//!
//! This library protects a poller of a rate-limited HTTP API. Failure signals
//! are charged to independent categories with their own exponential penalty
//! curves, merged into a single resume time, and rate-limit signals shrink the
//! poller's request budget.

pub mod accumulator;
pub mod category;
pub mod config;
pub mod error;
pub mod governor;
pub mod poller;
pub mod signal;
pub mod time;

pub use accumulator::{AccumulatorSettings, AccumulatorSnapshot, TimeoutAccumulator};
pub use category::Category;
pub use config::{BaseTimeouts, ConfigIssue, GovernorConfig, Validate, ValidationReport};
pub use error::{Error, Result};
pub use governor::{BackoffGovernor, GovernorSnapshot};
pub use poller::{Poller, PollerConfig, PollerStats, StatsSource};
pub use signal::{FailureSignal, RateLimitSignal};
