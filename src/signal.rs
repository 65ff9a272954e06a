//! Failure signals reported to the governor.
//!
//! Classification of a failed request into a signal is the caller's decision;
//! the helpers here only cover the common HTTP translations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::category::Category;
use crate::error::Error;

/// Header carrying the seconds until the remote rate limit resets.
pub const RATELIMIT_RESET_HEADER: &str = "ratelimit-reset";

/// Header carrying the standard HTTP retry hint, in seconds.
pub const RETRY_AFTER_HEADER: &str = "retry-after";

/// A throttling response from the remote service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitSignal {
    /// The throttle applies bot-wide rather than to one caller.
    pub is_global: bool,
    /// Seconds until the remote limit resets, if the service said.
    pub reset_after_secs: Option<f64>,
}

impl RateLimitSignal {
    /// A signal with no reset hint.
    pub fn new(is_global: bool) -> Self {
        Self {
            is_global,
            reset_after_secs: None,
        }
    }

    /// Attaches a reset hint.
    pub fn with_reset_after(mut self, secs: f64) -> Self {
        self.reset_after_secs = Some(secs);
        self
    }

    /// Builds a signal from response headers.
    ///
    /// `ratelimit-reset` wins over `retry-after`. Header names are matched
    /// case-insensitively; values that do not parse as a number are ignored.
    pub fn from_headers<'a, I>(is_global: bool, headers: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut reset = None;
        let mut retry_after = None;

        for (name, value) in headers {
            if name.eq_ignore_ascii_case(RATELIMIT_RESET_HEADER) {
                reset = parse_seconds(value);
            } else if name.eq_ignore_ascii_case(RETRY_AFTER_HEADER) {
                retry_after = parse_seconds(value);
            }
        }

        Self {
            is_global,
            reset_after_secs: reset.or(retry_after),
        }
    }
}

fn parse_seconds(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|secs| secs.is_finite())
}

/// A failure the caller has classified for the governor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FailureSignal {
    /// Request cancelled or timed out client-side.
    Abort,
    /// Any other failure, e.g. a malformed response.
    Generic,
    /// Non-throttling HTTP error status.
    Http { status: u16 },
    /// Throttling response.
    RateLimited(RateLimitSignal),
}

impl FailureSignal {
    /// Classifies an HTTP status code.
    ///
    /// 429 maps to [`FailureSignal::RateLimited`] without a hint, other 4xx/5xx
    /// statuses to [`FailureSignal::Http`]. Success and informational statuses
    /// are not failures.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            429 => Some(FailureSignal::RateLimited(RateLimitSignal::default())),
            400..=599 => Some(FailureSignal::Http { status }),
            _ => None,
        }
    }

    /// The category this signal is charged to.
    pub fn category(&self) -> Category {
        match self {
            FailureSignal::Abort => Category::Abort,
            FailureSignal::Generic => Category::Generic,
            FailureSignal::Http { .. } => Category::Http,
            FailureSignal::RateLimited(_) => Category::RateLimit,
        }
    }
}

impl fmt::Display for FailureSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureSignal::Abort => f.write_str("abort"),
            FailureSignal::Generic => f.write_str("generic"),
            FailureSignal::Http { status } => write!(f, "http:{}", status),
            FailureSignal::RateLimited(signal) => {
                f.write_str("ratelimit")?;
                if let Some(secs) = signal.reset_after_secs {
                    write!(f, ":{}", secs)?;
                }
                if signal.is_global {
                    f.write_str(":global")?;
                }
                Ok(())
            }
        }
    }
}

/// Parses the textual form used by the replay CLI.
///
/// Accepted forms: `abort`, `generic`, `http:<status>`, and
/// `ratelimit[:<secs>][:global]`.
impl FromStr for FailureSignal {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidSignal(s.to_string());
        let mut parts = s.trim().split(':');

        let signal = match parts.next().map(str::to_ascii_lowercase).as_deref() {
            Some("abort") => FailureSignal::Abort,
            Some("generic") => FailureSignal::Generic,
            Some("http") => {
                let status = parts
                    .next()
                    .and_then(|status| status.parse::<u16>().ok())
                    .ok_or_else(invalid)?;
                FailureSignal::Http { status }
            }
            Some("ratelimit") => {
                let mut signal = RateLimitSignal::default();
                for part in parts.by_ref() {
                    if part.eq_ignore_ascii_case("global") {
                        signal.is_global = true;
                    } else {
                        let secs = part.parse::<f64>().map_err(|_| invalid())?;
                        signal.reset_after_secs = Some(secs);
                    }
                }
                FailureSignal::RateLimited(signal)
            }
            _ => return Err(invalid()),
        };

        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(signal)
    }
}
