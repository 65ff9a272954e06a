//! Failure categories tracked by the governor.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An independent class of failure, each with its own penalty curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    /// The caller's own request was cancelled or timed out client-side.
    Abort,
    /// Any other failed request, e.g. a malformed response.
    Generic,
    /// The remote service answered with a non-throttling HTTP error.
    Http,
    /// The remote service returned a throttling signal.
    RateLimit,
}

impl Category {
    /// Number of categories; sizes the governor's per-category table.
    pub const COUNT: usize = 4;

    /// Every category, in table order.
    pub const ALL: [Category; Category::COUNT] = [
        Category::Abort,
        Category::Generic,
        Category::Http,
        Category::RateLimit,
    ];

    /// Position of this category in the per-category table.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Stable identifier used in logs and snapshots.
    pub const fn as_str(self) -> &'static str {
        match self {
            Category::Abort => "abort",
            Category::Generic => "generic",
            Category::Http => "http",
            Category::RateLimit => "rate-limit",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
