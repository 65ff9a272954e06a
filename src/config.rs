//! Governor configuration and validation.
//!
//! Configuration is loaded from TOML; every field has a default so an empty
//! document yields the stock curves.
//!
//! ```toml
//! decay_window_ms = 60000
//! budget_step = 0.05
//!
//! [base_timeout_ms]
//! generic = 30000
//! rate_limit = 60000
//! ```

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::accumulator::AccumulatorSettings;
use crate::category::Category;
use crate::error::{Error, Result};
use crate::governor::{to_basis_points, BUDGET_SCALE};

/// Baseline penalty per category, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseTimeouts {
    pub abort: u64,
    pub generic: u64,
    pub http: u64,
    pub rate_limit: u64,
}

impl Default for BaseTimeouts {
    fn default() -> Self {
        Self {
            abort: 0,
            generic: 30_000,
            http: 30_000,
            rate_limit: 60_000,
        }
    }
}

impl BaseTimeouts {
    /// The baseline configured for `category`.
    pub fn get(&self, category: Category) -> Duration {
        let ms = match category {
            Category::Abort => self.abort,
            Category::Generic => self.generic,
            Category::Http => self.http,
            Category::RateLimit => self.rate_limit,
        };
        Duration::from_millis(ms)
    }
}

/// Configuration for a [`BackoffGovernor`](crate::BackoffGovernor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernorConfig {
    /// Baseline penalty for each category.
    #[serde(default)]
    pub base_timeout_ms: BaseTimeouts,
    /// Penalty adopted when a zero penalty is doubled.
    #[serde(default = "default_seed_timeout_ms")]
    pub seed_timeout_ms: u64,
    /// Rolling count window and restore grace period.
    #[serde(default = "default_decay_window_ms")]
    pub decay_window_ms: u64,
    /// Budget fraction removed by each rate-limit signal.
    #[serde(default = "default_budget_step")]
    pub budget_step: f64,
    /// Lowest budget fraction rate-limit signals can push the budget to.
    #[serde(default = "default_budget_floor")]
    pub budget_floor: f64,
}

fn default_seed_timeout_ms() -> u64 {
    30_000
}

fn default_decay_window_ms() -> u64 {
    60_000
}

fn default_budget_step() -> f64 {
    0.05
}

fn default_budget_floor() -> f64 {
    0.05
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            base_timeout_ms: BaseTimeouts::default(),
            seed_timeout_ms: default_seed_timeout_ms(),
            decay_window_ms: default_decay_window_ms(),
            budget_step: default_budget_step(),
            budget_floor: default_budget_floor(),
        }
    }
}

impl GovernorConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: GovernorConfig = toml::from_str(source)?;
        config.validate().into_result()?;
        Ok(config)
    }

    /// Reads, parses, and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Curve parameters for one category.
    pub fn accumulator_settings(&self, category: Category) -> AccumulatorSettings {
        AccumulatorSettings {
            base_timeout: self.base_timeout_ms.get(category),
            seed_timeout: Duration::from_millis(self.seed_timeout_ms),
            decay_window: Duration::from_millis(self.decay_window_ms),
        }
    }
}

/// One problem with a single configuration field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Issues found by one validation pass, split by severity.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// Issues that make the configuration unusable.
    pub errors: Vec<ConfigIssue>,
    /// Issues the governor tolerates but an operator should see.
    pub warnings: Vec<ConfigIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn reject(&mut self, field: &'static str, message: impl Into<String>) {
        self.errors.push(ConfigIssue {
            field,
            message: message.into(),
        });
    }

    fn caution(&mut self, field: &'static str, message: impl Into<String>) {
        self.warnings.push(ConfigIssue {
            field,
            message: message.into(),
        });
    }

    /// Logs every warning against its field, then fails if any error was found.
    pub fn into_result(self) -> Result<()> {
        for issue in &self.warnings {
            tracing::warn!(field = issue.field, "governor config: {}", issue.message);
        }
        if self.is_valid() {
            return Ok(());
        }
        let errors: Vec<String> = self.errors.iter().map(ToString::to_string).collect();
        Err(Error::Config(errors.join("; ")))
    }
}

/// Configuration types that can check their own field ranges.
pub trait Validate {
    fn validate(&self) -> ValidationReport;
}

// Budget fractions are applied in basis points; anything finer is rounded.
fn off_budget_grid(fraction: f64) -> bool {
    let scaled = fraction * f64::from(BUDGET_SCALE);
    (scaled - scaled.round()).abs() > 1e-6
}

fn check_budget_fraction(report: &mut ValidationReport, field: &'static str, fraction: f64) {
    if !(fraction > 0.0 && fraction <= 1.0) {
        report.reject(field, format!("{} is outside (0, 1]", fraction));
    } else if off_budget_grid(fraction) {
        let applied = f64::from(to_basis_points(fraction)) / f64::from(BUDGET_SCALE);
        report.caution(
            field,
            format!(
                "{} is finer than the 0.0001 budget resolution and will be applied as {}",
                fraction, applied
            ),
        );
    }
}

impl Validate for GovernorConfig {
    fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        check_budget_fraction(&mut report, "budget_step", self.budget_step);
        check_budget_fraction(&mut report, "budget_floor", self.budget_floor);

        if self.seed_timeout_ms == 0 {
            report.caution(
                "seed_timeout_ms",
                "zero means zero-baseline categories never back off",
            );
        }

        if self.decay_window_ms == 0 {
            report.caution("decay_window_ms", "zero disables the rolling failure window");
        }

        for category in Category::ALL {
            if self.base_timeout_ms.get(category) > Duration::from_secs(3600) {
                report.caution(
                    "base_timeout_ms",
                    format!("{} baseline over 1 hour is likely a misconfiguration", category),
                );
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn defaults_match_stock_curves() {
        let config = GovernorConfig::default();

        assert_eq!(config.base_timeout_ms.get(Category::Abort), Duration::ZERO);
        assert_eq!(
            config.base_timeout_ms.get(Category::Generic),
            Duration::from_secs(30)
        );
        assert_eq!(
            config.base_timeout_ms.get(Category::RateLimit),
            Duration::from_secs(60)
        );
        assert_eq!(config.budget_step, 0.05);
        assert!(config.validate().is_valid());
    }

    #[test]
    fn empty_document_yields_defaults() {
        let config = assert_ok!(GovernorConfig::from_toml_str(""));
        assert_eq!(config, GovernorConfig::default());
    }

    #[test]
    fn partial_document_overrides_only_named_fields() {
        let toml = r#"
            decay_window_ms = 30000

            [base_timeout_ms]
            rate_limit = 10000
        "#;

        let config = assert_ok!(GovernorConfig::from_toml_str(toml));

        assert_eq!(config.decay_window_ms, 30_000);
        assert_eq!(config.base_timeout_ms.rate_limit, 10_000);
        assert_eq!(config.base_timeout_ms.generic, 30_000);

        let settings = config.accumulator_settings(Category::RateLimit);
        assert_eq!(settings.base_timeout, Duration::from_secs(10));
        assert_eq!(settings.decay_window, Duration::from_secs(30));
    }

    #[test]
    fn rejects_out_of_range_budget() {
        let err = assert_err!(GovernorConfig::from_toml_str("budget_step = 0.0"));
        assert!(err.to_string().contains("budget_step"));

        let err = assert_err!(GovernorConfig::from_toml_str("budget_floor = 1.5"));
        assert!(err.to_string().contains("budget_floor"));
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = assert_err!(GovernorConfig::from_toml_str("budget_step = \"lots\""));
        assert!(matches!(err, Error::Toml(_)));
    }

    #[test]
    fn warns_on_zero_decay_window() {
        let config = GovernorConfig {
            decay_window_ms: 0,
            ..GovernorConfig::default()
        };

        let report = config.validate();

        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].field, "decay_window_ms");
    }

    #[test]
    fn warns_when_budget_step_is_finer_than_a_basis_point() {
        let config = GovernorConfig {
            budget_step: 0.00015,
            ..GovernorConfig::default()
        };

        let report = config.validate();

        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].field, "budget_step");
        assert!(report.warnings[0].message.contains("budget resolution"));

        let config = assert_ok!(GovernorConfig::from_toml_str("budget_step = 0.00015"));
        assert_eq!(config.budget_step, 0.00015);
    }

    #[test]
    fn whole_basis_point_budgets_are_accepted_silently() {
        for step in [0.0001, 0.05, 0.1, 0.25, 1.0] {
            let config = GovernorConfig {
                budget_step: step,
                budget_floor: step,
                ..GovernorConfig::default()
            };
            assert!(config.validate().warnings.is_empty(), "step {}", step);
        }
    }

    #[test]
    fn errors_name_the_offending_field() {
        let config = GovernorConfig {
            budget_step: -0.5,
            budget_floor: 2.0,
            ..GovernorConfig::default()
        };

        let err = assert_err!(config.validate().into_result());

        let message = err.to_string();
        assert!(message.contains("budget_step: -0.5 is outside (0, 1]"));
        assert!(message.contains("budget_floor: 2 is outside (0, 1]"));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[base_timeout_ms]\ngeneric = 1000").unwrap();

        let config = assert_ok!(GovernorConfig::load(file.path()));

        assert_eq!(config.base_timeout_ms.generic, 1000);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = assert_err!(GovernorConfig::load("/nonexistent/governor.toml"));
        assert!(matches!(err, Error::ConfigRead { .. }));
        assert!(err.to_string().contains("/nonexistent/governor.toml"));
    }
}
