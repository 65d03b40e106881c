//! Poll interval state machine
//!
//! Pure bookkeeping, no timers: the scheduler asks for the next interval
//! after every run.

use std::time::Duration;

use serde::Deserialize;

/// Upper bound for the backoff interval when none is configured.
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(30);

const DEFAULT_MULTIPLIER: f64 = 2.0;

/// Interval bounds for one poll subscription.
///
/// Deserializes from `base_interval_ms`, `max_interval_ms` (default 30000)
/// and `backoff_multiplier` (default 2).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "PollSettings")]
pub struct PollConfig {
    pub base_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
}

#[derive(Deserialize)]
struct PollSettings {
    base_interval_ms: u64,
    #[serde(default = "default_max_interval_ms")]
    max_interval_ms: u64,
    #[serde(default = "default_multiplier")]
    backoff_multiplier: f64,
}

fn default_max_interval_ms() -> u64 {
    DEFAULT_MAX_INTERVAL.as_millis() as u64
}

fn default_multiplier() -> f64 {
    DEFAULT_MULTIPLIER
}

impl From<PollSettings> for PollConfig {
    fn from(settings: PollSettings) -> Self {
        Self {
            base_interval: Duration::from_millis(settings.base_interval_ms),
            max_interval: Duration::from_millis(settings.max_interval_ms),
            multiplier: settings.backoff_multiplier,
        }
    }
}

impl PollConfig {
    pub fn new(base_interval: Duration) -> Self {
        Self {
            base_interval,
            max_interval: DEFAULT_MAX_INTERVAL,
            multiplier: DEFAULT_MULTIPLIER,
        }
    }

    pub fn with_max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = max_interval;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn validate(&self) -> common::Result<()> {
        if self.base_interval.is_zero() {
            return Err(common::Error::invalid(
                "base_interval_ms",
                "must be greater than 0",
            ));
        }
        if self.max_interval < self.base_interval {
            return Err(common::Error::invalid(
                "max_interval_ms",
                format!(
                    "{}ms is below base_interval_ms {}ms",
                    self.max_interval.as_millis(),
                    self.base_interval.as_millis()
                ),
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(common::Error::invalid(
                "backoff_multiplier",
                format!("{} must be a finite number >= 1", self.multiplier),
            ));
        }
        Ok(())
    }
}

/// Current interval and error streak for one subscription.
///
/// `current_interval` always stays within `[base_interval, max_interval]`.
#[derive(Debug, Clone)]
pub struct PollState {
    config: PollConfig,
    current_interval: Duration,
    consecutive_errors: u32,
}

impl PollState {
    pub fn new(config: PollConfig) -> Self {
        Self {
            current_interval: config.base_interval,
            consecutive_errors: 0,
            config,
        }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// Collapse to the base interval. Returns the next interval.
    pub fn record_success(&mut self) -> Duration {
        self.reset();
        self.current_interval
    }

    /// Extend the error streak and back off. Returns the next interval.
    pub fn record_failure(&mut self) -> Duration {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        self.current_interval = self.backoff_interval();
        self.current_interval
    }

    pub fn reset(&mut self) {
        self.current_interval = self.config.base_interval;
        self.consecutive_errors = 0;
    }

    /// `min(base * multiplier^errors, max)`, never below base.
    fn backoff_interval(&self) -> Duration {
        let base = self.config.base_interval;
        let max = self.config.max_interval.max(base);
        let exponent = i32::try_from(self.consecutive_errors).unwrap_or(i32::MAX);
        let secs = (base.as_secs_f64() * self.config.multiplier.powi(exponent)).min(max.as_secs_f64());
        Duration::try_from_secs_f64(secs)
            .unwrap_or(max)
            .clamp(base, max)
    }
}
