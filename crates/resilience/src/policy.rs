//! Retry policy shared by the dispatcher and configuration.

use serde::Deserialize;

/// Immutable retry configuration.
///
/// `max_retries` bounds the number of *re*-attempts, so a request is sent at
/// most `max_retries + 1` times on the backoff path.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Jitter range as a percentage of the computed delay (0-100)
    pub jitter_percent: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 32_000,
            backoff_multiplier: 2.0,
            jitter_percent: 20,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries (useful for one-shot collaborators and tests).
    pub fn no_retries() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Check the relationships between fields.
    pub fn validate(&self) -> common::Result<()> {
        if self.base_delay_ms == 0 {
            return Err(common::Error::invalid(
                "base_delay_ms",
                "must be greater than 0",
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(common::Error::invalid(
                "max_delay_ms",
                format!(
                    "must be >= base_delay_ms ({} < {})",
                    self.max_delay_ms, self.base_delay_ms
                ),
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(common::Error::invalid(
                "backoff_multiplier",
                format!("must be a finite value >= 1, got {}", self.backoff_multiplier),
            ));
        }
        if self.jitter_percent > 100 {
            return Err(common::Error::invalid(
                "jitter_percent",
                format!("must be between 0 and 100, got {}", self.jitter_percent),
            ));
        }
        Ok(())
    }
}
