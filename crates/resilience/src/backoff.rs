//! Exponential backoff with jitter
//!
//! `delay = min(base * multiplier^(attempt-1), max)`, then perturbed by a
//! uniformly random factor in `[-jitter%, +jitter%]` and floored to whole
//! milliseconds. Attempts are 1-indexed; attempt 0 is treated as 1.

use std::time::Duration;

use rand::RngExt;

use crate::policy::RetryPolicy;

/// Capped exponential delay in milliseconds, before jitter.
fn capped_delay_ms(attempt: u32, policy: &RetryPolicy) -> f64 {
    let exponent = attempt.max(1) - 1;
    let exponent = i32::try_from(exponent).unwrap_or(i32::MAX);
    let raw = policy.base_delay_ms as f64 * policy.backoff_multiplier.powi(exponent);
    raw.min(policy.max_delay_ms as f64)
}

/// Capped exponential delay for `attempt`, without jitter.
pub fn exponential_delay(attempt: u32, policy: &RetryPolicy) -> Duration {
    Duration::from_millis(capped_delay_ms(attempt, policy) as u64)
}

/// Backoff delay for `attempt` using the thread-local RNG for jitter.
pub fn compute_delay(attempt: u32, policy: &RetryPolicy) -> Duration {
    compute_delay_with(attempt, policy, || rand::rng().random::<f64>())
}

/// Backoff delay for `attempt` with an injected random source.
///
/// `unit` must return a value in `[0, 1]`: `0` gives the largest negative
/// jitter, `0.5` none, `1` the largest positive jitter. Out-of-range values
/// are clamped and non-finite values count as `0.5`.
pub fn compute_delay_with(
    attempt: u32,
    policy: &RetryPolicy,
    unit: impl FnOnce() -> f64,
) -> Duration {
    let capped = capped_delay_ms(attempt, policy);
    let range = capped * (policy.jitter_percent as f64 / 100.0);

    let sample = unit();
    let sample = if sample.is_finite() {
        sample.clamp(0.0, 1.0)
    } else {
        0.5
    };
    let jitter = (sample * 2.0 - 1.0) * range;

    Duration::from_millis((capped + jitter).floor().max(0.0) as u64)
}
