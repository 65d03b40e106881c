//! Prometheus metrics exposition
//!
//! - `api_requests_total` (counter): label `status`
//! - `api_retries_total` (counter): label `reason`
//! - `api_retry_delay_seconds` (histogram)
//! - `api_refresh_attempts_total` (counter): 401s handed to the refresh coordinator
//! - `api_refresh_exchanges_total` (counter): refresh exchanges actually sent
//! - `api_failures_total` (counter): label `reason`
//! - `poll_runs_total` (counter): labels `target`, `outcome`
//! - `poll_interval_seconds` (gauge): label `target`

use anyhow::{Context, Result};
use api_client::DispatchEvent;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use poller::PollSnapshot;
use tokio::sync::mpsc;

/// Bucket boundaries for retry delays: sub-second jitter up to long Retry-After waits.
const RETRY_DELAY_BUCKETS: &[f64] = &[0.25, 0.5, 1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 60.0, 120.0];

fn builder() -> Result<PrometheusBuilder> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("api_retry_delay_seconds".to_string()),
            RETRY_DELAY_BUCKETS,
        )
        .context("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> Result<PrometheusHandle> {
    builder()?
        .install_recorder()
        .context("failed to install Prometheus recorder")
}

/// Translate one dispatch event into metric updates.
pub fn record_event(event: &DispatchEvent) {
    match event {
        DispatchEvent::Attempt { .. } => {}
        DispatchEvent::Refreshing => {
            metrics::counter!("api_refresh_attempts_total").increment(1);
        }
        DispatchEvent::RetryScheduled { delay, reason, .. } => {
            metrics::counter!("api_retries_total", "reason" => reason.label()).increment(1);
            metrics::histogram!("api_retry_delay_seconds").record(delay.as_secs_f64());
        }
        DispatchEvent::Completed { status, .. } => {
            metrics::counter!("api_requests_total", "status" => status.as_u16().to_string())
                .increment(1);
        }
        DispatchEvent::Failed { reason } => {
            metrics::counter!("api_failures_total", "reason" => *reason).increment(1);
        }
    }
}

/// Drain dispatch events into metrics until every sender is dropped.
pub async fn forward_events(mut events: mpsc::UnboundedReceiver<DispatchEvent>) {
    while let Some(event) = events.recv().await {
        record_event(&event);
    }
}

/// Record the outcome of one poll run.
pub fn record_poll(target: &str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    metrics::counter!("poll_runs_total", "target" => target.to_string(), "outcome" => outcome)
        .increment(1);
}

/// Publish the coordinator's exchange count. Stale-token 401s are joined to
/// an earlier exchange and do not show up here.
pub fn record_refresh_exchanges(count: u64) {
    metrics::counter!("api_refresh_exchanges_total").absolute(count);
}

/// Publish a poller's current interval.
pub fn record_poll_interval(snapshot: &PollSnapshot) {
    metrics::gauge!("poll_interval_seconds", "target" => snapshot.name.clone())
        .set(snapshot.current_interval.as_secs_f64());
}
