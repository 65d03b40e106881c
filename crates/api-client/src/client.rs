//! The retry loop
//!
//! One `send` call drives a descriptor through attach → transport → classify
//! until it succeeds or a failure is final. Per-call state lives in the
//! descriptor's `RetryEnvelope`; nothing is shared between calls except the
//! refresh coordinator.

use std::sync::Arc;
use std::time::Duration;

use resilience::{
    FailureKind, RetryPolicy, classify, classify_status, compute_delay, compute_delay_with,
    error_message_or_default,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use session_auth::RefreshCoordinator;
use tracing::{debug, instrument, warn};
use transport::{ApiRequest, ApiResponse, Transport, TransportError};

use crate::descriptor::{RequestDescriptor, RetryEnvelope};
use crate::error::{DispatchError, Result};
use crate::events::{DispatchEvent, EventSink, RetryReason};

type JitterSource = Arc<dyn Fn() -> f64 + Send + Sync>;

/// Resilient client for the backend API. Cheap to clone.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    auth: RefreshCoordinator,
    policy: RetryPolicy,
    events: Option<EventSink>,
    jitter: Option<JitterSource>,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>, auth: RefreshCoordinator, policy: RetryPolicy) -> Self {
        Self {
            transport,
            auth,
            policy,
            events: None,
            jitter: None,
        }
    }

    /// Report every call's events on `sink`.
    pub fn with_events(mut self, sink: EventSink) -> Self {
        self.events = Some(sink);
        self
    }

    /// Replace the jitter RNG with a source of values in `[0, 1]`.
    pub fn with_jitter_source(mut self, unit: impl Fn() -> f64 + Send + Sync + 'static) -> Self {
        self.jitter = Some(Arc::new(unit));
        self
    }

    pub fn auth(&self) -> &RefreshCoordinator {
        &self.auth
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Dispatch a request, retrying per the client's policy.
    pub async fn send(&self, descriptor: impl Into<RequestDescriptor>) -> Result<ApiResponse> {
        let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
        self.dispatch(descriptor.into(), &request_id).await
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse> {
        self.send(ApiRequest::get(path)).await
    }

    /// GET and decode the body as `T`.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        Ok(self.get(path).await?.json::<T>()?)
    }

    pub async fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<ApiResponse> {
        self.send(ApiRequest::post(path).with_json(encode(body)?)).await
    }

    pub async fn put_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<ApiResponse> {
        self.send(ApiRequest::put(path).with_json(encode(body)?)).await
    }

    pub async fn patch_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<ApiResponse> {
        self.send(ApiRequest::patch(path).with_json(encode(body)?)).await
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse> {
        self.send(ApiRequest::delete(path)).await
    }

    #[instrument(skip_all, fields(request_id = %request_id, method = %descriptor.request.method, path = %descriptor.request.path))]
    async fn dispatch(&self, descriptor: RequestDescriptor, request_id: &str) -> Result<ApiResponse> {
        let RequestDescriptor {
            mut request,
            mut envelope,
            events,
        } = descriptor;
        let local = events.as_ref();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            self.emit(local, DispatchEvent::Attempt { attempt: attempts });

            let token_used = self
                .auth
                .attach_access_token(&mut request)
                .await
                .map_err(|e| self.fail(local, e.into()))?;

            let response = match self.transport.send(&request).await {
                Ok(response) if response.is_success() => {
                    debug!(status = %response.status, attempts, "request completed");
                    self.emit(
                        local,
                        DispatchEvent::Completed {
                            status: response.status,
                            attempts,
                        },
                    );
                    return Ok(response);
                }
                Ok(response) => response,
                Err(err) if err.is_transient() && !envelope.skip_rate_limit_retry => {
                    match self.schedule_retry(&mut envelope, None, RetryReason::Transport, &request, local) {
                        Some(delay) => {
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                        None => return Err(self.fail(local, err.into())),
                    }
                }
                Err(err) => return Err(self.fail(local, err.into())),
            };

            let status = response.status;
            match classify_status(status) {
                FailureKind::Unauthorized => {
                    let message = error_message_or_default(&response.body);
                    if envelope.refresh_attempted {
                        return Err(self.fail(local, DispatchError::Unauthorized { message }));
                    }
                    envelope.refresh_attempted = true;
                    self.emit(local, DispatchEvent::Refreshing);

                    match self.auth.handle_unauthorized(token_used.as_ref()).await {
                        Ok(_) => debug!("credentials refreshed, retrying request"),
                        Err(e) => return Err(self.fail(local, DispatchError::SessionExpired(e))),
                    }
                }
                FailureKind::RateLimited => {
                    let info = classify(&response);
                    let message = info
                        .message
                        .unwrap_or_else(|| resilience::DEFAULT_RATE_LIMIT_MESSAGE.to_string());

                    if envelope.skip_rate_limit_retry {
                        return Err(self.fail(
                            local,
                            DispatchError::RateLimited {
                                message,
                                retry_after: info.retry_after,
                            },
                        ));
                    }

                    match self.schedule_retry(
                        &mut envelope,
                        info.retry_after,
                        RetryReason::RateLimited,
                        &request,
                        local,
                    ) {
                        Some(delay) => tokio::time::sleep(delay).await,
                        None => {
                            return Err(self.fail(
                                local,
                                DispatchError::RateLimitExceeded { message, attempts },
                            ));
                        }
                    }
                }
                FailureKind::ServerError => {
                    let error = DispatchError::ServerError {
                        status,
                        message: error_message_or_default(&response.body),
                    };
                    if envelope.skip_rate_limit_retry {
                        return Err(self.fail(local, error));
                    }

                    match self.schedule_retry(&mut envelope, None, RetryReason::ServerError, &request, local) {
                        Some(delay) => tokio::time::sleep(delay).await,
                        None => return Err(self.fail(local, error)),
                    }
                }
                FailureKind::ClientError | FailureKind::Unexpected => {
                    let message = error_message_or_default(&response.body);
                    return Err(self.fail(
                        local,
                        DispatchError::ClientError {
                            status,
                            message,
                            body: response.body,
                        },
                    ));
                }
            }
        }
    }

    /// Spend one unit of the backoff budget.
    ///
    /// Returns the delay before the next attempt, or `None` once the budget
    /// is exhausted. A server-provided `retry_after` wins over backoff.
    fn schedule_retry(
        &self,
        envelope: &mut RetryEnvelope,
        retry_after: Option<Duration>,
        reason: RetryReason,
        request: &ApiRequest,
        local: Option<&EventSink>,
    ) -> Option<Duration> {
        envelope.rate_limit_retry_count += 1;
        let attempt = envelope.rate_limit_retry_count;
        if attempt > self.policy.max_retries {
            return None;
        }

        let delay = retry_after.unwrap_or_else(|| self.backoff_delay(attempt));
        warn!(
            attempt,
            max_retries = self.policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            reason = reason.label(),
            path = %request.path,
            "retrying request after backoff"
        );
        self.emit(
            local,
            DispatchEvent::RetryScheduled {
                attempt,
                delay,
                reason,
            },
        );
        Some(delay)
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        match &self.jitter {
            Some(unit) => compute_delay_with(attempt, &self.policy, || unit()),
            None => compute_delay(attempt, &self.policy),
        }
    }

    fn fail(&self, local: Option<&EventSink>, error: DispatchError) -> DispatchError {
        match &error {
            DispatchError::SessionExpired(_) | DispatchError::RateLimitExceeded { .. } => {
                warn!(error = %error, "request failed")
            }
            _ => debug!(error = %error, "request failed"),
        }
        self.emit(
            local,
            DispatchEvent::Failed {
                reason: error.label(),
            },
        );
        error
    }

    fn emit(&self, local: Option<&EventSink>, event: DispatchEvent) {
        if let Some(sink) = &self.events {
            let _ = sink.send(event.clone());
        }
        if let Some(sink) = local {
            let _ = sink.send(event);
        }
    }
}

fn encode<B: Serialize + ?Sized>(body: &B) -> Result<serde_json::Value> {
    serde_json::to_value(body)
        .map_err(|e| TransportError::InvalidRequest(format!("encoding request body: {e}")).into())
}
