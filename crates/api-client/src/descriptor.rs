//! Per-call request state.

use transport::ApiRequest;

use crate::events::EventSink;

/// Retry bookkeeping owned by one logical call.
///
/// The 401 and 429 budgets are independent: a call may refresh once and
/// still use its full backoff budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryEnvelope {
    /// Latches true after the first refresh-and-retry
    pub refresh_attempted: bool,
    /// Backoff retries used so far (429, 5xx, transient network)
    pub rate_limit_retry_count: u32,
    /// Surface 429/5xx immediately instead of retrying
    pub skip_rate_limit_retry: bool,
}

/// A request plus its retry envelope. Moved into `ApiClient::send`.
#[derive(Debug)]
pub struct RequestDescriptor {
    pub request: ApiRequest,
    pub envelope: RetryEnvelope,
    pub(crate) events: Option<EventSink>,
}

impl RequestDescriptor {
    pub fn new(request: ApiRequest) -> Self {
        Self {
            request,
            envelope: RetryEnvelope::default(),
            events: None,
        }
    }

    /// Opt out of backoff retries for this call.
    pub fn skip_rate_limit_retry(mut self) -> Self {
        self.envelope.skip_rate_limit_retry = true;
        self
    }

    /// Also report this call's events on `sink`.
    pub fn with_events(mut self, sink: EventSink) -> Self {
        self.events = Some(sink);
        self
    }
}

impl From<ApiRequest> for RequestDescriptor {
    fn from(request: ApiRequest) -> Self {
        Self::new(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_descriptor_has_fresh_envelope() {
        let descriptor = RequestDescriptor::from(ApiRequest::get("/documents"));
        assert_eq!(descriptor.envelope, RetryEnvelope::default());
        assert!(!descriptor.envelope.refresh_attempted);
        assert_eq!(descriptor.envelope.rate_limit_retry_count, 0);
        assert!(descriptor.events.is_none());
    }

    #[test]
    fn skip_flag_is_set() {
        let descriptor = RequestDescriptor::new(ApiRequest::get("/sessions")).skip_rate_limit_retry();
        assert!(descriptor.envelope.skip_rate_limit_retry);
    }
}
