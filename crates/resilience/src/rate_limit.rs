//! Failure classification for API responses
//!
//! `classify` inspects a failed response for rate limiting (status 429 only)
//! and extracts the server's `Retry-After` hint and message. `classify_status`
//! maps any non-success status onto the retry taxonomy used by the dispatcher.

use reqwest::StatusCode;
use transport::ApiResponse;

use crate::retry_after::parse_retry_after;

/// Fallback message for 429 responses without `detail`/`message`.
pub const DEFAULT_RATE_LIMIT_MESSAGE: &str = "Too many requests. Please try again later.";

/// Phrases that indicate rate limiting in free-form error messages.
const RATE_LIMIT_KEYWORDS: &[&str] = &["rate limit", "too many requests", "throttled", "429"];

/// Rate-limit details derived from one failed response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitInfo {
    pub is_rate_limit: bool,
    pub retry_after: Option<std::time::Duration>,
    pub message: Option<String>,
}

/// How the dispatcher treats a non-success status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// 401: one credential refresh, then retry
    Unauthorized,
    /// 429: bounded backoff, honouring `Retry-After`
    RateLimited,
    /// 5xx: bounded backoff
    ServerError,
    /// Other 4xx: never retried
    ClientError,
    /// 1xx/3xx reaching the caller; not retried
    Unexpected,
}

impl FailureKind {
    /// Whether this kind takes the backoff retry path.
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureKind::RateLimited | FailureKind::ServerError)
    }

    /// Label for logs and metrics.
    pub fn label(self) -> &'static str {
        match self {
            FailureKind::Unauthorized => "unauthorized",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::ServerError => "server_error",
            FailureKind::ClientError => "client_error",
            FailureKind::Unexpected => "unexpected",
        }
    }
}

/// Classify a non-success status.
pub fn classify_status(status: StatusCode) -> FailureKind {
    match status.as_u16() {
        401 => FailureKind::Unauthorized,
        429 => FailureKind::RateLimited,
        500..=599 => FailureKind::ServerError,
        400..=499 => FailureKind::ClientError,
        _ => FailureKind::Unexpected,
    }
}

/// Extract rate-limit information from a response.
///
/// Only status 429 counts as rate limited. The message comes from the body's
/// `detail` field, then `message`, then a generic fallback.
pub fn classify(response: &ApiResponse) -> RateLimitInfo {
    if response.status != StatusCode::TOO_MANY_REQUESTS {
        return RateLimitInfo::default();
    }

    let retry_after = parse_retry_after(response.header("retry-after"));
    let message = ["detail", "message"]
        .iter()
        .find_map(|field| {
            response
                .body
                .get(*field)
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| DEFAULT_RATE_LIMIT_MESSAGE.to_string());

    RateLimitInfo {
        is_rate_limit: true,
        retry_after,
        message: Some(message),
    }
}

/// Whether a free-form message looks like a rate-limit error.
pub fn is_rate_limit_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    RATE_LIMIT_KEYWORDS.iter().any(|k| lower.contains(k))
}
