//! Retry building blocks for the API client
//!
//! Pure functions and value types with no I/O: the retry policy, backoff
//! delay calculation with jitter, `Retry-After` parsing, classification of
//! failed responses, and error-message extraction. The dispatcher in
//! `api-client` composes these; nothing here sleeps or sends requests.
//!
//! Failure handling at a glance:
//! 1. 401 → credential refresh (owned by `session-auth`)
//! 2. 429 → `classify` yields the server's `Retry-After` hint and message
//! 3. 429 without a hint, 5xx, transient network errors → `compute_delay`
//! 4. Other 4xx → not retried, message surfaced via `extract_error_message`

pub mod backoff;
pub mod message;
pub mod policy;
pub mod rate_limit;
pub mod retry_after;

pub use backoff::{compute_delay, compute_delay_with, exponential_delay};
pub use message::{GENERIC_ERROR_MESSAGE, error_message_or_default, extract_error_message};
pub use policy::RetryPolicy;
pub use rate_limit::{
    DEFAULT_RATE_LIMIT_MESSAGE, FailureKind, RateLimitInfo, classify, classify_status,
    is_rate_limit_message,
};
pub use retry_after::{parse_retry_after, parse_retry_after_at};
