//! Resilient request dispatch
//!
//! `ApiClient` wraps a `Transport` and a `RefreshCoordinator` and turns a
//! `RequestDescriptor` into a final outcome:
//! - 401: refresh credentials once (single-flight), then retry
//! - 429: bounded retries honouring `Retry-After`, else exponential backoff
//! - 5xx and transient network failures: same backoff path and budget
//! - other failures propagate immediately
//!
//! Progress is reported as `DispatchEvent`s on optional channels so callers
//! can drive metrics or UI without hooking into the retry loop.

pub mod client;
pub mod descriptor;
pub mod error;
pub mod events;

pub use client::ApiClient;
pub use descriptor::{RequestDescriptor, RetryEnvelope};
pub use error::{DispatchError, RATE_LIMIT_EXCEEDED_MESSAGE, Result, SESSION_EXPIRED_MESSAGE};
pub use events::{DispatchEvent, EventSink, RetryReason};
