//! Dispatch progress events

use std::time::Duration;

use reqwest::StatusCode;
use tokio::sync::mpsc;

/// Channel receiving `DispatchEvent`s. A closed receiver is ignored.
pub type EventSink = mpsc::UnboundedSender<DispatchEvent>;

/// Why a backoff retry was scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    RateLimited,
    ServerError,
    Transport,
}

impl RetryReason {
    pub fn label(self) -> &'static str {
        match self {
            RetryReason::RateLimited => "rate_limited",
            RetryReason::ServerError => "server_error",
            RetryReason::Transport => "transport",
        }
    }
}

/// One step of a dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    /// A request is about to hit the transport (1-indexed)
    Attempt { attempt: u32 },
    /// A 401 sent this call to the refresh coordinator
    Refreshing,
    /// A backoff retry will fire after `delay`
    RetryScheduled {
        attempt: u32,
        delay: Duration,
        reason: RetryReason,
    },
    /// Finished with a 2xx response
    Completed { status: StatusCode, attempts: u32 },
    /// Finished with an error (`DispatchError::label`)
    Failed { reason: &'static str },
}
