//! Dispatch outcomes other than success

use std::time::Duration;

use reqwest::StatusCode;
use transport::TransportError;

/// Shown when the session could not be refreshed.
pub const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please log in again.";

/// Shown when the rate-limit retry budget is exhausted.
pub const RATE_LIMIT_EXCEEDED_MESSAGE: &str = "Rate limit exceeded. Please try again later.";

#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    /// The refresh exchange failed; both tokens have been cleared
    #[error("session expired: {0}")]
    SessionExpired(#[source] session_auth::Error),

    /// Still 401 after the one refresh-and-retry
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    /// 429 on a call that opted out of backoff retries
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("rate limit exceeded after {attempts} attempts: {message}")]
    RateLimitExceeded { message: String, attempts: u32 },

    #[error("server error {status}: {message}")]
    ServerError { status: StatusCode, message: String },

    /// Any other non-success status; never retried
    #[error("request failed with {status}: {message}")]
    ClientError {
        status: StatusCode,
        message: String,
        body: serde_json::Value,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl DispatchError {
    /// Text suitable for showing to an end user.
    pub fn user_message(&self) -> String {
        match self {
            DispatchError::SessionExpired(_) => SESSION_EXPIRED_MESSAGE.to_string(),
            DispatchError::RateLimitExceeded { .. } => RATE_LIMIT_EXCEEDED_MESSAGE.to_string(),
            DispatchError::Unauthorized { message }
            | DispatchError::RateLimited { message, .. }
            | DispatchError::ServerError { message, .. }
            | DispatchError::ClientError { message, .. } => message.clone(),
            DispatchError::Transport(e) => e.to_string(),
        }
    }

    /// HTTP status behind this error, if a response was received.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            DispatchError::Unauthorized { .. } | DispatchError::SessionExpired(_) => {
                Some(StatusCode::UNAUTHORIZED)
            }
            DispatchError::RateLimited { .. } | DispatchError::RateLimitExceeded { .. } => {
                Some(StatusCode::TOO_MANY_REQUESTS)
            }
            DispatchError::ServerError { status, .. } | DispatchError::ClientError { status, .. } => {
                Some(*status)
            }
            DispatchError::Transport(_) => None,
        }
    }

    /// Label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            DispatchError::SessionExpired(_) => "session_expired",
            DispatchError::Unauthorized { .. } => "unauthorized",
            DispatchError::RateLimited { .. } => "rate_limited",
            DispatchError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            DispatchError::ServerError { .. } => "server_error",
            DispatchError::ClientError { .. } => "client_error",
            DispatchError::Transport(_) => "transport",
        }
    }
}

/// Result alias for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;
