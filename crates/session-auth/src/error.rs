//! Error types for session credential operations

/// Errors from login, refresh and credential storage.
///
/// `Clone` so that one refresh outcome can be handed to every request
/// waiting on the same exchange.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("no refresh token available")]
    NoRefreshToken,

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;
