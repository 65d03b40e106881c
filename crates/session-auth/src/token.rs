//! Token endpoint exchanges
//!
//! Three interactions with the backend's auth endpoints, all over the same
//! `Transport` the API client uses:
//! 1. Login: form-encoded `username`/`password` to `LOGIN_PATH`
//! 2. Refresh: `{refresh_token}` JSON to `REFRESH_PATH`
//! 3. Revoke: `{refresh_token}` JSON to `LOGOUT_PATH`
//!
//! None of these go through the retry dispatcher: a 401 here means the
//! credentials themselves are bad, not that the access token expired.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::json;
use transport::{ApiRequest, ApiResponse, Transport};

use crate::constants::{LOGIN_PATH, LOGOUT_PATH, REFRESH_PATH};
use crate::error::{Error, Result};

/// Response from the login and refresh endpoints.
///
/// `refresh_token` is only present when the server issues or rotates one.
#[derive(Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// Exchange email and password for a token pair.
///
/// The login endpoint must issue a refresh token; a response without one
/// is rejected since the session could not survive its first 401.
pub async fn login(transport: &dyn Transport, email: &str, password: &str) -> Result<TokenResponse> {
    let request =
        ApiRequest::post(LOGIN_PATH).with_form([("username", email), ("password", password)]);

    let response = transport
        .send(&request)
        .await
        .map_err(|e| Error::Http(format!("login request failed: {e}")))?;

    let token = parse_token_response(&response, "login")?;
    if token.refresh_token.is_none() {
        return Err(Error::TokenExchange(
            "login response missing refresh_token".into(),
        ));
    }
    Ok(token)
}

/// Exchange a refresh token for a new access token.
pub async fn refresh_access_token(transport: &dyn Transport, refresh: &str) -> Result<TokenResponse> {
    let request = ApiRequest::post(REFRESH_PATH).with_json(json!({ "refresh_token": refresh }));

    let response = transport
        .send(&request)
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    parse_token_response(&response, "token refresh")
}

/// Revoke a refresh token server-side.
///
/// The access token, when still held, is sent as bearer so the server can
/// attribute the logout.
pub async fn revoke(transport: &dyn Transport, refresh: &str, access: Option<&str>) -> Result<()> {
    let mut request = ApiRequest::post(LOGOUT_PATH).with_json(json!({ "refresh_token": refresh }));
    if let Some(access) = access {
        request
            .set_bearer(access)
            .map_err(|e| Error::Http(format!("logout request failed: {e}")))?;
    }

    let response = transport
        .send(&request)
        .await
        .map_err(|e| Error::Http(format!("logout request failed: {e}")))?;

    if !response.is_success() {
        return Err(Error::TokenExchange(format!(
            "logout returned {}: {}",
            response.status,
            resilience::error_message_or_default(&response.body)
        )));
    }
    Ok(())
}

fn parse_token_response(response: &ApiResponse, operation: &str) -> Result<TokenResponse> {
    let status = response.status;
    if !status.is_success() {
        let message = resilience::error_message_or_default(&response.body);

        // 401/403 means the credentials (password or refresh token) were rejected
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::InvalidCredentials(format!(
                "{operation} rejected ({status}): {message}"
            )));
        }

        return Err(Error::TokenExchange(format!(
            "{operation} returned {status}: {message}"
        )));
    }

    response
        .json::<TokenResponse>()
        .map_err(|e| Error::TokenExchange(format!("invalid {operation} response: {e}")))
}
