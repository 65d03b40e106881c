//! Auth endpoint paths, relative to the API base URL.

/// Exchanges `{refresh_token}` for `{access_token, ...}`
pub const REFRESH_PATH: &str = "/auth/refresh";

/// Form-encoded `username`/`password` login
pub const LOGIN_PATH: &str = "/auth/login";

/// Revokes a refresh token server-side
pub const LOGOUT_PATH: &str = "/auth/logout";

/// Current user profile, used to verify a stored session
pub const ME_PATH: &str = "/auth/me";
