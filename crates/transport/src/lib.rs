//! Transport abstraction for the backend API
//!
//! Defines the `Transport` trait that decouples retry/auth logic from the
//! network. Request and response bodies are already-structured values
//! (JSON or form pairs), never streams. `ReqwestTransport` is the production
//! implementation; tests plug in scripted transports behind the same trait.
//!
//! A transport reports every HTTP status as `Ok(ApiResponse)`. Only failures
//! to get a response at all (connect, timeout, encoding) are errors.

pub mod reqwest_transport;

pub use reqwest_transport::{HeaderInjection, ReqwestTransport};

use std::future::Future;
use std::pin::Pin;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;

/// Request payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    /// `application/x-www-form-urlencoded` pairs (used by the login endpoint)
    Form(Vec<(String, String)>),
}

/// A logical request against the backend, relative to the transport's base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_json(mut self, body: serde_json::Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn with_form<K, V>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.body = RequestBody::Form(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set `Authorization: Bearer <token>`, replacing any previous value.
    ///
    /// The header value is marked sensitive so it is redacted from Debug output.
    pub fn set_bearer(&mut self, token: &str) -> Result<()> {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| TransportError::InvalidRequest(format!("invalid bearer token: {e}")))?;
        value.set_sensitive(true);
        self.headers.insert(AUTHORIZATION, value);
        Ok(())
    }

    /// Remove any `Authorization` header.
    pub fn clear_bearer(&mut self) {
        self.headers.remove(AUTHORIZATION);
    }
}

/// A response with its body already decoded.
///
/// Bodies that parse as JSON are kept as JSON; anything else becomes a JSON
/// string, and an empty body is `null`.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: serde_json::Value,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: serde_json::Value) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Deserialize the body into a typed value.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.body.clone())
            .map_err(|e| TransportError::Decode(format!("unexpected response shape: {e}")))
    }
}

/// Failures that prevented a response from being received.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid response: {0}")]
    Decode(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

impl TransportError {
    /// Connect and timeout failures may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Connect(_) | TransportError::Timeout(_))
    }
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Boxed future returned by `Transport::send`.
pub type SendFuture<'a> = Pin<Box<dyn Future<Output = Result<ApiResponse>> + Send + 'a>>;

/// Abstraction over the network path to the backend.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn Transport>`).
pub trait Transport: Send + Sync {
    /// Identifier for logging (e.g. "reqwest")
    fn id(&self) -> &str;

    /// Issue one request and return whatever the backend answered.
    fn send<'a>(&'a self, request: &'a ApiRequest) -> SendFuture<'a>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_set_method_path_and_body() {
        let req = ApiRequest::post("/sessions").with_json(serde_json::json!({"title": "t"}));
        assert_eq!(req.method, Method::POST);
        assert_eq!(req.path, "/sessions");
        assert_eq!(req.body, RequestBody::Json(serde_json::json!({"title": "t"})));

        let req = ApiRequest::get("/sessions/1/documents")
            .with_query("skip", 0)
            .with_query("limit", 50);
        assert_eq!(
            req.query,
            vec![
                ("skip".to_string(), "0".to_string()),
                ("limit".to_string(), "50".to_string())
            ]
        );
    }

    #[test]
    fn form_body_collects_pairs() {
        let req = ApiRequest::post("/auth/login")
            .with_form([("username", "a@b.c"), ("password", "pw")]);
        match req.body {
            RequestBody::Form(pairs) => {
                assert_eq!(pairs[0], ("username".into(), "a@b.c".into()));
                assert_eq!(pairs[1], ("password".into(), "pw".into()));
            }
            other => panic!("expected form body, got {other:?}"),
        }
    }

    #[test]
    fn set_bearer_replaces_previous_token() {
        let mut req = ApiRequest::get("/auth/me");
        req.set_bearer("at_old").unwrap();
        req.set_bearer("at_new").unwrap();
        assert_eq!(req.headers.get(AUTHORIZATION).unwrap(), "Bearer at_new");
        assert_eq!(req.headers.get_all(AUTHORIZATION).iter().count(), 1);
    }

    #[test]
    fn set_bearer_rejects_control_characters() {
        let mut req = ApiRequest::get("/auth/me");
        let err = req.set_bearer("bad\ntoken").unwrap_err();
        assert!(matches!(err, TransportError::InvalidRequest(_)));
        assert!(req.headers.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn bearer_is_redacted_in_debug() {
        let mut req = ApiRequest::get("/auth/me");
        req.set_bearer("at_secret").unwrap();
        let debug = format!("{req:?}");
        assert!(!debug.contains("at_secret"), "got: {debug}");
    }

    #[test]
    fn clear_bearer_removes_header() {
        let mut req = ApiRequest::get("/auth/me");
        req.set_bearer("at_1").unwrap();
        req.clear_bearer();
        assert!(req.headers.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn response_header_and_json_helpers() {
        let mut resp = ApiResponse::new(StatusCode::OK, serde_json::json!({"id": 7}));
        resp.headers
            .insert("retry-after", HeaderValue::from_static("5"));
        assert!(resp.is_success());
        assert_eq!(resp.header("retry-after"), Some("5"));
        assert_eq!(resp.header("missing"), None);

        #[derive(serde::Deserialize)]
        struct Item {
            id: u32,
        }
        assert_eq!(resp.json::<Item>().unwrap().id, 7);
    }

    #[test]
    fn json_shape_mismatch_is_decode_error() {
        let resp = ApiResponse::new(StatusCode::OK, serde_json::json!("plain text"));
        let err = resp.json::<Vec<u32>>().unwrap_err();
        assert!(matches!(err, TransportError::Decode(_)));
    }

    #[test]
    fn only_connect_and_timeout_are_transient() {
        assert!(TransportError::Connect("refused".into()).is_transient());
        assert!(TransportError::Timeout("30s".into()).is_transient());
        assert!(!TransportError::InvalidRequest("bad".into()).is_transient());
        assert!(!TransportError::Decode("bad".into()).is_transient());
        assert!(!TransportError::Http("bad".into()).is_transient());
    }
}
