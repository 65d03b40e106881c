//! reqwest-backed transport.
//!
//! Joins the configured base URL with each request path, injects configured
//! static headers, and decodes response bodies into JSON values. The
//! `Authorization` header is owned by the credential layer and is never
//! overwritten by static injections.

use std::str::FromStr;
use std::time::Duration;

use reqwest::Url;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{ApiRequest, ApiResponse, RequestBody, SendFuture, Transport, TransportError};

/// Header injection rule (name + value pair from config).
#[derive(Debug, Clone, Deserialize)]
pub struct HeaderInjection {
    pub name: String,
    pub value: String,
}

/// Production transport over a shared `reqwest::Client`.
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Option<Duration>,
    static_headers: HeaderMap,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            timeout: None,
            static_headers: HeaderMap::new(),
        }
    }

    /// Per-request timeout enforced by reqwest.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Headers added to every request. Invalid entries and attempts to set
    /// `Authorization` are skipped with a warning.
    pub fn with_headers(mut self, injections: &[HeaderInjection]) -> Self {
        for injection in injections {
            let name = match HeaderName::from_str(&injection.name) {
                Ok(n) => n,
                Err(e) => {
                    warn!(header = %injection.name, error = %e, "skipping invalid header name");
                    continue;
                }
            };
            if name == reqwest::header::AUTHORIZATION {
                warn!(header = %injection.name, "refusing to inject authorization header");
                continue;
            }
            let value = match HeaderValue::from_str(&injection.value) {
                Ok(v) => v,
                Err(e) => {
                    warn!(header = %injection.name, error = %e, "skipping invalid header value");
                    continue;
                }
            };
            self.static_headers.insert(name, value);
        }
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build the absolute URL for a request path and its query pairs.
    fn url_for(&self, request: &ApiRequest) -> crate::Result<Url> {
        let joined = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            request.path.trim_start_matches('/')
        );
        let mut url = Url::parse(&joined)
            .map_err(|e| TransportError::InvalidRequest(format!("invalid URL {joined}: {e}")))?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&request.query);
        }
        Ok(url)
    }

    async fn execute(&self, request: &ApiRequest) -> crate::Result<ApiResponse> {
        let url = self.url_for(request)?;

        let mut headers = self.static_headers.clone();
        for (name, value) in &request.headers {
            headers.insert(name.clone(), value.clone());
        }

        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .headers(headers);
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Form(pairs) => builder.form(pairs),
        };

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::Decode(format!("reading response body: {e}")))?;

        debug!(status = status.as_u16(), bytes = bytes.len(), "response received");

        Ok(ApiResponse {
            status,
            headers,
            body: decode_body(&bytes),
        })
    }
}

impl Transport for ReqwestTransport {
    fn id(&self) -> &str {
        "reqwest"
    }

    fn send<'a>(&'a self, request: &'a ApiRequest) -> SendFuture<'a> {
        Box::pin(self.execute(request))
    }
}

/// Decode a response body: JSON if it parses, a JSON string otherwise, `null` if empty.
fn decode_body(bytes: &[u8]) -> serde_json::Value {
    if bytes.is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_slice(bytes).unwrap_or_else(|_| {
        serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned())
    })
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else if e.is_builder() {
        TransportError::InvalidRequest(e.to_string())
    } else {
        TransportError::Http(e.to_string())
    }
}
