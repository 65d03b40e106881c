//! Human-readable messages from failed response bodies.

use serde_json::Value;

/// Shown when a failure carries no usable message.
pub const GENERIC_ERROR_MESSAGE: &str = "An unexpected error occurred. Please try again.";

/// Body fields checked for a message, highest priority first.
const MESSAGE_FIELDS: &[&str] = &["detail", "message", "error"];

/// Extract a message from a response body.
///
/// Checks `detail`, then `message`, then `error`; falls back to the body
/// itself when it is a plain string. Structured field values (e.g. a list
/// of validation errors under `detail`) are rendered as compact JSON.
pub fn extract_error_message(body: &Value) -> Option<String> {
    if let Value::Object(map) = body {
        for field in MESSAGE_FIELDS {
            match map.get(*field) {
                None | Some(Value::Null) => continue,
                Some(Value::String(s)) if s.is_empty() => continue,
                Some(Value::String(s)) => return Some(s.clone()),
                Some(other) => return Some(other.to_string()),
            }
        }
        return None;
    }

    match body {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// `extract_error_message` with the generic fallback applied.
pub fn error_message_or_default(body: &Value) -> String {
    extract_error_message(body).unwrap_or_else(|| GENERIC_ERROR_MESSAGE.to_string())
}
