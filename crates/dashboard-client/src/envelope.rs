//! The backend's response envelope
//!
//! Every backend endpoint answers `{success, data, message, metadata?}`.
//! `success=false` is a failure even when the HTTP status is 200.

use serde::{Deserialize, Serialize};

/// Discriminated response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// A 2xx response whose envelope reported `success=false`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Rejection {
    pub message: Option<String>,
}

/// Detect `success=false` without committing to a data type.
///
/// Bodies that are not JSON objects (files, plain text, empty) are never
/// rejections: the pipeline only interprets envelopes.
pub(crate) fn detect_rejection(body: &[u8]) -> Option<Rejection> {
    let first = body.iter().find(|b| !b.is_ascii_whitespace())?;
    if *first != b'{' {
        return None;
    }
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    match value.get("success") {
        Some(serde_json::Value::Bool(false)) => Some(Rejection {
            message: message_of(&value),
        }),
        _ => None,
    }
}

/// Message carried by an error body, if any.
///
/// Accepts the envelope `message`, and falls back to a string or
/// `{message}` object under `error` for endpoints behind other middleware.
pub(crate) fn envelope_message(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    message_of(&value)
}

fn message_of(value: &serde_json::Value) -> Option<String> {
    let message = value
        .get("message")
        .and_then(|m| m.as_str())
        .or_else(|| match value.get("error") {
            Some(serde_json::Value::String(s)) => Some(s.as_str()),
            Some(obj) => obj.get("message").and_then(|m| m.as_str()),
            None => None,
        })?;
    let trimmed = message.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}
