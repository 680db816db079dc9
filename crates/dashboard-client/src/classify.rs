//! Failure classification
//!
//! Maps every observable outcome of a backend call onto the closed
//! `ErrorKind` set. `classify` is pure and total: the same outcome always
//! produces the same kind, and the `Outcome` variants cover every way a call
//! can end without a usable response.

use std::time::Duration;

use reqwest::StatusCode;

use crate::envelope::envelope_message;
use crate::error::{ClassifiedError, ErrorKind, ServerFault};

/// Phrases in a rejected envelope's message that point at a server-side fault
/// rather than a business-rule refusal.
const SERVER_FAULT_PATTERNS: &[&str] = &[
    "internal",
    "server error",
    "database",
    "unavailable",
    "exception",
];

/// How a backend call ended, as seen by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<'a> {
    /// Short-circuited by an active maintenance window.
    GateClosed {
        remaining: Duration,
        reason: Option<&'a str>,
    },
    /// No response before the per-call deadline.
    TimedOut { after: Duration },
    /// The transport failed before any response arrived.
    NoResponse { message: &'a str },
    /// A response with a non-2xx status.
    Response {
        status: u16,
        retry_after: Option<Duration>,
        body: &'a [u8],
    },
    /// A 2xx response whose envelope said `success=false`.
    Rejected {
        status: u16,
        message: Option<&'a str>,
    },
    /// The request or response could not be encoded/decoded.
    Malformed {
        status: Option<u16>,
        message: &'a str,
    },
}

/// Classify an outcome. Priority follows the `ErrorKind` declaration order.
pub fn classify(outcome: &Outcome<'_>) -> ClassifiedError {
    match outcome {
        Outcome::GateClosed { remaining, reason } => {
            let message = match reason {
                Some(reason) => format!("backend under maintenance: {reason}"),
                None => "backend under maintenance".to_string(),
            };
            ClassifiedError::new(ErrorKind::Maintenance, message).with_retry_after(Some(*remaining))
        }
        Outcome::TimedOut { after } => ClassifiedError::new(
            ErrorKind::Timeout,
            format!("no response within {}ms", after.as_millis()),
        ),
        Outcome::Response {
            status,
            retry_after,
            body,
        } => {
            let kind = kind_for_status(*status);
            let message = envelope_message(body).unwrap_or_else(|| reason_phrase(*status));
            let error = ClassifiedError::new(kind, message).with_status(*status);
            if kind == ErrorKind::ServerFault(ServerFault::Unavailable) {
                error.with_retry_after(*retry_after)
            } else {
                error
            }
        }
        Outcome::NoResponse { message } => {
            ClassifiedError::new(ErrorKind::NetworkError, "backend unreachable")
                .with_cause(*message)
        }
        Outcome::Rejected { status, message } => classify_rejection(*status, *message),
        Outcome::Malformed { status, message } => {
            let error = ClassifiedError::new(ErrorKind::Unknown, "malformed exchange")
                .with_cause(*message);
            match status {
                Some(status) => error.with_status(*status),
                None => error,
            }
        }
    }
}

/// Classify a `success=false` envelope by its message.
///
/// Messages that mention a server-side failure become `ServerFault(Other)`;
/// anything else (validation, business rules) is `Unknown`.
pub fn classify_rejection(status: u16, message: Option<&str>) -> ClassifiedError {
    let text = message.unwrap_or("request rejected by backend");
    let lower = text.to_lowercase();
    let kind = if SERVER_FAULT_PATTERNS.iter().any(|p| lower.contains(p)) {
        ErrorKind::ServerFault(ServerFault::Other)
    } else {
        ErrorKind::Unknown
    };
    ClassifiedError::new(kind, text).with_status(status)
}

/// Parse a `Retry-After` header given in whole seconds.
///
/// HTTP-date values and garbage are treated as "not advertised", which makes
/// the pipeline fall back to its default maintenance window.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

fn kind_for_status(status: u16) -> ErrorKind {
    match status {
        401 => ErrorKind::Authentication,
        403 => ErrorKind::Authorization,
        404 => ErrorKind::NotFound,
        503 => ErrorKind::ServerFault(ServerFault::Unavailable),
        500..=599 => ErrorKind::ServerFault(ServerFault::Other),
        _ => ErrorKind::Unknown,
    }
}

fn reason_phrase(status: u16) -> String {
    StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .map(str::to_owned)
        .unwrap_or_else(|| format!("HTTP {status}"))
}
