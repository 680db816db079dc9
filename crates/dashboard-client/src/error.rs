//! Closed error taxonomy for every failed backend call
//!
//! Each failure is classified exactly once, at the pipeline boundary, into a
//! `ClassifiedError`. Consumers branch on `ErrorKind` (or its `UserAction`)
//! and never look at transport details.

use std::fmt;
use std::time::Duration;

/// Sub-kind of a 5xx response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerFault {
    /// HTTP 503: the backend declared itself unavailable; arms the maintenance gate
    Unavailable,
    /// Any other 5xx
    Other,
}

/// Kind of a classified failure, listed in classification priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The maintenance gate was active at dispatch time; no network I/O happened
    Maintenance,
    /// No response within the per-call deadline
    Timeout,
    /// HTTP 401
    Authentication,
    /// HTTP 403
    Authorization,
    /// HTTP 404
    NotFound,
    /// HTTP 5xx
    ServerFault(ServerFault),
    /// The request never reached a server
    NetworkError,
    /// Anything else; carries the raw status/message for diagnostics
    Unknown,
}

impl ErrorKind {
    /// Stable label for logs, metrics and gateway error bodies.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Maintenance => "maintenance",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Authorization => "authorization",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ServerFault(ServerFault::Unavailable) => "server_unavailable",
            ErrorKind::ServerFault(ServerFault::Other) => "server_fault",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// What the user can do about it.
    pub fn action(&self) -> UserAction {
        match self {
            ErrorKind::Maintenance | ErrorKind::ServerFault(ServerFault::Unavailable) => {
                UserAction::Wait
            }
            ErrorKind::Authentication | ErrorKind::Authorization => UserAction::Reauthenticate,
            ErrorKind::Timeout | ErrorKind::NetworkError => UserAction::Retry,
            ErrorKind::NotFound | ErrorKind::ServerFault(ServerFault::Other) | ErrorKind::Unknown => {
                UserAction::Report
            }
        }
    }

    /// Whether the same call may succeed later without user intervention.
    pub fn is_transient(&self) -> bool {
        matches!(self.action(), UserAction::Wait | UserAction::Retry)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Affordance a UI surface should offer for a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    /// Transient backend state; show a banner and let the user retry later
    Wait,
    /// Credentials are missing or insufficient; send the user to login
    Reauthenticate,
    /// Offer a manual retry
    Retry,
    /// Nothing to retry; show diagnostics
    Report,
}

impl UserAction {
    pub fn label(&self) -> &'static str {
        match self {
            UserAction::Wait => "wait",
            UserAction::Reauthenticate => "reauthenticate",
            UserAction::Retry => "retry",
            UserAction::Report => "report",
        }
    }
}

/// A failure fixed at the pipeline boundary. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ClassifiedError {
    kind: ErrorKind,
    message: String,
    status: Option<u16>,
    retry_after: Option<Duration>,
    cause: Option<String>,
}

impl ClassifiedError {
    pub(crate) fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            retry_after: None,
            cause: None,
        }
    }

    pub(crate) fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub(crate) fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub(crate) fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Human-readable message; the backend's envelope message when it sent one.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// HTTP status, when a response was received.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// How long to wait before retrying: the remaining maintenance window for
    /// `Maintenance`, the advertised `Retry-After` for `ServerFault(Unavailable)`.
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    /// Underlying transport or decode error text, for diagnostics.
    pub fn cause(&self) -> Option<&str> {
        self.cause.as_deref()
    }
}

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, ClassifiedError>;

/// Errors from assembling an `ApiClient`.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid client configuration: {0}")]
    Config(String),

    #[error("HTTP client construction failed: {0}")]
    Http(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_distinct() {
        let kinds = [
            ErrorKind::Maintenance,
            ErrorKind::Timeout,
            ErrorKind::Authentication,
            ErrorKind::Authorization,
            ErrorKind::NotFound,
            ErrorKind::ServerFault(ServerFault::Unavailable),
            ErrorKind::ServerFault(ServerFault::Other),
            ErrorKind::NetworkError,
            ErrorKind::Unknown,
        ];
        let labels: std::collections::HashSet<_> = kinds.iter().map(|k| k.label()).collect();
        assert_eq!(labels.len(), kinds.len());
    }

    #[test]
    fn maintenance_and_unavailable_are_waits() {
        assert_eq!(ErrorKind::Maintenance.action(), UserAction::Wait);
        assert_eq!(
            ErrorKind::ServerFault(ServerFault::Unavailable).action(),
            UserAction::Wait
        );
        assert!(ErrorKind::Maintenance.is_transient());
    }

    #[test]
    fn auth_kinds_prompt_login() {
        assert_eq!(ErrorKind::Authentication.action(), UserAction::Reauthenticate);
        assert_eq!(ErrorKind::Authorization.action(), UserAction::Reauthenticate);
        assert!(!ErrorKind::Authorization.is_transient());
    }

    #[test]
    fn timeout_and_network_offer_retry() {
        assert_eq!(ErrorKind::Timeout.action(), UserAction::Retry);
        assert_eq!(ErrorKind::NetworkError.action(), UserAction::Retry);
    }

    #[test]
    fn unknown_is_diagnostic() {
        assert_eq!(ErrorKind::Unknown.action(), UserAction::Report);
        assert_eq!(
            ErrorKind::ServerFault(ServerFault::Other).action(),
            UserAction::Report
        );
    }

    #[test]
    fn display_includes_kind_and_message() {
        let err = ClassifiedError::new(ErrorKind::NotFound, "backup 42 does not exist")
            .with_status(404);
        assert_eq!(err.to_string(), "not_found: backup 42 does not exist");
        assert_eq!(err.status(), Some(404));
        assert!(err.cause().is_none());
    }
}
