//! Resilient client for the dashboard backend
//!
//! Wraps every backend call in a pipeline that keeps the session alive and
//! turns failures into something a UI can act on:
//!
//! - stored bearer credential attached to every non-auth call
//! - 401 → single-flight token refresh, one replay per call
//! - 503 → process-wide maintenance window that short-circuits later calls
//! - every failure classified into a closed `ErrorKind` set with a suggested
//!   `UserAction`
//!
//! Credentials and the single-flight refresh live in
//! `dashboard_auth::CredentialStore`; the maintenance gate is injectable so
//! several clients can share one.

mod classify;
mod client;
mod envelope;
mod error;
mod maintenance;
mod request;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use classify::{Outcome, classify, classify_rejection, parse_retry_after};
pub use client::{
    ApiClient, ApiClientBuilder, ClientConfig, DEFAULT_MAINTENANCE_WINDOW, DEFAULT_REQUEST_TIMEOUT,
};
pub use envelope::Envelope;
pub use error::{BuildError, ClassifiedError, ErrorKind, Result, ServerFault, UserAction};
pub use maintenance::{MaintenanceGate, MaintenanceStatus};
pub use request::{ApiResponse, OutboundRequest};

/// Lock a std mutex, recovering the data if a previous holder panicked.
///
/// Guards in this crate are never held across an await point.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
