//! Session credentials for the dashboard API client
//!
//! Holds the single access/refresh token pair the dashboard uses against its
//! backend, persists it across restarts, and announces every change to
//! subscribers. This crate performs no network I/O: the login and refresh
//! exchanges are driven by `dashboard-client`, which writes their results
//! back through the store. The store also owns the single-flight
//! `RefreshCoordinator`, so every client sharing a store shares its refresh.
//!
//! Credential lifecycle:
//! 1. Login succeeds → `CredentialStore::set()` stores `{access, refresh}`
//! 2. A protected call returns 401 → single-flight refresh exchange → `update_access()`
//! 3. Refresh fails (`clear_if_current()`) or the user logs out (`clear()`) → the file is deleted
//! 4. Each of the above broadcasts a `CredentialChange`

pub mod constants;
pub mod credentials;
pub mod error;
pub mod refresh;
pub mod token;

pub use constants::*;
pub use credentials::{Credential, CredentialChange, CredentialStore};
pub use error::{Error, Result};
pub use refresh::{RefreshCoordinator, RefreshFuture};
pub use token::{LoginRequest, RefreshRequest, TokenResponse};
