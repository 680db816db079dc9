//! Default backend endpoints for the session exchanges
//!
//! The dashboard backend mounts its auth routes under `/api/auth`. These are
//! defaults only; deployments override them through configuration.

/// Login endpoint: accepts `LoginRequest`, returns a `TokenResponse` envelope
pub const DEFAULT_LOGIN_PATH: &str = "/api/auth/login";

/// Refresh endpoint: accepts `RefreshRequest`, returns a `TokenResponse` envelope
pub const DEFAULT_REFRESH_PATH: &str = "/api/auth/refresh";

/// Unauthenticated liveness endpoint used as the maintenance probe
pub const DEFAULT_HEALTH_PATH: &str = "/api/health";

/// Name of the credential file when no path is configured
pub const DEFAULT_CREDENTIALS_FILE: &str = "dashboard-credentials.json";
