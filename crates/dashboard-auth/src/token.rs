//! Wire types for the login and refresh exchanges
//!
//! The backend speaks camelCase JSON (`accessToken`, `refreshToken`) inside
//! its standard `{success, data, message}` envelope. snake_case aliases are
//! accepted on the way in so older deployments keep working.

use common::Secret;
use serde::{Deserialize, Serialize};

use crate::credentials::Credential;

/// Body of the login request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: Secret<String>,
}

/// Body of the refresh request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Token pair returned by the login and refresh endpoints.
///
/// `refresh_token` is optional: the refresh endpoint only rotates it when the
/// server decides to, so a missing value means "keep the one you have".
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    #[serde(alias = "access_token")]
    pub access_token: Secret<String>,
    #[serde(default, alias = "refresh_token", skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<Secret<String>>,
}

impl TokenResponse {
    /// Build the credential to store, keeping `previous_refresh` unless the
    /// server issued a replacement.
    ///
    /// Returns `None` when neither side has a refresh token, which only
    /// happens for a login response that omitted it.
    pub fn into_credential(self, previous_refresh: Option<Secret<String>>) -> Option<Credential> {
        let refresh = self.refresh_token.or(previous_refresh)?;
        Some(Credential::new(self.access_token, refresh))
    }
}
