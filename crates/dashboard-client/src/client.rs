//! Request pipeline
//!
//! Every backend call goes through `ApiClient::send`:
//!
//! 1. maintenance gate active and no bypass → `Maintenance`, no network I/O
//! 2. attach the stored access token as a bearer credential (not for auth endpoints)
//! 3. dispatch with the per-call deadline (send + body read)
//! 4. 2xx with a non-rejected envelope → returned unmodified
//! 5. failure → classified; 503 arms the gate
//! 6. `Authentication` on a non-auth endpoint, not yet retried → refresh
//!    (single-flight) and replay exactly once; no token → clear the session
//!    and notify the embedding application
//!
//! `ApiClient` is a cheap handle (`Arc` inside). The credential store and the
//! maintenance gate are injected so several clients can share one session.

use std::sync::Arc;
use std::time::Duration;

use dashboard_auth::{
    Credential, CredentialStore, DEFAULT_HEALTH_PATH, DEFAULT_LOGIN_PATH, DEFAULT_REFRESH_PATH,
    LoginRequest, RefreshRequest, TokenResponse,
};
use futures_util::FutureExt;
use reqwest::header::RETRY_AFTER;
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::classify::{Outcome, classify, parse_retry_after};
use crate::envelope::{detect_rejection, envelope_message};
use crate::error::{BuildError, ClassifiedError, ErrorKind, Result, ServerFault};
use crate::maintenance::MaintenanceGate;
use crate::request::{ApiResponse, OutboundRequest};

/// Fixed per-call deadline unless configured otherwise.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Maintenance window applied when a 503 does not advertise `Retry-After`.
pub const DEFAULT_MAINTENANCE_WINDOW: Duration = Duration::from_secs(60);

/// Callback invoked when the session is irrecoverably lost.
type AuthLostHook = Arc<dyn Fn() + Send + Sync>;

/// Backend location and pipeline tuning.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    pub maintenance_window: Duration,
    pub login_path: String,
    pub refresh_path: String,
    pub health_path: String,
    /// Extra endpoints that must never trigger refresh-and-retry (e.g. logout).
    pub auth_paths: Vec<String>,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            maintenance_window: DEFAULT_MAINTENANCE_WINDOW,
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            health_path: DEFAULT_HEALTH_PATH.to_string(),
            auth_paths: Vec::new(),
        }
    }

    pub fn validate(&self) -> std::result::Result<(), BuildError> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(BuildError::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                self.base_url
            )));
        }
        if self.request_timeout.is_zero() {
            return Err(BuildError::Config(
                "request_timeout must be greater than 0".into(),
            ));
        }
        if self.maintenance_window.is_zero() {
            return Err(BuildError::Config(
                "maintenance_window must be greater than 0".into(),
            ));
        }
        for path in [&self.login_path, &self.refresh_path, &self.health_path] {
            if !path.starts_with('/') {
                return Err(BuildError::Config(format!(
                    "endpoint paths must start with '/', got: {path}"
                )));
            }
        }
        Ok(())
    }

    /// Whether `route` (a path without query) is an authentication endpoint.
    pub fn is_auth_endpoint(&self, route: &str) -> bool {
        let route = normalize(route);
        route == normalize(&self.login_path)
            || route == normalize(&self.refresh_path)
            || self.auth_paths.iter().any(|p| route == normalize(p))
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

fn normalize(path: &str) -> &str {
    match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}

/// Builder for `ApiClient`.
pub struct ApiClientBuilder {
    config: ClientConfig,
    store: Arc<CredentialStore>,
    gate: Option<Arc<MaintenanceGate>>,
    http: Option<reqwest::Client>,
    on_authentication_lost: Option<AuthLostHook>,
}

impl ApiClientBuilder {
    /// Share a maintenance gate with other clients. Defaults to a private gate.
    pub fn gate(mut self, gate: Arc<MaintenanceGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Use a preconfigured reqwest client (connection pool, TLS settings).
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    /// Called whenever a call ends the session: refresh impossible or failed.
    /// Typically routes the UI to its login screen. May fire once per
    /// affected call.
    pub fn on_authentication_lost(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_authentication_lost = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> std::result::Result<ApiClient, BuildError> {
        self.config.validate()?;
        let http = match self.http {
            Some(http) => http,
            None => reqwest::Client::builder()
                .build()
                .map_err(|e| BuildError::Http(e.to_string()))?,
        };
        info!(
            base_url = %self.config.base_url,
            timeout_ms = self.config.request_timeout.as_millis() as u64,
            "api client initialized"
        );
        Ok(ApiClient {
            inner: Arc::new(Inner {
                config: self.config,
                store: self.store,
                gate: self.gate.unwrap_or_default(),
                http,
                on_authentication_lost: self.on_authentication_lost,
            }),
        })
    }
}

struct Inner {
    config: ClientConfig,
    store: Arc<CredentialStore>,
    gate: Arc<MaintenanceGate>,
    http: reqwest::Client,
    on_authentication_lost: Option<AuthLostHook>,
}

/// Resilient client for the dashboard backend.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

impl ApiClient {
    pub fn builder(config: ClientConfig, store: Arc<CredentialStore>) -> ApiClientBuilder {
        ApiClientBuilder {
            config,
            store,
            gate: None,
            http: None,
            on_authentication_lost: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.inner.store
    }

    /// The maintenance gate this client consults (banner queries, explicit clear).
    pub fn maintenance(&self) -> &Arc<MaintenanceGate> {
        &self.inner.gate
    }

    /// Number of refresh exchanges dispatched for this client's credential
    /// store, by this client or any other sharing the store.
    pub fn refresh_exchanges(&self) -> u64 {
        self.inner.store.refresh_coordinator().started()
    }

    /// Send a request through the full pipeline.
    #[instrument(skip_all, fields(method = %request.method(), path = %request.route()))]
    pub async fn send(&self, request: OutboundRequest) -> Result<ApiResponse> {
        let started = Instant::now();
        let result = self.execute(request).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.kind().label(),
        };
        metrics::counter!("dashboard_client_requests_total", "outcome" => outcome).increment(1);
        metrics::histogram!("dashboard_client_request_duration_seconds", "outcome" => outcome)
            .record(started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            debug!(kind = %e.kind(), status = ?e.status(), message = e.message(), "request failed");
        }
        result
    }

    /// GET `path` and decode the envelope's `data`.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(OutboundRequest::get(path)).await?.data()
    }

    /// POST `body` as JSON to `path` and decode the envelope's `data`.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: serde::Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(OutboundRequest::post(path).json(body))
            .await?
            .data()
    }

    /// Exchange username/password for a token pair and store it.
    ///
    /// The store is untouched on failure.
    pub async fn login(&self, credentials: &LoginRequest) -> Result<()> {
        let path = self.inner.config.login_path.clone();
        let token: TokenResponse = self
            .send(OutboundRequest::post(path).json(credentials))
            .await?
            .data()?;
        let credential = token.into_credential(None).ok_or_else(|| {
            classify(&Outcome::Malformed {
                status: None,
                message: "login response carried no refresh token",
            })
        })?;
        self.inner.store.set(credential).await.map_err(|e| {
            classify(&Outcome::Malformed {
                status: None,
                message: &format!("storing credential: {e}"),
            })
        })?;
        info!(username = %credentials.username, "logged in");
        Ok(())
    }

    /// Forget the session.
    pub async fn logout(&self) -> dashboard_auth::Result<()> {
        info!("logging out");
        self.inner.store.clear().await
    }

    /// Bypass-gate health probe. Success closes an open maintenance window.
    pub async fn probe(&self) -> Result<ApiResponse> {
        let path = self.inner.config.health_path.clone();
        self.send(OutboundRequest::get(path).bypass_maintenance())
            .await
    }

    /// Refresh the access token, joining an exchange already in flight.
    ///
    /// Resolves to the new access token, or `None` when there is no refresh
    /// token or the exchange failed (in which case the store is cleared).
    /// The exchange runs to completion even if this future is dropped.
    pub async fn refresh(&self) -> Option<String> {
        let Some(credential) = self.inner.store.get().await else {
            debug!("no refresh token stored, skipping refresh exchange");
            metrics::counter!("dashboard_client_refresh_total", "result" => "skipped")
                .increment(1);
            return None;
        };
        let refresh_token = credential.refresh().to_owned();
        let client = self.clone();
        self.inner
            .store
            .refresh_coordinator()
            .join_or_start(&refresh_token, move || {
                async move { client.exchange_refresh_token(credential).await }.boxed()
            })
            .await
    }

    async fn execute(&self, mut request: OutboundRequest) -> Result<ApiResponse> {
        let auth_endpoint = self.inner.config.is_auth_endpoint(request.route());
        let sent = if auth_endpoint {
            None
        } else {
            self.inner.store.get().await
        };
        let sent_token = sent.as_ref().map(Credential::access);

        let error = match self.dispatch(&request, sent_token).await {
            Ok(response) => return Ok(response),
            Err(error) => error,
        };

        if error.kind() != ErrorKind::Authentication || request.retried || auth_endpoint {
            return Err(error);
        }

        // Another caller may already have refreshed while this call was in flight
        let fresh = match self.inner.store.access_token().await {
            Some(current) if sent_token != Some(current.as_str()) => {
                debug!("access token changed while in flight, replaying with current token");
                Some(current)
            }
            _ => self.refresh().await,
        };

        let Some(fresh) = fresh else {
            self.authentication_lost(sent.as_ref()).await;
            return Err(error);
        };

        request.retried = true;
        debug!("replaying request with refreshed credential");
        self.dispatch(&request, Some(&fresh)).await
    }

    /// One network attempt: gate check, credential, deadline, classification.
    async fn dispatch(&self, request: &OutboundRequest, token: Option<&str>) -> Result<ApiResponse> {
        let gate = &self.inner.gate;
        if !request.bypasses_maintenance() {
            let status = gate.status();
            if status.active {
                return Err(classify(&Outcome::GateClosed {
                    remaining: status.remaining,
                    reason: status.reason.as_deref(),
                }));
            }
        }

        if let Some(message) = request.encode_error() {
            return Err(classify(&Outcome::Malformed {
                status: None,
                message,
            }));
        }

        let mut builder = self
            .inner
            .http
            .request(
                request.method().clone(),
                self.inner.config.url_for(request.path()),
            )
            .headers(request.headers().clone());
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = request.body_bytes() {
            builder = builder.body(body.clone());
        }

        let deadline = self.inner.config.request_timeout;
        let dispatched_at = Instant::now();
        let exchange = async {
            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    classify(&Outcome::TimedOut { after: deadline })
                } else {
                    classify(&Outcome::NoResponse {
                        message: &e.to_string(),
                    })
                }
            })?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await.map_err(|e| {
                classify(&Outcome::Malformed {
                    status: Some(status.as_u16()),
                    message: &format!("reading response body: {e}"),
                })
            })?;
            Ok::<_, ClassifiedError>((status, headers, body))
        };

        // Expiry detaches from the transport; the dropped future releases
        // the connection when reqwest gets to it.
        let (status, headers, body) = match tokio::time::timeout(deadline, exchange).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(timeout_ms = deadline.as_millis() as u64, "request timed out");
                return Err(classify(&Outcome::TimedOut { after: deadline }));
            }
        };

        if status.is_success() {
            if let Some(rejection) = detect_rejection(&body) {
                return Err(classify(&Outcome::Rejected {
                    status: status.as_u16(),
                    message: rejection.message.as_deref(),
                }));
            }
            gate.clear_if_activated_before(dispatched_at);
            return Ok(ApiResponse::new(status, headers, body));
        }

        let retry_after = headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let error = classify(&Outcome::Response {
            status: status.as_u16(),
            retry_after,
            body: &body,
        });

        if error.kind() == ErrorKind::ServerFault(ServerFault::Unavailable) {
            let window = error
                .retry_after()
                .unwrap_or(self.inner.config.maintenance_window);
            if window.is_zero() {
                debug!("503 advertised an already elapsed window, gate not armed");
            } else {
                gate.activate(window, envelope_message(&body));
            }
        }

        Err(error)
    }

    /// Exchange `credential`'s refresh token for a new access token.
    ///
    /// Fail-closed: any failure clears the store so the user re-authenticates
    /// instead of retrying with a dead refresh token. Clearing and storing
    /// both apply only while the store still holds this session.
    async fn exchange_refresh_token(&self, credential: Credential) -> Option<String> {
        let request = OutboundRequest::post(self.inner.config.refresh_path.clone())
            .json(&RefreshRequest {
                refresh_token: credential.refresh(),
            })
            .bypass_maintenance();

        let token = match self.dispatch(&request, None).await {
            Ok(response) => response.data::<TokenResponse>(),
            Err(error) => Err(error),
        };

        let token = match token {
            Ok(token) => token,
            Err(error) => {
                warn!(kind = %error.kind(), message = error.message(), "refresh exchange failed, clearing credentials");
                metrics::counter!("dashboard_client_refresh_total", "result" => "failed")
                    .increment(1);
                self.clear_session(Some(&credential)).await;
                return None;
            }
        };

        match self
            .inner
            .store
            .update_access(credential.refresh(), token.access_token, token.refresh_token)
            .await
        {
            Ok(updated) => {
                info!("access token refreshed");
                metrics::counter!("dashboard_client_refresh_total", "result" => "refreshed")
                    .increment(1);
                Some(updated.access().to_owned())
            }
            Err(dashboard_auth::Error::NotFound(reason)) => {
                debug!(reason = %reason, "session changed during refresh, discarding result");
                metrics::counter!("dashboard_client_refresh_total", "result" => "superseded")
                    .increment(1);
                None
            }
            Err(e) => {
                warn!(error = %e, "could not store refreshed token, clearing credentials");
                metrics::counter!("dashboard_client_refresh_total", "result" => "failed")
                    .increment(1);
                self.clear_session(Some(&credential)).await;
                None
            }
        }
    }

    /// End the session `sent` belonged to and notify the embedding application.
    ///
    /// A session established after `sent` was read is left alone and the
    /// callback does not fire.
    async fn authentication_lost(&self, sent: Option<&Credential>) {
        self.clear_session(sent).await;
        if self.inner.store.is_authenticated().await {
            debug!("a newer session is stored, keeping it");
            return;
        }
        warn!("session lost, re-authentication required");
        if let Some(hook) = &self.inner.on_authentication_lost {
            hook();
        }
    }

    async fn clear_session(&self, credential: Option<&Credential>) {
        let result = match credential {
            Some(credential) => self
                .inner
                .store
                .clear_if_current(credential.refresh())
                .await
                .map(|_| ()),
            None => self.inner.store.clear().await,
        };
        if let Err(e) = result {
            warn!(error = %e, "failed to remove stored credential");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = ClientConfig::new("https://backend.internal");
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.maintenance_window, Duration::from_secs(60));
        assert_eq!(config.login_path, "/api/auth/login");
        assert_eq!(config.refresh_path, "/api/auth/refresh");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_rejects_bad_scheme() {
        let err = ClientConfig::new("backend.internal").validate().unwrap_err();
        assert!(err.to_string().contains("base_url must start with http"));
    }

    #[test]
    fn config_rejects_zero_durations() {
        let mut config = ClientConfig::new("http://localhost");
        config.request_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = ClientConfig::new("http://localhost");
        config.maintenance_window = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_rejects_relative_endpoint_paths() {
        let mut config = ClientConfig::new("http://localhost");
        config.refresh_path = "auth/refresh".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn auth_endpoints_are_recognized() {
        let mut config = ClientConfig::new("http://localhost");
        config.auth_paths.push("/api/auth/logout".into());
        assert!(config.is_auth_endpoint("/api/auth/login"));
        assert!(config.is_auth_endpoint("/api/auth/refresh/"));
        assert!(config.is_auth_endpoint("/api/auth/logout"));
        assert!(!config.is_auth_endpoint("/api/backups"));
        assert!(!config.is_auth_endpoint("/api/auth/login/extra"));
    }

    #[test]
    fn url_joins_without_double_slash() {
        let config = ClientConfig::new("http://localhost:8080/");
        assert_eq!(
            config.url_for("/api/tables?page=2"),
            "http://localhost:8080/api/tables?page=2"
        );
    }

    #[tokio::test]
    async fn build_rejects_invalid_config() {
        let store = Arc::new(CredentialStore::ephemeral());
        let result = ApiClient::builder(ClientConfig::new("ftp://nope"), store).build();
        assert!(matches!(result, Err(BuildError::Config(_))));
    }

    #[tokio::test]
    async fn refresh_without_credentials_makes_no_exchange() {
        // Unroutable base URL: any network attempt would fail loudly
        let store = Arc::new(CredentialStore::ephemeral());
        let client = ApiClient::builder(ClientConfig::new("http://127.0.0.1:9"), store)
            .build()
            .unwrap();
        assert!(client.refresh().await.is_none());
        assert_eq!(client.refresh_exchanges(), 0);
    }
}
