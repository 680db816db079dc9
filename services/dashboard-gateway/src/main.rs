//! Dashboard gateway
//!
//! Single-binary service the dashboard front end talks to:
//! 1. Holds the backend session (login, refresh, logout) server-side
//! 2. Forwards every other call through the resilient API client
//! 3. Exposes the maintenance banner and session state to the UI
//! 4. Renders every failure as a classified JSON error

mod config;
mod control;
mod error;
mod metrics;
mod proxy;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use dashboard_auth::{CredentialChange, CredentialStore};
use dashboard_client::{ApiClient, MaintenanceGate};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::proxy::{GatewayStats, new_request_id};

/// How long in-flight requests may take to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    client: ApiClient,
    stats: GatewayStats,
    prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
///
/// Applies a concurrency limit layer based on `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    let control = control::build_control_router(state.client.clone());
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(proxy_handler)
        .with_state(state)
        .merge(control)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting dashboard-gateway");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder()?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.gateway.listen_addr,
        backend_url = %config.backend.base_url,
        timeout_secs = config.backend.timeout_secs,
        credentials_path = %config.session.credentials_path.display(),
        "configuration loaded"
    );

    let store = CredentialStore::load(config.session.credentials_path.clone())
        .await
        .context("failed to load session credentials")?;
    let store = Arc::new(store);
    info!(
        authenticated = store.is_authenticated().await,
        "session store ready"
    );
    tokio::spawn(watch_credentials(store.subscribe()));

    let http = reqwest::Client::builder()
        .user_agent(concat!("dashboard-gateway/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    let client = ApiClient::builder(config.client_config(), store)
        .gate(Arc::new(MaintenanceGate::new()))
        .http_client(http)
        .on_authentication_lost(|| {
            warn!("backend session lost, front end must log in again");
        })
        .build()
        .context("failed to build API client")?;

    let stats = GatewayStats::new();
    let app_state = AppState {
        client,
        stats: stats.clone(),
        prometheus: prometheus_handle,
    };

    let app = build_router(app_state, config.gateway.max_connections);

    let listen_addr = config.gateway.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain deadline starts when the shutdown signal fires, not when the
    // server starts: notify the server to drain, then race it against the timeout.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            let remaining = stats.in_flight.load(Ordering::Relaxed);
            warn!(
                remaining,
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Log every credential change until the store goes away.
async fn watch_credentials(mut changes: broadcast::Receiver<CredentialChange>) {
    loop {
        match changes.recv().await {
            Ok(CredentialChange::Updated) => info!("session credentials updated"),
            Ok(CredentialChange::Cleared) => info!("session credentials cleared"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "credential change notifications dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Health endpoint: gateway uptime, counters and the current maintenance window.
///
/// Always 200: the gateway itself is healthy while the backend is in maintenance.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.stats.started_at.elapsed().as_secs();
    let requests = state.stats.requests_total.load(Ordering::Relaxed);
    let errors = state.stats.errors_total.load(Ordering::Relaxed);
    let maintenance = state.client.maintenance().status();
    let authenticated = state.client.credentials().is_authenticated().await;

    let body = serde_json::json!({
        "status": "healthy",
        "uptime_seconds": uptime,
        "requests_served": requests,
        "errors_total": errors,
        "authenticated": authenticated,
        "maintenance": {
            "active": maintenance.active,
            "remaining_ms": maintenance.remaining.as_millis() as u64,
            "reason": maintenance.reason,
        },
    });

    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Catch-all handler that forwards everything else to the backend.
async fn proxy_handler(
    State(state): State<AppState>,
    request: axum::http::Request<axum::body::Body>,
) -> Response {
    proxy::forward(&state.client, &state.stats, request, new_request_id()).await
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use dashboard_auth::Credential;
    use dashboard_client::ClientConfig;
    use tower::ServiceExt;

    /// PrometheusHandle for tests without installing a global recorder.
    fn test_prometheus_handle() -> PrometheusHandle {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        recorder.handle()
    }

    fn test_app_state(backend_url: &str, store: Arc<CredentialStore>) -> AppState {
        let mut config = ClientConfig::new(backend_url);
        config.request_timeout = Duration::from_secs(5);
        AppState {
            client: ApiClient::builder(config, store).build().unwrap(),
            stats: GatewayStats::new(),
            prometheus: test_prometheus_handle(),
        }
    }

    async fn logged_in_store() -> Arc<CredentialStore> {
        let store = Arc::new(CredentialStore::ephemeral());
        store.set(Credential::new("A1", "R1")).await.unwrap();
        store
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    /// Mock backend that echoes request headers, path and body inside an envelope.
    async fn start_echo_backend() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        tokio::spawn(async move {
            let app = Router::new()
                .route(
                    "/api/missing",
                    get(|| async {
                        (
                            StatusCode::NOT_FOUND,
                            axum::Json(serde_json::json!({
                                "success": false,
                                "message": "backup 9 does not exist"
                            })),
                        )
                    }),
                )
                .route(
                    "/api/busy",
                    get(|| async {
                        (
                            StatusCode::SERVICE_UNAVAILABLE,
                            [("retry-after", "45")],
                            axum::Json(serde_json::json!({
                                "success": false,
                                "message": "restore in progress"
                            })),
                        )
                    }),
                )
                .fallback(|request: Request<Body>| async move {
                    let mut headers_map = serde_json::Map::new();
                    for (name, value) in request.headers() {
                        headers_map.insert(
                            name.to_string(),
                            serde_json::Value::String(value.to_str().unwrap_or("").to_string()),
                        );
                    }
                    let method = request.method().to_string();
                    let path = request.uri().path().to_string();
                    let query = request.uri().query().unwrap_or("").to_string();
                    let body_bytes = axum::body::to_bytes(request.into_body(), 10 * 1024 * 1024)
                        .await
                        .unwrap();
                    let body = serde_json::json!({
                        "success": true,
                        "data": {
                            "echoed_headers": headers_map,
                            "method": method,
                            "path": path,
                            "query": query,
                            "body": String::from_utf8_lossy(&body_bytes),
                        }
                    });
                    (
                        StatusCode::OK,
                        [("x-backend-echo", "true")],
                        axum::Json(body),
                    )
                });
            axum::serve(listener, app).await.unwrap();
        });

        url
    }

    #[tokio::test]
    async fn health_endpoint_returns_json() {
        let state = test_app_state("http://unused", logged_in_store().await);
        state.stats.requests_total.fetch_add(5, Ordering::Relaxed);
        state
            .client
            .maintenance()
            .activate(Duration::from_secs(60), Some("upgrade".into()));

        let app = build_router(state, 1000);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["requests_served"], 5);
        assert_eq!(json["authenticated"], true);
        assert!(json["uptime_seconds"].is_u64());
        assert_eq!(json["maintenance"]["active"], true);
        assert_eq!(json["maintenance"]["reason"], "upgrade");
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_prometheus_format() {
        let state = test_app_state("http://unused", logged_in_store().await);
        let app = build_router(state, 1000);
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap();
        assert!(content_type.contains("text/plain"));
    }

    #[tokio::test]
    async fn proxy_attaches_session_credential_and_forwards() {
        let url = start_echo_backend().await;
        let app = build_router(test_app_state(&url, logged_in_store().await), 1000);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/experiments?page=2")
                    .method("POST")
                    .header("content-type", "application/json")
                    .header("authorization", "Bearer from-browser")
                    .header("x-custom", "preserved")
                    .header("connection", "keep-alive")
                    .body(Body::from(r#"{"name":"warmup"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("x-backend-echo").unwrap(), "true");
        let json = body_json(response).await;
        let data = &json["data"];

        assert_eq!(
            data["echoed_headers"]["authorization"], "Bearer A1",
            "gateway's session credential replaces the browser's"
        );
        assert_eq!(data["echoed_headers"]["x-custom"], "preserved");
        assert_eq!(data["echoed_headers"]["content-type"], "application/json");
        assert!(data["echoed_headers"].get("connection").is_none());
        assert_eq!(data["method"], "POST");
        assert_eq!(data["path"], "/api/experiments");
        assert_eq!(data["query"], "page=2");
        assert_eq!(data["body"], r#"{"name":"warmup"}"#);
    }

    #[tokio::test]
    async fn proxy_maps_backend_not_found() {
        let url = start_echo_backend().await;
        let app = build_router(test_app_state(&url, logged_in_store().await), 1000);

        let response = app
            .oneshot(Request::builder().uri("/api/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "not_found");
        assert_eq!(json["error"]["message"], "backup 9 does not exist");
        assert_eq!(json["error"]["action"], "report");
    }

    #[tokio::test]
    async fn backend_unavailable_opens_maintenance_window() {
        let url = start_echo_backend().await;
        let state = test_app_state(&url, logged_in_store().await);
        let client = state.client.clone();
        let app = build_router(state, 1000);

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/api/busy").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get("retry-after").unwrap(), "45");
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "server_unavailable");
        assert_eq!(json["error"]["action"], "wait");

        // Any later call short-circuits without reaching the backend
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/api/anything").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "maintenance");
        assert!(client.maintenance().is_active());

        let response = app
            .oneshot(Request::builder().uri("/maintenance").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["active"], true);
        assert_eq!(json["reason"], "restore in progress");
    }

    #[tokio::test]
    async fn proxy_returns_502_for_dead_backend() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let state = test_app_state(&format!("http://{addr}"), logged_in_store().await);
        let stats = state.stats.clone();
        let app = build_router(state, 1000);

        let response = app
            .oneshot(Request::builder().uri("/fail").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let json = body_json(response).await;
        let error = &json["error"];
        assert_eq!(error["type"], "network_error");
        assert_eq!(error["action"], "retry");
        assert!(error["message"].is_string());
        assert!(error["request_id"].as_str().unwrap().starts_with("req_"));
        assert_eq!(stats.errors_total.load(Ordering::Relaxed), 1);
        assert_eq!(stats.in_flight.load(Ordering::Relaxed), 0);
    }
}
