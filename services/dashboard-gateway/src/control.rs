//! Session and maintenance endpoints for the dashboard front end
//!
//! Endpoints:
//! - GET    /maintenance     banner snapshot `{active, remaining_ms, reason}`
//! - DELETE /maintenance     explicit clear
//! - GET    /session         `{authenticated}`
//! - POST   /session/login   username/password → backend login, token kept server-side
//! - POST   /session/logout  forget the session
//!
//! Tokens never leave the gateway; the front end only learns whether a
//! session exists.

use axum::Router;
use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use dashboard_auth::LoginRequest;
use dashboard_client::ApiClient;
use tracing::{error, info};

use crate::error::{ApiError, error_response};
use crate::proxy::new_request_id;

/// Build the control router. It carries its own state and merges into the main router.
pub fn build_control_router(client: ApiClient) -> Router {
    Router::new()
        .route(
            "/maintenance",
            get(maintenance_status).delete(clear_maintenance),
        )
        .route("/session", get(session_status))
        .route("/session/login", post(login))
        .route("/session/logout", post(logout))
        .with_state(client)
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    (status, [(CONTENT_TYPE, "application/json")], body.to_string()).into_response()
}

/// GET /maintenance: synchronous banner query.
async fn maintenance_status(State(client): State<ApiClient>) -> Response {
    let status = client.maintenance().status();
    json_response(
        StatusCode::OK,
        serde_json::json!({
            "active": status.active,
            "remaining_ms": status.remaining.as_millis() as u64,
            "reason": status.reason,
        }),
    )
}

/// DELETE /maintenance: operator override.
async fn clear_maintenance(State(client): State<ApiClient>) -> Response {
    let cleared = client.maintenance().clear();
    info!(cleared, "maintenance clear requested");
    json_response(StatusCode::OK, serde_json::json!({ "cleared": cleared }))
}

async fn session_status(State(client): State<ApiClient>) -> Response {
    let authenticated = client.credentials().is_authenticated().await;
    json_response(
        StatusCode::OK,
        serde_json::json!({ "authenticated": authenticated }),
    )
}

/// POST /session/login: exchange credentials with the backend.
///
/// Failures keep the existing session untouched and answer with the
/// classified error body.
async fn login(State(client): State<ApiClient>, Json(request): Json<LoginRequest>) -> Response {
    let request_id = new_request_id();
    match client.login(&request).await {
        Ok(()) => json_response(
            StatusCode::OK,
            serde_json::json!({ "authenticated": true }),
        ),
        Err(e) => {
            info!(username = %request.username, kind = %e.kind(), "login failed");
            ApiError::new(e, request_id).into_response()
        }
    }
}

async fn logout(State(client): State<ApiClient>) -> Response {
    match client.logout().await {
        Ok(()) => json_response(
            StatusCode::OK,
            serde_json::json!({ "authenticated": false }),
        ),
        Err(e) => {
            error!(error = %e, "failed to clear session");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "session_error",
                &format!("failed to clear session: {e}"),
                "report",
                &new_request_id(),
            )
        }
    }
}
