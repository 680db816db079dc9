//! HTTP rendering of pipeline failures
//!
//! Every failure reaching the front end has the same JSON shape:
//! `{"error":{"type","message","action","request_id"}}`. `type` is the
//! classified kind and `action` the affordance the UI should offer.

use axum::http::header::{CONTENT_TYPE, RETRY_AFTER};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use dashboard_client::{ClassifiedError, ErrorKind, ServerFault};

/// A classified pipeline failure bound to the inbound request that hit it.
#[derive(Debug)]
pub struct ApiError {
    pub error: ClassifiedError,
    pub request_id: String,
}

impl ApiError {
    pub fn new(error: ClassifiedError, request_id: impl Into<String>) -> Self {
        Self {
            error,
            request_id: request_id.into(),
        }
    }
}

/// Status code the gateway answers with for each kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Maintenance => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Authentication => StatusCode::UNAUTHORIZED,
        ErrorKind::Authorization => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::ServerFault(ServerFault::Unavailable) => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::ServerFault(ServerFault::Other)
        | ErrorKind::NetworkError
        | ErrorKind::Unknown => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.error.kind();
        let mut response = error_response(
            status_for(kind),
            kind.label(),
            self.error.message(),
            kind.action().label(),
            &self.request_id,
        );

        if let Some(wait) = self.error.retry_after() {
            // Round up so clients never retry before the window closes
            let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// JSON error body in the gateway's standard shape.
pub fn error_response(
    status: StatusCode,
    error_type: &str,
    message: &str,
    action: &str,
    request_id: &str,
) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": error_type,
            "message": message,
            "action": action,
            "request_id": request_id,
        }
    });
    (
        status,
        [(CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dashboard_client::{Outcome, classify};
    use std::time::Duration;

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[test]
    fn status_mapping_covers_every_kind() {
        let cases = [
            (ErrorKind::Maintenance, 503),
            (ErrorKind::Timeout, 504),
            (ErrorKind::Authentication, 401),
            (ErrorKind::Authorization, 403),
            (ErrorKind::NotFound, 404),
            (ErrorKind::ServerFault(ServerFault::Unavailable), 503),
            (ErrorKind::ServerFault(ServerFault::Other), 502),
            (ErrorKind::NetworkError, 502),
            (ErrorKind::Unknown, 502),
        ];
        for (kind, expected) in cases {
            assert_eq!(status_for(kind).as_u16(), expected, "{kind:?}");
        }
    }

    #[tokio::test]
    async fn maintenance_error_carries_retry_after() {
        let error = classify(&Outcome::GateClosed {
            remaining: Duration::from_millis(12_300),
            reason: Some("nightly backup"),
        });
        let response = ApiError::new(error, "req_abc123").into_response();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get(RETRY_AFTER).unwrap(), "13");

        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "maintenance");
        assert_eq!(json["error"]["action"], "wait");
        assert_eq!(json["error"]["request_id"], "req_abc123");
        assert!(
            json["error"]["message"]
                .as_str()
                .unwrap()
                .contains("nightly backup")
        );
    }

    #[tokio::test]
    async fn errors_without_window_have_no_retry_after() {
        let error = classify(&Outcome::NoResponse {
            message: "connection refused",
        });
        let response = ApiError::new(error, "req_1").into_response();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(response.headers().get(RETRY_AFTER).is_none());

        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "network_error");
        assert_eq!(json["error"]["action"], "retry");
    }
}
