//! Forwarding of front-end calls to the dashboard backend
//!
//! Every non-gateway path is replayed through `ApiClient::send`, so it picks
//! up the session credential, refresh-and-retry and the maintenance gate. A
//! successful backend response is returned verbatim minus hop-by-hop
//! headers; a failure becomes the gateway's JSON error body.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use dashboard_client::{ApiClient, ApiResponse, OutboundRequest};
use tracing::{error, instrument, warn};

use crate::error::{ApiError, error_response};
use crate::metrics;

/// Headers to strip before forwarding (hop-by-hop per RFC 2616 Section 13.5.1)
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Inbound headers the gateway replaces: the credential is its own and the
/// transport recomputes the rest.
const GATEWAY_OWNED_HEADERS: &[&str] = &["host", "authorization", "content-length"];

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Request counters shared by the proxy and the health endpoint
#[derive(Clone)]
pub struct GatewayStats {
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
    pub in_flight: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl GatewayStats {
    pub fn new() -> Self {
        Self {
            requests_total: Arc::new(AtomicU64::new(0)),
            errors_total: Arc::new(AtomicU64::new(0)),
            in_flight: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    fn track(&self) -> InFlight {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlight(self.in_flight.clone())
    }
}

/// Decrements the in-flight gauge when the request finishes, however it ends.
struct InFlight(Arc<AtomicU64>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Fresh id for correlating a gateway response with its logs.
pub fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}

/// Forward an inbound request through the pipeline.
#[instrument(skip_all, fields(request_id = %request_id, method = %request.method(), path = %request.uri().path()))]
pub async fn forward(
    client: &ApiClient,
    stats: &GatewayStats,
    request: Request<Body>,
    request_id: String,
) -> Response {
    let started = Instant::now();
    stats.requests_total.fetch_add(1, Ordering::Relaxed);
    let _in_flight = stats.track();

    let method = request.method().clone();
    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_owned())
        .unwrap_or_else(|| "/".to_owned());

    let mut outbound = OutboundRequest::new(method.clone(), path);
    for (name, value) in request.headers() {
        if !is_hop_by_hop(name.as_str()) && !is_gateway_owned(name.as_str()) {
            outbound = outbound.header(name.clone(), value.clone());
        }
    }

    let body = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => {
            stats.errors_total.fetch_add(1, Ordering::Relaxed);
            error!(error = %e, "failed to read request body");
            let response = error_response(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                &format!("invalid request body: {e}"),
                "report",
                &request_id,
            );
            metrics::record_request(400, method.as_str(), started.elapsed().as_secs_f64());
            return response;
        }
    };
    if !body.is_empty() {
        // content-type, if any, was carried over with the other headers
        outbound = outbound.body(body, None);
    }

    let response = match client.send(outbound).await {
        Ok(backend) => passthrough(backend, &request_id),
        Err(e) => {
            stats.errors_total.fetch_add(1, Ordering::Relaxed);
            metrics::record_backend_error(e.kind().label());
            warn!(kind = %e.kind(), message = e.message(), "backend call failed");
            ApiError::new(e, request_id).into_response()
        }
    };

    metrics::record_request(
        response.status().as_u16(),
        method.as_str(),
        started.elapsed().as_secs_f64(),
    );
    response
}

fn passthrough(backend: ApiResponse, request_id: &str) -> Response {
    let (status, headers, body) = backend.into_parts();
    let mut response = Response::builder().status(status);
    for (name, value) in &headers {
        if !is_hop_by_hop(name.as_str()) {
            response = response.header(name, value);
        }
    }
    response.body(Body::from(body)).unwrap_or_else(|e| {
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "gateway_error",
            &format!("response build error: {e}"),
            "report",
            request_id,
        )
    })
}

/// Check if a header is hop-by-hop (should be stripped before forwarding)
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

fn is_gateway_owned(name: &str) -> bool {
    GATEWAY_OWNED_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hop_by_hop_detection() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("TRANSFER-ENCODING"));
        assert!(is_hop_by_hop("keep-alive"));
        assert!(!is_hop_by_hop("Content-Type"));
        assert!(!is_hop_by_hop("Authorization"));
    }

    #[test]
    fn test_gateway_owned_headers() {
        assert!(is_gateway_owned("Authorization"));
        assert!(is_gateway_owned("host"));
        assert!(is_gateway_owned("Content-Length"));
        assert!(!is_gateway_owned("accept"));
        assert!(!is_gateway_owned("x-request-source"));
    }

    #[test]
    fn test_request_ids_are_unique_and_prefixed() {
        let a = new_request_id();
        let b = new_request_id();
        assert!(a.starts_with("req_"));
        assert_eq!(a.len(), 4 + 32);
        assert_ne!(a, b);
    }

    #[test]
    fn test_in_flight_guard_decrements_on_drop() {
        let stats = GatewayStats::new();
        {
            let _a = stats.track();
            let _b = stats.track();
            assert_eq!(stats.in_flight.load(Ordering::Relaxed), 2);
        }
        assert_eq!(stats.in_flight.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_error_response_format() {
        let resp = error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "invalid request body",
            "report",
            "req_abc123",
        );
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            resp.headers().get("content-type").unwrap(),
            "application/json"
        );
    }
}
