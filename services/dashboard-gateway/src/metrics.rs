//! Prometheus metrics exposition
//!
//! Gateway-level metrics recorded here:
//!
//! - `gateway_requests_total` (counter): labels `status`, `method`
//! - `gateway_request_duration_seconds` (histogram): label `status`
//! - `gateway_backend_errors_total` (counter): label `kind`
//!
//! The client library records its own `dashboard_client_*` series through the
//! same recorder.

use anyhow::Context;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Bucket boundaries from 5ms to 60s, wide enough for the longest configurable timeout.
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

fn builder() -> anyhow::Result<PrometheusBuilder> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("_duration_seconds".to_string()),
            DURATION_BUCKETS,
        )
        .context("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// Every `*_duration_seconds` series renders as a histogram with `_bucket`
/// lines rather than the default summary.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    builder()?
        .install_recorder()
        .context("failed to install Prometheus recorder")
}

/// Record a completed gateway request with status code and HTTP method labels.
pub fn record_request(status: u16, method: &str, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!("gateway_requests_total", "status" => status_str.clone(), "method" => method.to_string())
        .increment(1);
    metrics::histogram!("gateway_request_duration_seconds", "status" => status_str)
        .record(duration_secs);
}

/// Record a classified backend failure.
pub fn record_backend_error(kind: &'static str) {
    metrics::counter!("gateway_backend_errors_total", "kind" => kind).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusRecorder;

    /// Isolated recorder/handle pair; the global recorder can only be installed once.
    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = builder().unwrap().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_request(200, "GET", 0.05);
        record_backend_error("timeout");
    }

    #[test]
    fn record_request_increments_counter_and_histogram() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_request(200, "GET", 0.042);
        record_request(503, "POST", 1.5);

        let output = handle.render();
        assert!(output.contains("gateway_requests_total"));
        assert!(output.contains("status=\"200\""));
        assert!(output.contains("method=\"GET\""));
        assert!(output.contains("status=\"503\""));
        assert!(output.contains("method=\"POST\""));
        assert!(
            output.contains("gateway_request_duration_seconds_bucket"),
            "histogram must render _bucket lines for histogram_quantile() queries"
        );
    }

    #[test]
    fn backend_errors_are_labelled_by_kind() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_backend_error("maintenance");
        record_backend_error("network_error");

        let output = handle.render();
        assert!(output.contains("gateway_backend_errors_total"));
        assert!(output.contains("kind=\"maintenance\""));
        assert!(output.contains("kind=\"network_error\""));
    }

    #[test]
    fn client_duration_series_share_buckets() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        metrics::histogram!("dashboard_client_request_duration_seconds", "outcome" => "success")
            .record(0.003);

        let output = handle.render();
        assert!(output.contains("dashboard_client_request_duration_seconds_bucket"));
        assert!(output.contains("le=\"0.005\""), "5ms bucket must exist");
        assert!(output.contains("le=\"60\""), "60s bucket must exist");
        assert!(output.contains("le=\"+Inf\""));
    }
}
