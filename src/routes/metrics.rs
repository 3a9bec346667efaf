//! Prometheus metrics endpoint
//!
//! Exposes relay metrics in Prometheus format on the admin listener.

use axum::response::IntoResponse;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;
use tracing::warn;

/// Global Prometheus handle for metrics export
static PROMETHEUS_HANDLE: Lazy<Option<PrometheusHandle>> = Lazy::new(|| {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Failed to install Prometheus recorder, metrics disabled");
            None
        }
    }
});

/// Initialize metrics (call once at startup)
pub fn init_metrics() {
    // Force initialization of the lazy static
    let _ = &*PROMETHEUS_HANDLE;

    register_metrics();
}

fn register_metrics() {
    metrics::describe_counter!(
        "llm_proxy_requests_total",
        "Total number of proxied requests by upstream status class"
    );
    metrics::describe_histogram!(
        "llm_proxy_request_duration_seconds",
        "Time until upstream response headers were received"
    );
    metrics::describe_counter!(
        "llm_proxy_relayed_bytes_total",
        "Response bytes relayed to clients"
    );
    metrics::describe_counter!(
        "llm_proxy_fragments_total",
        "Answer fragments written to the observation sink"
    );
    metrics::describe_counter!(
        "llm_proxy_upstream_errors_total",
        "Upstream transport failures by stage"
    );
}

/// Prometheus metrics endpoint handler
pub async fn prometheus_metrics() -> impl IntoResponse {
    PROMETHEUS_HANDLE
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default()
}

/// Record a proxied request once upstream headers are in
pub fn record_request(status: u16, duration_secs: f64) {
    let class = format!("{}xx", status / 100);
    metrics::counter!("llm_proxy_requests_total", "status" => class).increment(1);
    metrics::histogram!("llm_proxy_request_duration_seconds").record(duration_secs);
}

/// Record bytes relayed for one response
pub fn record_relayed_bytes(bytes: u64) {
    metrics::counter!("llm_proxy_relayed_bytes_total").increment(bytes);
}

/// Record fragments observed for one response
pub fn record_fragments(count: u64) {
    metrics::counter!("llm_proxy_fragments_total").increment(count);
}

/// Record an upstream failure (`connect` or `body`)
pub fn record_upstream_error(stage: &'static str) {
    metrics::counter!("llm_proxy_upstream_errors_total", "stage" => stage).increment(1);
}
