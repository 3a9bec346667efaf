//! HTTP routes for llm-proxy
//!
//! The proxy router forwards every request; the admin router carries the
//! operational endpoints on a separate listener.

pub mod health;
pub mod metrics;
pub mod proxy;

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::AppState;

/// Create the proxy router: every method and path goes upstream.
///
/// No layer here may touch response bodies or headers.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(proxy::proxy_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Create the admin router (health probes, metrics)
pub fn create_admin_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/health/ready", get(health::readiness_check))
        .route("/health/live", get(health::liveness_check))
        .route("/metrics", get(metrics::prometheus_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
