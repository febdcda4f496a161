//! Prometheus metrics endpoint

use axum::{Router, http::StatusCode, routing::get};
use prometheus::{Encoder, TextEncoder};

use crate::AppState;

/// Create metrics router
pub fn metrics_router() -> Router<AppState> {
    Router::new().route("/metrics", get(metrics))
}

/// GET /metrics
async fn metrics() -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = crate::metrics::REGISTRY.gather();
    let mut buffer = Vec::new();

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
