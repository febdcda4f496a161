//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Federation metrics
    pub static ref ACTIVITIES_RECEIVED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("ccbridge_activities_received_total", "Total number of ActivityPub activities received"),
        &["activity_type"]
    ).expect("metric can be created");
    pub static ref ACTIVITIES_SENT_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("ccbridge_activities_sent_total", "Total number of ActivityPub activities sent"),
        &["activity_type"]
    ).expect("metric can be created");
    pub static ref FEDERATION_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("ccbridge_federation_requests_total", "Total number of federation requests"),
        &["direction", "status"]
    ).expect("metric can be created");
    pub static ref FEDERATION_REQUEST_DURATION_SECONDS: prometheus::HistogramVec = prometheus::HistogramVec::new(
        HistogramOpts::new(
            "ccbridge_federation_request_duration_seconds",
            "Federation request duration in seconds"
        ).buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["direction"]
    ).expect("metric can be created");

    // Worker metrics
    pub static ref FANOUT_WORKERS_ACTIVE: IntGauge = IntGauge::new(
        "ccbridge_fanout_workers_active",
        "Current number of running per-follower fan-out workers"
    ).expect("metric can be created");
    pub static ref FANOUT_DELIVERIES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("ccbridge_fanout_deliveries_total", "Total number of fan-out deliveries"),
        &["status"]
    ).expect("metric can be created");

    // Error metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("ccbridge_errors_total", "Total number of errors"),
        &["error_type"]
    ).expect("metric can be created");
}

/// Register all instruments with the global registry.
///
/// Safe to call once at startup; duplicate registration is reported and
/// ignored so tests can share the process-wide registry.
pub fn init_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(ACTIVITIES_RECEIVED_TOTAL.clone()),
        Box::new(ACTIVITIES_SENT_TOTAL.clone()),
        Box::new(FEDERATION_REQUESTS_TOTAL.clone()),
        Box::new(FEDERATION_REQUEST_DURATION_SECONDS.clone()),
        Box::new(FANOUT_WORKERS_ACTIVE.clone()),
        Box::new(FANOUT_DELIVERIES_TOTAL.clone()),
        Box::new(ERRORS_TOTAL.clone()),
    ];

    for collector in collectors {
        if let Err(error) = REGISTRY.register(collector) {
            tracing::debug!(%error, "Metric already registered");
        }
    }
}
