//! API layer
//!
//! HTTP handlers for:
//! - Discovery endpoints (WebFinger, NodeInfo)
//! - ActivityPub endpoints (actor, note, inboxes)
//! - Authenticated local API
//! - Metrics (Prometheus)

mod activitypub;
mod local;
pub mod metrics;
mod wellknown;

pub use activitypub::activitypub_router;
pub use local::local_api_router;
pub use metrics::metrics_router;
pub use wellknown::wellknown_router;
