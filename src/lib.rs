//! ccbridge - a bidirectional bridge between Concurrent and ActivityPub
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                       │
//! │  - Discovery (WebFinger, NodeInfo)                          │
//! │  - ActivityPub endpoints (actor, note, inboxes)             │
//! │  - Authenticated local API                                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Bridge Core                           │
//! │  - Inbox dispatcher (idempotent activity state machine)     │
//! │  - Translator (CC signed objects <-> AP documents)          │
//! │  - Fan-out supervisor + association worker                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Collaborators                           │
//! │  - SQLite (sqlx): entities, follows, cross references       │
//! │  - Redis pub/sub: CC stream events                          │
//! │  - CC gateway: message/association/entity services          │
//! │  - Remote AP servers (signed HTTP)                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod auth;
pub mod bridge;
pub mod config;
pub mod data;
pub mod error;
pub mod federation;
pub mod metrics;
pub mod services;

use std::sync::Arc;
use std::time::Duration;

use services::{AssociationService, EntityService, MessageService, StreamBus};

/// Application state shared across all handlers and workers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Bridge-side persistence
    pub db: Arc<data::Database>,

    /// Signed ActivityPub client (with Person cache)
    pub ap: Arc<federation::ApClient>,

    /// CC message service
    pub message: Arc<dyn MessageService>,

    /// CC association service
    pub association: Arc<dyn AssociationService>,

    /// CC entity service
    pub entity: Arc<dyn EntityService>,

    /// The proxy identity signing CC objects made from AP activity
    pub proxy: Arc<services::ProxySigner>,

    /// CC stream pub/sub
    pub bus: Arc<dyn StreamBus>,

    /// Plain HTTP client (unsigned fetches)
    pub http_client: Arc<reqwest::Client>,
}

impl AppState {
    /// Initialize application state against the real collaborators.
    ///
    /// # Steps
    /// 1. Connect SQLite and run migrations
    /// 2. Build the shared HTTP client
    /// 3. Derive the proxy identity
    /// 4. Wire the CC gateway and Redis bus
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        let db = Arc::new(data::Database::connect(&config.database.path).await?);

        let http_client = Arc::new(
            reqwest::Client::builder()
                .user_agent(concat!("ccbridge/", env!("CARGO_PKG_VERSION")))
                .timeout(Duration::from_secs(30))
                .build()
                .map_err(|e| error::AppError::Internal(e.into()))?,
        );

        let proxy = Arc::new(services::ProxySigner::from_hex(&config.proxy.private_key)?);
        tracing::info!(proxy = %proxy.ccid, "Proxy identity loaded");

        let ap = Arc::new(federation::ApClient::new(
            http_client.clone(),
            config.server.fqdn.clone(),
            Duration::from_secs(config.cache.person_ttl),
        ));

        let gateway = Arc::new(services::CcGateway::new(
            http_client.clone(),
            &config.concurrent.api_url,
        ));

        let bus = Arc::new(services::RedisBus::new(&config.redis.url)?);

        tracing::info!("Application state initialized successfully");

        Ok(Self {
            config: Arc::new(config),
            db,
            ap,
            message: gateway.clone(),
            association: gateway.clone(),
            entity: gateway,
            proxy,
            bus,
            http_client,
        })
    }
}

/// Build the Axum router with all routes.
///
/// Shared by the binary and integration tests to keep route composition
/// consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::trace::TraceLayer;

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(api::wellknown_router())
        .merge(api::activitypub_router())
        .merge(api::local_api_router())
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone())
        .merge(api::metrics_router().with_state(state))
}

async fn health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<&'static str, error::AppError> {
    state.db.ping().await?;
    state.bus.ping().await?;
    Ok("ok")
}
