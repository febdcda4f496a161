//! ccbridge binary entry point

use ccbridge::{AppState, bridge, config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application entry point
///
/// # Setup
/// 1. Initialize tracing/logging
/// 2. Initialize metrics
/// 3. Load configuration
/// 4. Initialize AppState
/// 5. Spawn fan-out supervisor and association worker
/// 6. Start HTTP server
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let log_format =
        std::env::var("CCBRIDGE__LOGGING__FORMAT").unwrap_or_else(|_| "pretty".to_string());

    if log_format == "json" {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "ccbridge=info,tower_http=debug".into()),
            )
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "ccbridge=info,tower_http=debug".into()),
            )
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    tracing::info!("Starting ccbridge...");

    ccbridge::metrics::init_metrics();

    let config = config::AppConfig::load()?;
    tracing::info!(fqdn = %config.server.fqdn, "Configuration loaded");

    let state = AppState::new(config.clone()).await?;

    let app = ccbridge::build_router(state.clone());

    tokio::spawn(bridge::worker::run_fanout_supervisor(state.clone()));
    tokio::spawn(bridge::worker::run_association_worker(state.clone()));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Federating as https://{}", config.server.fqdn);

    axum::serve(listener, app).await?;

    Ok(())
}
