mod handlers;
mod metrics;
mod routes;

use axum::Router;
use lesson_common::config::Config;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub redis: ConnectionManager,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Lesson API booting...");

    let config = Config::from_env();

    // Connect to Redis
    let client = redis::Client::open(config.redis_url.as_str())?;
    let redis_conn = ConnectionManager::new(client).await?;
    info!("Connected to Redis: {}", config.redis_url);

    let state = Arc::new(AppState { redis: redis_conn });

    // Build router
    let app = Router::new().merge(routes::routes()).with_state(state);

    // Start server
    let listener = TcpListener::bind(&config.api_addr).await?;
    info!("HTTP server listening on {}", config.api_addr);
    info!("Ready to accept runs");

    axum::serve(listener, app).await?;
    Ok(())
}
