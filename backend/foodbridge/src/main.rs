//! FoodBridge backend entry point.
//!
//! Opens the SQLite record store, wires the Brevo notification gateway and
//! the change feed, and serves the Axum REST API.

use std::sync::Arc;

use reqwest::Client;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use foodbridge::api::{self, ApiState};
use foodbridge::config::Config;
use foodbridge::db;
use foodbridge::feed::ChangeFeed;
use foodbridge::notify::BrevoGateway;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    let pool = db::init_pool(&config.database_url).await?;

    let client = Client::builder()
        .timeout(std::time::Duration::from_secs(config.http_timeout_secs))
        .build()?;

    if config.brevo_api_key.is_none() {
        info!("BREVO_API_KEY not set, notification emails will be skipped");
    }
    let gateway = Arc::new(BrevoGateway::new(
        client,
        config.brevo_api_url.clone(),
        config.brevo_api_key.clone(),
        config.templates,
    ));

    let feed = ChangeFeed::new(pool.clone(), config.change_feed_capacity);
    let state = Arc::new(ApiState::new(pool, feed, gateway));

    let app = api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("FoodBridge backend listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
