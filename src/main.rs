//! Geo API - Main entry point.

use geo_api::auth::AuthConfig;
use geo_api::config::Config;
use geo_api::db::{DatabaseGateway, QueryExecutor};
use geo_api::routes::AppState;
use geo_api::transport::{HttpTransport, Transport};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is fine; real environment variables still apply
    dotenvy::dotenv().ok();

    let config = Config::parse_args();

    init_tracing(&config);

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }

    info!("Starting geo API v{}", env!("CARGO_PKG_VERSION"));

    let auth = AuthConfig::from_tokens(config.auth_tokens.clone())?;
    if auth.is_enabled() {
        info!(tokens = auth.token_count(), "Write endpoints require a bearer token");
    } else {
        info!("No API_AUTH_TOKENS configured, write endpoints are open");
    }

    let settings = config.database_settings();
    info!(settings = ?settings, "Connecting to databases");
    let gateway = DatabaseGateway::initialize(
        &settings,
        &config.pool_options(),
        QueryExecutor::with_timeout(config.query_timeout_duration()),
    )
    .await;

    let state = Arc::new(AppState::new(Arc::new(gateway), Arc::new(auth)));
    let transport = HttpTransport::new(state, config.http_bind_addr(), &config.api_prefix);

    if let Err(e) = transport.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
