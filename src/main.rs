use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use turnstile::config::Config;
use turnstile::health;
use turnstile::rate_limiter::RateLimiter;
use turnstile::server::{build_router, Server};
use turnstile::things::{InMemoryThingService, ThingService};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let config = Config::load()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("turnstile={},tower_http=debug", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    health::mark_started();

    tracing::info!("Starting turnstile service");
    tracing::info!(
        bind_addr = %config.bind_addr,
        global_prefix = %config.global_prefix,
        rate_limit = ?config.rate_limit(),
        cors = ?config.cors(),
        "Configuration loaded"
    );

    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit()));
    let things: Arc<dyn ThingService> = Arc::new(InMemoryThingService::new());
    let router = Arc::new(build_router(&config, rate_limiter, things));

    Server::new(&config, router)
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
