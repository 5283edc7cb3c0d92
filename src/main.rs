use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use widget_gateway::{broker::TokenBroker, config::Config, directory, web, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting widget gateway");

    // Load configuration from environment
    let config = Config::load()?;
    tracing::info!(config = ?config, "Configuration loaded");

    // Open the user directory selected by USER_STORE
    let directory = directory::open_directory(&config.store).await?;

    // Token broker with its own cache, shared by every request
    let broker = Arc::new(
        TokenBroker::new(
            config.upstream.clone(),
            config.http_connect_timeout_secs,
            config.http_request_timeout_secs,
        )
        .map_err(|e| anyhow::anyhow!("Failed to initialize token broker: {}", e))?,
    );

    let bind_address = config.bind_address();
    let state = Arc::new(AppState::new(Arc::new(config), directory, broker));
    let app = web::create_router(state);

    // Bind and serve
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", bind_address, e))?;
    tracing::info!("Gateway listening on {}", bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}
