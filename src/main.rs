use anyhow::Context;
use dotenvy::dotenv;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

mod config;
mod error;
mod handlers;
mod llm;
mod refinish;
mod state;
#[cfg(test)]
mod testing;
mod utils;

use config::Config;
use state::AppState;
use utils::http::init_http_client;
use utils::logging::init_logging;

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {err}");
        return;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let _guards = init_logging(&config::log_level());
    let config = Config::load()?;
    init_http_client(config.http_timeout_seconds);

    if !config.has_openai_key() {
        warn!("OPENAI_API_KEY is not set; both endpoints will answer with a configuration error");
    }
    if !config.has_replicate_token() {
        warn!("REPLICATE_API_TOKEN is not set; image transformation is unavailable");
    }

    let bind_addr = config.bind_addr.clone();
    info!(
        "Starting finishing studio with vision model {} and {} image model(s)",
        config.openai_vision_model,
        config.image_models.len()
    );
    info!(
        "Image model config path: {}",
        config.image_models_config_path.display()
    );
    for (index, model) in config.image_models.iter().enumerate() {
        info!("Image model {}: {}", index + 1, model.name);
    }

    let router = handlers::build_router(AppState::from_config(config));
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!("Listening on {}", bind_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server stopped");
    Ok(())
}
