use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

use sentiment_engine::{config::ServeConfig, routes, telemetry, SentimentEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init("sentiment_engine=info,tower_http=debug");

    let config = ServeConfig::load()?;
    info!("Loaded configuration: {:?}", config);

    // Refuse to start without a usable model
    let engine = SentimentEngine::load(&config.artifact_dir)?;
    let app = routes::router(Arc::new(engine));

    info!("Starting Sentiment Engine on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    warn!("Shutdown signal received, starting graceful shutdown");
}
