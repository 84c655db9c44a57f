//! Price Stream Client Binary
//!
//! Runs the supervised price feed client alongside its HTTP surface.
//!
//! # Usage
//!
//! ```bash
//! PRICE_FEED_URL=wss://prices.example.com/ws PRICE_FEED_SYMBOLS=BTC,ETH \
//!     cargo run --bin price-stream-client
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `PRICE_FEED_URL`: Feed WebSocket URL (`ws://` or `wss://`)
//!
//! ## Optional
//! - `PRICE_FEED_SYMBOLS`: Comma-separated initial symbols (default: none)
//! - `PRICE_FEED_HEALTH_PORT`: HTTP port (default: 8083)
//! - `PRICE_FEED_MAX_RECONNECT_ATTEMPTS`: Consecutive failures before giving up (default: 5)
//! - `PRICE_FEED_HEARTBEAT_INTERVAL_SECS`: Ping interval (default: 30)
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: true)
//! - `RUST_LOG`: Log filter (default: `price_stream_client=info`)

use std::sync::Arc;
use std::time::Duration;

use price_stream_client::infrastructure::health::{HealthServer, HealthServerState};
use price_stream_client::infrastructure::telemetry;
use price_stream_client::{ClientConfig, PriceStreamClient, PriceStreamConfig, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Upper bound on waiting for the supervisor to close its socket.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Already installed is fine.
    let _ = rustls::crypto::ring::default_provider().install_default();

    load_dotenv();

    let _telemetry_guard = telemetry::init()?;

    tracing::info!("Starting price stream client");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder unavailable, metrics disabled");
    }

    let config = ClientConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let (handle, client_task) = PriceStreamClient::start(
        PriceStreamConfig::from_client_config(&config),
        config.initial_symbols.clone(),
    );

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        handle.clone(),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    let health_task = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    await_shutdown().await;

    handle.stop();
    shutdown_token.cancel();

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, client_task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "Price stream client task failed"),
        Err(_) => tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Price stream client did not stop in time"
        ),
    }
    if let Err(e) = health_task.await {
        tracing::error!(error = %e, "Health server task failed");
    }

    tracing::info!("Price stream client stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &ClientConfig) {
    tracing::info!(
        url = %config.url,
        symbols = %config.initial_symbols,
        health_port = config.server.health_port,
        max_reconnect_attempts = config.feed.max_reconnect_attempts,
        "Configuration loaded"
    );
    tracing::debug!(
        heartbeat_interval_secs = config.feed.heartbeat_interval.as_secs(),
        max_missed_pongs = config.feed.max_missed_pongs,
        reconnect_delay_initial_ms = config.feed.reconnect_delay_initial.as_millis(),
        reconnect_delay_max_ms = config.feed.reconnect_delay_max.as_millis(),
        source = %config.feed.source,
        "Feed settings"
    );
}

/// Load a .env file from the current directory or the nearest ancestor.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for SIGINT or SIGTERM.
async fn await_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
