//! Health Check, Prices and Metrics Endpoint
//!
//! HTTP surface for the price stream client: health checks for
//! orchestrators, the current price snapshot, the manual reconnect control,
//! and Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON status; 503 once automatic retries are exhausted
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (200 only while connected)
//! - `GET /prices` - Current price snapshot as JSON
//! - `POST /reconnect` - Manual reconnect (202)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::StatusIndicator;
use crate::domain::snapshot::PriceSnapshot;
use crate::domain::streaming::{ConnectionState, FeedStatus};
use crate::domain::subscription::SymbolSet;
use crate::infrastructure::feed::PriceStreamHandle;
use crate::infrastructure::feed::dispatcher::FrameCounts;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Client version.
    pub version: String,
    /// Seconds since the server state was built.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Connection state.
    pub state: ConnectionState,
    /// User-visible indicator.
    pub indicator: StatusIndicator,
    /// Most recent diagnostic message.
    pub last_error: Option<String>,
    /// Consecutive failed attempts.
    pub attempt_count: u32,
    /// Automatic retries are exhausted.
    pub exhausted: bool,
    /// Desired symbols.
    pub symbols: SymbolSet,
    /// Symbols with a known price.
    pub snapshot_size: usize,
    /// Last heartbeat acknowledgement.
    pub last_pong_at: Option<DateTime<Utc>>,
    /// Inbound frame counters.
    pub frames: FrameCounts,
}

/// Coarse health derived from the feed status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Connected to the feed.
    Healthy,
    /// Not connected, but recovering or idle.
    Degraded,
    /// Automatic retries exhausted; needs a manual reconnect.
    Unhealthy,
}

impl HealthStatus {
    fn from_status(status: &FeedStatus) -> Self {
        if status.state.is_connected() {
            Self::Healthy
        } else if status.exhausted {
            Self::Unhealthy
        } else {
            Self::Degraded
        }
    }
}

// =============================================================================
// Health Server State
// =============================================================================

/// State shared by every HTTP handler.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    feed: PriceStreamHandle,
}

impl HealthServerState {
    /// Wrap a feed handle for the HTTP handlers.
    #[must_use]
    pub fn new(version: String, feed: PriceStreamHandle) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            feed,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// HTTP server for probes, prices and the reconnect control.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a server bound to `port` on all interfaces.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Build the router without binding.
    #[must_use]
    pub fn router(state: Arc<HealthServerState>) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/prices", get(prices_handler))
            .route("/reconnect", post(reconnect_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
    }

    /// Serve until `cancel` fires.
    ///
    /// # Errors
    ///
    /// Fails when the port cannot be bound or axum stops with an
    /// error.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = Self::router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "HTTP server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.feed.connection_state().is_connected() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn prices_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let snapshot = state.feed.price_snapshot();
    Json(PriceSnapshot::clone(&snapshot))
}

async fn reconnect_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.feed.is_stopped() {
        return (StatusCode::CONFLICT, "STOPPED");
    }
    state.feed.reconnect();
    (StatusCode::ACCEPTED, "RECONNECTING")
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "metrics recorder not installed".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let status = state.feed.status();
    let diagnostics = state.feed.diagnostics();

    HealthResponse {
        status: HealthStatus::from_status(&status),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        state: status.state,
        indicator: StatusIndicator::from_status(&status),
        last_error: status.last_error,
        attempt_count: status.attempt_count,
        exhausted: status.exhausted,
        symbols: state.feed.desired_symbols(),
        snapshot_size: state.feed.price_snapshot().len(),
        last_pong_at: diagnostics.heartbeat.last_pong_at,
        frames: diagnostics.frames,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// The listener could not bind.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::feed::{PriceStreamClient, PriceStreamConfig};
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    fn state() -> (Arc<HealthServerState>, PriceStreamClient) {
        let (client, handle) = PriceStreamClient::new(
            PriceStreamConfig::new("ws://127.0.0.1:9"),
            SymbolSet::parse_list("BTC,ETH"),
        );
        (
            Arc::new(HealthServerState::new("0.1.0".to_string(), handle)),
            client,
        )
    }

    async fn call(state: Arc<HealthServerState>, method: &str, uri: &str) -> (StatusCode, String) {
        let response = HealthServer::router(state)
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn health_status_from_feed_status() {
        let mut status = FeedStatus {
            state: ConnectionState::Connected,
            ..FeedStatus::default()
        };
        assert_eq!(HealthStatus::from_status(&status), HealthStatus::Healthy);

        status.state = ConnectionState::Errored;
        assert_eq!(HealthStatus::from_status(&status), HealthStatus::Degraded);

        status.exhausted = true;
        assert_eq!(HealthStatus::from_status(&status), HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn liveness_is_always_ok() {
        let (state, _client) = state();
        assert_eq!(call(state, "GET", "/healthz").await, (StatusCode::OK, "OK".to_string()));
    }

    #[tokio::test]
    async fn not_ready_until_connected() {
        let (state, _client) = state();
        let (status, body) = call(state, "GET", "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "NOT READY");
    }

    #[tokio::test]
    async fn health_reports_feed_status() {
        let (state, _client) = state();
        let (status, body) = call(state, "GET", "/health").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["state"], "disconnected");
        assert_eq!(json["symbols"], serde_json::json!(["BTC", "ETH"]));
        assert_eq!(json["snapshot_size"], 0);
        assert_eq!(json["frames"]["malformed_frames"], 0);
    }

    #[tokio::test]
    async fn health_is_unavailable_once_exhausted() {
        let (client, handle) = PriceStreamClient::new(
            PriceStreamConfig {
                reconnect: crate::infrastructure::feed::reconnect::ReconnectConfig {
                    max_attempts: 1,
                    ..Default::default()
                },
                connect_timeout: Duration::from_millis(500),
                ..PriceStreamConfig::new("ws://127.0.0.1:9")
            },
            SymbolSet::new(),
        );
        let mut status_rx = handle.watch_status();
        let task = tokio::spawn(client.run());
        tokio::time::timeout(Duration::from_secs(5), status_rx.wait_for(|s| s.exhausted))
            .await
            .unwrap()
            .unwrap();

        let state = Arc::new(HealthServerState::new("0.1.0".to_string(), handle.clone()));
        let (status, body) = call(state, "GET", "/health").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["indicator"]["indicator"], "disconnected");

        handle.stop();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn prices_start_empty() {
        let (state, _client) = state();
        assert_eq!(call(state, "GET", "/prices").await, (StatusCode::OK, "{}".to_string()));
    }

    #[tokio::test]
    async fn reconnect_is_accepted_until_stopped() {
        let (state, _client) = state();
        let (status, _) = call(Arc::clone(&state), "POST", "/reconnect").await;
        assert_eq!(status, StatusCode::ACCEPTED);

        state.feed.stop();

        let (status, _) = call(state, "POST", "/reconnect").await;
        assert_eq!(status, StatusCode::CONFLICT);
    }
}
