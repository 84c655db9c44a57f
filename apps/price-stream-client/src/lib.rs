#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Price Stream Client - Supervised Real-Time Price Feed
//!
//! Maintains one WebSocket connection to a price feed, keeps the
//! server-side subscription in sync with the desired symbol set, and merges
//! price updates into a snapshot that dashboard surfaces read.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: Plain data types and state
//!   - `streaming`: Connection state and consumer-visible status
//!   - `subscription`: Desired symbol set
//!   - `snapshot`: Last-known prices and the snapshot store
//!
//! - **Application**: Consumer contract and presentation
//!   - `ports`: `PriceFeed` trait
//!   - `services`: Status indicator and manual retry
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `feed`: WebSocket codec, heartbeat, backoff and supervisor
//!   - `config`: Environment configuration
//!   - `health`: Health, prices and reconnect HTTP endpoints
//!   - `metrics`: Prometheus instrumentation
//!   - `telemetry`: Logging and OpenTelemetry
//!
//! # Data Flow
//!
//! ```text
//!                    subscribe / ping
//!   Supervisor ───────────────────────────►  Price feed WS
//!       ▲    ◄───────────────────────────        │
//!       │         price_update / pong            │
//!   commands                                     ▼
//!       │                                   Dispatcher
//!   PriceStreamHandle ◄── watch ── SnapshotStore ◄┘
//!       │
//!       └──► status / snapshot readers, HTTP endpoints
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core feed types with no I/O.
pub mod domain;

/// Application layer - Consumer contract and services.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::snapshot::{PriceDelta, PriceEntry, PriceSnapshot, SnapshotStore};
pub use domain::streaming::{ConnectionState, FeedStatus};
pub use domain::subscription::{SubscriptionManager, Symbol, SymbolSet};

// Application
pub use application::ports::PriceFeed;
pub use application::services::{FeedStatusService, RetryOutcome, StatusIndicator};

// Feed client
pub use infrastructure::feed::{
    FeedDiagnostics, PriceStreamClient, PriceStreamConfig, PriceStreamHandle, StreamClientError,
};

// Infrastructure config
pub use infrastructure::config::{ClientConfig, ConfigError, FeedSettings, ServerSettings};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{
    TelemetryConfig, TelemetryError, TelemetryGuard, init as init_telemetry,
};
