//! Client Configuration Settings
//!
//! Configuration types for the price stream client, loaded from environment
//! variables. Numeric values that fail to parse fall back to their defaults;
//! only the feed URL is mandatory.

use std::time::Duration;

use crate::domain::subscription::SymbolSet;

/// Feed connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSettings {
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Unanswered pings that force a reconnect (0 = heartbeat is diagnostic only).
    pub max_missed_pongs: u32,
    /// Delay after the first failure.
    pub reconnect_delay_initial: Duration,
    /// Upper bound on the backoff delay.
    pub reconnect_delay_max: Duration,
    /// Backoff growth factor.
    pub reconnect_delay_multiplier: f64,
    /// Backoff jitter fraction (0 = none).
    pub reconnect_jitter: f64,
    /// Consecutive failures before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Fixed pause before a manual reconnect starts its attempt.
    pub reconnect_grace: Duration,
    /// Bound on transport establishment.
    pub connect_timeout: Duration,
    /// Capacity of the command channel into the supervisor.
    pub command_capacity: usize,
    /// Source tag stamped on entries whose frame names none.
    pub source: String,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            max_missed_pongs: 0,
            reconnect_delay_initial: Duration::from_millis(1_000),
            reconnect_delay_max: Duration::from_millis(10_000),
            reconnect_delay_multiplier: 2.0,
            reconnect_jitter: 0.0,
            max_reconnect_attempts: 5,
            reconnect_grace: Duration::from_millis(100),
            connect_timeout: Duration::from_secs(10),
            command_capacity: 64,
            source: "websocket".to_string(),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health, metrics and prices HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// WebSocket URL of the feed.
    pub url: String,
    /// Symbols to subscribe to on start.
    pub initial_symbols: SymbolSet,
    /// Feed connection settings.
    pub feed: FeedSettings,
    /// HTTP server settings.
    pub server: ServerSettings,
}

impl ClientConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `PRICE_FEED_URL` is missing, empty, or not a
    /// `ws://`/`wss://` URL.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`ClientConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup("PRICE_FEED_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("PRICE_FEED_URL".to_string()))?;
        let url = url.trim().to_string();

        if url.is_empty() {
            return Err(ConfigError::EmptyValue("PRICE_FEED_URL".to_string()));
        }
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(ConfigError::InvalidUrl(url));
        }

        let initial_symbols = lookup("PRICE_FEED_SYMBOLS")
            .map(|list| SymbolSet::parse_list(&list))
            .unwrap_or_default();

        let defaults = FeedSettings::default();
        let feed = FeedSettings {
            heartbeat_interval: parse_duration_secs(
                &lookup,
                "PRICE_FEED_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval,
            ),
            max_missed_pongs: parse(&lookup, "PRICE_FEED_MAX_MISSED_PONGS", defaults.max_missed_pongs),
            reconnect_delay_initial: parse_duration_millis(
                &lookup,
                "PRICE_FEED_RECONNECT_DELAY_INITIAL_MS",
                defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_duration_millis(
                &lookup,
                "PRICE_FEED_RECONNECT_DELAY_MAX_MS",
                defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_f64(
                &lookup,
                "PRICE_FEED_RECONNECT_DELAY_MULTIPLIER",
                defaults.reconnect_delay_multiplier,
                |m| m >= 1.0,
            ),
            reconnect_jitter: parse_f64(
                &lookup,
                "PRICE_FEED_RECONNECT_JITTER",
                defaults.reconnect_jitter,
                |j| (0.0..1.0).contains(&j),
            ),
            max_reconnect_attempts: parse(
                &lookup,
                "PRICE_FEED_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            reconnect_grace: parse_duration_millis(
                &lookup,
                "PRICE_FEED_RECONNECT_GRACE_MS",
                defaults.reconnect_grace,
            ),
            connect_timeout: parse_duration_secs(
                &lookup,
                "PRICE_FEED_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout,
            ),
            command_capacity: parse(&lookup, "PRICE_FEED_STATUS_CAPACITY", defaults.command_capacity)
                .max(1),
            source: lookup("PRICE_FEED_SOURCE")
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.source),
        };

        let server = ServerSettings {
            health_port: parse(
                &lookup,
                "PRICE_FEED_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        Ok(Self {
            url,
            initial_symbols,
            feed,
            server,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Feed URL is not a WebSocket URL.
    #[error("feed URL must start with ws:// or wss://, got {0}")]
    InvalidUrl(String),
}

fn parse<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_f64<F>(lookup: &F, key: &str, default: f64, valid: impl Fn(f64) -> bool) -> f64
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && valid(*v))
        .unwrap_or(default)
}

fn parse_duration_secs<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_duration_millis<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
