//! Feed Connection State
//!
//! Connection lifecycle types shared between the supervisor (sole writer)
//! and any number of readers.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

/// Lifecycle state of the single feed connection.
///
/// Exactly one value holds at any time. `Connected` holds if and only if a
/// live transport exists that has not been closed or errored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No transport and no attempt in progress.
    #[default]
    Disconnected,
    /// Transport establishment in progress.
    Connecting,
    /// Live transport.
    Connected,
    /// Last attempt or session failed; a retry may be pending.
    Errored,
}

impl ConnectionState {
    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Errored => "errored",
        }
    }

    /// Numeric encoding used for the connection-state gauge.
    #[must_use]
    pub const fn as_gauge(self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Connected => 2.0,
            Self::Errored => 3.0,
        }
    }

    /// Check if a live transport exists.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time status of the feed client as seen by consumers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeedStatus {
    /// Current connection state.
    pub state: ConnectionState,
    /// Most recent diagnostic message, cleared on a successful connect.
    pub last_error: Option<String>,
    /// Consecutive failed attempts since the last successful connect.
    pub attempt_count: u32,
    /// Automatic retries are exhausted; only a manual reconnect restarts.
    pub exhausted: bool,
    /// Delay before the next scheduled automatic attempt, if any.
    #[serde(serialize_with = "serialize_opt_millis", rename = "next_retry_in_ms")]
    pub next_retry_in: Option<Duration>,
    /// Identifier of the current (or most recent) connection session.
    pub session_id: Option<Uuid>,
}

impl FeedStatus {
    /// Check whether a manual retry control should be offered.
    #[must_use]
    pub const fn needs_manual_retry(&self) -> bool {
        self.exhausted
    }
}

#[allow(clippy::ref_option)]
fn serialize_opt_millis<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match value {
        Some(duration) => {
            serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
        }
        None => serializer.serialize_none(),
    }
}
