//! Feed WebSocket Message Types
//!
//! Wire format types for the price feed. Every frame is a JSON text frame
//! holding one object tagged by a `type` field.
//!
//! # Client → Server
//! - `subscribe`: declares the complete desired symbol set
//! - `ping`: keepalive carrying the client's timestamp (epoch millis)
//!
//! # Server → Client
//! - `price_update`: a batch of per-symbol price deltas
//! - `pong`: keepalive acknowledgement
//! - anything else: tolerated and ignored

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::snapshot::PriceDelta;
use crate::domain::subscription::SymbolSet;

// =============================================================================
// Outbound
// =============================================================================

/// Messages sent by the client.
///
/// # Wire Format (JSON)
/// ```json
/// {"type": "subscribe", "symbols": ["BTC", "ETH"]}
/// {"type": "ping", "timestamp": 1736935200000}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Declare the complete set of symbols the server should push.
    Subscribe {
        /// Desired symbols.
        symbols: SymbolSet,
    },
    /// Keepalive.
    Ping {
        /// Client timestamp in epoch milliseconds.
        timestamp: i64,
    },
}

impl OutboundMessage {
    /// Build a subscribe message.
    #[must_use]
    pub const fn subscribe(symbols: SymbolSet) -> Self {
        Self::Subscribe { symbols }
    }

    /// Build a ping stamped with the given time.
    #[must_use]
    pub fn ping(at: DateTime<Utc>) -> Self {
        Self::Ping {
            timestamp: at.timestamp_millis(),
        }
    }

    /// Kind label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Ping { .. } => "ping",
        }
    }
}

// =============================================================================
// Inbound
// =============================================================================

/// One symbol's entry inside a `price_update` frame.
///
/// # Wire Format (JSON)
/// ```json
/// {"symbol": "BTC", "price": 107000, "change24h": -1.25, "timestamp": 1736935200000}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdateEntry {
    /// Instrument symbol.
    pub symbol: String,

    /// Price.
    pub price: f64,

    /// 24 hour change (optional).
    #[serde(default, rename = "change24h", skip_serializing_if = "Option::is_none")]
    pub change_24h: Option<f64>,

    /// Observation time in epoch milliseconds. Fractional values are
    /// truncated to whole milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,

    /// Optional source tag supplied by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl PriceUpdateEntry {
    /// Convert to a store delta.
    ///
    /// A missing or out-of-range timestamp falls back to `received_at`;
    /// a missing source falls back to `default_source`.
    #[must_use]
    pub fn into_delta(self, received_at: DateTime<Utc>, default_source: &str) -> PriceDelta {
        let observed_at = self
            .timestamp
            .filter(|millis| millis.is_finite())
            .and_then(|millis| {
                #[allow(clippy::cast_possible_truncation)]
                let whole = millis.trunc() as i64;
                Utc.timestamp_millis_opt(whole).single()
            })
            .unwrap_or(received_at);

        PriceDelta {
            symbol: self.symbol.trim().to_string(),
            price: self.price,
            change_24h: self.change_24h,
            observed_at,
            source: self.source.unwrap_or_else(|| default_source.to_string()),
        }
    }
}

/// Body of a `price_update` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdateFrame {
    /// Per-symbol entries in server order.
    pub data: Vec<PriceUpdateEntry>,
}

/// Body of a `pong` frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PongFrame {
    /// Echoed or server timestamp in epoch milliseconds, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

/// Decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// A batch of per-symbol price deltas.
    PriceUpdate(Vec<PriceUpdateEntry>),
    /// Keepalive acknowledgement.
    Pong(PongFrame),
    /// A well-formed frame of a kind this client does not understand.
    Unknown {
        /// The frame's `type` value.
        kind: String,
        /// The raw frame text.
        raw: String,
    },
}

impl InboundMessage {
    /// Kind label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::PriceUpdate(_) => "price_update",
            Self::Pong(_) => "pong",
            Self::Unknown { .. } => "unknown",
        }
    }
}
