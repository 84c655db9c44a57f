//! Message Dispatcher
//!
//! Routes decoded inbound frames: price updates are merged into the
//! snapshot store, pongs update heartbeat liveness, and anything else is
//! counted and ignored. A bad frame never ends the session. Once the client
//! is stopped, frames are dropped without touching any state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::codec::JsonCodec;
use super::heartbeat::HeartbeatState;
use super::messages::InboundMessage;
use crate::domain::snapshot::SnapshotStore;
use crate::infrastructure::metrics;

/// Lifetime frame counters, shared with the consumer handle.
#[derive(Debug, Default)]
pub struct DispatchCounters {
    frames_received: AtomicU64,
    price_updates: AtomicU64,
    malformed_frames: AtomicU64,
    unknown_frames: AtomicU64,
}

/// Point-in-time copy of [`DispatchCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameCounts {
    /// Text frames handed to the dispatcher.
    pub frames_received: u64,
    /// Frames that carried price updates.
    pub price_updates: u64,
    /// Frames dropped as undecodable.
    pub malformed_frames: u64,
    /// Well-formed frames of an unrecognised kind.
    pub unknown_frames: u64,
}

impl DispatchCounters {
    /// Create zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the current values.
    #[must_use]
    pub fn snapshot(&self) -> FrameCounts {
        FrameCounts {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            price_updates: self.price_updates.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            unknown_frames: self.unknown_frames.load(Ordering::Relaxed),
        }
    }
}

/// What a single frame did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A price update was merged; `applied` entries reached the store.
    Prices {
        /// Entries merged.
        applied: usize,
    },
    /// A pong was recorded.
    Pong {
        /// Round trip to the last ping, if one was outstanding.
        rtt: Option<Duration>,
    },
    /// Unknown kind, ignored.
    Ignored,
    /// Undecodable frame, dropped.
    Malformed,
    /// Client stopped; nothing was recorded.
    Discarded,
}

/// Demultiplexes inbound text frames.
#[derive(Debug, Clone)]
pub struct MessageDispatcher {
    codec: JsonCodec,
    store: Arc<SnapshotStore>,
    heartbeat: Arc<HeartbeatState>,
    counters: Arc<DispatchCounters>,
    source: String,
    cancel: CancellationToken,
}

impl MessageDispatcher {
    /// Create a dispatcher writing into `store`.
    ///
    /// `source` tags entries whose frame does not name one. Once `cancel`
    /// fires, every frame is discarded.
    #[must_use]
    pub fn new(
        store: Arc<SnapshotStore>,
        heartbeat: Arc<HeartbeatState>,
        counters: Arc<DispatchCounters>,
        source: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            codec: JsonCodec::new(),
            store,
            heartbeat,
            counters,
            source: source.into(),
            cancel,
        }
    }

    /// Handle one inbound text frame.
    pub fn dispatch(&self, text: &str) -> DispatchOutcome {
        if self.cancel.is_cancelled() {
            return DispatchOutcome::Discarded;
        }
        self.counters.frames_received.fetch_add(1, Ordering::Relaxed);

        let message = match self.codec.decode(text) {
            Ok(message) => message,
            Err(e) => {
                self.counters.malformed_frames.fetch_add(1, Ordering::Relaxed);
                metrics::record_frame_malformed();
                tracing::warn!(error = %e, "Dropping malformed feed frame");
                return DispatchOutcome::Malformed;
            }
        };
        metrics::record_frame_received(message.kind());

        match message {
            InboundMessage::PriceUpdate(entries) => {
                self.counters.price_updates.fetch_add(1, Ordering::Relaxed);
                let received_at = Utc::now();
                let deltas = entries
                    .into_iter()
                    .filter(|entry| !entry.symbol.trim().is_empty())
                    .map(|entry| entry.into_delta(received_at, &self.source));

                let applied = self.store.merge(deltas);
                metrics::set_snapshot_symbols(self.store.len());
                tracing::trace!(applied, "Merged price update");
                DispatchOutcome::Prices { applied }
            }
            InboundMessage::Pong(_) => {
                let rtt = self.heartbeat.record_pong(Utc::now());
                if let Some(rtt) = rtt {
                    metrics::record_heartbeat_rtt(rtt);
                    tracing::debug!(rtt_ms = rtt.as_millis(), "Heartbeat acknowledged");
                }
                DispatchOutcome::Pong { rtt }
            }
            InboundMessage::Unknown { kind, .. } => {
                self.counters.unknown_frames.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(kind = %kind, "Ignoring unknown feed message");
                DispatchOutcome::Ignored
            }
        }
    }

    /// Handle one inbound binary frame.
    ///
    /// The feed speaks text, but UTF-8 JSON in a binary frame is accepted.
    pub fn dispatch_bytes(&self, bytes: &[u8]) -> DispatchOutcome {
        if self.cancel.is_cancelled() {
            return DispatchOutcome::Discarded;
        }
        if let Ok(text) = std::str::from_utf8(bytes) {
            return self.dispatch(text);
        }

        self.counters.frames_received.fetch_add(1, Ordering::Relaxed);
        self.counters.malformed_frames.fetch_add(1, Ordering::Relaxed);
        metrics::record_frame_malformed();
        tracing::warn!(len = bytes.len(), "Dropping non UTF-8 binary frame");
        DispatchOutcome::Malformed
    }
}
