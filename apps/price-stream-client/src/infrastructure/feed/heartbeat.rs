//! Heartbeat Manager
//!
//! Keepalive for the feed connection. While a session is live the manager
//! asks the supervisor to send an application-level `ping` every
//! `ping_interval`; the dispatcher records the matching `pong`.
//!
//! The heartbeat is diagnostic by default: a missing pong never ends a
//! session on its own. Setting `max_missed_pongs` above zero turns that many
//! consecutive unanswered pings into a [`HeartbeatEvent::Timeout`], which
//! the supervisor treats as a transient transport failure.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between pings.
    pub ping_interval: Duration,
    /// Consecutive unanswered pings that force a reconnect (0 = never).
    pub max_missed_pongs: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            max_missed_pongs: 0,
        }
    }
}

/// Events emitted by the heartbeat manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Send a ping now.
    SendPing,
    /// Too many pings went unanswered.
    Timeout {
        /// Unanswered pings at the time of the check.
        missed: u32,
    },
}

/// Liveness bookkeeping shared between the manager, the supervisor and the
/// dispatcher. Outlives individual sessions so diagnostics survive an outage.
#[derive(Debug, Default)]
pub struct HeartbeatState {
    last_ping_at: RwLock<Option<DateTime<Utc>>>,
    last_pong_at: RwLock<Option<DateTime<Utc>>>,
    last_rtt: RwLock<Option<Duration>>,
    outstanding: AtomicU32,
    pings_sent: AtomicU64,
    pongs_received: AtomicU64,
}

/// Point-in-time copy of [`HeartbeatState`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HeartbeatSnapshot {
    /// When the last ping went out.
    pub last_ping_at: Option<DateTime<Utc>>,
    /// When the last pong (application or transport level) arrived.
    pub last_pong_at: Option<DateTime<Utc>>,
    /// Most recent measured round trip in milliseconds.
    pub last_rtt_ms: Option<u64>,
    /// Pings sent since the last pong.
    pub outstanding: u32,
    /// Pings sent over the client's lifetime.
    pub pings_sent: u64,
    /// Pongs received over the client's lifetime.
    pub pongs_received: u64,
}

impl HeartbeatState {
    /// Create new heartbeat state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a ping stamped `at` was written to the transport.
    pub fn mark_ping_sent(&self, at: DateTime<Utc>) {
        *self.last_ping_at.write() = Some(at);
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        self.pings_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a pong received at `now`, returning the round trip to the
    /// last ping if one is outstanding.
    pub fn record_pong(&self, now: DateTime<Utc>) -> Option<Duration> {
        *self.last_pong_at.write() = Some(now);
        self.pongs_received.fetch_add(1, Ordering::Relaxed);
        let was_outstanding = self.outstanding.swap(0, Ordering::SeqCst) > 0;

        let rtt = (*self.last_ping_at.read())
            .filter(|_| was_outstanding)
            .and_then(|sent| (now - sent).to_std().ok());
        if rtt.is_some() {
            *self.last_rtt.write() = rtt;
        }
        rtt
    }

    /// Pings sent since the last pong.
    #[must_use]
    pub fn outstanding(&self) -> u32 {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// When the last pong arrived.
    #[must_use]
    pub fn last_pong_at(&self) -> Option<DateTime<Utc>> {
        *self.last_pong_at.read()
    }

    /// Clear per-session state at the start of a new session.
    pub fn reset(&self) {
        *self.last_ping_at.write() = None;
        self.outstanding.store(0, Ordering::SeqCst);
    }

    /// Copy the current values.
    #[must_use]
    pub fn snapshot(&self) -> HeartbeatSnapshot {
        HeartbeatSnapshot {
            last_ping_at: *self.last_ping_at.read(),
            last_pong_at: *self.last_pong_at.read(),
            last_rtt_ms: self
                .last_rtt
                .read()
                .map(|rtt| u64::try_from(rtt.as_millis()).unwrap_or(u64::MAX)),
            outstanding: self.outstanding(),
            pings_sent: self.pings_sent.load(Ordering::Relaxed),
            pongs_received: self.pongs_received.load(Ordering::Relaxed),
        }
    }
}

/// Ticks the heartbeat for one session.
///
/// # Example
///
/// ```rust,no_run
/// use price_stream_client::infrastructure::feed::heartbeat::{
///     HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState,
/// };
/// use std::sync::Arc;
/// use tokio::sync::mpsc;
/// use tokio_util::sync::CancellationToken;
///
/// async fn example() {
///     let state = Arc::new(HeartbeatState::new());
///     let (event_tx, mut event_rx) = mpsc::channel(4);
///     let cancel = CancellationToken::new();
///
///     let manager =
///         HeartbeatManager::new(HeartbeatConfig::default(), state.clone(), event_tx, cancel.clone());
///     tokio::spawn(manager.run());
///
///     while let Some(event) = event_rx.recv().await {
///         match event {
///             HeartbeatEvent::SendPing => state.mark_ping_sent(chrono::Utc::now()),
///             HeartbeatEvent::Timeout { .. } => break,
///         }
///     }
///     cancel.cancel();
/// }
/// ```
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatManager {
    /// Create a new heartbeat manager.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled, the receiver goes away, or a timeout fires.
    ///
    /// The first ping is due one full interval after start.
    pub async fn run(self) {
        let period = self.config.ping_interval.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat manager cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if self.check_and_ping().await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    async fn check_and_ping(&self) -> Result<(), HeartbeatError> {
        let missed = self.state.outstanding();
        let limit = self.config.max_missed_pongs;

        if limit > 0 && missed >= limit {
            tracing::warn!(missed, limit, "Heartbeat pongs missed");
            let _ = self.event_tx.send(HeartbeatEvent::Timeout { missed }).await;
            return Err(HeartbeatError::MissedPongs(missed));
        }

        if missed > 0 {
            tracing::debug!(missed, "Previous ping still unanswered");
        }

        self.event_tx
            .send(HeartbeatEvent::SendPing)
            .await
            .map_err(|_| HeartbeatError::ChannelClosed)
    }
}

/// Error type for heartbeat operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HeartbeatError {
    /// Consecutive pings went unanswered.
    #[error("{0} consecutive heartbeat pings unanswered")]
    MissedPongs(u32),
    /// The session stopped listening.
    #[error("heartbeat event channel closed")]
    ChannelClosed,
}
