//! Price Stream Client
//!
//! The connection supervisor for the price feed and the cloneable handle
//! consumers use to read and steer it.
//!
//! # Lifecycle
//!
//! ```text
//!            ┌──────────── backoff elapsed ───────────┐
//!            ▼                                        │
//!   ──► Connect ──ok──► Session ──abnormal close──► fail ──budget left──► Backoff
//!            │             │                          │
//!            │             ├──normal close──► Idle ◄──┘ budget spent
//!            │             │                   │
//!            └─ reconnect ─┴──── reconnect ────┴──► Grace ──► Connect
//! ```
//!
//! One tokio task owns the transport and is the only writer of connection
//! state and the snapshot store. Consumers talk to it through a command
//! channel and observe it through `watch` channels. `stop()` cancels the
//! task from any phase.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{Sink, SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::codec::{CodecError, JsonCodec};
use super::dispatcher::{DispatchCounters, FrameCounts, MessageDispatcher};
use super::heartbeat::{
    HeartbeatConfig, HeartbeatError, HeartbeatEvent, HeartbeatManager, HeartbeatSnapshot,
    HeartbeatState,
};
use super::messages::OutboundMessage;
use super::reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};
use crate::application::ports::PriceFeed;
use crate::domain::snapshot::{PriceSnapshot, SnapshotStore};
use crate::domain::streaming::{ConnectionState, FeedStatus};
use crate::domain::subscription::{SubscriptionManager, SymbolSet};
use crate::infrastructure::config::{ClientConfig, FeedSettings};
use crate::infrastructure::metrics;

type FeedStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Upper bound on sending our own close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end a connection attempt or session.
///
/// These never reach consumers as `Err`; the supervisor records them in
/// [`FeedStatus::last_error`] and schedules a retry.
#[derive(Debug, thiserror::Error)]
pub enum StreamClientError {
    /// Transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// Transport establishment took too long.
    #[error("connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// Outbound frame could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Heartbeat gave up on the connection.
    #[error("heartbeat failure: {0}")]
    Heartbeat(#[from] HeartbeatError),

    /// Server closed with a code other than normal closure.
    #[error("connection closed by server (code {code}){reason}")]
    AbnormalClose {
        /// WebSocket close code (1005 when none was given).
        code: u16,
        /// Close reason, prefixed with `": "` when present.
        reason: String,
    },

    /// Stream ended without a close frame.
    #[error("connection lost")]
    ConnectionLost,
}

impl StreamClientError {
    fn abnormal_close(frame: Option<&CloseFrame>) -> Self {
        match frame {
            Some(frame) if !frame.reason.is_empty() => Self::AbnormalClose {
                code: u16::from(frame.code),
                reason: format!(": {}", frame.reason.as_str()),
            },
            Some(frame) => Self::AbnormalClose {
                code: u16::from(frame.code),
                reason: String::new(),
            },
            None => Self::AbnormalClose {
                code: u16::from(CloseCode::Status),
                reason: String::new(),
            },
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the price stream client.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceStreamConfig {
    /// WebSocket URL.
    pub url: String,
    /// Backoff configuration.
    pub reconnect: ReconnectConfig,
    /// Heartbeat configuration.
    pub heartbeat: HeartbeatConfig,
    /// Pause before a manual reconnect's attempt.
    pub reconnect_grace: Duration,
    /// Bound on transport establishment.
    pub connect_timeout: Duration,
    /// Command channel capacity.
    pub command_capacity: usize,
    /// Source tag for entries that carry none.
    pub source: String,
}

impl PriceStreamConfig {
    /// Create a configuration with default settings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self::from_settings(url, &FeedSettings::default())
    }

    /// Create a configuration from loaded feed settings.
    #[must_use]
    pub fn from_settings(url: impl Into<String>, settings: &FeedSettings) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectConfig {
                initial_delay: settings.reconnect_delay_initial,
                max_delay: settings.reconnect_delay_max,
                multiplier: settings.reconnect_delay_multiplier,
                jitter_factor: settings.reconnect_jitter,
                max_attempts: settings.max_reconnect_attempts,
            },
            heartbeat: HeartbeatConfig {
                ping_interval: settings.heartbeat_interval,
                max_missed_pongs: settings.max_missed_pongs,
            },
            reconnect_grace: settings.reconnect_grace,
            connect_timeout: settings.connect_timeout,
            command_capacity: settings.command_capacity.max(1),
            source: settings.source.clone(),
        }
    }

    /// Create a configuration from the full client configuration.
    #[must_use]
    pub fn from_client_config(config: &ClientConfig) -> Self {
        Self::from_settings(config.url.clone(), &config.feed)
    }
}

// =============================================================================
// Shared State
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    SymbolsChanged,
    Reconnect,
}

/// State visible to both the supervisor and every handle.
#[derive(Debug)]
struct Shared {
    status_tx: watch::Sender<FeedStatus>,
    store: Arc<SnapshotStore>,
    subscriptions: SubscriptionManager,
    heartbeat: Arc<HeartbeatState>,
    counters: Arc<DispatchCounters>,
}

/// Counters and liveness details for observability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeedDiagnostics {
    /// Inbound frame counters.
    pub frames: FrameCounts,
    /// Heartbeat bookkeeping.
    pub heartbeat: HeartbeatSnapshot,
}

// =============================================================================
// Handle
// =============================================================================

/// Cloneable consumer handle for a running [`PriceStreamClient`].
///
/// Dropping every handle stops the client.
#[derive(Debug, Clone)]
pub struct PriceStreamHandle {
    shared: Arc<Shared>,
    command_tx: mpsc::Sender<Command>,
    cancel: CancellationToken,
}

impl PriceStreamHandle {
    /// Current status.
    #[must_use]
    pub fn status(&self) -> FeedStatus {
        self.shared.status_tx.borrow().clone()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.status_tx.borrow().state
    }

    /// Most recent diagnostic message.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.shared.status_tx.borrow().last_error.clone()
    }

    /// Current price snapshot.
    #[must_use]
    pub fn price_snapshot(&self) -> Arc<PriceSnapshot> {
        self.shared.store.snapshot()
    }

    /// Desired symbol set.
    #[must_use]
    pub fn desired_symbols(&self) -> SymbolSet {
        self.shared.subscriptions.desired()
    }

    /// Replace the desired symbol set.
    ///
    /// The full set is sent to the feed immediately when connected, even if
    /// it equals the current one; otherwise it is used on the next connect.
    pub fn set_desired_symbols(&self, symbols: SymbolSet) {
        if self.is_stopped() {
            tracing::debug!("Ignoring symbol update after stop");
            return;
        }
        self.shared.subscriptions.set_desired(symbols);
        self.send_command(Command::SymbolsChanged);
    }

    /// Tear down any connection, clear retry state and connect again after
    /// the grace delay. Repeated calls before the attempt starts collapse
    /// into one.
    pub fn reconnect(&self) {
        if self.is_stopped() {
            tracing::debug!("Ignoring reconnect after stop");
            return;
        }
        self.send_command(Command::Reconnect);
    }

    /// Close the connection with a normal code and stop for good.
    ///
    /// Safe from any state and idempotent. When this returns, the status
    /// reads `Disconnected` and neither the status nor the snapshot will be
    /// written again.
    pub fn stop(&self) {
        let mut stopped_now = false;
        self.shared.status_tx.send_if_modified(|status| {
            if self.cancel.is_cancelled() {
                return false;
            }
            self.cancel.cancel();
            stopped_now = true;
            status.state = ConnectionState::Disconnected;
            status.next_retry_in = None;
            true
        });
        self.shared.store.freeze();

        if stopped_now {
            metrics::set_connection_state(ConnectionState::Disconnected);
            tracing::info!("Price stream client stopped");
        }
    }

    /// Check whether [`PriceStreamHandle::stop`] has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Observe status changes.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<FeedStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Observe snapshot changes.
    #[must_use]
    pub fn watch_snapshot(&self) -> watch::Receiver<Arc<PriceSnapshot>> {
        self.shared.store.subscribe()
    }

    /// Frame counters and heartbeat details.
    #[must_use]
    pub fn diagnostics(&self) -> FeedDiagnostics {
        FeedDiagnostics {
            frames: self.shared.counters.snapshot(),
            heartbeat: self.shared.heartbeat.snapshot(),
        }
    }

    fn send_command(&self, command: Command) {
        match self.command_tx.try_send(command) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(command)) => {
                tracing::warn!(?command, "Feed command queue full, dropping command");
            }
            Err(mpsc::error::TrySendError::Closed(command)) => {
                tracing::debug!(?command, "Feed client no longer running");
            }
        }
    }
}

impl PriceFeed for PriceStreamHandle {
    fn connection_state(&self) -> ConnectionState {
        Self::connection_state(self)
    }

    fn status(&self) -> FeedStatus {
        Self::status(self)
    }

    fn price_snapshot(&self) -> Arc<PriceSnapshot> {
        Self::price_snapshot(self)
    }

    fn last_error(&self) -> Option<String> {
        Self::last_error(self)
    }

    fn desired_symbols(&self) -> SymbolSet {
        Self::desired_symbols(self)
    }

    fn set_desired_symbols(&self, symbols: SymbolSet) {
        Self::set_desired_symbols(self, symbols);
    }

    fn reconnect(&self) {
        Self::reconnect(self);
    }

    fn stop(&self) {
        Self::stop(self);
    }

    fn watch_status(&self) -> watch::Receiver<FeedStatus> {
        Self::watch_status(self)
    }

    fn watch_snapshot(&self) -> watch::Receiver<Arc<PriceSnapshot>> {
        Self::watch_snapshot(self)
    }
}

// =============================================================================
// Supervisor
// =============================================================================

enum Phase {
    Connect,
    Backoff(Duration),
    Idle,
    Grace,
    Stopped,
}

enum SessionEnd {
    Stopped,
    ClosedNormally,
    ManualReconnect,
    Failed(StreamClientError),
}

/// Connection supervisor for the price feed.
///
/// # Example
///
/// ```rust,no_run
/// use price_stream_client::domain::subscription::SymbolSet;
/// use price_stream_client::infrastructure::feed::{PriceStreamClient, PriceStreamConfig};
///
/// # async fn example() {
/// let config = PriceStreamConfig::new("wss://feed.example.com/prices");
/// let (handle, task) = PriceStreamClient::start(config, SymbolSet::parse_list("BTC,ETH"));
///
/// let mut status = handle.watch_status();
/// while status.changed().await.is_ok() {
///     if status.borrow().state.is_connected() {
///         break;
///     }
/// }
/// println!("BTC: {:?}", handle.price_snapshot().price("BTC"));
///
/// handle.stop();
/// let _ = task.await;
/// # }
/// ```
pub struct PriceStreamClient {
    config: PriceStreamConfig,
    shared: Arc<Shared>,
    command_rx: mpsc::Receiver<Command>,
    cancel: CancellationToken,
    codec: JsonCodec,
    dispatcher: MessageDispatcher,
    policy: ReconnectPolicy,
}

impl PriceStreamClient {
    /// Create a client and its handle without starting it.
    #[must_use]
    pub fn new(config: PriceStreamConfig, initial_symbols: SymbolSet) -> (Self, PriceStreamHandle) {
        let (status_tx, _status_rx) = watch::channel(FeedStatus::default());
        let (command_tx, command_rx) = mpsc::channel(config.command_capacity.max(1));
        let cancel = CancellationToken::new();

        let subscriptions = SubscriptionManager::new(initial_symbols);

        let shared = Arc::new(Shared {
            status_tx,
            store: Arc::new(SnapshotStore::new()),
            subscriptions,
            heartbeat: Arc::new(HeartbeatState::new()),
            counters: Arc::new(DispatchCounters::new()),
        });

        let dispatcher = MessageDispatcher::new(
            Arc::clone(&shared.store),
            Arc::clone(&shared.heartbeat),
            Arc::clone(&shared.counters),
            config.source.clone(),
            cancel.clone(),
        );

        let handle = PriceStreamHandle {
            shared: Arc::clone(&shared),
            command_tx,
            cancel: cancel.clone(),
        };

        let client = Self {
            policy: ReconnectPolicy::new(config.reconnect.clone()),
            config,
            shared,
            command_rx,
            cancel,
            codec: JsonCodec::new(),
            dispatcher,
        };

        (client, handle)
    }

    /// Create a client and spawn it on the current runtime.
    #[must_use]
    pub fn start(
        config: PriceStreamConfig,
        initial_symbols: SymbolSet,
    ) -> (PriceStreamHandle, JoinHandle<()>) {
        let (client, handle) = Self::new(config, initial_symbols);
        (handle, tokio::spawn(client.run()))
    }

    /// Run the supervisor until stopped or every handle is dropped.
    pub async fn run(mut self) {
        tracing::info!(
            url = %self.config.url,
            symbols = %self.shared.subscriptions.desired(),
            "Price stream client starting"
        );

        let mut phase = Phase::Connect;
        loop {
            phase = match phase {
                Phase::Connect => self.connect().await,
                Phase::Backoff(delay) => self.backoff(delay).await,
                Phase::Idle => self.idle().await,
                Phase::Grace => self.grace().await,
                Phase::Stopped => break,
            };
        }

        self.publish(|status| {
            status.state = ConnectionState::Disconnected;
            status.next_retry_in = None;
        });
        tracing::debug!("Price stream supervisor exited");
    }

    async fn connect(&mut self) -> Phase {
        let session_id = Uuid::new_v4();
        let attempt = self.policy.attempt_count() + 1;
        self.publish(|status| {
            status.state = ConnectionState::Connecting;
            status.next_retry_in = None;
            status.session_id = Some(session_id);
        });
        tracing::info!(%session_id, attempt, url = %self.config.url, "Connecting to price feed");

        let connect = tokio::time::timeout(
            self.config.connect_timeout,
            tokio_tungstenite::connect_async(self.config.url.clone()),
        );
        tokio::pin!(connect);

        let result = loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Phase::Stopped,
                command = self.command_rx.recv() => match command {
                    None => return Phase::Stopped,
                    Some(Command::Reconnect) => {
                        tracing::info!(%session_id, "Abandoning connection attempt for manual reconnect");
                        return Phase::Grace;
                    }
                    // Sent once the connection is up.
                    Some(Command::SymbolsChanged) => {}
                },
                result = &mut connect => break result,
            }
        };

        let stream = match result {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => return self.fail(e.into()),
            Err(_) => return self.fail(StreamClientError::ConnectTimeout(self.config.connect_timeout)),
        };

        self.policy.reset();
        let (end, heartbeat) = self.run_session(stream, session_id).await;
        let next = match end {
            SessionEnd::Stopped => Phase::Stopped,
            SessionEnd::ClosedNormally => {
                tracing::info!(%session_id, "Price feed closed the connection normally");
                self.publish(|status| status.state = ConnectionState::Disconnected);
                Phase::Idle
            }
            SessionEnd::ManualReconnect => {
                self.publish(|status| status.state = ConnectionState::Disconnected);
                Phase::Grace
            }
            SessionEnd::Failed(error) => self.fail(error),
        };

        // Joined only after the state above has left Connected.
        if let Some(heartbeat) = heartbeat
            && let Err(e) = heartbeat.await
        {
            tracing::warn!(error = %e, "Heartbeat task ended abnormally");
        }
        next
    }

    /// Drive one live connection. The heartbeat task is cancelled but not
    /// joined; the caller joins it after publishing the next state.
    async fn run_session(
        &mut self,
        stream: FeedStream,
        session_id: Uuid,
    ) -> (SessionEnd, Option<JoinHandle<()>>) {
        let (mut write, mut read) = stream.split();

        if self.cancel.is_cancelled() {
            close(&mut write).await;
            return (SessionEnd::Stopped, None);
        }
        self.shared.heartbeat.reset();
        self.publish(|status| {
            status.state = ConnectionState::Connected;
            status.last_error = None;
            status.attempt_count = 0;
            status.exhausted = false;
            status.next_retry_in = None;
            status.session_id = Some(session_id);
        });

        let symbols = self.shared.subscriptions.desired();
        if let Err(e) = self
            .send(&mut write, &OutboundMessage::subscribe(symbols.clone()))
            .await
        {
            return (SessionEnd::Failed(e), None);
        }
        tracing::info!(%session_id, %symbols, "Connected to price feed and subscribed");

        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel(4);
        let heartbeat_cancel = self.cancel.child_token();
        let heartbeat = tokio::spawn(
            HeartbeatManager::new(
                self.config.heartbeat.clone(),
                Arc::clone(&self.shared.heartbeat),
                heartbeat_tx,
                heartbeat_cancel.clone(),
            )
            .run(),
        );
        let mut heartbeat_alive = true;

        let end = loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    close(&mut write).await;
                    break SessionEnd::Stopped;
                }
                command = self.command_rx.recv() => match command {
                    None => {
                        close(&mut write).await;
                        break SessionEnd::Stopped;
                    }
                    Some(Command::Reconnect) => {
                        tracing::info!(%session_id, "Closing connection for manual reconnect");
                        close(&mut write).await;
                        break SessionEnd::ManualReconnect;
                    }
                    Some(Command::SymbolsChanged) => {
                        let desired = self.shared.subscriptions.desired();
                        if let Err(e) = self
                            .send(&mut write, &OutboundMessage::subscribe(desired.clone()))
                            .await
                        {
                            break SessionEnd::Failed(e);
                        }
                        tracing::info!(%session_id, symbols = %desired, "Subscription updated");
                    }
                },
                event = heartbeat_rx.recv(), if heartbeat_alive => match event {
                    Some(HeartbeatEvent::SendPing) => {
                        let now = Utc::now();
                        if let Err(e) = self.send(&mut write, &OutboundMessage::ping(now)).await {
                            break SessionEnd::Failed(e);
                        }
                        if !self.cancel.is_cancelled() {
                            self.shared.heartbeat.mark_ping_sent(now);
                        }
                    }
                    Some(HeartbeatEvent::Timeout { missed }) => {
                        break SessionEnd::Failed(HeartbeatError::MissedPongs(missed).into());
                    }
                    None => heartbeat_alive = false,
                },
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        self.dispatcher.dispatch(text.as_str());
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        self.dispatcher.dispatch_bytes(&bytes);
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(e) = write.send(Message::Pong(payload)).await {
                            break SessionEnd::Failed(e.into());
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        if !self.cancel.is_cancelled() {
                            self.shared.heartbeat.record_pong(Utc::now());
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        if frame.as_ref().is_some_and(|f| f.code == CloseCode::Normal) {
                            break SessionEnd::ClosedNormally;
                        }
                        break SessionEnd::Failed(StreamClientError::abnormal_close(frame.as_ref()));
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => break SessionEnd::Failed(e.into()),
                    None => break SessionEnd::Failed(StreamClientError::ConnectionLost),
                },
            }
        };

        heartbeat_cancel.cancel();
        (end, Some(heartbeat))
    }

    fn fail(&mut self, error: StreamClientError) -> Phase {
        let message = error.to_string();

        if let Some(delay) = self.policy.next_delay() {
            let attempt = self.policy.attempt_count();
            tracing::warn!(
                error = %message,
                attempt,
                delay_ms = delay.as_millis(),
                "Price feed connection failed, scheduling reconnect"
            );
            metrics::record_reconnect();
            self.publish(|status| {
                status.state = ConnectionState::Errored;
                status.last_error = Some(message);
                status.attempt_count = attempt;
                status.exhausted = false;
                status.next_retry_in = Some(delay);
            });
            return Phase::Backoff(delay);
        }

        let attempts = self.policy.attempt_count();
        let exhausted = ReconnectError::MaxAttemptsExceeded(attempts);
        tracing::error!(error = %message, attempts, "Price feed reconnect attempts exhausted");
        self.publish(|status| {
            status.state = ConnectionState::Errored;
            status.last_error = Some(format!("{exhausted}; last error: {message}"));
            status.attempt_count = attempts;
            status.exhausted = true;
            status.next_retry_in = None;
        });
        Phase::Idle
    }

    async fn backoff(&mut self, delay: Duration) -> Phase {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Phase::Stopped,
                command = self.command_rx.recv() => match command {
                    None => return Phase::Stopped,
                    Some(Command::Reconnect) => return Phase::Grace,
                    Some(Command::SymbolsChanged) => {}
                },
                () = &mut sleep => return Phase::Connect,
            }
        }
    }

    async fn idle(&mut self) -> Phase {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Phase::Stopped,
                command = self.command_rx.recv() => match command {
                    None => return Phase::Stopped,
                    Some(Command::Reconnect) => return Phase::Grace,
                    Some(Command::SymbolsChanged) => {}
                },
            }
        }
    }

    async fn grace(&mut self) -> Phase {
        tracing::info!(
            grace_ms = self.config.reconnect_grace.as_millis(),
            "Manual reconnect requested"
        );
        self.policy.reset();
        self.publish(|status| {
            status.attempt_count = 0;
            status.exhausted = false;
            status.next_retry_in = None;
        });

        let sleep = tokio::time::sleep(self.config.reconnect_grace);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Phase::Stopped,
                command = self.command_rx.recv() => match command {
                    None => return Phase::Stopped,
                    // Already reconnecting.
                    Some(Command::Reconnect | Command::SymbolsChanged) => {}
                },
                () = &mut sleep => return Phase::Connect,
            }
        }
    }

    async fn send<S>(&self, write: &mut S, message: &OutboundMessage) -> Result<(), StreamClientError>
    where
        S: Sink<Message, Error = tungstenite::Error> + Unpin,
    {
        let json = self.codec.encode(message)?;
        write.send(Message::Text(json.into())).await?;
        metrics::record_frame_sent(message.kind());
        Ok(())
    }

    /// Apply a status change unless the client has been stopped.
    ///
    /// The cancellation check runs under the status lock, which `stop()`
    /// also takes, so no write can land after `stop()` returns.
    fn publish(&self, update: impl FnOnce(&mut FeedStatus)) {
        let mut published = None;
        self.shared.status_tx.send_if_modified(|status| {
            if self.cancel.is_cancelled() {
                return false;
            }
            let before = status.clone();
            update(status);
            published = Some(status.state);
            *status != before
        });

        if let Some(state) = published {
            metrics::set_connection_state(state);
        }
    }
}

async fn close<S>(write: &mut S)
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: "client closing".into(),
    };
    match tokio::time::timeout(CLOSE_TIMEOUT, write.send(Message::Close(Some(frame)))).await {
        Ok(Ok(())) => {}
        // Already dead; nothing to close.
        Ok(Err(e)) => tracing::debug!(error = %e, "Close frame not sent"),
        Err(_) => tracing::debug!("Timed out sending close frame"),
    }
}
