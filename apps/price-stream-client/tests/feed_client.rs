//! Feed Client Integration Tests
//!
//! Drives the supervisor against a local WebSocket server and checks what
//! goes over the wire and what consumers observe.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use price_stream_client::infrastructure::feed::heartbeat::HeartbeatConfig;
use price_stream_client::infrastructure::feed::reconnect::ReconnectConfig;
use price_stream_client::{
    ConnectionState, FeedStatus, PriceStreamClient, PriceStreamConfig, PriceStreamHandle,
    SymbolSet,
};

const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Mock feed server
// =============================================================================

struct MockFeed {
    url: String,
    connections: mpsc::UnboundedReceiver<MockConnection>,
    attempts: Arc<AtomicUsize>,
    refuse: Arc<AtomicUsize>,
}

impl MockFeed {
    /// Start a server that drops the first `refuse` TCP connections before
    /// completing any handshake.
    async fn start(refuse: usize) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (tx, connections) = mpsc::unbounded_channel();
        let attempts = Arc::new(AtomicUsize::new(0));
        let refuse = Arc::new(AtomicUsize::new(refuse));

        let accept_attempts = Arc::clone(&attempts);
        let accept_refuse = Arc::clone(&refuse);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_attempts.fetch_add(1, Ordering::SeqCst);
                let refused = accept_refuse
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if refused {
                    drop(stream);
                    continue;
                }
                if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                    let _ = tx.send(MockConnection { ws });
                }
            }
        });

        Self {
            url,
            connections,
            attempts,
            refuse,
        }
    }

    async fn accept(&mut self) -> MockConnection {
        timeout(WAIT, self.connections.recv())
            .await
            .expect("client did not connect in time")
            .unwrap()
    }

    async fn expect_no_connection(&mut self, within: Duration) {
        assert!(
            timeout(within, self.connections.recv()).await.is_err(),
            "unexpected connection"
        );
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

struct MockConnection {
    ws: WebSocketStream<TcpStream>,
}

impl MockConnection {
    /// Next text frame as JSON.
    async fn recv_json(&mut self) -> Value {
        loop {
            let message = timeout(WAIT, self.ws.next())
                .await
                .expect("no frame from client in time")
                .expect("client went away")
                .unwrap();
            if let Message::Text(text) = message {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    /// Next frame of any kind, or `None` when the stream ends.
    async fn recv_raw(&mut self) -> Option<Message> {
        timeout(WAIT, self.ws.next())
            .await
            .expect("no frame from client in time")
            .and_then(Result::ok)
    }

    async fn send_json(&mut self, value: &Value) {
        self.send_text(&value.to_string()).await;
    }

    async fn send_text(&mut self, text: &str) {
        self.ws.send(Message::Text(text.into())).await.unwrap();
    }

    async fn close(mut self, code: CloseCode, reason: &str) {
        let frame = CloseFrame {
            code,
            reason: reason.to_string().into(),
        };
        let _ = self.ws.close(Some(frame)).await;
        while let Ok(Some(Ok(_))) = timeout(WAIT, self.ws.next()).await {}
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn config(url: &str) -> PriceStreamConfig {
    PriceStreamConfig {
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(200),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: 3,
        },
        heartbeat: HeartbeatConfig {
            ping_interval: Duration::from_secs(60),
            max_missed_pongs: 0,
        },
        reconnect_grace: Duration::from_millis(20),
        connect_timeout: Duration::from_secs(2),
        ..PriceStreamConfig::new(url)
    }
}

fn subscribe(symbols: &[&str]) -> Value {
    json!({"type": "subscribe", "symbols": symbols})
}

async fn wait_status(
    handle: &PriceStreamHandle,
    predicate: impl FnMut(&FeedStatus) -> bool,
) -> FeedStatus {
    let mut rx = handle.watch_status();
    timeout(WAIT, rx.wait_for(predicate))
        .await
        .expect("status condition not reached in time")
        .unwrap()
        .clone()
}

async fn wait_for_symbol(handle: &PriceStreamHandle, symbol: &str) {
    let mut rx = handle.watch_snapshot();
    timeout(WAIT, rx.wait_for(|snapshot| snapshot.contains(symbol)))
        .await
        .expect("symbol never reached the snapshot")
        .unwrap();
}

async fn shutdown(handle: &PriceStreamHandle, task: tokio::task::JoinHandle<()>) {
    handle.stop();
    timeout(WAIT, task)
        .await
        .expect("supervisor did not exit")
        .unwrap();
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn subscribe_update_abnormal_close_and_resubscribe() {
    let mut feed = MockFeed::start(0).await;
    let (handle, task) =
        PriceStreamClient::start(config(&feed.url), SymbolSet::parse_list("BTC,ETH"));

    let mut conn = feed.accept().await;
    assert_eq!(conn.recv_json().await, subscribe(&["BTC", "ETH"]));
    wait_status(&handle, |s| s.state == ConnectionState::Connected).await;

    conn.send_json(&json!({
        "type": "price_update",
        "data": [{"symbol": "BTC", "price": 107_000, "timestamp": 1_736_935_200_000_i64}]
    }))
    .await;
    wait_for_symbol(&handle, "BTC").await;

    let snapshot = handle.price_snapshot();
    assert_eq!(snapshot.price("BTC"), Some(107_000.0));
    assert!(!snapshot.contains("ETH"));

    conn.close(CloseCode::Error, "upstream failure").await;

    let errored = wait_status(&handle, |s| s.attempt_count == 1).await;
    assert!(!errored.exhausted);
    assert!(errored.last_error.as_deref().unwrap().contains("code 1011"));

    // Same set again on the new session, snapshot survives the gap.
    let mut conn = feed.accept().await;
    assert_eq!(conn.recv_json().await, subscribe(&["BTC", "ETH"]));
    let status = wait_status(&handle, |s| s.state == ConnectionState::Connected).await;
    assert_eq!(status.attempt_count, 0);
    assert!(status.last_error.is_none());
    assert_eq!(handle.price_snapshot().price("BTC"), Some(107_000.0));

    handle.set_desired_symbols(SymbolSet::parse_list("BTC,ETH,SOL"));
    assert_eq!(conn.recv_json().await, subscribe(&["BTC", "ETH", "SOL"]));
    assert_eq!(handle.price_snapshot().len(), 1);
    assert_eq!(handle.price_snapshot().price("BTC"), Some(107_000.0));

    shutdown(&handle, task).await;
}

#[tokio::test]
async fn same_symbol_set_is_resent_while_connected() {
    let mut feed = MockFeed::start(0).await;
    let (handle, task) =
        PriceStreamClient::start(config(&feed.url), SymbolSet::parse_list("BTC,ETH"));

    let mut conn = feed.accept().await;
    assert_eq!(conn.recv_json().await, subscribe(&["BTC", "ETH"]));
    wait_status(&handle, |s| s.state == ConnectionState::Connected).await;

    handle.set_desired_symbols(SymbolSet::parse_list("ETH,BTC"));
    assert_eq!(conn.recv_json().await, subscribe(&["BTC", "ETH"]));

    handle.set_desired_symbols(SymbolSet::parse_list("BTC,ETH,SOL"));
    assert_eq!(conn.recv_json().await, subscribe(&["BTC", "ETH", "SOL"]));

    shutdown(&handle, task).await;
}

#[tokio::test]
async fn symbols_set_before_connect_are_used_on_connect() {
    let mut feed = MockFeed::start(1).await;
    let (handle, task) = PriceStreamClient::start(config(&feed.url), SymbolSet::parse_list("BTC"));
    handle.set_desired_symbols(SymbolSet::parse_list("ETH,SOL"));

    let mut conn = feed.accept().await;
    assert_eq!(conn.recv_json().await, subscribe(&["ETH", "SOL"]));

    shutdown(&handle, task).await;
}

#[tokio::test]
async fn exhausted_retries_wait_for_manual_reconnect() {
    let mut feed = MockFeed::start(3).await;
    let (handle, task) = PriceStreamClient::start(config(&feed.url), SymbolSet::parse_list("BTC"));

    let status = wait_status(&handle, |s| s.exhausted).await;
    assert_eq!(status.state, ConnectionState::Errored);
    assert_eq!(status.attempt_count, 3);
    assert!(status.next_retry_in.is_none());
    assert!(
        status
            .last_error
            .as_deref()
            .unwrap()
            .starts_with("gave up after 3 consecutive connection failures")
    );
    assert_eq!(feed.attempts(), 3);

    feed.expect_no_connection(Duration::from_millis(300)).await;
    assert_eq!(feed.attempts(), 3);

    handle.reconnect();

    let mut conn = feed.accept().await;
    assert_eq!(conn.recv_json().await, subscribe(&["BTC"]));
    assert_eq!(feed.attempts(), 4);

    let status = wait_status(&handle, |s| s.state == ConnectionState::Connected).await;
    assert!(!status.exhausted);
    assert_eq!(status.attempt_count, 0);

    shutdown(&handle, task).await;
}

#[tokio::test]
async fn backoff_delays_grow_until_connected() {
    let mut feed = MockFeed::start(2).await;
    let (handle, task) = PriceStreamClient::start(
        PriceStreamConfig {
            reconnect: ReconnectConfig {
                max_attempts: 0,
                ..config(&feed.url).reconnect
            },
            ..config(&feed.url)
        },
        SymbolSet::new(),
    );

    let first = wait_status(&handle, |s| s.attempt_count == 1 && s.next_retry_in.is_some()).await;
    assert_eq!(first.next_retry_in, Some(Duration::from_millis(50)));

    let second = wait_status(&handle, |s| s.attempt_count == 2 && s.next_retry_in.is_some()).await;
    assert_eq!(second.next_retry_in, Some(Duration::from_millis(100)));

    let mut conn = feed.accept().await;
    assert_eq!(conn.recv_json().await, subscribe(&[]));
    assert_eq!(feed.refuse.load(Ordering::SeqCst), 0);

    shutdown(&handle, task).await;
}

#[tokio::test]
async fn normal_close_waits_for_manual_reconnect() {
    let mut feed = MockFeed::start(0).await;
    let (handle, task) = PriceStreamClient::start(config(&feed.url), SymbolSet::parse_list("BTC"));

    let mut conn = feed.accept().await;
    conn.recv_json().await;
    conn.close(CloseCode::Normal, "maintenance").await;

    let status = wait_status(&handle, |s| s.state == ConnectionState::Disconnected).await;
    assert!(!status.exhausted);
    feed.expect_no_connection(Duration::from_millis(300)).await;

    handle.reconnect();
    let mut conn = feed.accept().await;
    assert_eq!(conn.recv_json().await, subscribe(&["BTC"]));

    shutdown(&handle, task).await;
}

#[tokio::test]
async fn manual_reconnect_replaces_live_session() {
    let mut feed = MockFeed::start(0).await;
    let (handle, task) = PriceStreamClient::start(config(&feed.url), SymbolSet::parse_list("BTC"));

    let mut first = feed.accept().await;
    first.recv_json().await;

    handle.reconnect();
    handle.reconnect();

    match first.recv_raw().await {
        Some(Message::Close(Some(frame))) => assert_eq!(frame.code, CloseCode::Normal),
        other => panic!("expected close frame, got {other:?}"),
    }

    let mut second = feed.accept().await;
    assert_eq!(second.recv_json().await, subscribe(&["BTC"]));
    feed.expect_no_connection(Duration::from_millis(200)).await;

    shutdown(&handle, task).await;
}

#[tokio::test]
async fn stop_closes_normally_and_goes_quiet() {
    let mut feed = MockFeed::start(0).await;
    let (handle, task) = PriceStreamClient::start(config(&feed.url), SymbolSet::parse_list("BTC"));

    let mut conn = feed.accept().await;
    conn.recv_json().await;
    conn.send_json(&json!({"type": "price_update", "data": [{"symbol": "BTC", "price": 1}]}))
        .await;
    wait_for_symbol(&handle, "BTC").await;

    let mut status_rx = handle.watch_status();
    handle.stop();
    assert_eq!(handle.connection_state(), ConnectionState::Disconnected);
    status_rx.borrow_and_update();

    match conn.recv_raw().await {
        Some(Message::Close(Some(frame))) => assert_eq!(frame.code, CloseCode::Normal),
        other => panic!("expected close frame, got {other:?}"),
    }

    handle.set_desired_symbols(SymbolSet::parse_list("ETH"));
    handle.reconnect();
    handle.stop();
    assert_eq!(handle.desired_symbols(), SymbolSet::parse_list("BTC"));

    timeout(WAIT, task).await.unwrap().unwrap();
    feed.expect_no_connection(Duration::from_millis(300)).await;

    assert!(!status_rx.has_changed().unwrap());
    assert_eq!(handle.connection_state(), ConnectionState::Disconnected);
    assert_eq!(handle.price_snapshot().price("BTC"), Some(1.0));
    assert_eq!(feed.attempts(), 1);
}

#[tokio::test]
async fn stop_during_backoff_cancels_retry() {
    let mut feed = MockFeed::start(1).await;
    let (handle, task) = PriceStreamClient::start(
        PriceStreamConfig {
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(200),
                ..config(&feed.url).reconnect
            },
            ..config(&feed.url)
        },
        SymbolSet::new(),
    );

    wait_status(&handle, |s| s.next_retry_in.is_some()).await;
    handle.stop();

    timeout(WAIT, task).await.unwrap().unwrap();
    feed.expect_no_connection(Duration::from_millis(400)).await;
    assert_eq!(feed.attempts(), 1);
    assert_eq!(handle.status().next_retry_in, None);
}

#[tokio::test]
async fn malformed_and_unknown_frames_are_tolerated() {
    let mut feed = MockFeed::start(0).await;
    let (handle, task) = PriceStreamClient::start(config(&feed.url), SymbolSet::parse_list("ETH"));

    let mut conn = feed.accept().await;
    conn.recv_json().await;

    conn.send_text("{not json").await;
    conn.send_json(&json!({"type": "announcement", "text": "hello"}))
        .await;
    conn.send_json(&json!({"type": "price_update", "data": "oops"}))
        .await;
    conn.send_json(&json!({
        "type": "price_update",
        "data": [{"symbol": "ETH", "price": 3_900.5, "change24h": 2.1}]
    }))
    .await;
    wait_for_symbol(&handle, "ETH").await;

    assert_eq!(handle.connection_state(), ConnectionState::Connected);
    let entry = handle.price_snapshot().get("ETH").cloned().unwrap();
    assert_eq!(entry.price, 3_900.5);
    assert_eq!(entry.change_24h, Some(2.1));

    let frames = handle.diagnostics().frames;
    assert_eq!(frames.frames_received, 4);
    assert_eq!(frames.malformed_frames, 2);
    assert_eq!(frames.unknown_frames, 1);
    assert_eq!(frames.price_updates, 1);

    shutdown(&handle, task).await;
}

#[tokio::test]
async fn heartbeat_pings_and_records_pongs() {
    let mut feed = MockFeed::start(0).await;
    let (handle, task) = PriceStreamClient::start(
        PriceStreamConfig {
            heartbeat: HeartbeatConfig {
                ping_interval: Duration::from_millis(100),
                max_missed_pongs: 0,
            },
            ..config(&feed.url)
        },
        SymbolSet::new(),
    );

    let mut conn = feed.accept().await;
    conn.recv_json().await;

    let ping = conn.recv_json().await;
    assert_eq!(ping["type"], "ping");
    assert!(ping["timestamp"].as_i64().unwrap() > 0);

    conn.send_json(&json!({"type": "pong"})).await;

    timeout(WAIT, async {
        while handle.diagnostics().heartbeat.last_pong_at.is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let heartbeat = handle.diagnostics().heartbeat;
    assert!(heartbeat.pings_sent >= 1);
    assert_eq!(heartbeat.pongs_received, 1);
    assert!(heartbeat.last_rtt_ms.is_some());

    shutdown(&handle, task).await;
}

#[tokio::test]
async fn unanswered_pings_force_reconnect_when_enabled() {
    let mut feed = MockFeed::start(0).await;
    let (handle, task) = PriceStreamClient::start(
        PriceStreamConfig {
            heartbeat: HeartbeatConfig {
                ping_interval: Duration::from_millis(50),
                max_missed_pongs: 2,
            },
            ..config(&feed.url)
        },
        SymbolSet::new(),
    );

    let mut first = feed.accept().await;
    first.recv_json().await;

    let status = wait_status(&handle, |s| s.attempt_count == 1).await;
    assert!(status.last_error.as_deref().unwrap().contains("heartbeat"));

    let mut second = feed.accept().await;
    assert_eq!(second.recv_json().await, subscribe(&[]));
    drop(first);

    shutdown(&handle, task).await;
}

#[tokio::test]
async fn dropping_every_handle_stops_the_client() {
    let mut feed = MockFeed::start(0).await;
    let (handle, task) = PriceStreamClient::start(config(&feed.url), SymbolSet::parse_list("BTC"));

    let mut conn = feed.accept().await;
    conn.recv_json().await;

    drop(handle);

    match conn.recv_raw().await {
        Some(Message::Close(Some(frame))) => assert_eq!(frame.code, CloseCode::Normal),
        other => panic!("expected close frame, got {other:?}"),
    }
    timeout(WAIT, task).await.unwrap().unwrap();
}

#[tokio::test]
async fn session_end_leaves_connected_before_heartbeat_winds_down() {
    let mut feed = MockFeed::start(0).await;
    let (handle, task) = PriceStreamClient::start(
        PriceStreamConfig {
            heartbeat: HeartbeatConfig {
                ping_interval: Duration::from_millis(20),
                max_missed_pongs: 0,
            },
            ..config(&feed.url)
        },
        SymbolSet::new(),
    );

    let mut conn = feed.accept().await;
    conn.recv_json().await;
    assert_eq!(conn.recv_json().await["type"], "ping");

    let mut status_rx = handle.watch_status();
    status_rx.borrow_and_update();
    conn.close(CloseCode::Away, "going away").await;

    // The first change after the session ends already reports the failure.
    timeout(WAIT, status_rx.changed()).await.unwrap().unwrap();
    let status = status_rx.borrow_and_update().clone();
    assert_eq!(status.state, ConnectionState::Errored);
    assert!(status.last_error.as_deref().unwrap().contains("code 1001"));

    shutdown(&handle, task).await;
}

#[tokio::test]
async fn diagnostics_are_frozen_after_stop() {
    let mut feed = MockFeed::start(0).await;
    let (handle, task) = PriceStreamClient::start(config(&feed.url), SymbolSet::parse_list("BTC"));

    let mut conn = feed.accept().await;
    conn.recv_json().await;
    conn.send_json(&json!({"type": "price_update", "data": [{"symbol": "BTC", "price": 1}]}))
        .await;
    wait_for_symbol(&handle, "BTC").await;

    handle.stop();
    let frozen = handle.diagnostics();

    let _ = conn
        .ws
        .send(Message::Text(
            json!({"type": "price_update", "data": [{"symbol": "ETH", "price": 2}]})
                .to_string()
                .into(),
        ))
        .await;
    let _ = conn.ws.send(Message::Text(json!({"type": "pong"}).to_string().into())).await;

    timeout(WAIT, task).await.unwrap().unwrap();
    assert_eq!(handle.diagnostics(), frozen);
    assert!(!handle.price_snapshot().contains("ETH"));
}
