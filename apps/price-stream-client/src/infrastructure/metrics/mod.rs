//! Prometheus Metrics Module
//!
//! Exposes feed client metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Frames**: inbound frames by kind, malformed frames, outbound frames by kind
//! - **Connection**: current lifecycle state and reconnect attempts
//! - **Snapshot**: number of priced symbols
//! - **Heartbeat**: ping/pong round trip
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! functions are no-ops until [`init_metrics`] installs the recorder, so
//! library users that never call it pay nothing.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::streaming::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed (for example,
/// because another global recorder is already in place).
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "price_feed_frames_received_total",
        "Total well-formed frames received from the feed, by kind"
    );
    describe_counter!(
        "price_feed_frames_malformed_total",
        "Total frames dropped because they could not be decoded"
    );
    describe_counter!(
        "price_feed_frames_sent_total",
        "Total frames sent to the feed, by kind"
    );
    describe_counter!(
        "price_feed_reconnects_total",
        "Total scheduled reconnection attempts"
    );

    describe_gauge!(
        "price_feed_connection_state",
        "Connection state (0 disconnected, 1 connecting, 2 connected, 3 errored)"
    );
    describe_gauge!(
        "price_feed_snapshot_symbols",
        "Number of symbols with a known price"
    );

    describe_histogram!(
        "price_feed_heartbeat_rtt_seconds",
        "Round trip between a ping and the next pong"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a decoded inbound frame.
pub fn record_frame_received(kind: &'static str) {
    counter!("price_feed_frames_received_total", "kind" => kind).increment(1);
}

/// Record a dropped, undecodable frame.
pub fn record_frame_malformed() {
    counter!("price_feed_frames_malformed_total").increment(1);
}

/// Record an outbound frame.
pub fn record_frame_sent(kind: &'static str) {
    counter!("price_feed_frames_sent_total", "kind" => kind).increment(1);
}

/// Record a scheduled reconnection attempt.
pub fn record_reconnect() {
    counter!("price_feed_reconnects_total").increment(1);
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("price_feed_connection_state").set(state.as_gauge());
}

/// Update the priced symbol count.
pub fn set_snapshot_symbols(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("price_feed_snapshot_symbols").set(count as f64);
}

/// Record a heartbeat round trip.
pub fn record_heartbeat_rtt(rtt: Duration) {
    histogram!("price_feed_heartbeat_rtt_seconds").record(rtt.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_harmless() {
        record_frame_received("price_update");
        record_frame_malformed();
        record_frame_sent("subscribe");
        record_reconnect();
        set_connection_state(ConnectionState::Connected);
        set_snapshot_symbols(3);
        record_heartbeat_rtt(Duration::from_millis(12));
    }

    #[test]
    fn gauge_encoding_is_stable() {
        assert!((ConnectionState::Disconnected.as_gauge()).abs() < f64::EPSILON);
        assert!((ConnectionState::Errored.as_gauge() - 3.0).abs() < f64::EPSILON);
    }
}
