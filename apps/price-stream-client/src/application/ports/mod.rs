//! Port Interfaces
//!
//! Defines the contract the rest of an application depends on to read
//! prices and drive the feed, following the Hexagonal Architecture
//! pattern. The WebSocket client in the infrastructure layer is the
//! production adapter.
//!
//! ## Driver Port (Inbound)
//!
//! - [`PriceFeed`]: state reads, observer registration and the three
//!   control operations (`set_desired_symbols`, `reconnect`, `stop`)

use std::sync::Arc;

use tokio::sync::watch;

use crate::domain::snapshot::PriceSnapshot;
use crate::domain::streaming::{ConnectionState, FeedStatus};
use crate::domain::subscription::SymbolSet;

/// Consumer-facing price feed.
///
/// Every method is non-blocking and infallible: failures are absorbed by
/// the feed and surfaced through [`FeedStatus`] rather than returned.
/// Control operations after [`PriceFeed::stop`] are no-ops.
#[cfg_attr(test, mockall::automock)]
pub trait PriceFeed: Send + Sync {
    /// Current lifecycle state.
    fn connection_state(&self) -> ConnectionState;

    /// Full status, including retry bookkeeping.
    fn status(&self) -> FeedStatus;

    /// Current price snapshot.
    fn price_snapshot(&self) -> Arc<PriceSnapshot>;

    /// Most recent diagnostic message, if any.
    fn last_error(&self) -> Option<String>;

    /// Desired symbol set.
    fn desired_symbols(&self) -> SymbolSet;

    /// Replace the desired symbol set; pushed to the feed immediately when
    /// connected, otherwise on the next connect.
    fn set_desired_symbols(&self, symbols: SymbolSet);

    /// Drop any current connection, clear retry state and connect again
    /// after a short grace delay.
    fn reconnect(&self);

    /// Close the connection and stop for good.
    fn stop(&self);

    /// Observe status changes.
    fn watch_status(&self) -> watch::Receiver<FeedStatus>;

    /// Observe snapshot changes.
    fn watch_snapshot(&self) -> watch::Receiver<Arc<PriceSnapshot>>;
}
