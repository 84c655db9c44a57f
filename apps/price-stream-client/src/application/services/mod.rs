//! Application Services
//!
//! Services that turn raw feed status into what a user interface shows.
//!
//! - [`StatusIndicator`]: the user-visible connection indicator
//! - [`FeedStatusService`]: reads the indicator and drives the manual retry
//!   control through the [`PriceFeed`] port

use std::sync::Arc;

use serde::Serialize;

use crate::application::ports::PriceFeed;
use crate::domain::streaming::{ConnectionState, FeedStatus};

// =============================================================================
// Status Indicator
// =============================================================================

/// User-visible connection indicator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "indicator", rename_all = "snake_case")]
pub enum StatusIndicator {
    /// Receiving prices.
    Live,
    /// First connection attempt in progress.
    Connecting,
    /// Recovering from a failure; no user action needed.
    Reconnecting {
        /// Consecutive failures so far.
        attempt: u32,
        /// Delay before the next automatic attempt, if one is scheduled.
        retry_in_ms: Option<u64>,
    },
    /// Not connected and not retrying on its own.
    Disconnected {
        /// Automatic retries ran out.
        exhausted: bool,
        /// Last diagnostic message.
        reason: Option<String>,
    },
}

impl StatusIndicator {
    /// Derive the indicator from a status value.
    #[must_use]
    pub fn from_status(status: &FeedStatus) -> Self {
        match status.state {
            ConnectionState::Connected => Self::Live,
            _ if status.exhausted => Self::Disconnected {
                exhausted: true,
                reason: status.last_error.clone(),
            },
            ConnectionState::Connecting if status.attempt_count == 0 => Self::Connecting,
            ConnectionState::Connecting | ConnectionState::Errored => Self::Reconnecting {
                attempt: status.attempt_count,
                retry_in_ms: status
                    .next_retry_in
                    .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            },
            ConnectionState::Disconnected => Self::Disconnected {
                exhausted: false,
                reason: status.last_error.clone(),
            },
        }
    }

    /// Short label for display.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Live => "Live",
            Self::Connecting => "Connecting",
            Self::Reconnecting { .. } => "Reconnecting",
            Self::Disconnected { .. } => "Disconnected",
        }
    }

    /// Check whether an explicit retry control should be shown.
    ///
    /// Offered whenever the feed will not reconnect by itself.
    #[must_use]
    pub const fn offers_retry(&self) -> bool {
        matches!(self, Self::Disconnected { .. })
    }
}

// =============================================================================
// Feed Status Service
// =============================================================================

/// Outcome of a retry request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// A reconnect was requested.
    Requested,
    /// The feed is live or already recovering; nothing was done.
    NotNeeded,
}

/// Drives the connection indicator and manual retry control.
pub struct FeedStatusService<F: PriceFeed + ?Sized> {
    feed: Arc<F>,
}

impl<F: PriceFeed + ?Sized> FeedStatusService<F> {
    /// Create a service over a feed.
    #[must_use]
    pub const fn new(feed: Arc<F>) -> Self {
        Self { feed }
    }

    /// Current indicator.
    #[must_use]
    pub fn indicator(&self) -> StatusIndicator {
        StatusIndicator::from_status(&self.feed.status())
    }

    /// Handle the user pressing the retry control.
    ///
    /// Reconnects only when the indicator offers a retry, so a stray click
    /// never tears down a healthy or recovering connection.
    pub fn request_retry(&self) -> RetryOutcome {
        let indicator = self.indicator();
        if indicator.offers_retry() {
            tracing::info!(indicator = indicator.label(), "Manual retry requested");
            self.feed.reconnect();
            RetryOutcome::Requested
        } else {
            tracing::debug!(indicator = indicator.label(), "Retry not needed");
            RetryOutcome::NotNeeded
        }
    }

    /// Wait until the indicator differs from `current` and return the new one.
    ///
    /// Returns `None` once the feed's status channel closes.
    pub async fn next_change(&self, current: &StatusIndicator) -> Option<StatusIndicator> {
        let mut rx = self.feed.watch_status();
        loop {
            let indicator = StatusIndicator::from_status(&rx.borrow_and_update());
            if &indicator != current {
                return Some(indicator);
            }
            rx.changed().await.ok()?;
        }
    }
}
