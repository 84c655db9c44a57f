//! Price Snapshot Store
//!
//! The single source of truth for "last known price per symbol".
//!
//! # Design
//!
//! The snapshot is an immutable [`PriceSnapshot`] behind an `Arc`, published
//! through a `tokio::sync::watch` channel. The feed task is the only writer:
//! each batch of updates is merged copy-on-write into a new map and swapped
//! in as a whole, so readers holding an older `Arc` keep a consistent view
//! and never observe a half-applied batch.
//!
//! Updates are merged, never wholesale-replaced. An update for one symbol
//! leaves every other symbol's entry untouched. The store outlives
//! individual connections; stale-but-present prices are kept through an
//! outage. Once frozen (client stopped) the store rejects every further
//! merge.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use super::subscription::Symbol;

// =============================================================================
// Price Entry
// =============================================================================

/// Last known price data for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceEntry {
    /// Instrument symbol.
    pub symbol: Symbol,
    /// Last traded / quoted price.
    pub price: f64,
    /// 24 hour change, if the feed has ever reported one.
    pub change_24h: Option<f64>,
    /// Time the price was observed at the source.
    pub observed_at: DateTime<Utc>,
    /// Tag naming where the price came from.
    pub source: String,
}

/// A single per-symbol update to merge into the store.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceDelta {
    /// Instrument symbol.
    pub symbol: Symbol,
    /// New price.
    pub price: f64,
    /// New 24 hour change; `None` keeps the previously known value.
    pub change_24h: Option<f64>,
    /// Observation time.
    pub observed_at: DateTime<Utc>,
    /// Source tag.
    pub source: String,
}

impl PriceDelta {
    fn apply_to(self, previous: Option<&PriceEntry>) -> PriceEntry {
        let change_24h = self
            .change_24h
            .or_else(|| previous.and_then(|entry| entry.change_24h));

        PriceEntry {
            symbol: self.symbol,
            price: self.price,
            change_24h,
            observed_at: self.observed_at,
            source: self.source,
        }
    }
}

// =============================================================================
// Price Snapshot
// =============================================================================

/// Immutable mapping of symbol to last known price.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PriceSnapshot {
    entries: BTreeMap<Symbol, PriceEntry>,
}

impl PriceSnapshot {
    /// Look up a symbol.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<&PriceEntry> {
        self.entries.get(symbol)
    }

    /// Last known price for a symbol.
    #[must_use]
    pub fn price(&self, symbol: &str) -> Option<f64> {
        self.entries.get(symbol).map(|entry| entry.price)
    }

    /// Check whether a symbol has ever been priced.
    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        self.entries.contains_key(symbol)
    }

    /// Number of priced symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no symbol has been priced yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in symbol order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PriceEntry)> {
        self.entries.iter().map(|(symbol, entry)| (symbol.as_str(), entry))
    }

    fn merge(&mut self, delta: PriceDelta) {
        let previous = self.entries.get(&delta.symbol);
        let entry = delta.apply_to(previous);
        self.entries.insert(entry.symbol.clone(), entry);
    }
}

// =============================================================================
// Snapshot Store
// =============================================================================

/// Single-writer, multi-reader store of the latest [`PriceSnapshot`].
///
/// # Example
///
/// ```rust
/// use chrono::Utc;
/// use price_stream_client::domain::snapshot::{PriceDelta, SnapshotStore};
///
/// let store = SnapshotStore::new();
/// store.merge(vec![PriceDelta {
///     symbol: "BTC".to_string(),
///     price: 107_000.0,
///     change_24h: None,
///     observed_at: Utc::now(),
///     source: "ws".to_string(),
/// }]);
///
/// assert_eq!(store.snapshot().price("BTC"), Some(107_000.0));
/// assert!(!store.snapshot().contains("ETH"));
/// ```
#[derive(Debug)]
pub struct SnapshotStore {
    tx: watch::Sender<Arc<PriceSnapshot>>,
    frozen: AtomicBool,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(PriceSnapshot::default()));
        Self {
            tx,
            frozen: AtomicBool::new(false),
        }
    }

    /// Current snapshot. Never blocks on the writer for longer than a
    /// pointer swap.
    #[must_use]
    pub fn snapshot(&self) -> Arc<PriceSnapshot> {
        Arc::clone(&self.tx.borrow())
    }

    /// Register an observer that is notified after every applied batch.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<PriceSnapshot>> {
        self.tx.subscribe()
    }

    /// Merge a batch of deltas in order (last write wins per symbol).
    ///
    /// The whole batch becomes visible atomically. Returns the number of
    /// deltas applied; an empty batch, or any batch after [`freeze`], publishes
    /// nothing.
    ///
    /// [`freeze`]: SnapshotStore::freeze
    pub fn merge<I>(&self, deltas: I) -> usize
    where
        I: IntoIterator<Item = PriceDelta>,
    {
        let mut applied = 0;
        self.tx.send_if_modified(|current| {
            if self.frozen.load(Ordering::Acquire) {
                return false;
            }
            let mut next = (**current).clone();
            for delta in deltas {
                next.merge(delta);
                applied += 1;
            }
            if applied == 0 {
                return false;
            }
            *current = Arc::new(next);
            true
        });
        applied
    }

    /// Reject all further merges. Readers keep the last published snapshot.
    ///
    /// Takes the writer lock, so a merge already in flight completes before
    /// this returns and none starts after.
    pub fn freeze(&self) {
        self.tx.send_if_modified(|_| {
            self.frozen.store(true, Ordering::Release);
            false
        });
    }

    /// Check whether [`SnapshotStore::freeze`] has been called.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// Number of priced symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tx.borrow().len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tx.borrow().is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
