//! Subscription Management Types
//!
//! Domain types for tracking which instrument symbols the feed should push.
//!
//! # Design
//!
//! The feed protocol is declarative: every subscribe frame carries the
//! complete desired set, never a delta. The manager therefore only has to
//! remember the latest desired [`SymbolSet`]; there is no add/remove
//! reconciliation on the wire. The set survives reconnects and is re-sent
//! in full on every new connection, since a fresh connection starts with no
//! server-side subscription state.

use std::collections::BTreeSet;
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

// =============================================================================
// Types
// =============================================================================

/// An instrument identifier (e.g. `BTC`, `ETH`).
pub type Symbol = String;

/// A set of unique instrument symbols.
///
/// Symbols are trimmed on insertion and empty strings are discarded.
/// Iteration (and therefore serialization) is in sorted order so that
/// subscribe frames are deterministic; insertion order carries no meaning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SymbolSet(BTreeSet<Symbol>);

impl SymbolSet {
    /// Create an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Insert a symbol, returning `true` if it was not already present.
    ///
    /// Blank symbols are ignored and return `false`.
    pub fn insert(&mut self, symbol: impl AsRef<str>) -> bool {
        let trimmed = symbol.as_ref().trim();
        if trimmed.is_empty() {
            return false;
        }
        self.0.insert(trimmed.to_string())
    }

    /// Remove a symbol, returning `true` if it was present.
    pub fn remove(&mut self, symbol: &str) -> bool {
        self.0.remove(symbol.trim())
    }

    /// Check whether the set contains a symbol.
    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        self.0.contains(symbol.trim())
    }

    /// Number of symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate symbols in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Collect the symbols into a sorted vector.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Symbol> {
        self.0.iter().cloned().collect()
    }

    /// Parse a comma-separated list such as `"BTC, ETH,SOL"`.
    #[must_use]
    pub fn parse_list(list: &str) -> Self {
        list.split(',').collect()
    }
}

impl<S: AsRef<str>> FromIterator<S> for SymbolSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        for symbol in iter {
            set.insert(symbol);
        }
        set
    }
}

impl<S: AsRef<str>> Extend<S> for SymbolSet {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        for symbol in iter {
            self.insert(symbol);
        }
    }
}

impl<'a> IntoIterator for &'a SymbolSet {
    type Item = &'a Symbol;
    type IntoIter = std::collections::btree_set::Iter<'a, Symbol>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for SymbolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.to_vec().join(","))
    }
}

// =============================================================================
// Subscription Manager
// =============================================================================

/// Holds the desired symbol set for the feed connection.
///
/// The owning consumer may replace the set at any time from any thread.
/// The connection supervisor reads it whenever it needs to (re)issue a
/// subscribe frame.
///
/// # Example
///
/// ```rust
/// use price_stream_client::domain::subscription::{SubscriptionManager, SymbolSet};
///
/// let manager = SubscriptionManager::new(SymbolSet::parse_list("BTC,ETH"));
/// assert_eq!(manager.desired().len(), 2);
///
/// manager.set_desired(SymbolSet::parse_list("BTC,ETH,SOL"));
/// assert!(manager.desired().contains("SOL"));
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    desired: RwLock<SymbolSet>,
}

impl SubscriptionManager {
    /// Create a manager with an initial desired set.
    #[must_use]
    pub fn new(initial: SymbolSet) -> Self {
        Self {
            desired: RwLock::new(initial),
        }
    }

    /// Replace the desired set.
    pub fn set_desired(&self, symbols: SymbolSet) {
        *self.desired.write() = symbols;
    }

    /// Get a copy of the current desired set.
    #[must_use]
    pub fn desired(&self) -> SymbolSet {
        self.desired.read().clone()
    }

    /// Number of desired symbols.
    #[must_use]
    pub fn symbol_count(&self) -> usize {
        self.desired.read().len()
    }
}

// =============================================================================
// Tests
// =============================================================================
