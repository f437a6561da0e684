//! Order book value objects.
//!
//! Snapshots are immutable once built: every update from a connector
//! produces a fresh `OrderBookSnapshot`, never an in-place mutation. The
//! normalizing constructor enforces the side-ordering and depth invariants
//! so downstream consumers can rely on them without re-checking.

use crate::decimal::{Price, Qty};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// One resting level of an order book side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Price,
    pub qty: Qty,
}

impl PriceLevel {
    pub fn new(price: Price, qty: Qty) -> Self {
        Self { price, qty }
    }
}

/// Current wall-clock time in milliseconds since the epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// A complete, self-consistent view of one exchange's order book for one
/// symbol at a point in time.
///
/// Invariants (guaranteed by [`OrderBookSnapshot::from_levels`]):
/// - bids strictly descending by price, asks strictly ascending;
/// - no duplicate prices within a side, no zero quantities;
/// - each side trimmed to the configured depth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub exchange_id: String,
    pub symbol: String,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    /// Wall-clock receive time, milliseconds since the epoch.
    pub observed_at_ms: i64,
    /// Exchange sequence number, when the feed carries one.
    pub sequence_id: Option<u64>,
}

impl OrderBookSnapshot {
    /// Build a snapshot from raw per-side levels, normalizing as we go:
    /// zero-quantity levels are dropped, duplicate prices collapse to the
    /// last occurrence, bids sort descending and asks ascending, and both
    /// sides are trimmed to `max_depth`.
    pub fn from_levels(
        exchange_id: impl Into<String>,
        symbol: impl Into<String>,
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
        max_depth: usize,
        sequence_id: Option<u64>,
    ) -> Self {
        Self {
            exchange_id: exchange_id.into(),
            symbol: symbol.into(),
            bids: normalize_side(bids, Side::Bid, max_depth),
            asks: normalize_side(asks, Side::Ask, max_depth),
            observed_at_ms: now_ms(),
            sequence_id,
        }
    }

    /// Replace the receive stamp with an exchange-provided one (already
    /// converted to milliseconds).
    pub fn with_observed_at(mut self, observed_at_ms: i64) -> Self {
        self.observed_at_ms = observed_at_ms;
        self
    }

    /// Best bid, if the side is non-empty.
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    /// Best ask, if the side is non-empty.
    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }

    /// Check the published invariants hold: strict side ordering, no zero
    /// quantities, depth within bound.
    pub fn is_well_formed(&self, max_depth: usize) -> bool {
        let bids_ok = self.bids.windows(2).all(|w| w[0].price > w[1].price);
        let asks_ok = self.asks.windows(2).all(|w| w[0].price < w[1].price);
        let qty_ok = self
            .bids
            .iter()
            .chain(self.asks.iter())
            .all(|l| l.qty.is_positive());
        bids_ok && asks_ok && qty_ok && self.bids.len() <= max_depth && self.asks.len() <= max_depth
    }
}

#[derive(Clone, Copy)]
enum Side {
    Bid,
    Ask,
}

fn normalize_side(levels: Vec<PriceLevel>, side: Side, max_depth: usize) -> Vec<PriceLevel> {
    use std::collections::BTreeMap;

    // Last write wins on duplicate prices.
    let mut by_price: BTreeMap<Price, Qty> = BTreeMap::new();
    for level in levels {
        if level.qty.is_positive() {
            by_price.insert(level.price, level.qty);
        } else {
            by_price.remove(&level.price);
        }
    }

    let iter = by_price.into_iter().map(|(price, qty)| PriceLevel { price, qty });
    match side {
        Side::Bid => iter.rev().take(max_depth).collect(),
        Side::Ask => iter.take(max_depth).collect(),
    }
}

/// Connection lifecycle state of a single connector.
///
/// Transitions are serialized per connector; `Errored` is terminal until an
/// explicit `connect()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Errored,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "DISCONNECTED"),
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Connected => write!(f, "CONNECTED"),
            Self::Reconnecting => write!(f, "RECONNECTING"),
            Self::Errored => write!(f, "ERRORED"),
        }
    }
}
