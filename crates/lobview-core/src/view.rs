//! Manager-published value objects: consolidated view and status.

use crate::book::{ConnectionState, OrderBookSnapshot};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Merged latest-per-exchange view of the order book.
#[derive(Debug, Clone, Serialize)]
pub struct ConsolidatedView {
    /// One entry per registered exchange that has produced data.
    pub by_exchange: BTreeMap<String, Arc<OrderBookSnapshot>>,
    /// Wall-clock build time, milliseconds since the epoch.
    pub last_update_ms: i64,
    /// Symbol the view covers, taken from a connected connector.
    pub symbol: String,
}

/// Tally of connector states plus the per-exchange breakdown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStatus {
    pub disconnected: usize,
    pub connecting: usize,
    pub connected: usize,
    pub reconnecting: usize,
    pub errored: usize,
    pub by_exchange: BTreeMap<String, ConnectionState>,
}

impl ManagerStatus {
    /// Tally states from a `(exchange_id, state)` iterator.
    pub fn tally<I, S>(states: I) -> Self
    where
        I: IntoIterator<Item = (S, ConnectionState)>,
        S: Into<String>,
    {
        let mut status = Self::default();
        for (exchange_id, state) in states {
            match state {
                ConnectionState::Disconnected => status.disconnected += 1,
                ConnectionState::Connecting => status.connecting += 1,
                ConnectionState::Connected => status.connected += 1,
                ConnectionState::Reconnecting => status.reconnecting += 1,
                ConnectionState::Errored => status.errored += 1,
            }
            status.by_exchange.insert(exchange_id.into(), state);
        }
        status
    }

    pub fn total(&self) -> usize {
        self.disconnected + self.connecting + self.connected + self.reconnecting + self.errored
    }
}

/// A connector failure forwarded by the manager, tagged with its origin.
#[derive(Debug, Clone, Serialize)]
pub struct ExchangeError {
    pub exchange_id: String,
    pub message: String,
    pub detail: Option<String>,
    /// Wall-clock time the manager observed the failure.
    pub at_ms: i64,
}
