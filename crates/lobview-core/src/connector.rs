//! Abstract connector contract.
//!
//! The manager composes connectors through this trait only; each exchange
//! variant is a concrete implementation held as `Arc<dyn ExchangeConnector>`.

use crate::book::{ConnectionState, OrderBookSnapshot};
use crate::bus::Subscription;
use crate::config::ConfigPatch;
use crate::error::Result;
use crate::event::ConnectorEvent;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Capability set every exchange connector implements.
#[async_trait]
pub trait ExchangeConnector: Send + Sync {
    /// Stable identifier, unique per exchange (e.g. "binance").
    fn exchange_id(&self) -> &str;

    /// Currently configured human-readable symbol.
    fn symbol(&self) -> String;

    /// Current lifecycle state.
    fn state(&self) -> ConnectionState;

    /// Most recent published snapshot, if any.
    fn latest_snapshot(&self) -> Option<Arc<OrderBookSnapshot>>;

    /// Register an event observer. Every event is delivered to all
    /// currently-registered observers; one observer going away never
    /// affects the others.
    fn subscribe(&self) -> (Subscription, mpsc::UnboundedReceiver<ConnectorEvent>);

    /// Open the transport and start the session. Idempotent while already
    /// connecting or connected. Establishment is bounded; a timeout counts
    /// as a connection failure and feeds the reconnect path.
    async fn connect(&self) -> Result<()>;

    /// Tear down: cancel pending reconnects, unsubscribe if the protocol
    /// requires it, close the transport, discard cached book state, reset
    /// to `Disconnected`. Idempotent.
    async fn disconnect(&self);

    /// Merge a partial config; when currently active, cycles the
    /// connection so the new symbol/depth takes effect.
    async fn update_config(&self, patch: ConfigPatch) -> Result<()>;
}
