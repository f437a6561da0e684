//! Exchange protocol seam.
//!
//! `ExchangeClient` owns the transport and the state machine; each exchange
//! contributes an `ExchangeProtocol` that knows the endpoint, the handshake
//! frames, and how to turn inbound text into normalized snapshots. A fresh
//! `ProtocolSession` is created per connection, so any per-connection book
//! reconstruction state starts clean after every reconnect.

use async_trait::async_trait;
use lobview_core::{ConnectorConfig, OrderBookSnapshot, PriceLevel};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// What a session made of one inbound text frame.
#[derive(Debug)]
pub enum SessionUpdate {
    /// A fresh normalized snapshot to publish.
    Snapshot(OrderBookSnapshot),
    /// Non-fatal protocol failure; the socket stays open.
    Failed {
        message: String,
        detail: Option<String>,
    },
    /// Application-level pong for the keepalive tracker.
    Pong,
    /// Ack, noise, or a frame we drop (already logged by the session).
    Ignore,
}

/// Client keepalive cadence for one protocol.
#[derive(Debug, Clone)]
pub struct KeepaliveSpec {
    pub interval: Duration,
    pub timeout: Duration,
    /// JSON text ping; `None` sends a transport-level Ping frame instead.
    pub ping_text: Option<String>,
}

/// Static description of one exchange's wire contract.
pub trait ExchangeProtocol: Send + Sync + 'static {
    type Session: ProtocolSession;

    /// Stable identifier, unique per exchange (e.g. "binance").
    fn exchange_id(&self) -> &'static str;

    /// Streaming endpoint for the configured symbol/depth.
    fn stream_url(&self, config: &ConnectorConfig) -> String;

    /// Per-connection session state.
    fn new_session(&self, config: &ConnectorConfig) -> Self::Session;

    /// Frames to send right after the socket opens. Empty for exchanges
    /// that subscribe implicitly via the URL path.
    fn subscribe_frames(&self, _config: &ConnectorConfig) -> Vec<String> {
        Vec::new()
    }

    /// Frames to send before closing, for protocols that leak server-side
    /// subscriptions otherwise.
    fn unsubscribe_frames(&self, _config: &ConnectorConfig) -> Vec<String> {
        Vec::new()
    }

    /// Client keepalive cadence; `None` disables the ping loop.
    fn keepalive(&self) -> Option<KeepaliveSpec> {
        None
    }
}

/// Per-connection protocol state machine.
#[async_trait]
pub trait ProtocolSession: Send {
    /// Interpret one inbound text frame.
    fn on_text(&mut self, config: &ConnectorConfig, text: &str) -> SessionUpdate;

    /// Whether an out-of-band snapshot fetch is (still) required before the
    /// session can publish. Re-checked after every frame, so a session can
    /// demand a re-bootstrap when it detects a sequence gap.
    fn needs_bootstrap(&self) -> bool {
        false
    }

    /// Fetch and apply the out-of-band snapshot. Failures are reported via
    /// a `Failed` event and retried on a timer without tearing down the
    /// socket.
    async fn bootstrap(
        &mut self,
        _config: &ConnectorConfig,
    ) -> Result<Option<OrderBookSnapshot>, BootstrapError> {
        Ok(None)
    }
}

/// Failure of the out-of-band snapshot fetch.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Parse `[price, qty]` string pairs, dropping unparsable entries with a
/// debug log rather than failing the frame.
pub fn parse_levels(pairs: &[(String, String)]) -> Vec<PriceLevel> {
    pairs
        .iter()
        .filter_map(|(price, qty)| match (price.parse(), qty.parse()) {
            (Ok(price), Ok(qty)) => Some(PriceLevel::new(price, qty)),
            _ => {
                debug!(%price, %qty, "dropping unparsable level");
                None
            }
        })
        .collect()
}
