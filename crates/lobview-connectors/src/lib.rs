//! Exchange order book connectors.
//!
//! Each connector owns one WebSocket session and emits normalized
//! [`lobview_core::ConnectorEvent`]s. The lifecycle state machine
//! (bounded dial, reconnect with backoff, keepalive, cancellation) lives in
//! [`client::ExchangeClient`] and is shared by every exchange; the
//! per-exchange wire grammar lives in an [`protocol::ExchangeProtocol`]
//! implementation:
//!
//! - [`binance`] — full snapshot per message, URL-implicit subscription
//! - [`foxbit`] — incremental diffs over a REST-seeded book
//! - [`mercado`] — full snapshots with an explicit subscribe and JSON pings

pub mod binance;
pub mod client;
pub mod foxbit;
pub mod mercado;
pub mod protocol;

pub use client::ExchangeClient;
pub use lobview_ws::init_crypto;
pub use protocol::{BootstrapError, ExchangeProtocol, KeepaliveSpec, ProtocolSession, SessionUpdate};
