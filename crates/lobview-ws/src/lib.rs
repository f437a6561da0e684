//! Shared WebSocket transport machinery for lobview connectors.
//!
//! Provides the pieces every exchange session reuses:
//! - bounded-timeout connection establishment
//! - reconnection backoff scheduling from a `ReconnectPolicy`
//! - client-initiated keepalive tracking
//! - the transport error taxonomy

pub mod backoff;
pub mod dial;
pub mod error;
pub mod keepalive;

pub use backoff::Backoff;
pub use dial::{dial, init_crypto, WsStream};
pub use error::{WsError, WsResult};
pub use keepalive::Keepalive;
