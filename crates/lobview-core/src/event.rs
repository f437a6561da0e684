//! Events emitted by a connector toward its subscribers.

use crate::book::{ConnectionState, OrderBookSnapshot};
use std::sync::Arc;

/// Tagged event stream a connector fans out to all of its subscribers.
///
/// Snapshots are shared behind an `Arc`: every subscriber sees the same
/// immutable value, and fan-out stays cheap at full feed cadence.
#[derive(Debug, Clone)]
pub enum ConnectorEvent {
    /// A fresh order book snapshot was published.
    Snapshot(Arc<OrderBookSnapshot>),
    /// The connector's lifecycle state changed.
    Status {
        state: ConnectionState,
        message: Option<String>,
    },
    /// A non-fatal failure: protocol error, bootstrap failure, exhausted
    /// retries. The connection may or may not still be up; `Status` events
    /// carry the authoritative state.
    Failed {
        message: String,
        detail: Option<String>,
    },
}

impl ConnectorEvent {
    pub fn status(state: ConnectionState) -> Self {
        Self::Status {
            state,
            message: None,
        }
    }

    pub fn status_with(state: ConnectionState, message: impl Into<String>) -> Self {
        Self::Status {
            state,
            message: Some(message.into()),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            detail: None,
        }
    }

    pub fn failed_with(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            detail: Some(detail.into()),
        }
    }
}
