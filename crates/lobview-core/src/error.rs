//! Error types for connector operations.

use std::time::Duration;
use thiserror::Error;

/// Failures surfaced by the connector capability set.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("connection establishment exceeded {0:?}")]
    ConnectTimeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("reconnect attempts exhausted after {attempts}")]
    RetriesExhausted { attempts: u32 },
}

/// Result type alias for connector operations.
pub type Result<T> = std::result::Result<T, ConnectorError>;
