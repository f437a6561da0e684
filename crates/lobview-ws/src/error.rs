//! WebSocket transport error types.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WsError {
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("keepalive timeout")]
    KeepaliveTimeout,

    #[error("tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),
}

pub type WsResult<T> = Result<T, WsError>;
