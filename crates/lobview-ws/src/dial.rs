//! Bounded WebSocket connection establishment.

use crate::error::{WsError, WsResult};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async_tls_with_config, MaybeTlsStream, WebSocketStream};
use tracing::info;

/// Established WebSocket stream (plain or TLS).
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open a WebSocket connection within `timeout`.
///
/// Exceeding the budget is reported as [`WsError::ConnectTimeout`]; callers
/// treat it like any other connection failure and run their reconnect path.
pub async fn dial(url: &str, timeout: Duration) -> WsResult<WsStream> {
    info!(%url, "dialing websocket");
    match tokio::time::timeout(timeout, connect_async_tls_with_config(url, None, true, None)).await
    {
        Err(_elapsed) => Err(WsError::ConnectTimeout(timeout)),
        Ok(Err(e)) => Err(e.into()),
        Ok(Ok((stream, _response))) => Ok(stream),
    }
}

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any WebSocket connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
