//! Mercado Bitcoin orderbook connector.
//!
//! Full-snapshot-with-keepalive variant: after an explicit subscribe
//! handshake every message is a complete current snapshot, so no local
//! reconstruction is needed. The client pings on a 20s cadence and treats
//! server error frames as non-fatal `Failed` events with the socket left
//! open. Wire timestamps are nanoseconds and are converted to milliseconds.

use crate::client::ExchangeClient;
use crate::protocol::{ExchangeProtocol, KeepaliveSpec, ProtocolSession, SessionUpdate};
use async_trait::async_trait;
use lobview_core::{ConnectorConfig, OrderBookSnapshot, Price, PriceLevel, Qty};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

pub const EXCHANGE_ID: &str = "mercadobitcoin";

const WS_URL: &str = "wss://ws.mercadobitcoin.net/ws";
const PING_INTERVAL: Duration = Duration::from_secs(20);
const PING_TIMEOUT: Duration = Duration::from_secs(10);

/// Build a Mercado Bitcoin connector.
pub fn connector(config: ConnectorConfig) -> ExchangeClient<MercadoOrderbook> {
    ExchangeClient::new(MercadoOrderbook, config)
}

/// "BTC/BRL" -> "BRLBTC" (quote-then-base instrument id).
fn native_symbol(symbol: &str) -> String {
    match symbol.split_once('/') {
        Some((base, quote)) => format!("{}{}", quote.to_uppercase(), base.to_uppercase()),
        None => symbol.to_uppercase(),
    }
}

pub struct MercadoOrderbook;

impl ExchangeProtocol for MercadoOrderbook {
    type Session = MercadoSession;

    fn exchange_id(&self) -> &'static str {
        EXCHANGE_ID
    }

    fn stream_url(&self, _config: &ConnectorConfig) -> String {
        WS_URL.to_string()
    }

    fn new_session(&self, _config: &ConnectorConfig) -> MercadoSession {
        MercadoSession
    }

    fn subscribe_frames(&self, config: &ConnectorConfig) -> Vec<String> {
        vec![json!({
            "type": "subscribe",
            "subscription": {
                "name": "orderbook",
                "id": native_symbol(&config.symbol),
                "limit": config.depth(),
            },
        })
        .to_string()]
    }

    fn keepalive(&self) -> Option<KeepaliveSpec> {
        Some(KeepaliveSpec {
            interval: PING_INTERVAL,
            timeout: PING_TIMEOUT,
            ping_text: Some(json!({"type": "ping"}).to_string()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct Frame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<BookData>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BookData {
    /// Nanoseconds since the epoch.
    timestamp: i64,
    bids: Vec<(RawNumber, RawNumber)>,
    asks: Vec<(RawNumber, RawNumber)>,
}

/// The channel has sent numbers both quoted and bare; accept either.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawNumber {
    Text(String),
    Float(f64),
}

impl RawNumber {
    fn to_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Text(s) => s.parse().ok(),
            Self::Float(f) => Decimal::from_f64(*f),
        }
    }
}

fn parse_side(entries: &[(RawNumber, RawNumber)]) -> Vec<PriceLevel> {
    entries
        .iter()
        .filter_map(|(price, qty)| {
            let (Some(price), Some(qty)) = (price.to_decimal(), qty.to_decimal()) else {
                debug!("dropping unparsable orderbook level");
                return None;
            };
            Some(PriceLevel::new(Price::new(price), Qty::new(qty)))
        })
        .collect()
}

pub struct MercadoSession;

#[async_trait]
impl ProtocolSession for MercadoSession {
    fn on_text(&mut self, config: &ConnectorConfig, text: &str) -> SessionUpdate {
        let frame: Frame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "dropping unparsable frame");
                return SessionUpdate::Ignore;
            }
        };

        match frame.kind.as_str() {
            "pong" => SessionUpdate::Pong,
            "error" => SessionUpdate::Failed {
                message: "server error frame".to_string(),
                detail: frame.message,
            },
            "orderbook" => {
                let Some(data) = frame.data else {
                    debug!("orderbook frame without data");
                    return SessionUpdate::Ignore;
                };
                let snapshot = OrderBookSnapshot::from_levels(
                    EXCHANGE_ID,
                    &config.symbol,
                    parse_side(&data.bids),
                    parse_side(&data.asks),
                    config.depth(),
                    None,
                )
                .with_observed_at(data.timestamp / 1_000_000);
                SessionUpdate::Snapshot(snapshot)
            }
            other => {
                debug!(kind = %other, "ignoring frame");
                SessionUpdate::Ignore
            }
        }
    }
}
