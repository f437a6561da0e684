//! Binance depth stream connector.
//!
//! Full-snapshot-per-message variant: the depth stream subscribes implicitly
//! through the URL path, every inbound frame carries complete bid/ask arrays
//! for the current cadence, and no local bookkeeping is needed. Sequence
//! numbers are carried through but not used for gap detection; the exchange
//! is authoritative for what it sends per message.

use crate::client::ExchangeClient;
use crate::protocol::{parse_levels, ExchangeProtocol, ProtocolSession, SessionUpdate};
use async_trait::async_trait;
use lobview_core::{ConnectorConfig, OrderBookSnapshot};
use serde::Deserialize;
use tracing::debug;

pub const EXCHANGE_ID: &str = "binance";

const STREAM_BASE: &str = "wss://stream.binance.com:9443/ws";

/// Build a Binance connector.
pub fn connector(config: ConnectorConfig) -> ExchangeClient<BinanceDepth> {
    ExchangeClient::new(BinanceDepth, config)
}

/// "BTC/USDT" -> "btcusdt"
fn native_symbol(symbol: &str) -> String {
    symbol
        .chars()
        .filter(|c| *c != '/')
        .collect::<String>()
        .to_lowercase()
}

pub struct BinanceDepth;

impl ExchangeProtocol for BinanceDepth {
    type Session = BinanceSession;

    fn exchange_id(&self) -> &'static str {
        EXCHANGE_ID
    }

    fn stream_url(&self, config: &ConnectorConfig) -> String {
        format!(
            "{STREAM_BASE}/{}@depth@100ms",
            native_symbol(&config.symbol)
        )
    }

    fn new_session(&self, _config: &ConnectorConfig) -> BinanceSession {
        BinanceSession
    }
}

/// Depth stream frame. Unlisted fields (event time, first update id) are
/// ignored by serde.
#[derive(Debug, Deserialize)]
struct DepthFrame {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "u")]
    final_update_id: u64,
    #[serde(rename = "b")]
    bids: Vec<(String, String)>,
    #[serde(rename = "a")]
    asks: Vec<(String, String)>,
}

pub struct BinanceSession;

#[async_trait]
impl ProtocolSession for BinanceSession {
    fn on_text(&mut self, config: &ConnectorConfig, text: &str) -> SessionUpdate {
        // Malformed or off-type frames are dropped without touching
        // connection state.
        let frame: DepthFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "dropping unparsable depth frame");
                return SessionUpdate::Ignore;
            }
        };
        if frame.event_type != "depthUpdate" {
            debug!(event_type = %frame.event_type, "dropping off-type frame");
            return SessionUpdate::Ignore;
        }

        SessionUpdate::Snapshot(OrderBookSnapshot::from_levels(
            EXCHANGE_ID,
            &config.symbol,
            parse_levels(&frame.bids),
            parse_levels(&frame.asks),
            config.depth(),
            Some(frame.final_update_id),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn config(depth: usize) -> ConnectorConfig {
        let mut config = ConnectorConfig::new("BTC/USDT");
        config.max_depth = Some(depth);
        config
    }

    #[test]
    fn test_native_symbol() {
        assert_eq!(native_symbol("BTC/USDT"), "btcusdt");
        assert_eq!(native_symbol("eth/btc"), "ethbtc");
    }

    #[test]
    fn test_stream_url() {
        let url = BinanceDepth.stream_url(&config(5));
        assert_eq!(url, "wss://stream.binance.com:9443/ws/btcusdt@depth@100ms");
    }

    #[test]
    fn test_depth_frame_to_snapshot() {
        let text = r#"{
            "e": "depthUpdate", "E": 1693000000000, "s": "BTCUSDT",
            "U": 157, "u": 160,
            "b": [["26100.10", "0.5"], ["26099.00", "1.0"]],
            "a": [["26101.50", "0.2"], ["26102.00", "0.8"]]
        }"#;
        let update = BinanceSession.on_text(&config(5), text);
        let SessionUpdate::Snapshot(snap) = update else {
            panic!("expected snapshot");
        };
        assert_eq!(snap.exchange_id, EXCHANGE_ID);
        assert_eq!(snap.sequence_id, Some(160));
        assert_eq!(snap.best_bid().unwrap().price.inner(), dec!(26100.10));
        assert_eq!(snap.best_ask().unwrap().price.inner(), dec!(26101.50));
        assert!(snap.is_well_formed(5));
    }

    #[test]
    fn test_eight_levels_trimmed_to_five() {
        let bids: Vec<String> = (1..=8)
            .map(|i| format!("[\"{}\", \"1\"]", 100 + i))
            .collect();
        let asks: Vec<String> = (1..=8)
            .map(|i| format!("[\"{}\", \"1\"]", 200 + i))
            .collect();
        let text = format!(
            r#"{{"e":"depthUpdate","s":"BTCUSDT","U":1,"u":2,"b":[{}],"a":[{}]}}"#,
            bids.join(","),
            asks.join(",")
        );

        let SessionUpdate::Snapshot(snap) = BinanceSession.on_text(&config(5), &text) else {
            panic!("expected snapshot");
        };
        assert_eq!(snap.bids.len(), 5);
        assert_eq!(snap.asks.len(), 5);
        assert_eq!(snap.bids[0].price.inner(), dec!(108));
        assert_eq!(snap.bids[4].price.inner(), dec!(104));
        assert_eq!(snap.asks[0].price.inner(), dec!(201));
        assert_eq!(snap.asks[4].price.inner(), dec!(205));
    }

    #[test]
    fn test_malformed_and_off_type_frames_ignored() {
        let mut session = BinanceSession;
        assert!(matches!(
            session.on_text(&config(5), "not json"),
            SessionUpdate::Ignore
        ));
        assert!(matches!(
            session.on_text(
                &config(5),
                r#"{"e":"aggTrade","u":1,"b":[],"a":[]}"#
            ),
            SessionUpdate::Ignore
        ));
    }
}
