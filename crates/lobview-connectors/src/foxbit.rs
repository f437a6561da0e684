//! FoxBit orderbook channel connector.
//!
//! Incremental-diff variant. The stream only carries changed levels, so the
//! session keeps private per-side maps and runs in two phases:
//!
//! 1. snapshot bootstrap — a REST fetch seeds the maps and publishes the
//!    first snapshot; a failed fetch emits `Failed` and retries over the
//!    same socket;
//! 2. diff application — quantity zero deletes a level, any other quantity
//!    is the new resting quantity at that price (upsert, never additive).
//!
//! Sequence ids are validated for continuity; a gap clears the book and
//! forces a re-bootstrap.

use crate::client::ExchangeClient;
use crate::protocol::{
    BootstrapError, ExchangeProtocol, KeepaliveSpec, ProtocolSession, SessionUpdate,
};
use async_trait::async_trait;
use lobview_core::{ConnectorConfig, OrderBookSnapshot, Price, PriceLevel, Qty};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

pub const EXCHANGE_ID: &str = "foxbit";

const WS_URL: &str = "wss://api.foxbit.com.br/ws/v1";
const REST_BASE: &str = "https://api.foxbit.com.br/rest/v3";
const PING_INTERVAL: Duration = Duration::from_secs(20);
const PING_TIMEOUT: Duration = Duration::from_secs(10);

/// Build a FoxBit connector.
pub fn connector(config: ConnectorConfig) -> ExchangeClient<FoxbitOrderbook> {
    ExchangeClient::new(FoxbitOrderbook::new(), config)
}

/// "BTC/BRL" -> "btcbrl"
fn native_symbol(symbol: &str) -> String {
    symbol
        .chars()
        .filter(|c| *c != '/')
        .collect::<String>()
        .to_lowercase()
}

pub struct FoxbitOrderbook {
    http: reqwest::Client,
}

impl FoxbitOrderbook {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for FoxbitOrderbook {
    fn default() -> Self {
        Self::new()
    }
}

impl ExchangeProtocol for FoxbitOrderbook {
    type Session = FoxbitSession;

    fn exchange_id(&self) -> &'static str {
        EXCHANGE_ID
    }

    fn stream_url(&self, _config: &ConnectorConfig) -> String {
        WS_URL.to_string()
    }

    fn new_session(&self, _config: &ConnectorConfig) -> FoxbitSession {
        FoxbitSession::new(self.http.clone())
    }

    fn subscribe_frames(&self, config: &ConnectorConfig) -> Vec<String> {
        vec![json!({
            "type": "subscribe",
            "params": [{
                "channel": "orderbook",
                "market_symbol": native_symbol(&config.symbol),
                "snapshot": true,
            }],
        })
        .to_string()]
    }

    fn unsubscribe_frames(&self, config: &ConnectorConfig) -> Vec<String> {
        // Server-side subscriptions leak unless explicitly dropped.
        vec![json!({
            "type": "unsubscribe",
            "params": [{
                "channel": "orderbook",
                "market_symbol": native_symbol(&config.symbol),
            }],
        })
        .to_string()]
    }

    fn keepalive(&self) -> Option<KeepaliveSpec> {
        Some(KeepaliveSpec {
            interval: PING_INTERVAL,
            timeout: PING_TIMEOUT,
            ping_text: None, // transport-level ping frame
        })
    }
}

/// REST point-in-time book used to seed the diff stream.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestBook {
    sequence_id: u64,
    bids: Vec<(String, String)>,
    asks: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
struct UpdateFrame {
    event: String,
    data: UpdateData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateData {
    #[serde(default)]
    bids: Vec<(String, String)>,
    #[serde(default)]
    asks: Vec<(String, String)>,
    last_sequence_id: u64,
}

pub struct FoxbitSession {
    http: reqwest::Client,
    bids: BTreeMap<Price, Qty>,
    asks: BTreeMap<Price, Qty>,
    last_sequence: Option<u64>,
    bootstrapped: bool,
}

impl FoxbitSession {
    fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_sequence: None,
            bootstrapped: false,
        }
    }

    /// Seed the working book from a point-in-time snapshot.
    fn seed(&mut self, sequence_id: u64, bids: &[(String, String)], asks: &[(String, String)]) {
        self.bids.clear();
        self.asks.clear();
        seed_side(&mut self.bids, bids);
        seed_side(&mut self.asks, asks);
        self.last_sequence = Some(sequence_id);
        self.bootstrapped = true;
    }

    /// Invalidate the working book; the runtime will re-bootstrap.
    fn invalidate(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.last_sequence = None;
        self.bootstrapped = false;
    }

    /// Apply one side's diff entries: zero deletes, non-zero upserts.
    fn apply_side(side: &mut BTreeMap<Price, Qty>, entries: &[(String, String)]) {
        for (price, qty) in entries {
            let (Ok(price), Ok(qty)) = (price.parse::<Price>(), qty.parse::<Qty>()) else {
                debug!(%price, %qty, "dropping unparsable diff entry");
                continue;
            };
            if qty.is_zero() {
                side.remove(&price);
            } else {
                side.insert(price, qty);
            }
        }
    }

    /// Rebuild the publishable snapshot from the working maps.
    fn snapshot(&self, config: &ConnectorConfig) -> OrderBookSnapshot {
        let bids = self
            .bids
            .iter()
            .map(|(&price, &qty)| PriceLevel::new(price, qty))
            .collect();
        let asks = self
            .asks
            .iter()
            .map(|(&price, &qty)| PriceLevel::new(price, qty))
            .collect();
        OrderBookSnapshot::from_levels(
            EXCHANGE_ID,
            &config.symbol,
            bids,
            asks,
            config.depth(),
            self.last_sequence,
        )
    }
}

fn seed_side(side: &mut BTreeMap<Price, Qty>, entries: &[(String, String)]) {
    for (price, qty) in entries {
        let (Ok(price), Ok(qty)) = (price.parse::<Price>(), qty.parse::<Qty>()) else {
            debug!(%price, %qty, "dropping unparsable snapshot level");
            continue;
        };
        if qty.is_positive() {
            side.insert(price, qty);
        }
    }
}

#[async_trait]
impl ProtocolSession for FoxbitSession {
    fn on_text(&mut self, config: &ConnectorConfig, text: &str) -> SessionUpdate {
        let frame: UpdateFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(_) => {
                // Subscription acks and other service frames land here.
                debug!("ignoring non-update frame");
                return SessionUpdate::Ignore;
            }
        };
        if frame.event != "update" {
            return SessionUpdate::Ignore;
        }

        if !self.bootstrapped {
            // No base book to apply a diff to yet; the bootstrap publish
            // will restore a consistent view.
            debug!(sequence = frame.data.last_sequence_id, "diff before bootstrap, dropped");
            return SessionUpdate::Ignore;
        }

        if let Some(prev) = self.last_sequence {
            let expected = prev + 1;
            if frame.data.last_sequence_id != expected {
                warn!(
                    expected,
                    got = frame.data.last_sequence_id,
                    "sequence gap on orderbook channel, resyncing"
                );
                self.invalidate();
                return SessionUpdate::Failed {
                    message: "sequence gap detected, resyncing book".to_string(),
                    detail: Some(format!(
                        "expected {expected}, got {}",
                        frame.data.last_sequence_id
                    )),
                };
            }
        }

        Self::apply_side(&mut self.bids, &frame.data.bids);
        Self::apply_side(&mut self.asks, &frame.data.asks);
        self.last_sequence = Some(frame.data.last_sequence_id);

        SessionUpdate::Snapshot(self.snapshot(config))
    }

    fn needs_bootstrap(&self) -> bool {
        !self.bootstrapped
    }

    async fn bootstrap(
        &mut self,
        config: &ConnectorConfig,
    ) -> Result<Option<OrderBookSnapshot>, BootstrapError> {
        let url = format!(
            "{REST_BASE}/markets/{}/orderbook?depth={}",
            native_symbol(&config.symbol),
            config.depth()
        );
        let book: RestBook = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        self.seed(book.sequence_id, &book.bids, &book.asks);
        debug!(sequence = book.sequence_id, "book bootstrap complete");
        Ok(Some(self.snapshot(config)))
    }
}
