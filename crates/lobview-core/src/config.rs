//! Connector configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default depth retained per side when none is configured.
pub const DEFAULT_DEPTH: usize = 20;

/// Connection establishment budget; exceeding it counts as a connection
/// failure and feeds the reconnect path.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Reconnection policy for a connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Whether automatic reconnection is attempted at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Maximum reconnection attempts (0 = unbounded).
    #[serde(default)]
    pub max_attempts: u32,
    /// Delay before the first reconnection attempt.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Growth factor applied to the delay after each failed attempt.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_enabled() -> bool {
    true
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    1.0
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_attempts: 0,
            initial_delay_ms: default_initial_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnection attempt `attempt` (1-indexed):
    /// `initial_delay_ms * backoff_multiplier^(attempt-1)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let ms = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent as i32);
        Duration::from_millis(ms.round() as u64)
    }
}

/// Configuration for a single exchange connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Human-readable pair, e.g. "BTC/USDT". Each connector converts this
    /// to its exchange's native representation.
    pub symbol: String,
    /// Maximum price levels retained per side.
    #[serde(default)]
    pub max_depth: Option<usize>,
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

impl ConnectorConfig {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            max_depth: None,
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Effective per-side depth.
    pub fn depth(&self) -> usize {
        self.max_depth.unwrap_or(DEFAULT_DEPTH)
    }

    /// Merge a partial update into this config. Returns true if anything
    /// changed.
    pub fn apply(&mut self, patch: ConfigPatch) -> bool {
        let mut changed = false;
        if let Some(symbol) = patch.symbol {
            if symbol != self.symbol {
                self.symbol = symbol;
                changed = true;
            }
        }
        if let Some(max_depth) = patch.max_depth {
            if Some(max_depth) != self.max_depth {
                self.max_depth = Some(max_depth);
                changed = true;
            }
        }
        if let Some(reconnect) = patch.reconnect {
            if reconnect != self.reconnect {
                self.reconnect = reconnect;
                changed = true;
            }
        }
        changed
    }
}

/// Partial connector configuration, merged via [`ConnectorConfig::apply`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigPatch {
    pub symbol: Option<String>,
    pub max_depth: Option<usize>,
    pub reconnect: Option<ReconnectPolicy>,
}
