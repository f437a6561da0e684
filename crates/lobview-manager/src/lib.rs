//! Aggregation layer: composes exchange connectors and publishes a
//! consolidated, debounced order book view.

pub mod debounce;
pub mod manager;

pub use debounce::{DebounceGate, Decision};
pub use manager::{AggregationManager, ManagerConfig};
