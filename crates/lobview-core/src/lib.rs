//! Shared data model for the lobview order book aggregator.
//!
//! This crate provides the types every other crate builds on:
//! - `Price`, `Qty`: precision-safe numeric types
//! - `OrderBookSnapshot`: immutable normalized book value objects
//! - `ConnectorConfig`, `ReconnectPolicy`: connector configuration
//! - `ConnectorEvent`, `EventBus`: the observer seam between connectors
//!   and the aggregation manager
//! - `ExchangeConnector`: the abstract contract the manager composes

pub mod book;
pub mod bus;
pub mod config;
pub mod connector;
pub mod decimal;
pub mod error;
pub mod event;
pub mod view;

pub use book::{now_ms, ConnectionState, OrderBookSnapshot, PriceLevel};
pub use bus::{EventBus, Subscription};
pub use config::{ConfigPatch, ConnectorConfig, ReconnectPolicy, CONNECT_TIMEOUT, DEFAULT_DEPTH};
pub use connector::ExchangeConnector;
pub use decimal::{Price, Qty};
pub use error::{ConnectorError, Result};
pub use event::ConnectorEvent;
pub use view::{ConsolidatedView, ExchangeError, ManagerStatus};
