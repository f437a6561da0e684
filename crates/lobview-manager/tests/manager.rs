//! Aggregation manager behavior tests against an in-process fake connector.
//!
//! Time-sensitive tests run under tokio's paused clock so the debounce
//! window is deterministic.

use async_trait::async_trait;
use lobview_core::{
    ConfigPatch, ConnectionState, ConnectorError, ConnectorEvent, EventBus, ExchangeConnector,
    OrderBookSnapshot, PriceLevel, Subscription,
};
use lobview_manager::{AggregationManager, ManagerConfig};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct FakeConnector {
    id: &'static str,
    state: Mutex<ConnectionState>,
    bus: EventBus<ConnectorEvent>,
    fail_connect: bool,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl FakeConnector {
    fn new(id: &'static str) -> Arc<Self> {
        Self::build(id, false)
    }

    fn failing(id: &'static str) -> Arc<Self> {
        Self::build(id, true)
    }

    fn build(id: &'static str, fail_connect: bool) -> Arc<Self> {
        Arc::new(Self {
            id,
            state: Mutex::new(ConnectionState::Disconnected),
            bus: EventBus::new(),
            fail_connect,
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        })
    }

    fn emit_snapshot(&self, price: &str) {
        let snap = OrderBookSnapshot::from_levels(
            self.id,
            "BTC/USDT",
            vec![PriceLevel::new(price.parse().unwrap(), "1".parse().unwrap())],
            vec![],
            20,
            None,
        );
        self.bus.emit(&ConnectorEvent::Snapshot(Arc::new(snap)));
    }

    fn emit_status(&self, state: ConnectionState) {
        *self.state.lock() = state;
        self.bus.emit(&ConnectorEvent::status(state));
    }

    fn emit_failed(&self, message: &str) {
        self.bus
            .emit(&ConnectorEvent::failed_with(message, "detail"));
    }
}

#[async_trait]
impl ExchangeConnector for FakeConnector {
    fn exchange_id(&self) -> &str {
        self.id
    }

    fn symbol(&self) -> String {
        "BTC/USDT".to_string()
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn latest_snapshot(&self) -> Option<Arc<OrderBookSnapshot>> {
        None
    }

    fn subscribe(&self) -> (Subscription, mpsc::UnboundedReceiver<ConnectorEvent>) {
        self.bus.subscribe()
    }

    async fn connect(&self) -> lobview_core::Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect {
            *self.state.lock() = ConnectionState::Errored;
            return Err(ConnectorError::Transport("connection refused".to_string()));
        }
        *self.state.lock() = ConnectionState::Connected;
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        *self.state.lock() = ConnectionState::Disconnected;
    }

    async fn update_config(&self, _patch: ConfigPatch) -> lobview_core::Result<()> {
        Ok(())
    }
}

fn manager_with_window(window_ms: u64) -> AggregationManager {
    AggregationManager::new(ManagerConfig {
        debounce_window: Duration::from_millis(window_ms),
        ..ManagerConfig::default()
    })
}

/// Let spawned forwarder/central tasks run to quiescence.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[tokio::test]
async fn test_duplicate_register_is_rejected() {
    let manager = manager_with_window(100);
    let a = FakeConnector::new("binance");
    let a2 = FakeConnector::new("binance");

    assert!(manager.register(a));
    assert!(!manager.register(a2));
    assert_eq!(manager.status().total(), 1);
    manager.destroy().await;
}

#[tokio::test]
async fn test_register_publishes_status() {
    let manager = manager_with_window(100);
    let (_sub, mut status_rx) = manager.subscribe_status();

    manager.register(FakeConnector::new("binance"));
    let status = status_rx.try_recv().unwrap();
    assert_eq!(status.total(), 1);
    assert_eq!(
        status.by_exchange.get("binance"),
        Some(&ConnectionState::Disconnected)
    );
    manager.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_first_update_publishes_immediately() {
    let manager = manager_with_window(100);
    let fake = FakeConnector::new("binance");
    manager.register(fake.clone());
    let (_sub, mut view_rx) = manager.subscribe_view();

    fake.emit_snapshot("100");
    settle().await;

    let view = view_rx.try_recv().unwrap();
    assert_eq!(view.by_exchange.len(), 1);
    assert!(view.by_exchange.contains_key("binance"));
    assert_eq!(view.symbol, "BTC/USDT");
    manager.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_burst_within_window_coalesces_to_one_follow_up() {
    let manager = manager_with_window(100);
    let fake = FakeConnector::new("binance");
    manager.register(fake.clone());
    let (_sub, mut view_rx) = manager.subscribe_view();

    // Leading edge publishes at once.
    fake.emit_snapshot("100");
    settle().await;
    assert!(view_rx.try_recv().is_ok());

    // A burst inside the window is deferred.
    for price in ["101", "102", "103", "104", "105"] {
        fake.emit_snapshot(price);
    }
    settle().await;
    assert!(view_rx.try_recv().is_err());

    // One follow-up after the window, carrying the latest snapshot.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let view = view_rx.try_recv().unwrap();
    assert_eq!(
        view.by_exchange["binance"].best_bid().unwrap().price.to_string(),
        "105"
    );
    assert!(view_rx.try_recv().is_err());

    // A quiet follow-up window publishes nothing further.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(view_rx.try_recv().is_err());
    manager.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_status_bypasses_the_debounce_window() {
    let manager = manager_with_window(100);
    let fake = FakeConnector::new("binance");
    manager.register(fake.clone());
    let (_vsub, mut view_rx) = manager.subscribe_view();
    let (_ssub, mut status_rx) = manager.subscribe_status();
    while status_rx.try_recv().is_ok() {}

    // Open the window, then change state inside it.
    fake.emit_snapshot("100");
    settle().await;
    assert!(view_rx.try_recv().is_ok());

    fake.emit_status(ConnectionState::Reconnecting);
    settle().await;

    let status = status_rx.try_recv().unwrap();
    assert_eq!(status.reconnecting, 1);
    // View is still held back by the window.
    assert!(view_rx.try_recv().is_err());
    manager.destroy().await;
}

#[tokio::test]
async fn test_failures_are_tagged_and_logged() {
    let manager = manager_with_window(100);
    let fake = FakeConnector::new("foxbit");
    manager.register(fake.clone());
    let (_sub, mut error_rx) = manager.subscribe_errors();

    fake.emit_failed("sequence gap detected, resyncing book");
    settle().await;

    let error = error_rx.try_recv().unwrap();
    assert_eq!(error.exchange_id, "foxbit");
    assert_eq!(error.message, "sequence gap detected, resyncing book");
    assert_eq!(error.detail.as_deref(), Some("detail"));

    let log = manager.recent_errors();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].exchange_id, "foxbit");

    manager.clear_errors();
    assert!(manager.recent_errors().is_empty());
    manager.destroy().await;
}

#[tokio::test(start_paused = true)]
async fn test_unregister_drops_exchange_from_view() {
    let manager = manager_with_window(100);
    let binance = FakeConnector::new("binance");
    let foxbit = FakeConnector::new("foxbit");
    manager.register(binance.clone());
    manager.register(foxbit.clone());

    binance.emit_snapshot("100");
    foxbit.emit_snapshot("99");
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(manager.consolidated_view().by_exchange.len(), 2);

    let (_sub, mut view_rx) = manager.subscribe_view();
    assert!(manager.unregister("foxbit").await);
    assert_eq!(foxbit.disconnects.load(Ordering::SeqCst), 1);

    // Removal republishes the view right away, minus the removed exchange.
    let view = view_rx.try_recv().unwrap();
    assert_eq!(view.by_exchange.len(), 1);
    assert!(!view.by_exchange.contains_key("foxbit"));

    // Events from the removed connector no longer reach the manager.
    foxbit.emit_snapshot("98");
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!manager
        .consolidated_view()
        .by_exchange
        .contains_key("foxbit"));

    assert!(!manager.unregister("foxbit").await);
    manager.destroy().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unregister_wins_against_in_flight_snapshots() {
    // A connector emitting at full tilt while it is being unregistered:
    // whatever interleaving the scheduler picks, the removal must land
    // after any snapshot the central task was already applying.
    for _ in 0..50 {
        let manager = manager_with_window(1);
        let fake = FakeConnector::new("binance");
        manager.register(fake.clone());

        let feeder = {
            let fake = fake.clone();
            tokio::spawn(async move {
                loop {
                    fake.emit_snapshot("100");
                    tokio::task::yield_now().await;
                }
            })
        };

        tokio::task::yield_now().await;
        assert!(manager.unregister("binance").await);
        assert!(!manager
            .consolidated_view()
            .by_exchange
            .contains_key("binance"));

        feeder.abort();
        manager.destroy().await;
    }
}

#[tokio::test]
async fn test_connect_failures_are_independent() {
    let manager = manager_with_window(100);
    let good = FakeConnector::new("binance");
    let bad = FakeConnector::failing("foxbit");
    manager.register(good.clone());
    manager.register(bad.clone());

    manager.connect_all().await;

    assert_eq!(good.connects.load(Ordering::SeqCst), 1);
    assert_eq!(bad.connects.load(Ordering::SeqCst), 1);
    assert_eq!(good.state(), ConnectionState::Connected);
    assert_eq!(bad.state(), ConnectionState::Errored);

    let status = manager.status();
    assert_eq!(status.connected, 1);
    assert_eq!(status.errored, 1);

    manager.disconnect_all().await;
    assert_eq!(good.disconnects.load(Ordering::SeqCst), 1);
    manager.destroy().await;
}

#[tokio::test]
async fn test_destroy_silences_everything_and_is_idempotent() {
    let manager = manager_with_window(100);
    let fake = FakeConnector::new("binance");
    manager.register(fake.clone());
    fake.emit_snapshot("100");
    settle().await;

    let (_vsub, mut view_rx) = manager.subscribe_view();
    let (_ssub, mut status_rx) = manager.subscribe_status();

    manager.destroy().await;
    assert_eq!(fake.disconnects.load(Ordering::SeqCst), 1);
    assert!(manager.consolidated_view().by_exchange.is_empty());
    assert!(manager.recent_errors().is_empty());

    // Listener channels are closed, nothing fires afterwards.
    assert!(view_rx.recv().await.is_none());
    assert!(status_rx.recv().await.is_none());

    // No effect on a dead manager.
    manager.destroy().await;
    assert!(!manager.register(FakeConnector::new("mercadobitcoin")));
}
