//! Aggregation manager.
//!
//! Composes N exchange connectors behind their abstract contract, merges
//! their event streams into one consolidated, debounced view, and fans the
//! results out to view/status/error subscribers.
//!
//! Concurrency model: each registered connector gets a forwarder task that
//! tags its events with the exchange id and pushes them into one merged
//! queue; a single central task consumes the queue, so cache mutation and
//! the debounce-scheduling decision are always made by one writer.

use crate::debounce::{DebounceGate, Decision};
use dashmap::DashMap;
use futures_util::future::join_all;
use lobview_core::{
    now_ms, ConnectorEvent, ConsolidatedView, EventBus, ExchangeConnector, ExchangeError,
    ManagerStatus, OrderBookSnapshot, Subscription,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Manager tuning knobs.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Debounce window for consolidated view publication.
    pub debounce_window: Duration,
    /// Cap on the inspectable error log.
    pub max_error_log: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            debounce_window: Duration::from_millis(100),
            max_error_log: 100,
        }
    }
}

struct Registered {
    connector: Arc<dyn ExchangeConnector>,
    forwarder: JoinHandle<()>,
    _subscription: Subscription,
}

/// Everything the central task consumes. The snapshot cache is only ever
/// written by that task, so cache removal on unregister travels through the
/// same queue as the events it must not race with.
enum CentralMsg {
    Event(String, ConnectorEvent),
    Unregister {
        exchange_id: String,
        done: oneshot::Sender<()>,
    },
}

struct Inner {
    config: ManagerConfig,
    connectors: DashMap<String, Registered>,
    books: DashMap<String, Arc<OrderBookSnapshot>>,
    view_bus: EventBus<ConsolidatedView>,
    status_bus: EventBus<ManagerStatus>,
    error_bus: EventBus<ExchangeError>,
    errors: Mutex<VecDeque<ExchangeError>>,
    event_tx: mpsc::UnboundedSender<CentralMsg>,
    shutdown: CancellationToken,
    destroyed: AtomicBool,
}

impl Inner {
    fn build_view(&self) -> ConsolidatedView {
        let by_exchange = self
            .books
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        ConsolidatedView {
            by_exchange,
            last_update_ms: now_ms(),
            symbol: self.current_symbol(),
        }
    }

    /// Symbol from a connected connector, falling back to any registered
    /// one.
    fn current_symbol(&self) -> String {
        let mut fallback = String::new();
        for entry in self.connectors.iter() {
            let connector = &entry.value().connector;
            if connector.state() == lobview_core::ConnectionState::Connected {
                return connector.symbol();
            }
            if fallback.is_empty() {
                fallback = connector.symbol();
            }
        }
        fallback
    }

    fn build_status(&self) -> ManagerStatus {
        ManagerStatus::tally(
            self.connectors
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().connector.state())),
        )
    }

    fn publish_view(&self) {
        self.view_bus.emit(&self.build_view());
    }

    fn publish_status(&self) {
        self.status_bus.emit(&self.build_status());
    }

    fn record_error(&self, exchange_id: String, message: String, detail: Option<String>) {
        let error = ExchangeError {
            exchange_id,
            message,
            detail,
            at_ms: now_ms(),
        };
        {
            let mut errors = self.errors.lock();
            if errors.len() >= self.config.max_error_log {
                errors.pop_front();
            }
            errors.push_back(error.clone());
        }
        self.error_bus.emit(&error);
    }
}

/// Composes connectors and publishes consolidated snapshots plus status.
pub struct AggregationManager {
    inner: Arc<Inner>,
    central: TokioMutex<Option<JoinHandle<()>>>,
}

impl AggregationManager {
    pub fn new(config: ManagerConfig) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            config,
            connectors: DashMap::new(),
            books: DashMap::new(),
            view_bus: EventBus::new(),
            status_bus: EventBus::new(),
            error_bus: EventBus::new(),
            errors: Mutex::new(VecDeque::new()),
            event_tx,
            shutdown: CancellationToken::new(),
            destroyed: AtomicBool::new(false),
        });
        let central = tokio::spawn(run_central(inner.clone(), event_rx));
        Self {
            inner,
            central: TokioMutex::new(Some(central)),
        }
    }

    /// Register a connector and start consuming its events. Duplicate
    /// exchange ids are rejected as a logged no-op. Returns whether the
    /// connector was registered.
    pub fn register(&self, connector: Arc<dyn ExchangeConnector>) -> bool {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            warn!("register called on destroyed manager");
            return false;
        }
        let exchange_id = connector.exchange_id().to_string();
        if self.inner.connectors.contains_key(&exchange_id) {
            warn!(exchange = %exchange_id, "duplicate register ignored");
            return false;
        }

        let (subscription, mut events) = connector.subscribe();
        let event_tx = self.inner.event_tx.clone();
        let tag = exchange_id.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if event_tx.send(CentralMsg::Event(tag.clone(), event)).is_err() {
                    break;
                }
            }
        });

        info!(exchange = %exchange_id, "connector registered");
        self.inner.connectors.insert(
            exchange_id,
            Registered {
                connector,
                forwarder,
                _subscription: subscription,
            },
        );
        self.inner.publish_status();
        true
    }

    /// Disconnect, unsubscribe, and forget a connector, dropping its cached
    /// snapshot. Returns whether anything was removed.
    pub async fn unregister(&self, exchange_id: &str) -> bool {
        let Some((_, registered)) = self.inner.connectors.remove(exchange_id) else {
            debug!(exchange = %exchange_id, "unregister: not registered");
            return false;
        };
        let Registered {
            connector,
            forwarder,
            _subscription,
        } = registered;
        forwarder.abort();
        drop(_subscription);
        connector.disconnect().await;

        // The central task owns the snapshot cache; route the removal
        // through its queue so it lands after any snapshot it may already
        // be applying, and wait for it so callers observe the removal.
        let (done_tx, done_rx) = oneshot::channel();
        let routed = self.inner.event_tx.send(CentralMsg::Unregister {
            exchange_id: exchange_id.to_string(),
            done: done_tx,
        });
        if routed.is_ok() {
            let _ = done_rx.await;
        } else {
            // Central task already gone (destroy in flight).
            self.inner.books.remove(exchange_id);
        }
        info!(exchange = %exchange_id, "connector unregistered");
        true
    }

    /// Connect every registered connector. Attempts run independently; one
    /// failure neither blocks nor fails the others.
    pub async fn connect_all(&self) {
        let connectors: Vec<_> = self
            .inner
            .connectors
            .iter()
            .map(|entry| entry.value().connector.clone())
            .collect();
        let results = join_all(connectors.iter().map(|c| c.connect())).await;
        for (connector, result) in connectors.iter().zip(results) {
            if let Err(e) = result {
                warn!(exchange = connector.exchange_id(), error = %e, "connect failed");
            }
        }
    }

    /// Disconnect every registered connector.
    pub async fn disconnect_all(&self) {
        let connectors: Vec<_> = self
            .inner
            .connectors
            .iter()
            .map(|entry| entry.value().connector.clone())
            .collect();
        join_all(connectors.iter().map(|c| c.disconnect())).await;
    }

    /// Synchronous read of the current consolidated view.
    pub fn consolidated_view(&self) -> ConsolidatedView {
        self.inner.build_view()
    }

    /// Synchronous tally of connector states.
    pub fn status(&self) -> ManagerStatus {
        self.inner.build_status()
    }

    pub fn subscribe_view(&self) -> (Subscription, mpsc::UnboundedReceiver<ConsolidatedView>) {
        self.inner.view_bus.subscribe()
    }

    pub fn subscribe_status(&self) -> (Subscription, mpsc::UnboundedReceiver<ManagerStatus>) {
        self.inner.status_bus.subscribe()
    }

    pub fn subscribe_errors(&self) -> (Subscription, mpsc::UnboundedReceiver<ExchangeError>) {
        self.inner.error_bus.subscribe()
    }

    /// Accumulated connector failures, oldest first.
    pub fn recent_errors(&self) -> Vec<ExchangeError> {
        self.inner.errors.lock().iter().cloned().collect()
    }

    pub fn clear_errors(&self) {
        self.inner.errors.lock().clear();
    }

    /// Tear everything down: cancel the debounce/central task, disconnect
    /// and drop every connector, clear caches and listener sets. Safe to
    /// call multiple times; nothing fires afterwards.
    pub async fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("destroying aggregation manager");
        self.inner.shutdown.cancel();
        if let Some(task) = self.central.lock().await.take() {
            let _ = task.await;
        }

        let ids: Vec<String> = self
            .inner
            .connectors
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        let mut disconnects = Vec::new();
        for id in ids {
            if let Some((_, registered)) = self.inner.connectors.remove(&id) {
                registered.forwarder.abort();
                disconnects.push(registered.connector);
            }
        }
        join_all(disconnects.iter().map(|c| c.disconnect())).await;

        self.inner.books.clear();
        self.inner.view_bus.clear();
        self.inner.status_bus.clear();
        self.inner.error_bus.clear();
        self.inner.errors.lock().clear();
    }
}

/// Single-writer event loop: cache mutation, debounce decisions, and
/// publication all happen here.
async fn run_central(inner: Arc<Inner>, mut events: mpsc::UnboundedReceiver<CentralMsg>) {
    let mut gate = DebounceGate::new();
    let mut window_due: Option<tokio::time::Instant> = None;
    let window = inner.config.debounce_window;

    loop {
        // Copy the deadline out so the tick future does not hold a borrow
        // across the branch bodies below.
        let due = window_due;
        let window_tick = async move {
            match due {
                Some(due) => tokio::time::sleep_until(due).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            () = inner.shutdown.cancelled() => {
                debug!("central loop shutting down");
                return;
            }

            () = window_tick => {
                if gate.on_window_closed() {
                    inner.publish_view();
                    window_due = Some(tokio::time::Instant::now() + window);
                } else {
                    window_due = None;
                }
            }

            msg = events.recv() => {
                let Some(msg) = msg else { return };
                let (exchange_id, event) = match msg {
                    CentralMsg::Event(exchange_id, event) => (exchange_id, event),
                    CentralMsg::Unregister { exchange_id, done } => {
                        inner.books.remove(&exchange_id);
                        inner.publish_status();
                        inner.publish_view();
                        let _ = done.send(());
                        continue;
                    }
                };
                // An event queued before unregister completed must not
                // resurrect the removed exchange.
                if !inner.connectors.contains_key(&exchange_id) {
                    debug!(exchange = %exchange_id, "dropping event from unregistered connector");
                    continue;
                }
                match event {
                    ConnectorEvent::Snapshot(snapshot) => {
                        inner.books.insert(exchange_id, snapshot);
                        if gate.on_update() == Decision::PublishNow {
                            inner.publish_view();
                            window_due = Some(tokio::time::Instant::now() + window);
                        }
                    }
                    ConnectorEvent::Status { state, .. } => {
                        // Status is latency-sensitive for UI feedback; never
                        // debounced.
                        debug!(exchange = %exchange_id, %state, "status change");
                        inner.publish_status();
                    }
                    ConnectorEvent::Failed { message, detail } => {
                        inner.record_error(exchange_id, message, detail);
                    }
                }
            }
        }
    }
}
