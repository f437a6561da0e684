//! Generic exchange client: transport lifecycle and reconnect state machine.
//!
//! One `ExchangeClient` owns one WebSocket session at a time. The session
//! runs as a spawned task, so all per-connector transitions are serialized;
//! `connect`/`disconnect`/`update_config` coordinate with it through a
//! cancellation token and await task exit, which is what makes late
//! callbacks after `disconnect()` impossible rather than merely unlikely.

use crate::protocol::{ExchangeProtocol, ProtocolSession, SessionUpdate};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use lobview_core::{
    ConfigPatch, ConnectionState, ConnectorConfig, ConnectorError, ConnectorEvent, EventBus,
    ExchangeConnector, OrderBookSnapshot, Result, Subscription, CONNECT_TIMEOUT,
};
use lobview_ws::{dial, Backoff, Keepalive, WsError};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Delay before retrying a failed snapshot bootstrap over the same socket.
const BOOTSTRAP_RETRY: Duration = Duration::from_secs(3);

struct SessionHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

struct Shared<P: ExchangeProtocol> {
    protocol: P,
    config: RwLock<ConnectorConfig>,
    state: RwLock<ConnectionState>,
    latest: RwLock<Option<Arc<OrderBookSnapshot>>>,
    events: EventBus<ConnectorEvent>,
}

impl<P: ExchangeProtocol> Shared<P> {
    /// State transition from the session task; suppressed once the session
    /// has been cancelled so a dying task cannot resurrect the connector.
    fn transition(&self, state: ConnectionState, message: Option<String>, token: &CancellationToken) {
        if token.is_cancelled() {
            return;
        }
        self.force_state(state, message);
    }

    /// Unconditional state transition (explicit caller operations).
    fn force_state(&self, state: ConnectionState, message: Option<String>) {
        let prev = {
            let mut current = self.state.write();
            std::mem::replace(&mut *current, state)
        };
        if prev != state {
            debug!(exchange = self.protocol.exchange_id(), from = %prev, to = %state, "state transition");
            self.events.emit(&ConnectorEvent::Status { state, message });
        }
    }

    fn emit(&self, event: ConnectorEvent, token: &CancellationToken) {
        if token.is_cancelled() {
            return;
        }
        self.events.emit(&event);
    }

    fn publish(&self, snapshot: OrderBookSnapshot, token: &CancellationToken) {
        if token.is_cancelled() {
            return;
        }
        let snapshot = Arc::new(snapshot);
        *self.latest.write() = Some(snapshot.clone());
        self.events.emit(&ConnectorEvent::Snapshot(snapshot));
    }
}

/// Connector over one exchange protocol.
pub struct ExchangeClient<P: ExchangeProtocol> {
    shared: Arc<Shared<P>>,
    session: TokioMutex<Option<SessionHandle>>,
}

impl<P: ExchangeProtocol> ExchangeClient<P> {
    pub fn new(protocol: P, config: ConnectorConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                protocol,
                config: RwLock::new(config),
                state: RwLock::new(ConnectionState::Disconnected),
                latest: RwLock::new(None),
                events: EventBus::new(),
            }),
            session: TokioMutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    pub fn latest_snapshot(&self) -> Option<Arc<OrderBookSnapshot>> {
        self.shared.latest.read().clone()
    }

    pub fn config(&self) -> ConnectorConfig {
        self.shared.config.read().clone()
    }

    pub fn subscribe(&self) -> (Subscription, mpsc::UnboundedReceiver<ConnectorEvent>) {
        self.shared.events.subscribe()
    }

    /// Start a session and wait for the first attempt to resolve: `Ok` once
    /// `Connected` is reached, `Err` if the first dial fails or times out
    /// (reconnection still proceeds in the background per policy).
    /// Idempotent while a session is already connecting or connected; from
    /// `Errored` or `Disconnected` it starts fresh.
    pub async fn connect(&self) -> Result<()> {
        let first_rx = {
            let mut session = self.session.lock().await;
            if matches!(
                self.state(),
                ConnectionState::Connecting
                    | ConnectionState::Connected
                    | ConnectionState::Reconnecting
            ) {
                debug!(exchange = self.shared.protocol.exchange_id(), "connect: already active");
                return Ok(());
            }

            // A finished task from a previous life may still be parked here.
            if let Some(old) = session.take() {
                old.token.cancel();
                old.task.abort();
            }

            let (first_tx, first_rx) = oneshot::channel();
            let token = CancellationToken::new();
            let task = tokio::spawn(run(self.shared.clone(), token.clone(), first_tx));
            *session = Some(SessionHandle { token, task });
            first_rx
            // Lock released here: waiting must not block disconnect().
        };

        match first_rx.await {
            Ok(result) => result,
            Err(_) => Err(ConnectorError::Transport(
                "connection attempt aborted".to_string(),
            )),
        }
    }

    /// Stop the session: cancel any in-flight dial, backoff sleep, or
    /// bootstrap retry; send unsubscribe frames if the socket is up; reset
    /// to `Disconnected` and drop cached book state. Idempotent.
    pub async fn disconnect(&self) {
        let handle = self.session.lock().await.take();
        if let Some(handle) = handle {
            handle.token.cancel();
            let _ = handle.task.await;
        }
        *self.shared.latest.write() = None;
        self.shared.force_state(ConnectionState::Disconnected, None);
    }

    /// Merge a partial config. When the connector is active, the session is
    /// cycled so the new symbol/depth gets a fresh subscription.
    pub async fn update_config(&self, patch: ConfigPatch) -> Result<()> {
        let changed = self.shared.config.write().apply(patch);
        let active = matches!(
            self.state(),
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Reconnecting
        );
        if changed && active {
            info!(exchange = self.shared.protocol.exchange_id(), "config changed, cycling connection");
            self.disconnect().await;
            self.connect().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<P: ExchangeProtocol> ExchangeConnector for ExchangeClient<P> {
    fn exchange_id(&self) -> &str {
        self.shared.protocol.exchange_id()
    }

    fn symbol(&self) -> String {
        self.shared.config.read().symbol.clone()
    }

    fn state(&self) -> ConnectionState {
        ExchangeClient::state(self)
    }

    fn latest_snapshot(&self) -> Option<Arc<OrderBookSnapshot>> {
        ExchangeClient::latest_snapshot(self)
    }

    fn subscribe(&self) -> (Subscription, mpsc::UnboundedReceiver<ConnectorEvent>) {
        ExchangeClient::subscribe(self)
    }

    async fn connect(&self) -> Result<()> {
        ExchangeClient::connect(self).await
    }

    async fn disconnect(&self) {
        ExchangeClient::disconnect(self).await
    }

    async fn update_config(&self, patch: ConfigPatch) -> Result<()> {
        ExchangeClient::update_config(self, patch).await
    }
}

enum SessionEnd {
    Cancelled,
    Dropped(WsError),
}

/// Outer reconnect loop: Connecting -> session -> (Reconnecting | Errored).
async fn run<P: ExchangeProtocol>(
    shared: Arc<Shared<P>>,
    token: CancellationToken,
    first_tx: oneshot::Sender<Result<()>>,
) {
    let mut backoff = Backoff::new(shared.config.read().reconnect.clone());
    let mut first = Some(first_tx);

    loop {
        if token.is_cancelled() {
            return;
        }
        shared.transition(ConnectionState::Connecting, None, &token);

        let cause = match run_session(&shared, &token, &mut backoff, &mut first).await {
            SessionEnd::Cancelled => return,
            SessionEnd::Dropped(cause) => cause,
        };
        if let Some(tx) = first.take() {
            // The very first attempt never reached Connected.
            let err = match &cause {
                WsError::ConnectTimeout(budget) => ConnectorError::ConnectTimeout(*budget),
                other => ConnectorError::Transport(other.to_string()),
            };
            let _ = tx.send(Err(err));
        }
        let reason = cause.to_string();
        if token.is_cancelled() {
            return;
        }

        // Config may have been patched since the last attempt.
        backoff.set_policy(shared.config.read().reconnect.clone());
        match backoff.next_delay() {
            Some(delay) => {
                shared.transition(ConnectionState::Reconnecting, Some(reason.clone()), &token);
                warn!(
                    exchange = shared.protocol.exchange_id(),
                    attempt = backoff.attempt(),
                    delay_ms = delay.as_millis() as u64,
                    %reason,
                    "reconnecting"
                );
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = token.cancelled() => return,
                }
            }
            None => {
                warn!(exchange = shared.protocol.exchange_id(), %reason, "no reconnect scheduled, entering errored state");
                let policy = shared.config.read().reconnect.clone();
                let message = if policy.enabled {
                    ConnectorError::RetriesExhausted {
                        attempts: policy.max_attempts,
                    }
                    .to_string()
                } else {
                    "connection lost, reconnect disabled".to_string()
                };
                shared.emit(ConnectorEvent::failed_with(message, reason.clone()), &token);
                shared.transition(ConnectionState::Errored, Some(reason), &token);
                return;
            }
        }
    }
}

/// One connection attempt plus its message loop.
async fn run_session<P: ExchangeProtocol>(
    shared: &Arc<Shared<P>>,
    token: &CancellationToken,
    backoff: &mut Backoff,
    first: &mut Option<oneshot::Sender<Result<()>>>,
) -> SessionEnd {
    let config = shared.config.read().clone();
    let url = shared.protocol.stream_url(&config);

    let stream = tokio::select! {
        res = dial(&url, CONNECT_TIMEOUT) => match res {
            Ok(stream) => stream,
            Err(e) => return SessionEnd::Dropped(e),
        },
        () = token.cancelled() => return SessionEnd::Cancelled,
    };
    let (mut write, mut read) = stream.split();

    shared.transition(ConnectionState::Connected, None, token);
    backoff.reset();
    if let Some(tx) = first.take() {
        let _ = tx.send(Ok(()));
    }
    info!(exchange = shared.protocol.exchange_id(), symbol = %config.symbol, "connected");

    for frame in shared.protocol.subscribe_frames(&config) {
        if let Err(e) = write.send(Message::Text(frame)).await {
            return SessionEnd::Dropped(WsError::ConnectionFailed(format!(
                "subscribe send failed: {e}"
            )));
        }
    }

    let mut session = shared.protocol.new_session(&config);
    let keepalive_spec = shared.protocol.keepalive();
    let mut keepalive = keepalive_spec
        .as_ref()
        .map(|spec| Keepalive::new(spec.interval, spec.timeout));

    let mut bootstrap_due = if session.needs_bootstrap() {
        Some(tokio::time::Instant::now())
    } else {
        None
    };

    loop {
        let keepalive_period = keepalive.as_ref().map(|ka| ka.check_period());
        let keepalive_tick = async {
            match keepalive_period {
                Some(period) => tokio::time::sleep(period).await,
                None => std::future::pending().await,
            }
        };
        let bootstrap_tick = async {
            match bootstrap_due {
                Some(due) => tokio::time::sleep_until(due).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            () = token.cancelled() => {
                for frame in shared.protocol.unsubscribe_frames(&config) {
                    let _ = write.send(Message::Text(frame)).await;
                }
                let _ = write.send(Message::Close(None)).await;
                return SessionEnd::Cancelled;
            }

            () = bootstrap_tick => {
                match session.bootstrap(&config).await {
                    Ok(snapshot) => {
                        bootstrap_due = None;
                        if let Some(snapshot) = snapshot {
                            shared.publish(snapshot, token);
                        }
                    }
                    Err(e) => {
                        warn!(exchange = shared.protocol.exchange_id(), error = %e, "book bootstrap failed, will retry");
                        shared.emit(
                            ConnectorEvent::failed_with("book bootstrap failed", e.to_string()),
                            token,
                        );
                        bootstrap_due = Some(tokio::time::Instant::now() + BOOTSTRAP_RETRY);
                    }
                }
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(ka) = keepalive.as_mut() {
                            ka.record_activity();
                        }
                        match session.on_text(&config, &text) {
                            SessionUpdate::Snapshot(snapshot) => shared.publish(snapshot, token),
                            SessionUpdate::Failed { message, detail } => {
                                warn!(exchange = shared.protocol.exchange_id(), %message, ?detail, "protocol failure");
                                shared.emit(ConnectorEvent::Failed { message, detail }, token);
                            }
                            SessionUpdate::Pong => {
                                if let Some(ka) = keepalive.as_mut() {
                                    ka.record_pong();
                                }
                            }
                            SessionUpdate::Ignore => {}
                        }
                        // The session may have invalidated its book (e.g. a
                        // sequence gap) and need a fresh bootstrap over the
                        // same socket.
                        if session.needs_bootstrap() && bootstrap_due.is_none() {
                            bootstrap_due = Some(tokio::time::Instant::now());
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            return SessionEnd::Dropped(WsError::ConnectionFailed(format!(
                                "pong send failed: {e}"
                            )));
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        if let Some(ka) = keepalive.as_mut() {
                            ka.record_pong();
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        // 1005: the server sent no status code.
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.to_string()))
                            .unwrap_or((1005, String::new()));
                        return SessionEnd::Dropped(WsError::ConnectionClosed { code, reason });
                    }
                    Some(Err(e)) => return SessionEnd::Dropped(e.into()),
                    None => {
                        return SessionEnd::Dropped(WsError::ConnectionFailed(
                            "stream ended".to_string(),
                        ))
                    }
                    _ => {}
                }
            }

            () = keepalive_tick => {
                if let (Some(ka), Some(spec)) = (keepalive.as_mut(), keepalive_spec.as_ref()) {
                    if ka.is_timed_out() {
                        return SessionEnd::Dropped(WsError::KeepaliveTimeout);
                    }
                    if ka.should_ping() {
                        let sent = match &spec.ping_text {
                            Some(text) => write.send(Message::Text(text.clone())).await,
                            None => write.send(Message::Ping(Vec::new())).await,
                        };
                        if let Err(e) = sent {
                            return SessionEnd::Dropped(WsError::ConnectionFailed(format!(
                                "ping send failed: {e}"
                            )));
                        }
                        ka.record_ping();
                    }
                }
            }
        }
    }
}
