/*
[INPUT]:  WsConfig, a Connector, an observer and outbound payloads
[OUTPUT]: Self-healing WebSocket client with auth gating and bounded queues
[POS]:    WebSocket layer - public connection engine handle
[UPDATE]: When changing the client API or shared connection state
*/

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::{DexError, Result};
use crate::ws::config::WsConfig;
use crate::ws::connector::{Connector, TungsteniteConnector};
use crate::ws::gate::{AuthFrame, AuthGate};
use crate::ws::observer::ConnectionObserver;
use crate::ws::pool::WorkerPool;
use crate::ws::pump::{self, ActiveSink, ControlFrame, Outbound, PumpQueues, payload_message};
use crate::ws::state::{Backoff, ConnectionState};
use crate::ws::supervisor;

const CONTROL_QUEUE_SIZE: usize = 16;

/// Request to tear down generation `generation` and dial again.
#[derive(Debug)]
pub(crate) struct ReconnectSignal {
    pub generation: u64,
    pub reason: String,
}

/// Receivers handed to the background tasks on `start()`.
struct PendingTasks {
    queues: PumpQueues,
    signals: mpsc::Receiver<ReconnectSignal>,
}

/// State shared between the client handle and its background tasks.
pub(crate) struct Inner {
    pub(crate) config: WsConfig,
    pub(crate) connector: Arc<dyn Connector>,
    observer: RwLock<Option<Arc<dyn ConnectionObserver>>>,
    pub(crate) pool: Arc<WorkerPool>,
    owns_pool: bool,
    pub(crate) shutdown: CancellationToken,
    pub(crate) tracker: TaskTracker,
    started: AtomicBool,
    closed: AtomicBool,
    pub(crate) generation: AtomicU64,
    state_tx: watch::Sender<ConnectionState>,
    reconnect_tx: mpsc::Sender<ReconnectSignal>,
    data_tx: mpsc::Sender<Outbound>,
    pub(crate) auth_tx: mpsc::Sender<AuthFrame>,
    pub(crate) control_tx: mpsc::Sender<ControlFrame>,
    pub(crate) gate: AuthGate,
    pub(crate) sink: tokio::sync::Mutex<Option<ActiveSink>>,
    pub(crate) conn_token: Mutex<CancellationToken>,
    pub(crate) backoff: Mutex<Backoff>,
    pub(crate) reached_ready: AtomicBool,
    pub(crate) socket_live: AtomicBool,
    pub(crate) dropped_frames: AtomicU64,
    pending: Mutex<Option<PendingTasks>>,
}

impl Inner {
    pub(crate) fn observer(&self) -> Option<Arc<dyn ConnectionObserver>> {
        self.observer.read().clone()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Move to `next` unless the client is already shutting down.
    pub(crate) fn set_state(&self, next: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            let locked = matches!(current, ConnectionState::Closing | ConnectionState::Closed);
            if *current == next || (locked && next != ConnectionState::Closed) {
                return false;
            }
            *current = next;
            true
        });
    }

    /// Ask the supervisor to replace `generation`. No-op when that generation
    /// was already superseded or a reconnect is already pending.
    pub(crate) fn reconnect_if_current(&self, generation: u64, reason: impl Into<String>) {
        if self.is_closed() {
            return;
        }
        let reason = reason.into();
        let current = self.generation();
        if generation != current {
            debug!(
                exchange = %self.config.exchange,
                stale_generation = generation,
                generation = current,
                reason = %reason,
                "ignoring reconnect from superseded connection"
            );
            return;
        }

        match self.reconnect_tx.try_send(ReconnectSignal { generation, reason }) {
            Ok(()) => {}
            Err(TrySendError::Full(signal)) => debug!(
                exchange = %self.config.exchange,
                generation,
                reason = %signal.reason,
                "reconnect already pending"
            ),
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

/// Resilient WebSocket client.
///
/// Cloning is cheap; all clones drive the same connection. Register an
/// observer with `set_observer`, then call `start()`. Always finish with
/// `close()`, background tasks keep the client alive until then.
#[derive(Clone)]
pub struct WsClient {
    inner: Arc<Inner>,
}

impl WsClient {
    /// Create a client with the tungstenite connector and its own worker pool.
    pub fn new(config: WsConfig) -> Result<Self> {
        Self::with_connector(config, Arc::new(TungsteniteConnector))
    }

    /// Create a client dispatching on an externally owned pool.
    pub fn with_pool(config: WsConfig, pool: Arc<WorkerPool>) -> Result<Self> {
        Self::build(config, Arc::new(TungsteniteConnector), Some(pool))
    }

    pub fn with_connector(config: WsConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        Self::build(config, connector, None)
    }

    pub fn with_parts(
        config: WsConfig,
        connector: Arc<dyn Connector>,
        pool: Arc<WorkerPool>,
    ) -> Result<Self> {
        Self::build(config, connector, Some(pool))
    }

    fn build(
        config: WsConfig,
        connector: Arc<dyn Connector>,
        pool: Option<Arc<WorkerPool>>,
    ) -> Result<Self> {
        config.validate()?;

        let owns_pool = pool.is_none();
        let pool = pool
            .unwrap_or_else(|| WorkerPool::new(config.read_workers, config.read_buffer_size));

        let (reconnect_tx, signals) = mpsc::channel(1);
        let (data_tx, data_rx) = mpsc::channel(config.write_buffer_size);
        let (auth_tx, auth_rx) = mpsc::channel(config.auth_buffer_size);
        let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE_SIZE);
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Disconnected);
        let shutdown = CancellationToken::new();
        let backoff = Backoff::new(config.reconnect_backoff_min(), config.reconnect_backoff_max());

        let inner = Inner {
            conn_token: Mutex::new(shutdown.child_token()),
            config,
            connector,
            observer: RwLock::new(None),
            pool,
            owns_pool,
            shutdown,
            tracker: TaskTracker::new(),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            state_tx,
            reconnect_tx,
            data_tx,
            auth_tx,
            control_tx,
            gate: AuthGate::new(),
            sink: tokio::sync::Mutex::new(None),
            backoff: Mutex::new(backoff),
            reached_ready: AtomicBool::new(false),
            socket_live: AtomicBool::new(false),
            dropped_frames: AtomicU64::new(0),
            pending: Mutex::new(Some(PendingTasks {
                queues: PumpQueues {
                    control: control_rx,
                    auth: auth_rx,
                    data: data_rx,
                },
                signals,
            })),
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Register the consumer of lifecycle events and frames. Replaces any previous one.
    pub fn set_observer(&self, observer: Arc<dyn ConnectionObserver>) {
        *self.inner.observer.write() = Some(observer);
    }

    /// Spawn the supervisor, the outbound pump and the dispatcher workers, then
    /// request the initial connection.
    ///
    /// # Panics
    ///
    /// Panics when no observer was registered. Starting a client nobody listens
    /// to is a programming error.
    pub fn start(&self) {
        let inner = &self.inner;
        if inner.observer.read().is_none() {
            panic!("WsClient::start called before set_observer");
        }
        if inner.is_closed() {
            warn!(exchange = %inner.config.exchange, "start called on a closed client");
            return;
        }
        if inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(pending) = inner.pending.lock().take() else {
            return;
        };

        inner.pool.start();
        inner.tracker.spawn(pump::run(inner.clone(), pending.queues));
        inner
            .tracker
            .spawn(supervisor::supervise(inner.clone(), pending.signals));

        info!(exchange = %inner.config.exchange, url = %inner.config.url, "ws client started");
        inner.reconnect_if_current(inner.generation(), "initial connect");
    }

    /// Tear down the current connection and dial again.
    pub fn reconnect(&self, reason: impl Into<String>) {
        self.inner
            .reconnect_if_current(self.inner.generation(), reason);
    }

    /// Queue a data frame without waiting. Reports `QueueFull` on overflow.
    pub fn try_send(&self, payload: Vec<u8>) -> Result<()> {
        if self.inner.is_closed() {
            return Err(DexError::Closed);
        }
        self.inner
            .data_tx
            .try_send(Outbound::Frame(payload_message(payload)))
            .map_err(|err| match err {
                TrySendError::Full(_) => DexError::QueueFull,
                TrySendError::Closed(_) => DexError::Closed,
            })
    }

    /// Queue a data frame, waiting up to the configured send timeout for a slot.
    pub async fn send(&self, payload: Vec<u8>) -> Result<()> {
        self.send_with_timeout(payload, self.inner.config.send_timeout())
            .await
    }

    /// Queue a data frame, waiting up to `timeout` for a slot. Reports `Busy`
    /// when the queue stayed full.
    pub async fn send_with_timeout(&self, payload: Vec<u8>, timeout: Duration) -> Result<()> {
        if self.inner.is_closed() {
            return Err(DexError::Closed);
        }
        self.inner
            .data_tx
            .send_timeout(Outbound::Frame(payload_message(payload)), timeout)
            .await
            .map_err(|err| match err {
                SendTimeoutError::Timeout(_) => DexError::Busy {
                    timeout_ms: timeout.as_millis() as u64,
                },
                SendTimeoutError::Closed(_) => DexError::Closed,
            })
    }

    /// Wait until the ready gate opens, up to `timeout`.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        if self.inner.is_closed() {
            return Err(DexError::Closed);
        }
        tokio::select! {
            biased;
            _ = self.inner.shutdown.cancelled() => Err(DexError::Closed),
            ready = self.inner.gate.wait_open(timeout) => ready,
        }
    }

    /// Close the client. Safe to call repeatedly and from several tasks.
    ///
    /// Runs `on_disconnecting` while the gate is still open, flushes queued
    /// data frames, sends a close frame and stops every background task.
    pub async fn close(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        inner.set_state(ConnectionState::Closing);
        info!(exchange = %inner.config.exchange, generation = inner.generation(), "closing ws client");

        let observer = inner.observer();
        if let Some(observer) = &observer {
            observer.on_disconnecting().await;
        }

        let write_timeout = inner.config.write_timeout();
        if inner.started.load(Ordering::SeqCst) && inner.gate.is_open() {
            let (ack_tx, ack_rx) = oneshot::channel();
            if inner
                .data_tx
                .send_timeout(Outbound::Flush(ack_tx), write_timeout)
                .await
                .is_ok()
                && tokio::time::timeout(write_timeout, ack_rx).await.is_err()
            {
                debug!(exchange = %inner.config.exchange, "outbound flush timed out");
            }
        }

        inner.shutdown.cancel();
        inner.gate.shut();
        if inner.owns_pool {
            inner.pool.shutdown();
        }

        let active = inner.sink.lock().await.take();
        if let Some(active) = active {
            supervisor::close_sink(active, write_timeout).await;
        }
        inner.tracker.close();
        inner.set_state(ConnectionState::Closed);

        if inner.socket_live.swap(false, Ordering::SeqCst)
            && let Some(observer) = &observer
        {
            observer.on_disconnected().await;
        }
        info!(exchange = %inner.config.exchange, "ws client closed");
    }

    /// Wait for every background task to exit after `close()`.
    pub async fn wait_terminated(&self, timeout: Duration) -> bool {
        let inner = &self.inner;
        let deadline = Instant::now() + timeout;
        inner.tracker.close();
        if tokio::time::timeout_at(deadline, inner.tracker.wait())
            .await
            .is_err()
        {
            return false;
        }
        if inner.owns_pool {
            let remaining = deadline.saturating_duration_since(Instant::now());
            return inner.pool.wait_terminated(remaining).await;
        }
        true
    }

    /// Watch lifecycle transitions.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Generation of the most recently installed socket (0 before the first dial).
    pub fn generation(&self) -> u64 {
        self.inner.generation()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.gate.is_open()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Inbound frames dropped because of size or a saturated dispatcher.
    pub fn dropped_frames(&self) -> u64 {
        self.inner.dropped_frames.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &WsConfig {
        &self.inner.config
    }

    pub fn exchange(&self) -> &str {
        &self.inner.config.exchange
    }

    pub fn downgrade(&self) -> WeakWsClient {
        WeakWsClient {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl std::fmt::Debug for WsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsClient")
            .field("exchange", &self.inner.config.exchange)
            .field("url", &self.inner.config.url)
            .field("state", &self.current_state())
            .field("generation", &self.generation())
            .finish()
    }
}

/// Non-owning handle, used by observers that must not keep the client alive.
#[derive(Clone, Debug, Default)]
pub struct WeakWsClient {
    inner: Weak<Inner>,
}

impl WeakWsClient {
    pub fn upgrade(&self) -> Option<WsClient> {
        self.inner.upgrade().map(|inner| WsClient { inner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::connector::Connection;
    use async_trait::async_trait;

    struct RefusingConnector;

    #[async_trait]
    impl Connector for RefusingConnector {
        async fn connect(&self, _config: &WsConfig) -> Result<Connection> {
            Err(DexError::NotConnected)
        }
    }

    fn client() -> WsClient {
        let config = WsConfig::builder()
            .url("ws://127.0.0.1:9/ws")
            .exchange("test")
            .write_buffer_size(2)
            .build();
        WsClient::with_connector(config, Arc::new(RefusingConnector)).unwrap()
    }

    #[tokio::test]
    async fn test_stale_auth_completion_is_ignored() {
        let client = client();
        let inner = client.inner.clone();
        inner.generation.store(2, Ordering::SeqCst);
        inner.gate.reset(2);

        inner.complete_auth(1, Ok(())).await;
        assert!(!client.is_ready());

        inner.complete_auth(2, Ok(())).await;
        assert!(client.is_ready());
        assert_eq!(client.current_state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn test_stale_reconnect_signal_is_dropped() {
        let client = client();
        let inner = client.inner.clone();
        inner.generation.store(5, Ordering::SeqCst);

        inner.reconnect_if_current(4, "old read error");
        let mut pending = inner.pending.lock().take().unwrap();
        assert!(pending.signals.try_recv().is_err());

        inner.reconnect_if_current(5, "current read error");
        inner.reconnect_if_current(5, "duplicate");
        let signal = pending.signals.try_recv().unwrap();
        assert_eq!(signal.generation, 5);
        assert_eq!(signal.reason, "current read error");
        assert!(pending.signals.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_try_send_reports_queue_full() {
        let client = client();
        client.try_send(b"a".to_vec()).unwrap();
        client.try_send(b"b".to_vec()).unwrap();
        assert!(matches!(
            client.try_send(b"c".to_vec()),
            Err(DexError::QueueFull)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_reports_busy_after_timeout() {
        let client = client();
        client.try_send(b"a".to_vec()).unwrap();
        client.try_send(b"b".to_vec()).unwrap();

        let err = client
            .send_with_timeout(b"c".to_vec(), Duration::from_millis(250))
            .await
            .unwrap_err();
        assert!(matches!(err, DexError::Busy { timeout_ms: 250 }));
    }

    #[tokio::test]
    async fn test_close_before_start() {
        let client = client();
        client.close().await;
        client.close().await;
        assert_eq!(client.current_state(), ConnectionState::Closed);
        assert!(matches!(client.try_send(b"x".to_vec()), Err(DexError::Closed)));
        assert!(client.wait_terminated(Duration::from_secs(1)).await);
    }

    #[test]
    #[should_panic(expected = "before set_observer")]
    fn test_start_without_observer_panics() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let _guard = runtime.enter();
        client().start();
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = WsConfig::builder().url("http://example.com").build();
        assert!(WsClient::with_connector(config, Arc::new(RefusingConnector)).is_err());
    }
}
