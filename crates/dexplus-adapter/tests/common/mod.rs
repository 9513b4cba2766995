/*
[INPUT]:  Test scenarios needing a peer for the connection engine
[OUTPUT]: In-memory connector, loopback echo server and a recording observer
[POS]:    Test infrastructure - shared across integration test modules
[UPDATE]: When adding new test patterns or fixtures
*/

//! Common test utilities for dexplus-adapter tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dexplus_adapter::ws::{AuthHandshake, Connection, ConnectionObserver, Connector, WsConfig};
use dexplus_adapter::{DexError, Result};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::{Notify, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message};

pub fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

pub fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}

/// Config pointing at a placeholder endpoint; the in-memory connector ignores it.
pub fn test_config(exchange: &str) -> dexplus_adapter::ws::WsConfigBuilder {
    WsConfig::builder()
        .url("ws://127.0.0.1:9/ws")
        .exchange(exchange)
        .ping_interval(secs(60))
        .pong_wait(secs(120))
        .auth_timeout(secs(60))
}

/// Peer side of one in-memory connection.
pub struct ServerEnd {
    /// Frames the client wrote.
    outbound: mpsc::UnboundedReceiver<Message>,
    /// Frames delivered to the client's read loop.
    inbound: mpsc::UnboundedSender<Message>,
}

impl ServerEnd {
    pub fn push_text(&self, text: impl Into<String>) {
        let text: String = text.into();
        let _ = self.inbound.send(Message::Text(text.into()));
    }

    pub fn push(&self, message: Message) {
        let _ = self.inbound.send(message);
    }

    /// Next frame of any kind, `None` once the client dropped its sink.
    pub async fn next_frame(&mut self) -> Option<Message> {
        self.outbound.recv().await
    }

    /// Next text frame, skipping pings and other control frames.
    pub async fn next_text(&mut self) -> Option<String> {
        while let Some(message) = self.outbound.recv().await {
            if let Message::Text(text) = message {
                return Some(text.as_str().to_string());
            }
        }
        None
    }

    /// Text frame already written, without waiting.
    pub fn try_next_text(&mut self) -> Option<String> {
        while let Ok(message) = self.outbound.try_recv() {
            if let Message::Text(text) = message {
                return Some(text.as_str().to_string());
            }
        }
        None
    }

    /// Drain until a close frame shows up. `false` if the sink went away first.
    pub async fn saw_close(&mut self) -> bool {
        while let Some(message) = self.outbound.recv().await {
            if matches!(message, Message::Close(_)) {
                return true;
            }
        }
        false
    }

    /// Pings written so far.
    pub fn drain_pings(&mut self) -> usize {
        let mut pings = 0;
        while let Ok(message) = self.outbound.try_recv() {
            if matches!(message, Message::Ping(_)) {
                pings += 1;
            }
        }
        pings
    }
}

fn memory_connection() -> (Connection, ServerEnd) {
    let (out_tx, out_rx) = mpsc::unbounded_channel::<Message>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<Message>();

    let sink = futures_util::sink::unfold(out_tx, |tx, message: Message| async move {
        tx.send(message)
            .map_err(|_| tungstenite::Error::ConnectionClosed)?;
        Ok::<_, tungstenite::Error>(tx)
    });
    let stream = futures_util::stream::unfold(in_rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|message| (Ok::<_, tungstenite::Error>(message), rx))
    });

    (
        Connection::from_parts(Box::pin(sink), Box::pin(stream)),
        ServerEnd {
            outbound: out_rx,
            inbound: in_tx,
        },
    )
}

/// Connector that fails a fixed number of dials, then hands out in-memory
/// connections whose peer ends are delivered through `accepted`.
pub struct MemoryConnector {
    failures: AtomicUsize,
    attempts: Mutex<Vec<Instant>>,
    accepted: mpsc::UnboundedSender<ServerEnd>,
}

impl MemoryConnector {
    pub fn new(failures: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (accepted, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            failures: AtomicUsize::new(failures),
            attempts: Mutex::new(Vec::new()),
            accepted,
        });
        (connector, rx)
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().clone()
    }

    /// Fail the next `count` dials.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, _config: &WsConfig) -> Result<Connection> {
        self.attempts.lock().push(Instant::now());
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(DexError::NotConnected);
        }

        let (connection, server) = memory_connection();
        self.accepted
            .send(server)
            .map_err(|_| DexError::NotConnected)?;
        Ok(connection)
    }
}

/// Observer recording lifecycle events and frames.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<String>>,
    messages: Mutex<Vec<String>>,
    errors: Mutex<Vec<DexError>>,
    handshakes: Mutex<VecDeque<AuthHandshake>>,
    hold_auth: bool,
    message_gate: Option<Arc<Semaphore>>,
    notify: Notify,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Keep every auth handshake for the test to complete by hand.
    pub fn holding_auth() -> Arc<Self> {
        Arc::new(Self {
            hold_auth: true,
            ..Self::default()
        })
    }

    /// Block each `on_message` until a permit is available on `gate`.
    pub fn gated(gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            message_gate: Some(gate),
            ..Self::default()
        })
    }

    fn record(&self, event: String) {
        self.events.lock().push(event);
        self.notify.notify_waiters();
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events.lock().iter().filter(|e| e.as_str() == event).count()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    pub fn error_count(&self) -> usize {
        self.errors.lock().len()
    }

    pub fn take_errors(&self) -> Vec<DexError> {
        std::mem::take(&mut *self.errors.lock())
    }

    /// Wait until `check` holds or `timeout` elapses.
    pub async fn wait_until<F>(&self, timeout: Duration, check: F) -> bool
    where
        F: Fn(&Self) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            if check(self) {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return check(self);
            }
        }
    }

    /// Next handshake handed to `on_auth`.
    pub async fn next_handshake(&self) -> AuthHandshake {
        loop {
            let notified = self.notify.notified();
            let next = self.handshakes.lock().pop_front();
            if let Some(handshake) = next {
                return handshake;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl ConnectionObserver for RecordingObserver {
    async fn on_connecting(&self, reason: &str) {
        self.record(format!("connecting:{reason}"));
    }

    async fn on_connected(&self) {
        self.record("connected".to_string());
    }

    async fn on_disconnecting(&self) {
        self.record("disconnecting".to_string());
    }

    async fn on_disconnected(&self) {
        self.record("disconnected".to_string());
    }

    async fn on_message(&self, frame: Vec<u8>) -> Result<()> {
        if let Some(gate) = &self.message_gate {
            let _permit = gate.acquire().await;
        }
        let text = String::from_utf8_lossy(&frame).into_owned();
        if text == "panic" {
            panic!("handler exploded");
        }
        if text == "fail" {
            return Err(DexError::InvalidFrame("refused".to_string()));
        }
        self.messages.lock().push(text);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn on_error(&self, error: DexError) {
        self.errors.lock().push(error);
        self.notify.notify_waiters();
    }

    async fn on_auth(&self, handshake: AuthHandshake) {
        if self.hold_auth {
            self.handshakes.lock().push_back(handshake);
            self.notify.notify_waiters();
        } else {
            handshake.done(Ok(()));
        }
    }

    async fn on_ready(&self) {
        self.record("ready".to_string());
    }
}

/// Loopback WebSocket server that echoes text frames for a single client.
/// The handle resolves to every frame the server received.
pub async fn spawn_echo_server() -> (String, JoinHandle<Vec<Message>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let mut received = Vec::new();
        let (stream, _) = listener.accept().await.unwrap();
        let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(message)) = socket.next().await {
            received.push(message.clone());
            match message {
                Message::Text(text) => {
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        received
    });

    (format!("ws://{addr}/ws"), handle)
}
