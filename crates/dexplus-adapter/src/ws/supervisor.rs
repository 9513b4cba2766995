/*
[INPUT]:  Reconnect signals, connector results and inbound socket frames
[OUTPUT]: Dial/backoff loop, per-generation read loops and the auth handshake
[POS]:    WebSocket layer - connection supervisor
[UPDATE]: When changing reconnect policy, heartbeat detection or dispatch
*/

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{DexError, Result};
use crate::ws::client::{Inner, ReconnectSignal};
use crate::ws::connector::{Connection, FrameStream};
use crate::ws::gate::AuthHandshake;
use crate::ws::observer::ConnectionObserver;
use crate::ws::pool::panic_message;
use crate::ws::pump::{ActiveSink, ControlFrame};
use crate::ws::state::ConnectionState;

/// What the torn-down generation achieved.
struct Previous {
    had_socket: bool,
    reached_ready: bool,
}

/// Supervisor loop: one reconnect cycle per accepted signal.
pub(crate) async fn supervise(inner: Arc<Inner>, mut signals: mpsc::Receiver<ReconnectSignal>) {
    loop {
        let signal = tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => break,
            signal = signals.recv() => match signal {
                Some(signal) => signal,
                None => break,
            },
        };

        let current = inner.generation();
        if signal.generation != current {
            debug!(
                exchange = %inner.config.exchange,
                stale_generation = signal.generation,
                generation = current,
                reason = %signal.reason,
                "skipping superseded reconnect signal"
            );
            continue;
        }

        let previous = inner.teardown().await;
        if previous.had_socket && !previous.reached_ready {
            let delay = inner.backoff.lock().next_delay();
            warn!(
                exchange = %inner.config.exchange,
                generation = current,
                backoff_ms = delay.as_millis() as u64,
                "previous connection never became ready, backing off"
            );
            if !inner.sleep_or_shutdown(delay).await {
                break;
            }
        }

        inner.set_state(ConnectionState::Connecting);
        info!(exchange = %inner.config.exchange, reason = %signal.reason, "connecting");
        if let Some(observer) = inner.observer() {
            observer.on_connecting(&signal.reason).await;
        }

        let Some(connection) = inner.dial().await else {
            break;
        };
        if !inner.install(connection).await {
            break;
        }
    }

    debug!(exchange = %inner.config.exchange, "supervisor stopped");
}

/// Best-effort close frame followed by closing the sink, bounded by `timeout`.
pub(crate) async fn close_sink(mut active: ActiveSink, timeout: Duration) {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: "client close".into(),
    };
    let closing = async {
        let _ = active.sink.send(Message::Close(Some(frame))).await;
        let _ = active.sink.close().await;
    };
    if tokio::time::timeout(timeout, closing).await.is_err() {
        debug!(generation = active.generation, "close frame timed out");
    }
}

/// Read loop scoped to one generation. Any failure asks for a reconnect of
/// that generation only.
async fn read_loop(
    inner: Arc<Inner>,
    generation: u64,
    mut stream: FrameStream,
    token: CancellationToken,
) {
    let pong_wait = inner.config.pong_wait();

    let reason = loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            next = tokio::time::timeout(pong_wait, stream.next()) => next,
        };

        match next {
            Err(_) => break format!("no frame within {}ms", pong_wait.as_millis()),
            Ok(None) => break "stream ended".to_string(),
            Ok(Some(Err(err))) => break format!("read error: {err}"),
            Ok(Some(Ok(message))) => match message {
                Message::Text(text) => inner.dispatch(text.as_bytes().to_vec()),
                Message::Binary(bytes) => inner.dispatch(bytes.to_vec()),
                Message::Ping(payload) => {
                    let pong = ControlFrame {
                        generation,
                        message: Message::Pong(payload),
                    };
                    if inner.control_tx.try_send(pong).is_err() {
                        debug!(exchange = %inner.config.exchange, generation, "pong dropped");
                    }
                }
                Message::Pong(_) => {}
                Message::Close(frame) => {
                    break match frame {
                        Some(frame) => format!(
                            "peer closed: {} {}",
                            u16::from(frame.code),
                            frame.reason.as_str()
                        ),
                        None => "peer closed".to_string(),
                    };
                }
                Message::Frame(_) => {}
            },
        }
    };

    if token.is_cancelled() {
        return;
    }
    warn!(exchange = %inner.config.exchange, generation, reason = %reason, "read loop stopped");
    inner.reconnect_if_current(generation, reason);
}

impl Inner {
    /// Drop the current socket, if any.
    async fn teardown(self: &Arc<Self>) -> Previous {
        self.gate.shut();
        self.conn_token.lock().cancel();

        let active = self.sink.lock().await.take();
        let had_socket = active.is_some();
        if let Some(active) = active {
            close_sink(active, self.config.write_timeout()).await;
        }

        let reached_ready = self.reached_ready.swap(false, Ordering::SeqCst);
        if self.socket_live.swap(false, Ordering::SeqCst) {
            info!(exchange = %self.config.exchange, generation = self.generation(), "disconnected");
            if let Some(observer) = self.observer() {
                observer.on_disconnected().await;
            }
        }

        Previous {
            had_socket,
            reached_ready,
        }
    }

    /// Dial until success, sleeping the backoff between failures. `None` on shutdown.
    async fn dial(self: &Arc<Self>) -> Option<Connection> {
        let handshake_timeout = self.config.handshake_timeout();
        let mut attempt: u32 = 0;

        loop {
            if self.shutdown.is_cancelled() {
                return None;
            }
            attempt += 1;

            let outcome = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return None,
                outcome = tokio::time::timeout(handshake_timeout, self.connector.connect(&self.config)) => outcome,
            };
            let err = match outcome {
                Ok(Ok(connection)) => return Some(connection),
                Ok(Err(err)) => err,
                Err(_) => DexError::Timeout {
                    duration_ms: handshake_timeout.as_millis() as u64,
                },
            };

            let delay = self.backoff.lock().next_delay();
            warn!(
                exchange = %self.config.exchange,
                attempt,
                error = %err,
                backoff_ms = delay.as_millis() as u64,
                "dial failed"
            );
            if !self.sleep_or_shutdown(delay).await {
                return None;
            }
        }
    }

    /// Returns `false` when shutdown interrupted the sleep.
    async fn sleep_or_shutdown(&self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Install a fresh socket as the next generation and run the auth step.
    async fn install(self: &Arc<Self>, connection: Connection) -> bool {
        let Connection { sink, stream } = connection;

        let (generation, conn_token) = {
            let mut slot = self.sink.lock().await;
            if self.shutdown.is_cancelled() {
                return false;
            }
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let conn_token = self.shutdown.child_token();
            *self.conn_token.lock() = conn_token.clone();
            self.gate.reset(generation);
            self.reached_ready.store(false, Ordering::SeqCst);
            *slot = Some(ActiveSink { generation, sink });
            self.socket_live.store(true, Ordering::SeqCst);
            (generation, conn_token)
        };

        self.tracker.spawn(read_loop(
            self.clone(),
            generation,
            stream,
            conn_token.clone(),
        ));
        self.set_state(ConnectionState::Connected);
        info!(exchange = %self.config.exchange, generation, "connected");

        let Some(observer) = self.observer() else {
            return true;
        };
        observer.on_connected().await;

        if self.config.auth_required {
            self.set_state(ConnectionState::Authenticating);
            self.begin_auth(generation, conn_token, observer);
        } else {
            self.complete_auth(generation, Ok(())).await;
        }
        true
    }

    /// Hand the auth capability to the observer and arm the watchdog.
    fn begin_auth(
        self: &Arc<Self>,
        generation: u64,
        conn_token: CancellationToken,
        observer: Arc<dyn ConnectionObserver>,
    ) {
        let (done_tx, done_rx) = oneshot::channel();
        let handshake = AuthHandshake::new(
            generation,
            self.auth_tx.clone(),
            self.config.send_timeout(),
            done_tx,
        );
        let auth_timeout = self.config.auth_timeout();
        debug!(exchange = %self.config.exchange, generation, "authenticating");

        let inner = self.clone();
        let watchdog_token = conn_token.clone();
        self.tracker.spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = watchdog_token.cancelled() => return,
                outcome = tokio::time::timeout(auth_timeout, done_rx) => outcome,
            };
            let result = match outcome {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(DexError::auth("handshake dropped before completion")),
                Err(_) => Err(DexError::auth(format!(
                    "handshake not completed within {}ms",
                    auth_timeout.as_millis()
                ))),
            };
            inner.complete_auth(generation, result).await;
        });

        self.tracker.spawn(async move {
            tokio::select! {
                biased;
                _ = conn_token.cancelled() => {}
                _ = observer.on_auth(handshake) => {}
            }
        });
    }

    /// Apply the outcome of `generation`'s auth step. Stale generations are ignored.
    pub(crate) async fn complete_auth(self: &Arc<Self>, generation: u64, result: Result<()>) {
        let current = self.generation();
        if self.is_closed() || generation != current {
            debug!(
                exchange = %self.config.exchange,
                stale_generation = generation,
                generation = current,
                "ignoring auth completion from superseded connection"
            );
            return;
        }

        match result {
            Ok(()) => {
                if !self.gate.open(generation) {
                    return;
                }
                self.reached_ready.store(true, Ordering::SeqCst);
                self.backoff.lock().reset();
                self.set_state(ConnectionState::Ready);
                info!(exchange = %self.config.exchange, generation, "connection ready");
                if let Some(observer) = self.observer() {
                    observer.on_ready().await;
                }
            }
            Err(err) => {
                error!(exchange = %self.config.exchange, generation, error = %err, "authentication failed");
                if let Some(observer) = self.observer() {
                    observer.on_error(err).await;
                }
                self.reconnect_if_current(generation, "authentication failed");
            }
        }
    }

    /// Hand one inbound frame to the worker pool. Never blocks the read loop.
    fn dispatch(self: &Arc<Self>, frame: Vec<u8>) {
        if frame.len() > self.config.max_message_size {
            self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            warn!(
                exchange = %self.config.exchange,
                bytes = frame.len(),
                limit = self.config.max_message_size,
                "oversized frame dropped"
            );
            return;
        }
        let Some(observer) = self.observer() else {
            return;
        };

        let exchange = self.config.exchange.clone();
        let job = async move {
            match AssertUnwindSafe(observer.on_message(frame)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => observer.on_error(err).await,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(exchange = %exchange, panic = %message, "message consumer panicked");
                    observer
                        .on_error(DexError::HandlerPanic {
                            channel: exchange,
                            message,
                        })
                        .await;
                }
            }
        }
        .boxed();

        match self.pool.try_submit(job) {
            Ok(()) => {}
            Err(DexError::PoolSaturated) => {
                let dropped = self.dropped_frames.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped % 1000 == 0 {
                    warn!(
                        exchange = %self.config.exchange,
                        dropped,
                        "inbound queue full, frame dropped"
                    );
                }
            }
            Err(err) => {
                self.dropped_frames.fetch_add(1, Ordering::Relaxed);
                warn!(exchange = %self.config.exchange, error = %err, "dispatcher unavailable, frame dropped");
            }
        }
    }
}
