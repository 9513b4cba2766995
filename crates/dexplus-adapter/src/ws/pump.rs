/*
[INPUT]:  Control, auth and data queues plus the installed socket sink
[OUTPUT]: Prioritised, deadline-bounded writes onto the current connection
[POS]:    WebSocket layer - single-writer outbound pump
[UPDATE]: When changing write priorities or heartbeat cadence
*/

use std::sync::Arc;

use futures_util::SinkExt;
use tokio::sync::{MutexGuard, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace};

use crate::error::{DexError, Result};
use crate::ws::client::Inner;
use crate::ws::connector::FrameSink;
use crate::ws::gate::AuthFrame;

/// Socket write half tagged with its generation.
pub(crate) struct ActiveSink {
    pub generation: u64,
    pub sink: FrameSink,
}

/// Item on the data queue.
pub(crate) enum Outbound {
    Frame(Message),
    /// Acknowledged once every frame queued before it was written.
    Flush(oneshot::Sender<()>),
}

/// Control frame produced by the read loop (pong replies).
pub(crate) struct ControlFrame {
    pub generation: u64,
    pub message: Message,
}

pub(crate) struct PumpQueues {
    pub control: mpsc::Receiver<ControlFrame>,
    pub auth: mpsc::Receiver<AuthFrame>,
    pub data: mpsc::Receiver<Outbound>,
}

/// Turn a payload into a text frame when it is UTF-8, binary otherwise.
pub(crate) fn payload_message(payload: Vec<u8>) -> Message {
    match String::from_utf8(payload) {
        Ok(text) => Message::Text(text.into()),
        Err(err) => Message::Binary(err.into_bytes().into()),
    }
}

/// Writer loop. Priority: shutdown, control, ping, auth, then data while the gate is open.
pub(crate) async fn run(inner: Arc<Inner>, mut queues: PumpQueues) {
    let ping_interval = inner.config.ping_interval();
    let mut ping = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut gate_rx = inner.gate.subscribe();
    // Data item taken off the queue before its socket passed the gate.
    let mut held: Option<Outbound> = None;

    loop {
        let gate_open = gate_rx.borrow_and_update().open;
        if gate_open && let Some(outbound) = held.take() {
            held = inner.deliver(outbound).await;
        }

        tokio::select! {
            biased;

            _ = inner.shutdown.cancelled() => break,

            Some(control) = queues.control.recv() => {
                if let Err(err) = inner.write_frame(Some(control.generation), control.message).await {
                    trace!(exchange = %inner.config.exchange, error = %err, "control frame not written");
                }
            }

            _ = ping.tick() => {
                match inner.write_frame(None, Message::Ping(Vec::new().into())).await {
                    Ok(()) => trace!(exchange = %inner.config.exchange, "ping sent"),
                    Err(DexError::NotConnected) => {}
                    Err(err) => debug!(exchange = %inner.config.exchange, error = %err, "ping failed"),
                }
            }

            Some(frame) = queues.auth.recv() => {
                let current = inner.generation();
                if frame.generation != current {
                    debug!(
                        exchange = %inner.config.exchange,
                        frame_generation = frame.generation,
                        generation = current,
                        "dropping stale auth frame"
                    );
                    continue;
                }
                if let Err(err) = inner
                    .write_frame(Some(frame.generation), payload_message(frame.payload))
                    .await
                {
                    debug!(exchange = %inner.config.exchange, error = %err, "auth frame not written");
                }
            }

            Some(outbound) = queues.data.recv(), if gate_open && held.is_none() => {
                held = inner.deliver(outbound).await;
            }

            changed = gate_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    debug!(exchange = %inner.config.exchange, "outbound pump stopped");
}

type SinkSlot<'a> = MutexGuard<'a, Option<ActiveSink>>;

impl Inner {
    /// Write a data item, or hand it back when the installed socket has not
    /// passed the ready gate yet.
    async fn deliver(self: &Arc<Self>, outbound: Outbound) -> Option<Outbound> {
        let message = match outbound {
            Outbound::Flush(ack) => {
                let _ = ack.send(());
                return None;
            }
            Outbound::Frame(message) => message,
        };

        let slot = self.sink.lock().await;
        // Checked under the sink lock: a reconnect cannot swap the socket
        // between the check and the write.
        let ready = slot.as_ref().is_some_and(|active| {
            let gate = self.gate.state();
            gate.open && gate.generation == active.generation
        });
        if !ready {
            trace!(exchange = %self.config.exchange, "data frame held until the gate opens");
            return Some(Outbound::Frame(message));
        }

        if let Err(err) = self.send_on(slot, message).await {
            debug!(exchange = %self.config.exchange, error = %err, "data frame lost");
        }
        None
    }

    /// Write one frame onto the installed socket, bounded by the write timeout.
    ///
    /// With `Some(generation)` the write is skipped unless that generation is
    /// still installed. A failed write requests a reconnect of the generation
    /// it was written to.
    pub(crate) async fn write_frame(
        self: &Arc<Self>,
        generation: Option<u64>,
        message: Message,
    ) -> Result<()> {
        let slot = self.sink.lock().await;
        match slot.as_ref() {
            None => return Err(DexError::NotConnected),
            Some(active) if generation.is_some_and(|g| g != active.generation) => {
                return Err(DexError::NotConnected);
            }
            Some(_) => {}
        }
        self.send_on(slot, message).await
    }

    async fn send_on(self: &Arc<Self>, mut slot: SinkSlot<'_>, message: Message) -> Result<()> {
        let write_timeout = self.config.write_timeout();
        let Some(active) = slot.as_mut() else {
            return Err(DexError::NotConnected);
        };
        let written_to = active.generation;
        let outcome = tokio::time::timeout(write_timeout, active.sink.send(message)).await;
        drop(slot);

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                self.reconnect_if_current(written_to, format!("write failed: {err}"));
                Err(err.into())
            }
            Err(_) => {
                let duration_ms = write_timeout.as_millis() as u64;
                self.reconnect_if_current(written_to, format!("write timed out after {duration_ms}ms"));
                Err(DexError::Timeout { duration_ms })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_message_kinds() {
        match payload_message(br#"{"op":"ping"}"#.to_vec()) {
            Message::Text(text) => assert_eq!(text.as_str(), r#"{"op":"ping"}"#),
            other => panic!("expected text frame, got {other:?}"),
        }
        match payload_message(vec![0xff, 0xfe]) {
            Message::Binary(bytes) => assert_eq!(bytes.as_ref(), &[0xff, 0xfe]),
            other => panic!("expected binary frame, got {other:?}"),
        }
    }
}
