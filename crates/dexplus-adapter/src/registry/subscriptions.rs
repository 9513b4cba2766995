/*
[INPUT]:  Channel keys, subscribe/unsubscribe payloads, handlers and decoded envelopes
[OUTPUT]: Channel-keyed handler fan-out with replay and dead-letter tracking
[POS]:    Registry layer - subscription registry
[UPDATE]: When changing subscription bookkeeping or handler isolation
*/

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{DexError, Result};
use crate::registry::dead_letter::{DeadLetterQueue, spawn_sweeper};
use crate::ws::client::{WeakWsClient, WsClient};
use crate::ws::pool::panic_message;

/// Callback registered against one channel key.
pub type Handler<E> = Arc<dyn Fn(&E) -> Result<()> + Send + Sync>;

/// Outbound side the registry writes through.
pub trait FrameSender: Send + Sync + 'static {
    /// Whether the connection is ready for application traffic.
    fn is_ready(&self) -> bool;

    /// Enqueue without blocking.
    fn send_frame(&self, payload: Vec<u8>) -> Result<()>;
}

impl FrameSender for WsClient {
    fn is_ready(&self) -> bool {
        WsClient::is_ready(self)
    }

    fn send_frame(&self, payload: Vec<u8>) -> Result<()> {
        self.try_send(payload)
    }
}

impl FrameSender for WeakWsClient {
    fn is_ready(&self) -> bool {
        self.upgrade().is_some_and(|client| client.is_ready())
    }

    fn send_frame(&self, payload: Vec<u8>) -> Result<()> {
        self.upgrade().ok_or(DexError::Closed)?.try_send(payload)
    }
}

/// Serialized requests for one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRequest {
    pub subscribe: Vec<u8>,
    pub unsubscribe: Option<Vec<u8>>,
}

impl ChannelRequest {
    pub fn new(subscribe: Vec<u8>, unsubscribe: Option<Vec<u8>>) -> Self {
        Self {
            subscribe,
            unsubscribe,
        }
    }
}

/// Result of routing one envelope.
#[derive(Debug, Default)]
pub struct Dispatched {
    pub handlers: usize,
    pub failures: Vec<DexError>,
}

struct Entry<E> {
    key: String,
    requests: Vec<ChannelRequest>,
    handlers: Vec<Handler<E>>,
}

struct RegistryState<E> {
    entries: Vec<Entry<E>>,
    index: HashMap<String, usize>,
}

/// Channel key -> handlers, plus the requests needed to resubscribe.
///
/// Entries keep registration order; that order is the replay order.
pub struct SubscriptionRegistry<E> {
    exchange: String,
    sender: Arc<dyn FrameSender>,
    state: Mutex<RegistryState<E>>,
    dead_letters: Arc<DeadLetterQueue>,
}

impl<E: 'static> SubscriptionRegistry<E> {
    pub fn new(exchange: impl Into<String>, sender: Arc<dyn FrameSender>) -> Self {
        Self {
            exchange: exchange.into(),
            sender,
            state: Mutex::new(RegistryState {
                entries: Vec::new(),
                index: HashMap::new(),
            }),
            dead_letters: Arc::new(DeadLetterQueue::new()),
        }
    }

    /// Register `handlers` for `key` and send the subscribe request when ready.
    ///
    /// Handlers accumulate across calls. A request identical to one already
    /// recorded for the key is not sent again. A failed immediate send is
    /// dead-lettered.
    pub fn subscribe(&self, key: impl Into<String>, request: ChannelRequest, handlers: Vec<Handler<E>>) {
        let key = key.into();
        let payload = {
            let mut state = self.state.lock();
            let idx = match state.index.get(&key) {
                Some(&idx) => idx,
                None => {
                    let idx = state.entries.len();
                    state.entries.push(Entry {
                        key: key.clone(),
                        requests: Vec::new(),
                        handlers: Vec::new(),
                    });
                    state.index.insert(key.clone(), idx);
                    idx
                }
            };

            let entry = &mut state.entries[idx];
            entry.handlers.extend(handlers);
            if entry.requests.contains(&request) {
                None
            } else {
                let payload = request.subscribe.clone();
                entry.requests.push(request);
                Some(payload)
            }
        };

        let Some(payload) = payload else {
            debug!(exchange = %self.exchange, channel = %key, "handlers added to existing subscription");
            return;
        };
        if !self.sender.is_ready() {
            debug!(exchange = %self.exchange, channel = %key, "subscription held until ready");
            return;
        }
        if let Err(err) = self.sender.send_frame(payload.clone()) {
            warn!(exchange = %self.exchange, channel = %key, error = %err, "subscribe dead-lettered");
            self.dead_letters.push(payload);
        }
    }

    /// Resend every subscribe request in registration order.
    ///
    /// Pending dead letters are dropped first since the replay covers them.
    /// Returns the number of requests handed to the sender.
    pub fn replay(&self) -> usize {
        self.dead_letters.clear();
        let payloads: Vec<(String, Vec<u8>)> = {
            let state = self.state.lock();
            state
                .entries
                .iter()
                .flat_map(|entry| {
                    entry
                        .requests
                        .iter()
                        .map(move |request| (entry.key.clone(), request.subscribe.clone()))
                })
                .collect()
        };

        let mut sent = 0;
        for (key, payload) in payloads {
            match self.sender.send_frame(payload.clone()) {
                Ok(()) => sent += 1,
                Err(err) => {
                    warn!(exchange = %self.exchange, channel = %key, error = %err, "replay dead-lettered");
                    self.dead_letters.push(payload);
                }
            }
        }
        if sent > 0 {
            info!(exchange = %self.exchange, subscriptions = sent, "subscriptions replayed");
        }
        sent
    }

    /// Send every unsubscribe request once, then forget all subscriptions.
    /// Failures are logged only.
    pub fn unsubscribe_all(&self) -> usize {
        let state = std::mem::replace(
            &mut *self.state.lock(),
            RegistryState {
                entries: Vec::new(),
                index: HashMap::new(),
            },
        );
        self.dead_letters.clear();

        if !self.sender.is_ready() {
            debug!(
                exchange = %self.exchange,
                subscriptions = state.entries.len(),
                "not ready, subscriptions dropped without unsubscribe"
            );
            return 0;
        }

        let mut sent = 0;
        for entry in &state.entries {
            for payload in entry.requests.iter().filter_map(|r| r.unsubscribe.as_ref()) {
                match self.sender.send_frame(payload.clone()) {
                    Ok(()) => sent += 1,
                    Err(err) => warn!(
                        exchange = %self.exchange,
                        channel = %entry.key,
                        error = %err,
                        "unsubscribe not sent"
                    ),
                }
            }
        }
        sent
    }

    /// Invoke every handler registered for `key`.
    ///
    /// Each handler runs inside its own unwind boundary. `None` when nothing is
    /// registered for `key`.
    pub fn dispatch(&self, key: &str, envelope: &E) -> Option<Dispatched> {
        let handlers = {
            let state = self.state.lock();
            let idx = *state.index.get(key)?;
            state.entries[idx].handlers.clone()
        };

        let mut dispatched = Dispatched {
            handlers: handlers.len(),
            failures: Vec::new(),
        };
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(envelope))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => dispatched.failures.push(err),
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(exchange = %self.exchange, channel = %key, panic = %message, "handler panicked");
                    dispatched.failures.push(DexError::HandlerPanic {
                        channel: key.to_string(),
                        message,
                    });
                }
            }
        }
        Some(dispatched)
    }

    /// Registered channel keys in registration order.
    pub fn keys(&self) -> Vec<String> {
        self.state
            .lock()
            .entries
            .iter()
            .map(|entry| entry.key.clone())
            .collect()
    }

    pub fn handler_count(&self, key: &str) -> usize {
        let state = self.state.lock();
        state
            .index
            .get(key)
            .map(|&idx| state.entries[idx].handlers.len())
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dead_letters(&self) -> &Arc<DeadLetterQueue> {
        &self.dead_letters
    }

    /// Flush the dead letter queue once.
    pub fn sweep_dead_letters(&self) -> Result<usize> {
        let sender = self.sender.clone();
        self.dead_letters.sweep(|payload| resend(sender.as_ref(), payload))
    }

    /// Start the periodic dead letter sweep.
    pub fn spawn_dead_letter_sweeper(
        &self,
        interval: Duration,
        token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let sender = self.sender.clone();
        spawn_sweeper(self.dead_letters.clone(), interval, token, move |payload| {
            resend(sender.as_ref(), payload)
        })
    }
}

fn resend(sender: &dyn FrameSender, payload: &[u8]) -> Result<()> {
    if !sender.is_ready() {
        return Err(DexError::NotReady);
    }
    sender.send_frame(payload.to_vec())
}

impl<E> std::fmt::Debug for SubscriptionRegistry<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("exchange", &self.exchange)
            .field("channels", &self.state.lock().entries.len())
            .field("dead_letters", &self.dead_letters.len())
            .finish()
    }
}
