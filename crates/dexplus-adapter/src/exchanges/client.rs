/*
[INPUT]:  An ExchangeProtocol, WsConfig, optional credentials and typed handlers
[OUTPUT]: ExchangeClient wiring engine, registry and protocol together
[POS]:    Exchange layer - generic adapter on top of the connection engine
[UPDATE]: When changing subscription, login or routing glue
*/

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::auth::ApiCredentials;
use crate::error::{DexError, Result};
use crate::exchanges::protocol::{ExchangeProtocol, Route};
use crate::registry::{ChannelRequest, FrameSender, Handler, SubscriptionRegistry};
use crate::types::{
    AccountUpdate, Candle, ChannelKind, ChannelSpec, Fill, OrderBook, OrderUpdate, Payload,
    Position, Ticker, Trade,
};
use crate::ws::{AuthHandshake, ConnectionObserver, WeakWsClient, WsClient, WsConfig};

/// Application callback for errors surfaced by the exchange or the engine.
pub type ErrorCallback = Arc<dyn Fn(&DexError) + Send + Sync>;

/// Observer side of an `ExchangeClient`.
///
/// Holds only a weak handle to the engine so the engine -> observer -> engine
/// chain does not keep either alive.
struct ExchangeShared<P: ExchangeProtocol> {
    protocol: P,
    client: WeakWsClient,
    registry: SubscriptionRegistry<P::Envelope>,
    credentials: Option<ApiCredentials>,
    pending_auth: Mutex<Option<AuthHandshake>>,
    error_callback: RwLock<Option<ErrorCallback>>,
}

impl<P: ExchangeProtocol> ExchangeShared<P> {
    fn report(&self, err: &DexError) {
        let callback = self.error_callback.read().clone();
        if let Some(callback) = callback {
            callback(err);
        }
    }

    fn finish_login(&self, result: Result<()>) {
        let pending = self.pending_auth.lock().take();
        match pending {
            Some(handshake) => handshake.done(result),
            None => {
                debug!(exchange = self.protocol.name(), "login reply without pending handshake");
                if let Err(err) = result {
                    self.report(&err);
                }
            }
        }
    }
}

#[async_trait]
impl<P: ExchangeProtocol> ConnectionObserver for ExchangeShared<P> {
    async fn on_connecting(&self, reason: &str) {
        info!(exchange = self.protocol.name(), reason, "exchange connecting");
    }

    async fn on_connected(&self) {
        debug!(exchange = self.protocol.name(), "exchange socket connected");
    }

    async fn on_disconnecting(&self) {
        let sent = self.registry.unsubscribe_all();
        info!(exchange = self.protocol.name(), unsubscribed = sent, "exchange disconnecting");
    }

    async fn on_disconnected(&self) {
        // A handshake left behind belongs to the generation that just ended.
        self.pending_auth.lock().take();
        info!(exchange = self.protocol.name(), "exchange disconnected");
    }

    async fn on_message(&self, frame: Vec<u8>) -> Result<()> {
        let envelope = self.protocol.decode(&frame)?;

        match self.protocol.route(&envelope) {
            Route::Channel(key) => match self.registry.dispatch(&key, &envelope) {
                Some(dispatched) => {
                    for failure in &dispatched.failures {
                        warn!(exchange = self.protocol.name(), channel = %key, error = %failure, "handler failed");
                        self.report(failure);
                    }
                }
                None => trace!(exchange = self.protocol.name(), channel = %key, "no handler for channel"),
            },
            Route::Ack => debug!(exchange = self.protocol.name(), "subscription acknowledged"),
            Route::LoginAck(result) => {
                match &result {
                    Ok(()) => info!(exchange = self.protocol.name(), "login accepted"),
                    Err(err) => error!(exchange = self.protocol.name(), error = %err, "login rejected"),
                }
                self.finish_login(result);
            }
            Route::Error(err) => {
                let pending = self.pending_auth.lock().take();
                match pending {
                    Some(handshake) => {
                        error!(exchange = self.protocol.name(), error = %err, "error while logging in");
                        handshake.done(Err(DexError::auth(err.to_string())));
                    }
                    None => {
                        warn!(exchange = self.protocol.name(), error = %err, "exchange error");
                        self.report(&err);
                    }
                }
            }
            Route::Reconnect(reason) => {
                warn!(exchange = self.protocol.name(), reason = %reason, "exchange requested reconnect");
                if let Some(client) = self.client.upgrade() {
                    client.reconnect(reason);
                }
            }
            Route::Ignore => {}
        }
        Ok(())
    }

    async fn on_error(&self, error: DexError) {
        warn!(exchange = self.protocol.name(), error = %error, "engine error");
        self.report(&error);
    }

    async fn on_auth(&self, mut handshake: AuthHandshake) {
        let login = match &self.credentials {
            Some(credentials) => self.protocol.login_request(credentials),
            None => Ok(None),
        };

        match login {
            Ok(Some(payload)) => {
                let sender = handshake.sender();
                *self.pending_auth.lock() = Some(handshake);
                debug!(exchange = self.protocol.name(), generation = sender.generation(), "sending login");
                if let Err(err) = sender.send(payload).await {
                    self.finish_login(Err(err));
                }
            }
            Ok(None) => {
                let _ = handshake.send(Vec::new()).await;
            }
            Err(err) => handshake.done(Err(err)),
        }
    }

    async fn on_ready(&self) {
        let replayed = self.registry.replay();
        info!(exchange = self.protocol.name(), replayed, "exchange ready");
    }
}

/// WebSocket adapter for one exchange protocol.
pub struct ExchangeClient<P: ExchangeProtocol> {
    ws: WsClient,
    shared: Arc<ExchangeShared<P>>,
    sweeper: CancellationToken,
}

impl<P: ExchangeProtocol> ExchangeClient<P> {
    /// Connect to the protocol's public endpoint with default settings.
    pub fn new(protocol: P, credentials: Option<ApiCredentials>) -> Result<Self> {
        let config = WsConfig::builder()
            .url(protocol.default_url())
            .exchange(protocol.name())
            .build();
        Self::with_config(protocol, config, credentials)
    }

    /// Build with an explicit config. Credentials turn on the auth gate.
    pub fn with_config(
        protocol: P,
        mut config: WsConfig,
        credentials: Option<ApiCredentials>,
    ) -> Result<Self> {
        if config.url.is_empty() {
            config.url = protocol.default_url().to_string();
        }
        if config.exchange.is_empty() {
            config.exchange = protocol.name().to_string();
        }
        if credentials.is_some() {
            config.auth_required = true;
        }
        let ws = WsClient::new(config)?;
        Ok(Self::with_client(protocol, ws, credentials))
    }

    /// Wrap an already built engine, e.g. one with a custom connector or pool.
    pub fn with_client(protocol: P, ws: WsClient, credentials: Option<ApiCredentials>) -> Self {
        let sender: Arc<dyn FrameSender> = Arc::new(ws.downgrade());
        let shared = Arc::new(ExchangeShared {
            registry: SubscriptionRegistry::new(protocol.name(), sender),
            protocol,
            client: ws.downgrade(),
            credentials,
            pending_auth: Mutex::new(None),
            error_callback: RwLock::new(None),
        });
        ws.set_observer(shared.clone());

        Self {
            ws,
            shared,
            sweeper: CancellationToken::new(),
        }
    }

    /// Start the engine and the dead letter sweep.
    pub fn start(&self) {
        self.ws.start();
        self.shared.registry.spawn_dead_letter_sweeper(
            self.ws.config().dead_letter_interval(),
            self.sweeper.clone(),
        );
    }

    /// Unsubscribe everything, close the socket and stop background work.
    pub async fn close(&self) {
        self.ws.close().await;
        self.sweeper.cancel();
    }

    pub async fn wait_terminated(&self, timeout: Duration) -> bool {
        self.ws.wait_terminated(timeout).await
    }

    /// Register a raw handler receiving the decoded envelope for `channel`.
    ///
    /// Fails with `Unsupported` when this endpoint does not serve the channel
    /// kind, and with an auth error for account channels on a client without
    /// credentials.
    pub fn subscribe(&self, channel: &ChannelSpec, handler: Handler<P::Envelope>) -> Result<()> {
        let protocol = &self.shared.protocol;
        if !protocol.supports(channel.kind) {
            return Err(DexError::unsupported(protocol.name(), channel.kind));
        }
        if channel.kind.is_private() && self.shared.credentials.is_none() {
            return Err(DexError::auth(format!(
                "{} channels require credentials",
                channel.kind
            )));
        }
        let key = protocol.channel_key(channel);
        let request = ChannelRequest::new(
            protocol.subscribe_request(channel)?,
            Some(protocol.unsubscribe_request(channel)?),
        );
        debug!(exchange = protocol.name(), channel = %key, "subscribing");
        self.shared.registry.subscribe(key, request, vec![handler]);
        Ok(())
    }

    /// Register a handler receiving the typed payload `channel.kind` selects.
    pub fn subscribe_payload<F>(&self, channel: &ChannelSpec, callback: F) -> Result<()>
    where
        F: Fn(Payload) -> Result<()> + Send + Sync + 'static,
    {
        let kind = channel.kind;
        let shared: Weak<ExchangeShared<P>> = Arc::downgrade(&self.shared);
        let handler: Handler<P::Envelope> = Arc::new(move |envelope: &P::Envelope| {
            let Some(shared) = shared.upgrade() else {
                return Ok(());
            };
            let payload = shared.protocol.decode_payload(kind, envelope)?;
            callback(payload)
        });
        self.subscribe(channel, handler)
    }

    pub fn subscribe_trades<F>(&self, symbol: &str, callback: F) -> Result<()>
    where
        F: Fn(&Trade) + Send + Sync + 'static,
    {
        self.subscribe_payload(&ChannelSpec::trades(symbol), move |payload| {
            if let Payload::Trades(trades) = payload {
                trades.iter().for_each(&callback);
            }
            Ok(())
        })
    }

    pub fn subscribe_books<F>(&self, symbol: &str, depth: Option<u16>, callback: F) -> Result<()>
    where
        F: Fn(&OrderBook) + Send + Sync + 'static,
    {
        self.subscribe_payload(&ChannelSpec::book(symbol, depth), move |payload| {
            if let Payload::Book(book) = payload {
                callback(&book);
            }
            Ok(())
        })
    }

    pub fn subscribe_tickers<F>(&self, symbol: &str, callback: F) -> Result<()>
    where
        F: Fn(&Ticker) + Send + Sync + 'static,
    {
        self.subscribe_each(&ChannelSpec::ticker(symbol), callback, |payload| match payload {
            Payload::Tickers(tickers) => Some(tickers),
            _ => None,
        })
    }

    pub fn subscribe_candles<F>(&self, symbol: &str, interval: &str, callback: F) -> Result<()>
    where
        F: Fn(&Candle) + Send + Sync + 'static,
    {
        self.subscribe_each(&ChannelSpec::candles(symbol, interval), callback, |payload| {
            match payload {
                Payload::Candles(candles) => Some(candles),
                _ => None,
            }
        })
    }

    /// Order updates, for every instrument when `symbol` is `None`.
    pub fn subscribe_orders<F>(&self, symbol: Option<&str>, callback: F) -> Result<()>
    where
        F: Fn(&OrderUpdate) + Send + Sync + 'static,
    {
        let channel = ChannelSpec::account(ChannelKind::Orders, symbol);
        self.subscribe_each(&channel, callback, |payload| match payload {
            Payload::Orders(orders) => Some(orders),
            _ => None,
        })
    }

    pub fn subscribe_fills<F>(&self, symbol: Option<&str>, callback: F) -> Result<()>
    where
        F: Fn(&Fill) + Send + Sync + 'static,
    {
        let channel = ChannelSpec::account(ChannelKind::Fills, symbol);
        self.subscribe_each(&channel, callback, |payload| match payload {
            Payload::Fills(fills) => Some(fills),
            _ => None,
        })
    }

    pub fn subscribe_positions<F>(&self, symbol: Option<&str>, callback: F) -> Result<()>
    where
        F: Fn(&Position) + Send + Sync + 'static,
    {
        let channel = ChannelSpec::account(ChannelKind::Positions, symbol);
        self.subscribe_each(&channel, callback, |payload| match payload {
            Payload::Positions(positions) => Some(positions),
            _ => None,
        })
    }

    pub fn subscribe_balance_and_position<F>(&self, callback: F) -> Result<()>
    where
        F: Fn(&AccountUpdate) + Send + Sync + 'static,
    {
        let channel = ChannelSpec::account(ChannelKind::BalanceAndPosition, None);
        self.subscribe_each(&channel, callback, |payload| match payload {
            Payload::Account(updates) => Some(updates),
            _ => None,
        })
    }

    fn subscribe_each<T, F>(
        &self,
        channel: &ChannelSpec,
        callback: F,
        unpack: fn(Payload) -> Option<Vec<T>>,
    ) -> Result<()>
    where
        T: 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.subscribe_payload(channel, move |payload| {
            if let Some(items) = unpack(payload) {
                items.iter().for_each(&callback);
            }
            Ok(())
        })
    }

    /// Install the application error callback.
    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(&DexError) + Send + Sync + 'static,
    {
        *self.shared.error_callback.write() = Some(Arc::new(callback));
    }

    pub fn reconnect(&self, reason: impl Into<String>) {
        self.ws.reconnect(reason);
    }

    pub fn ws(&self) -> &WsClient {
        &self.ws
    }

    pub fn protocol(&self) -> &P {
        &self.shared.protocol
    }

    pub fn registry(&self) -> &SubscriptionRegistry<P::Envelope> {
        &self.shared.registry
    }
}

impl<P: ExchangeProtocol> std::fmt::Debug for ExchangeClient<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeClient")
            .field("exchange", &self.shared.protocol.name())
            .field("ws", &self.ws)
            .field("registry", &self.shared.registry)
            .finish()
    }
}
