/*
[INPUT]:  Raw frames and configured channels for one exchange
[OUTPUT]: ExchangeProtocol contract and the Route of a decoded envelope
[POS]:    Exchange layer - per-exchange wire contract
[UPDATE]: When adding routing outcomes or protocol hooks
*/

use serde::de::DeserializeOwned;

use crate::auth::ApiCredentials;
use crate::error::{DexError, Result};
use crate::types::{
    AccountUpdate, Candle, ChannelKind, ChannelSpec, Fill, OrderBook, OrderUpdate, Payload,
    Position, Ticker, Trade,
};

/// What the adapter should do with one decoded envelope.
#[derive(Debug)]
pub enum Route {
    /// Data for the subscription with this channel key.
    Channel(String),
    /// Subscribe/unsubscribe acknowledgement.
    Ack,
    /// Reply to the login request.
    LoginAck(Result<()>),
    /// Exchange reported an error.
    Error(DexError),
    /// Exchange asked the client to reconnect.
    Reconnect(String),
    Ignore,
}

/// Wire format of one exchange: envelope decoding, routing and request builders.
pub trait ExchangeProtocol: Send + Sync + 'static {
    type Envelope: DeserializeOwned + Send + Sync + 'static;

    /// Label used in logs and as the `exchange` field of payloads.
    fn name(&self) -> &'static str;

    /// Public endpoint.
    fn default_url(&self) -> &str;

    fn decode(&self, frame: &[u8]) -> Result<Self::Envelope> {
        Ok(serde_json::from_slice(frame)?)
    }

    fn route(&self, envelope: &Self::Envelope) -> Route;

    /// Whether this endpoint serves `kind`. Subscriptions to anything else are refused.
    fn supports(&self, kind: ChannelKind) -> bool {
        matches!(kind, ChannelKind::Trades | ChannelKind::Book)
    }

    /// Key inbound data for `channel` is routed under.
    fn channel_key(&self, channel: &ChannelSpec) -> String;

    fn subscribe_request(&self, channel: &ChannelSpec) -> Result<Vec<u8>>;

    fn unsubscribe_request(&self, channel: &ChannelSpec) -> Result<Vec<u8>>;

    /// Login frame sent through the auth gate. `None` means nothing to send.
    fn login_request(&self, _credentials: &ApiCredentials) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn decode_trades(&self, envelope: &Self::Envelope) -> Result<Vec<Trade>>;

    fn decode_book(&self, envelope: &Self::Envelope) -> Result<OrderBook>;

    fn decode_tickers(&self, _envelope: &Self::Envelope) -> Result<Vec<Ticker>> {
        Err(DexError::unsupported(self.name(), ChannelKind::Ticker))
    }

    fn decode_candles(&self, _envelope: &Self::Envelope) -> Result<Vec<Candle>> {
        Err(DexError::unsupported(self.name(), ChannelKind::Candles))
    }

    fn decode_orders(&self, _envelope: &Self::Envelope) -> Result<Vec<OrderUpdate>> {
        Err(DexError::unsupported(self.name(), ChannelKind::Orders))
    }

    fn decode_fills(&self, _envelope: &Self::Envelope) -> Result<Vec<Fill>> {
        Err(DexError::unsupported(self.name(), ChannelKind::Fills))
    }

    fn decode_positions(&self, _envelope: &Self::Envelope) -> Result<Vec<Position>> {
        Err(DexError::unsupported(self.name(), ChannelKind::Positions))
    }

    fn decode_account(&self, _envelope: &Self::Envelope) -> Result<Vec<AccountUpdate>> {
        Err(DexError::unsupported(self.name(), ChannelKind::BalanceAndPosition))
    }

    /// Decode the typed payload `kind` selects.
    fn decode_payload(&self, kind: ChannelKind, envelope: &Self::Envelope) -> Result<Payload> {
        match kind {
            ChannelKind::Trades => self.decode_trades(envelope).map(Payload::Trades),
            ChannelKind::Book => self.decode_book(envelope).map(Payload::Book),
            ChannelKind::Ticker => self.decode_tickers(envelope).map(Payload::Tickers),
            ChannelKind::Candles => self.decode_candles(envelope).map(Payload::Candles),
            ChannelKind::Orders => self.decode_orders(envelope).map(Payload::Orders),
            ChannelKind::Fills => self.decode_fills(envelope).map(Payload::Fills),
            ChannelKind::Positions => self.decode_positions(envelope).map(Payload::Positions),
            ChannelKind::BalanceAndPosition => self.decode_account(envelope).map(Payload::Account),
        }
    }
}

/// Split a `<prefix><symbol>`-style channel key.
pub(crate) fn key_suffix<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    key.strip_prefix(prefix).filter(|rest| !rest.is_empty())
}

pub(crate) fn unexpected(exchange: &str, expected: &str) -> DexError {
    DexError::InvalidFrame(format!("{exchange}: envelope is not a {expected} payload"))
}
