/*
[INPUT]:  Coinbase Exchange WebSocket feed messages and configured channels
[OUTPUT]: CoinbaseProtocol: type-tagged envelope, product subscriptions, match/level2/ticker decoding
[POS]:    Exchange layer - Coinbase adapter
[UPDATE]: When Coinbase feed message types change
*/

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DexError, Result};
use crate::exchanges::protocol::{ExchangeProtocol, Route, unexpected};
use crate::types::{
    ChannelKind, ChannelSpec, OrderBook, PriceLevel, Side, Ticker, Trade, parse_decimal,
    parse_optional_decimal, parse_rfc3339,
};

pub const COINBASE_WS_URL: &str = "wss://ws-feed.exchange.coinbase.com";
pub const COINBASE_SANDBOX_WS_URL: &str = "wss://ws-feed-public.sandbox.exchange.coinbase.com";

const MATCHES: &str = "matches";
const LEVEL2: &str = "level2";
/// Unauthenticated level2 feed, batched every 50ms.
const LEVEL2_BATCH: &str = "level2_batch";
const TICKER: &str = "ticker";

#[derive(Debug, Clone, Deserialize)]
pub struct CoinbaseMatch {
    pub trade_id: u64,
    pub product_id: String,
    pub price: String,
    pub size: String,
    /// Maker order side.
    pub side: String,
    pub time: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoinbaseSnapshot {
    pub product_id: String,
    pub bids: Vec<[String; 2]>,
    pub asks: Vec<[String; 2]>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoinbaseL2Update {
    pub product_id: String,
    #[serde(default)]
    pub time: Option<String>,
    /// `[side, price, size]`; size "0" removes the level.
    pub changes: Vec<[String; 3]>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoinbaseTicker {
    pub product_id: String,
    pub price: String,
    #[serde(default)]
    pub best_bid: String,
    #[serde(default)]
    pub best_bid_size: String,
    #[serde(default)]
    pub best_ask: String,
    #[serde(default)]
    pub best_ask_size: String,
    #[serde(default)]
    pub open_24h: String,
    #[serde(default)]
    pub high_24h: String,
    #[serde(default)]
    pub low_24h: String,
    #[serde(default)]
    pub volume_24h: String,
    #[serde(default)]
    pub time: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum CoinbaseEnvelope {
    #[serde(rename = "match", alias = "last_match")]
    Match(CoinbaseMatch),
    #[serde(rename = "snapshot")]
    Snapshot(CoinbaseSnapshot),
    #[serde(rename = "l2update")]
    L2Update(CoinbaseL2Update),
    #[serde(rename = "ticker")]
    Ticker(CoinbaseTicker),
    #[serde(rename = "subscriptions")]
    Subscriptions {
        #[serde(default)]
        channels: Vec<Value>,
    },
    #[serde(rename = "error")]
    Error {
        message: String,
        #[serde(default)]
        reason: Option<String>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Serialize)]
struct FeedRequest<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    product_ids: [&'a str; 1],
    channels: [&'static str; 1],
}

#[derive(Debug, Clone, Default)]
pub struct CoinbaseProtocol {
    sandbox: bool,
}

impl CoinbaseProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sandbox() -> Self {
        Self { sandbox: true }
    }

    fn request(kind: &'static str, channel: &ChannelSpec) -> Result<Vec<u8>> {
        let feed = match channel.kind {
            ChannelKind::Trades => MATCHES,
            ChannelKind::Book => LEVEL2_BATCH,
            ChannelKind::Ticker => TICKER,
            other => return Err(DexError::unsupported("coinbase", other)),
        };
        Ok(serde_json::to_vec(&FeedRequest {
            kind,
            product_ids: [channel.symbol.as_str()],
            channels: [feed],
        })?)
    }
}

fn levels(raw: &[[String; 2]]) -> Result<Vec<PriceLevel>> {
    raw.iter()
        .map(|[price, size]| PriceLevel::parse(price, size))
        .collect()
}

fn top_level(price: &str, size: &str) -> Result<Option<PriceLevel>> {
    if price.is_empty() {
        return Ok(None);
    }
    Ok(Some(PriceLevel {
        price: parse_decimal(price)?,
        size: parse_optional_decimal(size)?.unwrap_or_default(),
    }))
}

impl ExchangeProtocol for CoinbaseProtocol {
    type Envelope = CoinbaseEnvelope;

    fn name(&self) -> &'static str {
        "coinbase"
    }

    fn default_url(&self) -> &str {
        if self.sandbox {
            COINBASE_SANDBOX_WS_URL
        } else {
            COINBASE_WS_URL
        }
    }

    fn route(&self, envelope: &CoinbaseEnvelope) -> Route {
        match envelope {
            CoinbaseEnvelope::Match(trade) => Route::Channel(format!("{MATCHES}:{}", trade.product_id)),
            CoinbaseEnvelope::Snapshot(book) => Route::Channel(format!("{LEVEL2}:{}", book.product_id)),
            CoinbaseEnvelope::L2Update(book) => Route::Channel(format!("{LEVEL2}:{}", book.product_id)),
            CoinbaseEnvelope::Ticker(ticker) => Route::Channel(format!("{TICKER}:{}", ticker.product_id)),
            CoinbaseEnvelope::Subscriptions { .. } => Route::Ack,
            CoinbaseEnvelope::Error { message, reason } => Route::Error(DexError::exchange(
                reason.clone().unwrap_or_default(),
                message.clone(),
            )),
            CoinbaseEnvelope::Other => Route::Ignore,
        }
    }

    fn supports(&self, kind: ChannelKind) -> bool {
        matches!(kind, ChannelKind::Trades | ChannelKind::Book | ChannelKind::Ticker)
    }

    /// `matches:<product>`, `level2:<product>` or `ticker:<product>`.
    fn channel_key(&self, channel: &ChannelSpec) -> String {
        match channel.kind {
            ChannelKind::Trades => format!("{MATCHES}:{}", channel.symbol),
            ChannelKind::Book => format!("{LEVEL2}:{}", channel.symbol),
            other => format!("{other}:{}", channel.symbol),
        }
    }

    fn subscribe_request(&self, channel: &ChannelSpec) -> Result<Vec<u8>> {
        Self::request("subscribe", channel)
    }

    fn unsubscribe_request(&self, channel: &ChannelSpec) -> Result<Vec<u8>> {
        Self::request("unsubscribe", channel)
    }

    fn decode_trades(&self, envelope: &CoinbaseEnvelope) -> Result<Vec<Trade>> {
        let CoinbaseEnvelope::Match(trade) = envelope else {
            return Err(unexpected(self.name(), "match"));
        };
        // The feed reports the maker side; the taker is the opposite.
        let side = Side::parse(&trade.side).map(|maker| match maker {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        });
        Ok(vec![Trade {
            exchange: self.name().to_string(),
            symbol: trade.product_id.clone(),
            trade_id: trade.trade_id.to_string(),
            price: parse_decimal(&trade.price)?,
            size: parse_decimal(&trade.size)?,
            side,
            timestamp: parse_rfc3339(&trade.time),
        }])
    }

    fn decode_book(&self, envelope: &CoinbaseEnvelope) -> Result<OrderBook> {
        match envelope {
            CoinbaseEnvelope::Snapshot(book) => Ok(OrderBook {
                exchange: self.name().to_string(),
                symbol: book.product_id.clone(),
                bids: levels(&book.bids)?,
                asks: levels(&book.asks)?,
                is_snapshot: true,
                timestamp: None,
            }),
            CoinbaseEnvelope::L2Update(update) => {
                let mut bids = Vec::new();
                let mut asks = Vec::new();
                for [side, price, size] in &update.changes {
                    let level = PriceLevel::parse(price, size)?;
                    match Side::parse(side) {
                        Some(Side::Buy) => bids.push(level),
                        Some(Side::Sell) => asks.push(level),
                        None => {
                            return Err(DexError::InvalidFrame(format!(
                                "coinbase: unknown l2update side '{side}'"
                            )));
                        }
                    }
                }
                Ok(OrderBook {
                    exchange: self.name().to_string(),
                    symbol: update.product_id.clone(),
                    bids,
                    asks,
                    is_snapshot: false,
                    timestamp: update.time.as_deref().and_then(parse_rfc3339),
                })
            }
            _ => Err(unexpected(self.name(), "level2")),
        }
    }

    fn decode_tickers(&self, envelope: &CoinbaseEnvelope) -> Result<Vec<Ticker>> {
        let CoinbaseEnvelope::Ticker(ticker) = envelope else {
            return Err(unexpected(self.name(), "ticker"));
        };
        Ok(vec![Ticker {
            exchange: self.name().to_string(),
            symbol: ticker.product_id.clone(),
            last: parse_decimal(&ticker.price)?,
            best_bid: top_level(&ticker.best_bid, &ticker.best_bid_size)?,
            best_ask: top_level(&ticker.best_ask, &ticker.best_ask_size)?,
            open_24h: parse_optional_decimal(&ticker.open_24h)?,
            high_24h: parse_optional_decimal(&ticker.high_24h)?,
            low_24h: parse_optional_decimal(&ticker.low_24h)?,
            volume_24h: parse_optional_decimal(&ticker.volume_24h)?,
            timestamp: ticker.time.as_deref().and_then(parse_rfc3339),
        }])
    }
}
