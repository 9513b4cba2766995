/*
[INPUT]:  Kraken Spot WebSocket v2 frames and configured channels
[OUTPUT]: KrakenProtocol: channel/method routing, params requests, trade/book/ticker decoding
[POS]:    Exchange layer - Kraken adapter
[UPDATE]: When Kraken v2 channels or method replies change
*/

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::error::{DexError, Result};
use crate::exchanges::protocol::{ExchangeProtocol, Route, unexpected};
use crate::types::{
    ChannelKind, ChannelSpec, OrderBook, PriceLevel, Side, Ticker, Trade, decimal_from_number,
    parse_rfc3339,
};

pub const KRAKEN_WS_URL: &str = "wss://ws.kraken.com/v2";

const BOOK_DEPTHS: [u16; 5] = [10, 25, 100, 500, 1000];

#[derive(Debug, Clone, Deserialize)]
pub struct KrakenEnvelope {
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
struct MethodRequest<'a> {
    method: &'static str,
    params: Params<'a>,
}

#[derive(Debug, Serialize)]
struct Params<'a> {
    channel: &'static str,
    symbol: [&'a str; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    depth: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct SymbolOnly {
    symbol: String,
}

#[derive(Debug, Deserialize)]
struct KrakenTrade {
    symbol: String,
    side: String,
    price: Number,
    qty: Number,
    trade_id: u64,
    timestamp: String,
}

#[derive(Debug, Deserialize)]
struct KrakenLevel {
    price: Number,
    qty: Number,
}

#[derive(Debug, Deserialize)]
struct KrakenBook {
    symbol: String,
    #[serde(default)]
    bids: Vec<KrakenLevel>,
    #[serde(default)]
    asks: Vec<KrakenLevel>,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KrakenTicker {
    symbol: String,
    bid: Number,
    bid_qty: Number,
    ask: Number,
    ask_qty: Number,
    last: Number,
    volume: Number,
    low: Number,
    high: Number,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct KrakenProtocol;

impl KrakenProtocol {
    pub fn new() -> Self {
        Self
    }

    /// Smallest supported depth covering the requested one.
    fn book_depth(requested: Option<u16>) -> Option<u16> {
        let requested = requested?;
        Some(
            BOOK_DEPTHS
                .iter()
                .copied()
                .find(|depth| *depth >= requested)
                .unwrap_or(BOOK_DEPTHS[BOOK_DEPTHS.len() - 1]),
        )
    }

    fn request(method: &'static str, channel: &ChannelSpec) -> Result<Vec<u8>> {
        let (name, depth) = match channel.kind {
            ChannelKind::Trades => ("trade", None),
            ChannelKind::Book => ("book", Self::book_depth(channel.depth)),
            ChannelKind::Ticker => ("ticker", None),
            other => return Err(DexError::unsupported("kraken", other)),
        };
        Ok(serde_json::to_vec(&MethodRequest {
            method,
            params: Params {
                channel: name,
                symbol: [channel.symbol.as_str()],
                depth,
            },
        })?)
    }
}

fn levels(raw: &[KrakenLevel]) -> Result<Vec<PriceLevel>> {
    raw.iter()
        .map(|level| {
            Ok(PriceLevel {
                price: decimal_from_number(&level.price)?,
                size: decimal_from_number(&level.qty)?,
            })
        })
        .collect()
}

impl ExchangeProtocol for KrakenProtocol {
    type Envelope = KrakenEnvelope;

    fn name(&self) -> &'static str {
        "kraken"
    }

    fn default_url(&self) -> &str {
        KRAKEN_WS_URL
    }

    fn route(&self, envelope: &KrakenEnvelope) -> Route {
        if let Some(method) = &envelope.method {
            if envelope.success == Some(false) {
                let message = envelope.error.clone().unwrap_or_default();
                return Route::Error(DexError::exchange(method.clone(), message));
            }
            return Route::Ack;
        }

        let Some(channel) = envelope.channel.as_deref() else {
            return Route::Ignore;
        };
        if matches!(channel, "heartbeat" | "status") {
            return Route::Ignore;
        }

        let symbol = envelope
            .data
            .as_ref()
            .and_then(|data| data.get(0))
            .and_then(|first| SymbolOnly::deserialize(first).ok());
        match symbol {
            Some(SymbolOnly { symbol }) => Route::Channel(format!("{channel}:{symbol}")),
            None => Route::Ignore,
        }
    }

    fn supports(&self, kind: ChannelKind) -> bool {
        matches!(kind, ChannelKind::Trades | ChannelKind::Book | ChannelKind::Ticker)
    }

    /// `<v2 channel>:<symbol>`, e.g. `book:BTC/USD`.
    fn channel_key(&self, channel: &ChannelSpec) -> String {
        match channel.kind {
            ChannelKind::Trades => format!("trade:{}", channel.symbol),
            other => format!("{other}:{}", channel.symbol),
        }
    }

    fn subscribe_request(&self, channel: &ChannelSpec) -> Result<Vec<u8>> {
        Self::request("subscribe", channel)
    }

    fn unsubscribe_request(&self, channel: &ChannelSpec) -> Result<Vec<u8>> {
        Self::request("unsubscribe", channel)
    }

    fn decode_trades(&self, envelope: &KrakenEnvelope) -> Result<Vec<Trade>> {
        let data = envelope
            .data
            .as_ref()
            .ok_or_else(|| unexpected(self.name(), "trade"))?;
        Vec::<KrakenTrade>::deserialize(data)?
            .into_iter()
            .map(|trade| {
                Ok(Trade {
                    exchange: self.name().to_string(),
                    price: decimal_from_number(&trade.price)?,
                    size: decimal_from_number(&trade.qty)?,
                    side: Side::parse(&trade.side),
                    timestamp: parse_rfc3339(&trade.timestamp),
                    trade_id: trade.trade_id.to_string(),
                    symbol: trade.symbol,
                })
            })
            .collect()
    }

    fn decode_book(&self, envelope: &KrakenEnvelope) -> Result<OrderBook> {
        let data = envelope
            .data
            .as_ref()
            .ok_or_else(|| unexpected(self.name(), "book"))?;
        let book = Vec::<KrakenBook>::deserialize(data)?
            .into_iter()
            .next()
            .ok_or_else(|| unexpected(self.name(), "book"))?;

        Ok(OrderBook {
            exchange: self.name().to_string(),
            bids: levels(&book.bids)?,
            asks: levels(&book.asks)?,
            is_snapshot: envelope.kind.as_deref() == Some("snapshot"),
            timestamp: book.timestamp.as_deref().and_then(parse_rfc3339),
            symbol: book.symbol,
        })
    }

    fn decode_tickers(&self, envelope: &KrakenEnvelope) -> Result<Vec<Ticker>> {
        let data = envelope
            .data
            .as_ref()
            .ok_or_else(|| unexpected(self.name(), "ticker"))?;
        Vec::<KrakenTicker>::deserialize(data)?
            .into_iter()
            .map(|ticker| {
                Ok(Ticker {
                    exchange: self.name().to_string(),
                    last: decimal_from_number(&ticker.last)?,
                    best_bid: Some(PriceLevel {
                        price: decimal_from_number(&ticker.bid)?,
                        size: decimal_from_number(&ticker.bid_qty)?,
                    }),
                    best_ask: Some(PriceLevel {
                        price: decimal_from_number(&ticker.ask)?,
                        size: decimal_from_number(&ticker.ask_qty)?,
                    }),
                    open_24h: None,
                    high_24h: Some(decimal_from_number(&ticker.high)?),
                    low_24h: Some(decimal_from_number(&ticker.low)?),
                    volume_24h: Some(decimal_from_number(&ticker.volume)?),
                    timestamp: ticker.timestamp.as_deref().and_then(parse_rfc3339),
                    symbol: ticker.symbol,
                })
            })
            .collect()
    }
}
