/*
[INPUT]:  Binance combined-stream frames and configured channels
[OUTPUT]: BinanceProtocol: stream routing, SUBSCRIBE requests, trade/depth/ticker/kline decoding
[POS]:    Exchange layer - Binance spot adapter
[UPDATE]: When Binance stream names or payload fields change
*/

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DexError, Result};
use crate::exchanges::protocol::{ExchangeProtocol, Route, unexpected};
use crate::types::{
    Candle, ChannelKind, ChannelSpec, OrderBook, PriceLevel, Side, Ticker, Trade,
    datetime_from_millis, parse_decimal,
};

/// Combined-stream endpoint; every data frame is wrapped as `{"stream":..,"data":..}`.
pub const BINANCE_STREAM_URL: &str = "wss://stream.binance.com:9443/stream";
pub const BINANCE_TESTNET_STREAM_URL: &str = "wss://stream.testnet.binance.vision/stream";

const PARTIAL_DEPTHS: [u16; 3] = [5, 10, 20];

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceEnvelope {
    #[serde(default)]
    pub stream: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub error: Option<BinanceError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceError {
    pub code: i64,
    pub msg: String,
}

#[derive(Debug, Serialize)]
struct StreamRequest<'a> {
    method: &'a str,
    params: [&'a str; 1],
    id: u64,
}

#[derive(Debug, Deserialize)]
struct TradeEvent {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "t")]
    trade_id: u64,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    quantity: String,
    #[serde(rename = "T")]
    trade_time: i64,
    /// Buyer is the maker, so the taker sold.
    #[serde(rename = "m")]
    buyer_is_maker: bool,
}

#[derive(Debug, Deserialize)]
struct PartialDepth {
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

#[derive(Debug, Deserialize)]
struct DepthUpdate {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "b")]
    bids: Vec<[String; 2]>,
    #[serde(rename = "a")]
    asks: Vec<[String; 2]>,
}

/// `<symbol>@ticker` rolling 24h statistics.
#[derive(Debug, Deserialize)]
struct TickerEvent {
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c")]
    last: String,
    #[serde(rename = "b")]
    bid_price: String,
    #[serde(rename = "B")]
    bid_qty: String,
    #[serde(rename = "a")]
    ask_price: String,
    #[serde(rename = "A")]
    ask_qty: String,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "v")]
    volume: String,
}

#[derive(Debug, Deserialize)]
struct KlineEvent {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "k")]
    kline: Kline,
}

#[derive(Debug, Deserialize)]
struct Kline {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "i")]
    interval: String,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "x")]
    closed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct BinanceProtocol {
    testnet: bool,
    /// Last request id handed out; replies echo it back.
    request_id: Arc<AtomicU64>,
}

impl BinanceProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn testnet() -> Self {
        Self {
            testnet: true,
            ..Self::default()
        }
    }

    fn request(&self, method: &str, channel: &ChannelSpec) -> Result<Vec<u8>> {
        if !self.supports(channel.kind) {
            return Err(DexError::unsupported(self.name(), channel.kind));
        }
        let stream = self.channel_key(channel);
        let id = self.request_id.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(serde_json::to_vec(&StreamRequest {
            method,
            params: [stream.as_str()],
            id,
        })?)
    }
}

fn levels(raw: &[[String; 2]]) -> Result<Vec<PriceLevel>> {
    raw.iter()
        .map(|[price, size]| PriceLevel::parse(price, size))
        .collect()
}

impl ExchangeProtocol for BinanceProtocol {
    type Envelope = BinanceEnvelope;

    fn name(&self) -> &'static str {
        "binance"
    }

    fn default_url(&self) -> &str {
        if self.testnet {
            BINANCE_TESTNET_STREAM_URL
        } else {
            BINANCE_STREAM_URL
        }
    }

    fn route(&self, envelope: &BinanceEnvelope) -> Route {
        if let (Some(stream), Some(_)) = (&envelope.stream, &envelope.data) {
            return Route::Channel(stream.clone());
        }
        if let Some(error) = &envelope.error {
            return Route::Error(DexError::exchange(error.code.to_string(), error.msg.clone()));
        }
        if envelope.id.is_some() {
            return Route::Ack;
        }
        Route::Ignore
    }

    fn supports(&self, kind: ChannelKind) -> bool {
        !kind.is_private()
    }

    /// Stream name, e.g. `btcusdt@trade`, `btcusdt@depth5@100ms` or `btcusdt@kline_1m`.
    fn channel_key(&self, channel: &ChannelSpec) -> String {
        let symbol = channel.symbol.to_lowercase();
        match channel.kind {
            ChannelKind::Trades => format!("{symbol}@trade"),
            ChannelKind::Book => match channel.depth {
                Some(depth) if PARTIAL_DEPTHS.contains(&depth) => {
                    format!("{symbol}@depth{depth}@100ms")
                }
                _ => format!("{symbol}@depth@100ms"),
            },
            ChannelKind::Ticker => format!("{symbol}@ticker"),
            ChannelKind::Candles => format!("{symbol}@kline_{}", channel.candle_interval()),
            other => format!("{symbol}@{other}"),
        }
    }

    fn subscribe_request(&self, channel: &ChannelSpec) -> Result<Vec<u8>> {
        self.request("SUBSCRIBE", channel)
    }

    fn unsubscribe_request(&self, channel: &ChannelSpec) -> Result<Vec<u8>> {
        self.request("UNSUBSCRIBE", channel)
    }

    fn decode_trades(&self, envelope: &BinanceEnvelope) -> Result<Vec<Trade>> {
        let data = envelope
            .data
            .as_ref()
            .ok_or_else(|| unexpected(self.name(), "trade"))?;
        let event = TradeEvent::deserialize(data)?;
        Ok(vec![Trade {
            exchange: self.name().to_string(),
            symbol: event.symbol,
            trade_id: event.trade_id.to_string(),
            price: parse_decimal(&event.price)?,
            size: parse_decimal(&event.quantity)?,
            side: Some(if event.buyer_is_maker {
                Side::Sell
            } else {
                Side::Buy
            }),
            timestamp: datetime_from_millis(event.trade_time),
        }])
    }

    fn decode_book(&self, envelope: &BinanceEnvelope) -> Result<OrderBook> {
        let (Some(stream), Some(data)) = (&envelope.stream, &envelope.data) else {
            return Err(unexpected(self.name(), "depth"));
        };

        if data.get("lastUpdateId").is_some() {
            let depth = PartialDepth::deserialize(data)?;
            let symbol = stream.split('@').next().unwrap_or_default().to_uppercase();
            return Ok(OrderBook {
                exchange: self.name().to_string(),
                symbol,
                bids: levels(&depth.bids)?,
                asks: levels(&depth.asks)?,
                is_snapshot: true,
                timestamp: None,
            });
        }

        let update = DepthUpdate::deserialize(data)?;
        Ok(OrderBook {
            exchange: self.name().to_string(),
            symbol: update.symbol,
            bids: levels(&update.bids)?,
            asks: levels(&update.asks)?,
            is_snapshot: false,
            timestamp: datetime_from_millis(update.event_time),
        })
    }

    fn decode_tickers(&self, envelope: &BinanceEnvelope) -> Result<Vec<Ticker>> {
        let data = envelope
            .data
            .as_ref()
            .ok_or_else(|| unexpected(self.name(), "ticker"))?;
        let event = TickerEvent::deserialize(data)?;
        Ok(vec![Ticker {
            exchange: self.name().to_string(),
            last: parse_decimal(&event.last)?,
            best_bid: Some(PriceLevel::parse(&event.bid_price, &event.bid_qty)?),
            best_ask: Some(PriceLevel::parse(&event.ask_price, &event.ask_qty)?),
            open_24h: Some(parse_decimal(&event.open)?),
            high_24h: Some(parse_decimal(&event.high)?),
            low_24h: Some(parse_decimal(&event.low)?),
            volume_24h: Some(parse_decimal(&event.volume)?),
            timestamp: datetime_from_millis(event.event_time),
            symbol: event.symbol,
        }])
    }

    fn decode_candles(&self, envelope: &BinanceEnvelope) -> Result<Vec<Candle>> {
        let data = envelope
            .data
            .as_ref()
            .ok_or_else(|| unexpected(self.name(), "kline"))?;
        let KlineEvent { symbol, kline } = KlineEvent::deserialize(data)?;
        Ok(vec![Candle {
            exchange: self.name().to_string(),
            symbol,
            open_time: datetime_from_millis(kline.open_time),
            open: parse_decimal(&kline.open)?,
            high: parse_decimal(&kline.high)?,
            low: parse_decimal(&kline.low)?,
            close: parse_decimal(&kline.close)?,
            volume: parse_decimal(&kline.volume)?,
            closed: kline.closed,
            interval: kline.interval,
        }])
    }
}
