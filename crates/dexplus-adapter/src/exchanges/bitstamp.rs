/*
[INPUT]:  Bitstamp v2 WebSocket frames and configured channels
[OUTPUT]: BitstampProtocol: bts:* event routing, channel requests, trade/book decoding
[POS]:    Exchange layer - Bitstamp adapter
[UPDATE]: When Bitstamp channel prefixes or event names change
*/

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DexError, Result};
use crate::exchanges::protocol::{ExchangeProtocol, Route, key_suffix, unexpected};
use crate::types::{
    ChannelKind, ChannelSpec, OrderBook, PriceLevel, Side, Trade, datetime_from_micros,
    parse_decimal,
};

pub const BITSTAMP_WS_URL: &str = "wss://ws.bitstamp.net";

const TRADES_PREFIX: &str = "live_trades_";
const BOOK_PREFIX: &str = "order_book_";
const DIFF_BOOK_PREFIX: &str = "diff_order_book_";

#[derive(Debug, Clone, Deserialize)]
pub struct BitstampEnvelope {
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Serialize)]
struct ChannelRequest<'a> {
    event: &'static str,
    data: ChannelData<'a>,
}

#[derive(Debug, Serialize)]
struct ChannelData<'a> {
    channel: &'a str,
}

#[derive(Debug, Deserialize)]
struct ErrorData {
    #[serde(default)]
    code: Option<Value>,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct LiveTrade {
    id: u64,
    amount_str: String,
    price_str: String,
    /// 0 = buy, 1 = sell.
    #[serde(rename = "type")]
    side: u8,
    microtimestamp: String,
}

#[derive(Debug, Deserialize)]
struct BookData {
    #[serde(default)]
    microtimestamp: Option<String>,
    #[serde(default)]
    bids: Vec<[String; 2]>,
    #[serde(default)]
    asks: Vec<[String; 2]>,
}

#[derive(Debug, Clone, Default)]
pub struct BitstampProtocol {
    diff_books: bool,
}

impl BitstampProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to `diff_order_book_*` instead of full `order_book_*` snapshots.
    pub fn with_diff_books(mut self, enabled: bool) -> Self {
        self.diff_books = enabled;
        self
    }

    fn ensure_supported(&self, channel: &ChannelSpec) -> Result<()> {
        if self.supports(channel.kind) {
            Ok(())
        } else {
            Err(DexError::unsupported(self.name(), channel.kind))
        }
    }

    fn request(event: &'static str, channel: &str) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&ChannelRequest {
            event,
            data: ChannelData { channel },
        })?)
    }
}

fn levels(raw: &[[String; 2]]) -> Result<Vec<PriceLevel>> {
    raw.iter()
        .map(|[price, size]| PriceLevel::parse(price, size))
        .collect()
}

fn parse_micros(value: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    value.parse::<i64>().ok().and_then(datetime_from_micros)
}

impl ExchangeProtocol for BitstampProtocol {
    type Envelope = BitstampEnvelope;

    fn name(&self) -> &'static str {
        "bitstamp"
    }

    fn default_url(&self) -> &str {
        BITSTAMP_WS_URL
    }

    fn route(&self, envelope: &BitstampEnvelope) -> Route {
        match envelope.event.as_str() {
            "bts:subscription_succeeded" | "bts:unsubscription_succeeded" => Route::Ack,
            "bts:error" => {
                let (code, message) = match ErrorData::deserialize(&envelope.data) {
                    Ok(data) => (
                        data.code
                            .filter(|code| !code.is_null())
                            .map(|code| code.to_string())
                            .unwrap_or_default(),
                        data.message,
                    ),
                    Err(_) => (String::new(), envelope.data.to_string()),
                };
                Route::Error(DexError::exchange(code, message))
            }
            "bts:request_reconnect" => Route::Reconnect("bts:request_reconnect".to_string()),
            "bts:heartbeat" => Route::Ignore,
            _ if !envelope.channel.is_empty() && envelope.data.is_object() => {
                Route::Channel(envelope.channel.clone())
            }
            _ => Route::Ignore,
        }
    }

    fn channel_key(&self, channel: &ChannelSpec) -> String {
        let symbol = channel.symbol.to_lowercase();
        match channel.kind {
            ChannelKind::Trades => format!("{TRADES_PREFIX}{symbol}"),
            ChannelKind::Book if self.diff_books => format!("{DIFF_BOOK_PREFIX}{symbol}"),
            ChannelKind::Book => format!("{BOOK_PREFIX}{symbol}"),
            other => format!("{other}_{symbol}"),
        }
    }

    fn subscribe_request(&self, channel: &ChannelSpec) -> Result<Vec<u8>> {
        self.ensure_supported(channel)?;
        Self::request("bts:subscribe", &self.channel_key(channel))
    }

    fn unsubscribe_request(&self, channel: &ChannelSpec) -> Result<Vec<u8>> {
        self.ensure_supported(channel)?;
        Self::request("bts:unsubscribe", &self.channel_key(channel))
    }

    fn decode_trades(&self, envelope: &BitstampEnvelope) -> Result<Vec<Trade>> {
        let symbol = key_suffix(&envelope.channel, TRADES_PREFIX)
            .ok_or_else(|| unexpected(self.name(), "trade"))?;
        let trade = LiveTrade::deserialize(&envelope.data)?;
        Ok(vec![Trade {
            exchange: self.name().to_string(),
            symbol: symbol.to_string(),
            trade_id: trade.id.to_string(),
            price: parse_decimal(&trade.price_str)?,
            size: parse_decimal(&trade.amount_str)?,
            side: match trade.side {
                0 => Some(Side::Buy),
                1 => Some(Side::Sell),
                _ => None,
            },
            timestamp: parse_micros(&trade.microtimestamp),
        }])
    }

    fn decode_book(&self, envelope: &BitstampEnvelope) -> Result<OrderBook> {
        let (symbol, is_snapshot) = if let Some(symbol) =
            key_suffix(&envelope.channel, DIFF_BOOK_PREFIX)
        {
            (symbol, false)
        } else if let Some(symbol) = key_suffix(&envelope.channel, BOOK_PREFIX) {
            (symbol, true)
        } else {
            return Err(unexpected(self.name(), "order book"));
        };

        let book = BookData::deserialize(&envelope.data)?;
        Ok(OrderBook {
            exchange: self.name().to_string(),
            symbol: symbol.to_string(),
            bids: levels(&book.bids)?,
            asks: levels(&book.asks)?,
            is_snapshot,
            timestamp: book.microtimestamp.as_deref().and_then(parse_micros),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(raw: &str) -> BitstampEnvelope {
        BitstampProtocol::new().decode(raw.as_bytes()).unwrap()
    }

    #[test]
    fn test_route_events() {
        let protocol = BitstampProtocol::new();
        assert!(matches!(
            protocol.route(&envelope(
                r#"{"event":"bts:subscription_succeeded","channel":"live_trades_btcusd","data":{}}"#
            )),
            Route::Ack
        ));
        assert!(matches!(
            protocol.route(&envelope(
                r#"{"event":"bts:error","channel":"","data":{"code":null,"message":"Bad subscription string."}}"#
            )),
            Route::Error(DexError::Exchange { message, .. }) if message == "Bad subscription string."
        ));
        assert!(matches!(
            protocol.route(&envelope(r#"{"event":"bts:request_reconnect","channel":"","data":""}"#)),
            Route::Reconnect(_)
        ));
        assert!(matches!(
            protocol.route(&envelope(
                r#"{"event":"trade","channel":"live_trades_btcusd","data":{"id":1}}"#
            )),
            Route::Channel(key) if key == "live_trades_btcusd"
        ));
    }

    #[test]
    fn test_requests() {
        let protocol = BitstampProtocol::new();
        let request = protocol
            .subscribe_request(&ChannelSpec::trades("BTCUSD"))
            .unwrap();
        let value: Value = serde_json::from_slice(&request).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"event": "bts:subscribe", "data": {"channel": "live_trades_btcusd"}})
        );

        let diff = BitstampProtocol::new().with_diff_books(true);
        assert_eq!(
            diff.channel_key(&ChannelSpec::book("ethusd", None)),
            "diff_order_book_ethusd"
        );

        assert!(!protocol.supports(ChannelKind::Ticker));
        assert!(matches!(
            protocol.subscribe_request(&ChannelSpec::ticker("btcusd")),
            Err(DexError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_decode_trade() {
        let raw = r#"{"data":{"id":262389437,"timestamp":"1672515782","amount":0.0105,"amount_str":"0.01050000","price":16537,"price_str":"16537","type":1,"microtimestamp":"1672515782136000","buy_order_id":1,"sell_order_id":2},"channel":"live_trades_btcusd","event":"trade"}"#;
        let trades = BitstampProtocol::new().decode_trades(&envelope(raw)).unwrap();
        assert_eq!(trades[0].symbol, "btcusd");
        assert_eq!(trades[0].side, Some(Side::Sell));
        assert_eq!(trades[0].size.to_string(), "0.01050000");
        assert_eq!(trades[0].timestamp.unwrap().timestamp_millis(), 1_672_515_782_136);
    }

    #[test]
    fn test_decode_books() {
        let protocol = BitstampProtocol::new();
        let raw = r#"{"data":{"timestamp":"1672515782","microtimestamp":"1672515782136000","bids":[["16536","0.5"]],"asks":[["16538","1.25"]]},"channel":"order_book_btcusd","event":"data"}"#;
        let book = protocol.decode_book(&envelope(raw)).unwrap();
        assert!(book.is_snapshot);
        assert_eq!(book.best_ask().unwrap().size.to_string(), "1.25");

        let raw = r#"{"data":{"bids":[],"asks":[["16538","0"]]},"channel":"diff_order_book_btcusd","event":"data"}"#;
        let book = protocol.decode_book(&envelope(raw)).unwrap();
        assert!(!book.is_snapshot);
        assert!(book.bids.is_empty());
    }
}
