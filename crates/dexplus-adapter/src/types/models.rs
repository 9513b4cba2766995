/*
[INPUT]:  Exchange-specific market and account payloads
[OUTPUT]: Normalised Trade / OrderBook / Ticker / Candle / account structs and parsing helpers
[POS]:    Data layer - typed payloads delivered to applications
[UPDATE]: When payload fields or parsing rules change
*/

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DexError, Result};
use crate::types::enums::{ChannelKind, Side};

/// One subscription as configured by an application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub kind: ChannelKind,
    /// Exchange-native symbol, e.g. `BTC-USDT`, `btcusdt`, `BTC/USD`.
    /// Empty on account channels means every instrument.
    #[serde(default)]
    pub symbol: String,
    /// Book depth for partial-book channels where the exchange offers one.
    #[serde(default)]
    pub depth: Option<u16>,
    /// Candle interval, e.g. `1m`, `1H`.
    #[serde(default)]
    pub interval: Option<String>,
}

impl ChannelSpec {
    pub const DEFAULT_CANDLE_INTERVAL: &'static str = "1m";

    pub fn new(kind: ChannelKind, symbol: impl Into<String>) -> Self {
        Self {
            kind,
            symbol: symbol.into(),
            depth: None,
            interval: None,
        }
    }

    pub fn trades(symbol: impl Into<String>) -> Self {
        Self::new(ChannelKind::Trades, symbol)
    }

    pub fn book(symbol: impl Into<String>, depth: Option<u16>) -> Self {
        Self {
            depth,
            ..Self::new(ChannelKind::Book, symbol)
        }
    }

    pub fn ticker(symbol: impl Into<String>) -> Self {
        Self::new(ChannelKind::Ticker, symbol)
    }

    pub fn candles(symbol: impl Into<String>, interval: impl Into<String>) -> Self {
        Self {
            interval: Some(interval.into()),
            ..Self::new(ChannelKind::Candles, symbol)
        }
    }

    /// Account channel, optionally narrowed to one instrument.
    pub fn account(kind: ChannelKind, symbol: Option<&str>) -> Self {
        Self::new(kind, symbol.unwrap_or_default())
    }

    pub fn candle_interval(&self) -> &str {
        self.interval
            .as_deref()
            .unwrap_or(Self::DEFAULT_CANDLE_INTERVAL)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub size: Decimal,
}

impl PriceLevel {
    pub fn parse(price: &str, size: &str) -> Result<Self> {
        Ok(Self {
            price: parse_decimal(price)?,
            size: parse_decimal(size)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub exchange: String,
    pub symbol: String,
    pub trade_id: String,
    pub price: Decimal,
    pub size: Decimal,
    pub side: Option<Side>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBook {
    pub exchange: String,
    pub symbol: String,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    /// `false` for incremental updates.
    pub is_snapshot: bool,
    pub timestamp: Option<DateTime<Utc>>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticker {
    pub exchange: String,
    pub symbol: String,
    pub last: Decimal,
    pub best_bid: Option<PriceLevel>,
    pub best_ask: Option<PriceLevel>,
    pub open_24h: Option<Decimal>,
    pub high_24h: Option<Decimal>,
    pub low_24h: Option<Decimal>,
    /// Base-asset volume over the rolling 24h window.
    pub volume_24h: Option<Decimal>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub exchange: String,
    pub symbol: String,
    pub interval: String,
    pub open_time: Option<DateTime<Utc>>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    /// `false` while the interval is still running.
    pub closed: bool,
}

/// Order state pushed by an account channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub exchange: String,
    pub symbol: String,
    pub order_id: String,
    pub client_order_id: Option<String>,
    pub side: Option<Side>,
    pub order_type: String,
    /// Exchange-native state, e.g. `live`, `partially_filled`, `filled`.
    pub state: String,
    pub price: Option<Decimal>,
    pub size: Decimal,
    pub filled_size: Decimal,
    pub avg_price: Option<Decimal>,
    pub last_fill_price: Option<Decimal>,
    pub last_fill_size: Option<Decimal>,
    pub fee: Option<Decimal>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    pub exchange: String,
    pub symbol: String,
    pub trade_id: String,
    pub order_id: String,
    pub client_order_id: Option<String>,
    pub side: Option<Side>,
    pub price: Decimal,
    pub size: Decimal,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub exchange: String,
    pub symbol: String,
    pub position_id: String,
    /// `long`, `short` or `net`.
    pub position_side: String,
    pub margin_mode: String,
    pub size: Decimal,
    pub avg_price: Option<Decimal>,
    pub unrealized_pnl: Option<Decimal>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub currency: String,
    pub cash_balance: Decimal,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Combined balance and position push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountUpdate {
    pub exchange: String,
    /// What triggered the push, e.g. `snapshot`, `filled`, `transferred`.
    pub event_type: String,
    pub balances: Vec<Balance>,
    pub positions: Vec<Position>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Typed payload selected by `ChannelKind`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Trades(Vec<Trade>),
    Book(OrderBook),
    Tickers(Vec<Ticker>),
    Candles(Vec<Candle>),
    Orders(Vec<OrderUpdate>),
    Fills(Vec<Fill>),
    Positions(Vec<Position>),
    Account(Vec<AccountUpdate>),
}

pub(crate) fn parse_decimal(value: &str) -> Result<Decimal> {
    Decimal::from_str(value)
        .or_else(|_| Decimal::from_scientific(value))
        .map_err(|err| DexError::InvalidFrame(format!("invalid decimal '{value}': {err}")))
}

/// Empty strings, which exchanges send for unset fields, become `None`.
pub(crate) fn parse_optional_decimal(value: &str) -> Result<Option<Decimal>> {
    if value.is_empty() {
        Ok(None)
    } else {
        parse_decimal(value).map(Some)
    }
}

/// JSON numbers are parsed from their shortest textual form to keep exact digits.
pub(crate) fn decimal_from_number(value: &serde_json::Number) -> Result<Decimal> {
    parse_decimal(&value.to_string())
}

pub(crate) fn datetime_from_millis(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}

pub(crate) fn datetime_from_micros(micros: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
}

pub(crate) fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
