/*
[INPUT]:  OKX v5 WebSocket frames, configured channels and API credentials
[OUTPUT]: OkxProtocol: event/arg routing, op requests, login, market and account channel decoding
[POS]:    Exchange layer - OKX adapter
[UPDATE]: When OKX channel names, events or error codes change
*/

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::{ApiCredentials, HmacSigner};
use crate::error::{DexError, Result};
use crate::exchanges::protocol::{ExchangeProtocol, Route, unexpected};
use crate::types::{
    AccountUpdate, Balance, Candle, ChannelKind, ChannelSpec, Fill, OrderBook, OrderUpdate,
    Position, PriceLevel, Side, Ticker, Trade, datetime_from_millis, parse_decimal,
    parse_optional_decimal,
};

pub const OKX_PUBLIC_URL: &str = "wss://ws.okx.com:8443/ws/v5/public";
pub const OKX_PRIVATE_URL: &str = "wss://ws.okx.com:8443/ws/v5/private";
pub const OKX_BUSINESS_URL: &str = "wss://ws.okx.com:8443/ws/v5/business";
pub const OKX_SANDBOX_PUBLIC_URL: &str = "wss://wspap.okx.com:8443/ws/v5/public";
pub const OKX_SANDBOX_PRIVATE_URL: &str = "wss://wspap.okx.com:8443/ws/v5/private";
pub const OKX_SANDBOX_BUSINESS_URL: &str = "wss://wspap.okx.com:8443/ws/v5/business";

/// Error code OKX sends before a service upgrade disconnects the socket.
const RECONNECT_NOTICE_CODE: &str = "64008";

/// Instrument type filter for account channels that require one.
const ANY_INST_TYPE: &str = "ANY";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OkxArg {
    pub channel: String,
    #[serde(rename = "instType", default, skip_serializing_if = "Option::is_none")]
    pub inst_type: Option<String>,
    #[serde(rename = "instId", default, skip_serializing_if = "Option::is_none")]
    pub inst_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OkxEnvelope {
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub arg: Option<OkxArg>,
    /// `snapshot` or `update` on incremental book channels.
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(rename = "connId", default)]
    pub conn_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct OpRequest<A: Serialize> {
    op: &'static str,
    args: Vec<A>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginArg<'a> {
    api_key: &'a str,
    passphrase: &'a str,
    timestamp: String,
    sign: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OkxTrade {
    inst_id: String,
    trade_id: String,
    px: String,
    sz: String,
    side: String,
    ts: String,
}

#[derive(Debug, Deserialize)]
struct OkxBook {
    #[serde(default)]
    asks: Vec<Vec<String>>,
    #[serde(default)]
    bids: Vec<Vec<String>>,
    #[serde(default)]
    ts: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OkxTicker {
    inst_id: String,
    last: String,
    #[serde(default)]
    ask_px: String,
    #[serde(default)]
    ask_sz: String,
    #[serde(default)]
    bid_px: String,
    #[serde(default)]
    bid_sz: String,
    #[serde(default)]
    open24h: String,
    #[serde(default)]
    high24h: String,
    #[serde(default)]
    low24h: String,
    #[serde(default)]
    vol24h: String,
    ts: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OkxOrder {
    inst_id: String,
    ord_id: String,
    #[serde(default)]
    cl_ord_id: String,
    side: String,
    ord_type: String,
    state: String,
    #[serde(default)]
    px: String,
    sz: String,
    #[serde(default)]
    acc_fill_sz: String,
    #[serde(default)]
    avg_px: String,
    #[serde(default)]
    fill_px: String,
    #[serde(default)]
    fill_sz: String,
    #[serde(default)]
    fee: String,
    #[serde(default)]
    u_time: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OkxFill {
    inst_id: String,
    trade_id: String,
    ord_id: String,
    #[serde(default)]
    cl_ord_id: String,
    side: String,
    fill_px: String,
    fill_sz: String,
    ts: String,
}

/// Shared by the `positions` channel and `posData` of `balance_and_position`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OkxPosition {
    inst_id: String,
    pos_id: String,
    #[serde(default)]
    pos_side: String,
    #[serde(default)]
    mgn_mode: String,
    #[serde(default)]
    pos: String,
    #[serde(default)]
    avg_px: String,
    #[serde(default)]
    upl: String,
    #[serde(default)]
    u_time: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OkxBalance {
    ccy: String,
    cash_bal: String,
    #[serde(default)]
    u_time: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OkxAccount {
    #[serde(default)]
    p_time: String,
    #[serde(default)]
    event_type: String,
    #[serde(default)]
    bal_data: Vec<OkxBalance>,
    #[serde(default)]
    pos_data: Vec<OkxPosition>,
}

/// Which OKX endpoint to talk to. Each serves its own set of channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OkxEndpoint {
    #[default]
    Public,
    /// Logged-in account channels.
    Private,
    /// Candlesticks.
    Business,
}

impl OkxEndpoint {
    /// Endpoint that serves `kind`.
    pub fn for_kind(kind: ChannelKind) -> Self {
        match kind {
            ChannelKind::Candles => OkxEndpoint::Business,
            kind if kind.is_private() => OkxEndpoint::Private,
            _ => OkxEndpoint::Public,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OkxProtocol {
    endpoint: OkxEndpoint,
    sandbox: bool,
}

impl OkxProtocol {
    pub fn public() -> Self {
        Self::default()
    }

    pub fn private() -> Self {
        Self::default().with_endpoint(OkxEndpoint::Private)
    }

    pub fn business() -> Self {
        Self::default().with_endpoint(OkxEndpoint::Business)
    }

    pub fn endpoint(&self) -> OkxEndpoint {
        self.endpoint
    }

    pub fn with_endpoint(mut self, endpoint: OkxEndpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Use the demo-trading environment.
    pub fn sandbox(mut self, enabled: bool) -> Self {
        self.sandbox = enabled;
        self
    }

    fn channel_arg(channel: &ChannelSpec) -> OkxArg {
        let name = match channel.kind {
            ChannelKind::Trades => "trades".to_string(),
            ChannelKind::Book => {
                let name = match channel.depth {
                    Some(1) => "bbo-tbt",
                    Some(5) => "books5",
                    _ => "books",
                };
                name.to_string()
            }
            ChannelKind::Ticker => "tickers".to_string(),
            ChannelKind::Candles => format!("candle{}", channel.candle_interval()),
            other => other.to_string(),
        };
        let inst_type = matches!(channel.kind, ChannelKind::Orders | ChannelKind::Positions)
            .then(|| ANY_INST_TYPE.to_string());
        OkxArg {
            channel: name,
            inst_type,
            inst_id: (!channel.symbol.is_empty()).then(|| channel.symbol.clone()),
        }
    }

    fn op(&self, op: &'static str, channel: &ChannelSpec) -> Result<Vec<u8>> {
        if !self.supports(channel.kind) {
            return Err(DexError::unsupported(self.name(), channel.kind));
        }
        Ok(serde_json::to_vec(&OpRequest {
            op,
            args: vec![Self::channel_arg(channel)],
        })?)
    }
}

fn arg_key(arg: &OkxArg) -> String {
    match &arg.inst_id {
        Some(inst_id) => format!("{}:{inst_id}", arg.channel),
        None => arg.channel.clone(),
    }
}

fn levels(raw: &[Vec<String>]) -> Result<Vec<PriceLevel>> {
    raw.iter()
        .map(|level| match level.as_slice() {
            [price, size, ..] => PriceLevel::parse(price, size),
            _ => Err(DexError::InvalidFrame("okx: short book level".to_string())),
        })
        .collect()
}

fn parse_millis(ts: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    ts.parse::<i64>().ok().and_then(datetime_from_millis)
}

fn data<'a>(envelope: &'a OkxEnvelope, expected: &str) -> Result<&'a Value> {
    envelope
        .data
        .as_ref()
        .ok_or_else(|| unexpected("okx", expected))
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

fn top_level(price: &str, size: &str) -> Result<Option<PriceLevel>> {
    if price.is_empty() {
        return Ok(None);
    }
    PriceLevel::parse(price, if size.is_empty() { "0" } else { size }).map(Some)
}

fn position(exchange: &str, raw: OkxPosition) -> Result<Position> {
    Ok(Position {
        exchange: exchange.to_string(),
        size: parse_optional_decimal(&raw.pos)?.unwrap_or_default(),
        avg_price: parse_optional_decimal(&raw.avg_px)?,
        unrealized_pnl: parse_optional_decimal(&raw.upl)?,
        timestamp: parse_millis(&raw.u_time),
        symbol: raw.inst_id,
        position_id: raw.pos_id,
        position_side: raw.pos_side,
        margin_mode: raw.mgn_mode,
    })
}

impl ExchangeProtocol for OkxProtocol {
    type Envelope = OkxEnvelope;

    fn name(&self) -> &'static str {
        "okx"
    }

    fn default_url(&self) -> &str {
        match (self.endpoint, self.sandbox) {
            (OkxEndpoint::Public, false) => OKX_PUBLIC_URL,
            (OkxEndpoint::Private, false) => OKX_PRIVATE_URL,
            (OkxEndpoint::Business, false) => OKX_BUSINESS_URL,
            (OkxEndpoint::Public, true) => OKX_SANDBOX_PUBLIC_URL,
            (OkxEndpoint::Private, true) => OKX_SANDBOX_PRIVATE_URL,
            (OkxEndpoint::Business, true) => OKX_SANDBOX_BUSINESS_URL,
        }
    }

    fn supports(&self, kind: ChannelKind) -> bool {
        OkxEndpoint::for_kind(kind) == self.endpoint
    }

    fn route(&self, envelope: &OkxEnvelope) -> Route {
        let code = envelope.code.as_deref().unwrap_or_default();
        let msg = envelope.msg.clone().unwrap_or_default();

        match envelope.event.as_deref() {
            Some("login") => {
                if code == "0" {
                    Route::LoginAck(Ok(()))
                } else {
                    Route::LoginAck(Err(DexError::auth(format!("code {code}: {msg}"))))
                }
            }
            Some("error") if code == RECONNECT_NOTICE_CODE => Route::Reconnect(msg),
            Some("error") => Route::Error(DexError::exchange(code, msg)),
            Some("notice") => Route::Reconnect(if msg.is_empty() {
                "exchange notice".to_string()
            } else {
                msg
            }),
            Some("subscribe") | Some("unsubscribe") => Route::Ack,
            Some(_) => Route::Ignore,
            None => match (&envelope.arg, &envelope.data) {
                (Some(arg), Some(_)) => Route::Channel(arg_key(arg)),
                _ => Route::Ignore,
            },
        }
    }

    /// `<channel>:<instId>`, e.g. `books5:BTC-USDT`, or the bare channel
    /// for account channels without an instrument filter.
    fn channel_key(&self, channel: &ChannelSpec) -> String {
        arg_key(&Self::channel_arg(channel))
    }

    fn subscribe_request(&self, channel: &ChannelSpec) -> Result<Vec<u8>> {
        self.op("subscribe", channel)
    }

    fn unsubscribe_request(&self, channel: &ChannelSpec) -> Result<Vec<u8>> {
        self.op("unsubscribe", channel)
    }

    fn login_request(&self, credentials: &ApiCredentials) -> Result<Option<Vec<u8>>> {
        if !credentials.is_complete() {
            return Err(DexError::auth("okx login requires api key and secret"));
        }
        let timestamp = HmacSigner::timestamp_secs();
        let sign = HmacSigner::new(credentials.secret_key.as_str()).sign_okx_login(&timestamp)?;
        let request = OpRequest {
            op: "login",
            args: vec![LoginArg {
                api_key: &credentials.api_key,
                passphrase: &credentials.passphrase,
                timestamp,
                sign,
            }],
        };
        Ok(Some(serde_json::to_vec(&request)?))
    }

    fn decode_trades(&self, envelope: &OkxEnvelope) -> Result<Vec<Trade>> {
        let trades = Vec::<OkxTrade>::deserialize(data(envelope, "trades")?)?;
        trades
            .into_iter()
            .map(|trade| {
                Ok(Trade {
                    exchange: self.name().to_string(),
                    price: parse_decimal(&trade.px)?,
                    size: parse_decimal(&trade.sz)?,
                    side: Side::parse(&trade.side),
                    timestamp: parse_millis(&trade.ts),
                    symbol: trade.inst_id,
                    trade_id: trade.trade_id,
                })
            })
            .collect()
    }

    fn decode_book(&self, envelope: &OkxEnvelope) -> Result<OrderBook> {
        let (Some(arg), Some(data)) = (&envelope.arg, &envelope.data) else {
            return Err(unexpected(self.name(), "book"));
        };
        let books = Vec::<OkxBook>::deserialize(data)?;
        let book = books
            .into_iter()
            .next()
            .ok_or_else(|| unexpected(self.name(), "book"))?;

        Ok(OrderBook {
            exchange: self.name().to_string(),
            symbol: arg.inst_id.clone().unwrap_or_default(),
            bids: levels(&book.bids)?,
            asks: levels(&book.asks)?,
            is_snapshot: envelope.action.as_deref() != Some("update"),
            timestamp: book.ts.as_deref().and_then(parse_millis),
        })
    }

    fn decode_tickers(&self, envelope: &OkxEnvelope) -> Result<Vec<Ticker>> {
        Vec::<OkxTicker>::deserialize(data(envelope, "tickers")?)?
            .into_iter()
            .map(|ticker| {
                Ok(Ticker {
                    exchange: self.name().to_string(),
                    last: parse_decimal(&ticker.last)?,
                    best_bid: top_level(&ticker.bid_px, &ticker.bid_sz)?,
                    best_ask: top_level(&ticker.ask_px, &ticker.ask_sz)?,
                    open_24h: parse_optional_decimal(&ticker.open24h)?,
                    high_24h: parse_optional_decimal(&ticker.high24h)?,
                    low_24h: parse_optional_decimal(&ticker.low24h)?,
                    volume_24h: parse_optional_decimal(&ticker.vol24h)?,
                    timestamp: parse_millis(&ticker.ts),
                    symbol: ticker.inst_id,
                })
            })
            .collect()
    }

    /// Rows are `[ts, o, h, l, c, vol, volCcy, volCcyQuote, confirm]`.
    fn decode_candles(&self, envelope: &OkxEnvelope) -> Result<Vec<Candle>> {
        let arg = envelope
            .arg
            .as_ref()
            .ok_or_else(|| unexpected(self.name(), "candle"))?;
        let interval = arg
            .channel
            .strip_prefix("candle")
            .ok_or_else(|| unexpected(self.name(), "candle"))?;
        let symbol = arg.inst_id.clone().unwrap_or_default();

        Vec::<Vec<String>>::deserialize(data(envelope, "candle")?)?
            .iter()
            .map(|row| match row.as_slice() {
                [ts, open, high, low, close, volume, rest @ ..] => Ok(Candle {
                    exchange: self.name().to_string(),
                    symbol: symbol.clone(),
                    interval: interval.to_string(),
                    open_time: parse_millis(ts),
                    open: parse_decimal(open)?,
                    high: parse_decimal(high)?,
                    low: parse_decimal(low)?,
                    close: parse_decimal(close)?,
                    volume: parse_decimal(volume)?,
                    closed: rest.last().is_some_and(|confirm| confirm == "1"),
                }),
                _ => Err(DexError::InvalidFrame("okx: short candle row".to_string())),
            })
            .collect()
    }

    fn decode_orders(&self, envelope: &OkxEnvelope) -> Result<Vec<OrderUpdate>> {
        Vec::<OkxOrder>::deserialize(data(envelope, "orders")?)?
            .into_iter()
            .map(|order| {
                Ok(OrderUpdate {
                    exchange: self.name().to_string(),
                    side: Side::parse(&order.side),
                    price: parse_optional_decimal(&order.px)?,
                    size: parse_decimal(&order.sz)?,
                    filled_size: parse_optional_decimal(&order.acc_fill_sz)?.unwrap_or_default(),
                    avg_price: parse_optional_decimal(&order.avg_px)?,
                    last_fill_price: parse_optional_decimal(&order.fill_px)?,
                    last_fill_size: parse_optional_decimal(&order.fill_sz)?,
                    fee: parse_optional_decimal(&order.fee)?,
                    timestamp: parse_millis(&order.u_time),
                    symbol: order.inst_id,
                    order_id: order.ord_id,
                    client_order_id: non_empty(order.cl_ord_id),
                    order_type: order.ord_type,
                    state: order.state,
                })
            })
            .collect()
    }

    fn decode_fills(&self, envelope: &OkxEnvelope) -> Result<Vec<Fill>> {
        Vec::<OkxFill>::deserialize(data(envelope, "fills")?)?
            .into_iter()
            .map(|fill| {
                Ok(Fill {
                    exchange: self.name().to_string(),
                    side: Side::parse(&fill.side),
                    price: parse_decimal(&fill.fill_px)?,
                    size: parse_decimal(&fill.fill_sz)?,
                    timestamp: parse_millis(&fill.ts),
                    symbol: fill.inst_id,
                    trade_id: fill.trade_id,
                    order_id: fill.ord_id,
                    client_order_id: non_empty(fill.cl_ord_id),
                })
            })
            .collect()
    }

    fn decode_positions(&self, envelope: &OkxEnvelope) -> Result<Vec<Position>> {
        Vec::<OkxPosition>::deserialize(data(envelope, "positions")?)?
            .into_iter()
            .map(|raw| position(self.name(), raw))
            .collect()
    }

    fn decode_account(&self, envelope: &OkxEnvelope) -> Result<Vec<AccountUpdate>> {
        Vec::<OkxAccount>::deserialize(data(envelope, "balance_and_position")?)?
            .into_iter()
            .map(|account| {
                let balances = account
                    .bal_data
                    .into_iter()
                    .map(|balance| {
                        Ok(Balance {
                            cash_balance: parse_decimal(&balance.cash_bal)?,
                            timestamp: parse_millis(&balance.u_time),
                            currency: balance.ccy,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                let positions = account
                    .pos_data
                    .into_iter()
                    .map(|raw| position(self.name(), raw))
                    .collect::<Result<Vec<_>>>()?;
                Ok(AccountUpdate {
                    exchange: self.name().to_string(),
                    event_type: account.event_type,
                    balances,
                    positions,
                    timestamp: parse_millis(&account.p_time),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn envelope(raw: &str) -> OkxEnvelope {
        OkxProtocol::public().decode(raw.as_bytes()).unwrap()
    }

    #[rstest]
    #[case(r#"{"event":"login","code":"0","msg":"","connId":"a4d3ae55"}"#, "login-ok")]
    #[case(r#"{"event":"login","code":"60009","msg":"Login failed."}"#, "login-err")]
    #[case(r#"{"event":"error","code":"60012","msg":"Invalid request"}"#, "error")]
    #[case(r#"{"event":"error","code":"64008","msg":"The connection will soon be closed"}"#, "reconnect")]
    #[case(r#"{"event":"notice","code":"64008","msg":"service upgrade"}"#, "reconnect")]
    #[case(r#"{"event":"subscribe","arg":{"channel":"trades","instId":"BTC-USDT"},"connId":"x"}"#, "ack")]
    #[case(r#"{"event":"channel-conn-count","channel":"orders","connCount":"2","connId":"x"}"#, "ignore")]
    #[case(r#"{"arg":{"channel":"trades","instId":"BTC-USDT"},"data":[]}"#, "channel")]
    fn test_route(#[case] raw: &str, #[case] expected: &str) {
        let route = OkxProtocol::public().route(&envelope(raw));
        let actual = match route {
            Route::LoginAck(Ok(())) => "login-ok",
            Route::LoginAck(Err(_)) => "login-err",
            Route::Error(_) => "error",
            Route::Reconnect(_) => "reconnect",
            Route::Ack => "ack",
            Route::Ignore => "ignore",
            Route::Channel(key) => {
                assert_eq!(key, "trades:BTC-USDT");
                "channel"
            }
        };
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_channel_keys_and_requests() {
        let protocol = OkxProtocol::public();
        assert_eq!(
            protocol.channel_key(&ChannelSpec::book("BTC-USDT", Some(5))),
            "books5:BTC-USDT"
        );
        assert_eq!(
            protocol.channel_key(&ChannelSpec::book("BTC-USDT", None)),
            "books:BTC-USDT"
        );

        let request = protocol
            .unsubscribe_request(&ChannelSpec::trades("ETH-USDT"))
            .unwrap();
        let value: Value = serde_json::from_slice(&request).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"op": "unsubscribe", "args": [{"channel": "trades", "instId": "ETH-USDT"}]})
        );
    }

    #[test]
    fn test_login_request() {
        let creds = ApiCredentials::new("key", "secret", "pass");
        let request = OkxProtocol::private().login_request(&creds).unwrap().unwrap();
        let value: Value = serde_json::from_slice(&request).unwrap();
        assert_eq!(value["op"], "login");
        assert_eq!(value["args"][0]["apiKey"], "key");
        assert_eq!(value["args"][0]["passphrase"], "pass");
        assert!(value["args"][0]["sign"].as_str().unwrap().ends_with('='));

        let incomplete = ApiCredentials::new("key", "", "");
        assert!(OkxProtocol::private().login_request(&incomplete).is_err());
    }

    #[test]
    fn test_sandbox_url() {
        assert_eq!(OkxProtocol::public().sandbox(true).default_url(), OKX_SANDBOX_PUBLIC_URL);
        assert_eq!(OkxProtocol::private().default_url(), OKX_PRIVATE_URL);
    }

    #[test]
    fn test_decode_trades_and_books() {
        let protocol = OkxProtocol::public();
        let raw = r#"{"arg":{"channel":"trades","instId":"BTC-USDT"},"data":[{"instId":"BTC-USDT","tradeId":"130639474","px":"42219.9","sz":"0.12060306","side":"buy","ts":"1630048897897","count":"3"}]}"#;
        let trades = protocol.decode_trades(&envelope(raw)).unwrap();
        assert_eq!(trades[0].trade_id, "130639474");
        assert_eq!(trades[0].side, Some(Side::Buy));
        assert_eq!(trades[0].timestamp.unwrap().timestamp_millis(), 1_630_048_897_897);

        let raw = r#"{"arg":{"channel":"books","instId":"BTC-USDT"},"action":"update","data":[{"asks":[["8476.98","415","0","13"]],"bids":[["8476.97","256","0","12"]],"ts":"1597026383085","checksum":-855196043}]}"#;
        let book = protocol.decode_book(&envelope(raw)).unwrap();
        assert!(!book.is_snapshot);
        assert_eq!(book.symbol, "BTC-USDT");
        assert_eq!(book.best_ask().unwrap().price.to_string(), "8476.98");
        assert_eq!(book.best_bid().unwrap().size.to_string(), "256");
    }

    #[rstest]
    #[case(ChannelKind::Trades, OkxEndpoint::Public)]
    #[case(ChannelKind::Ticker, OkxEndpoint::Public)]
    #[case(ChannelKind::Candles, OkxEndpoint::Business)]
    #[case(ChannelKind::Orders, OkxEndpoint::Private)]
    #[case(ChannelKind::BalanceAndPosition, OkxEndpoint::Private)]
    fn test_endpoint_for_kind(#[case] kind: ChannelKind, #[case] endpoint: OkxEndpoint) {
        assert_eq!(OkxEndpoint::for_kind(kind), endpoint);
        let protocol = OkxProtocol::public().with_endpoint(endpoint);
        assert!(protocol.supports(kind));
    }

    #[test]
    fn test_channels_refused_on_wrong_endpoint() {
        assert!(matches!(
            OkxProtocol::public().subscribe_request(&ChannelSpec::candles("BTC-USDT", "1m")),
            Err(DexError::Unsupported { .. })
        ));
        assert!(matches!(
            OkxProtocol::private().subscribe_request(&ChannelSpec::trades("BTC-USDT")),
            Err(DexError::Unsupported { .. })
        ));
        assert!(matches!(
            OkxProtocol::public().subscribe_request(&ChannelSpec::account(ChannelKind::Orders, None)),
            Err(DexError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_business_urls() {
        assert_eq!(OkxProtocol::business().default_url(), OKX_BUSINESS_URL);
        assert_eq!(OkxProtocol::business().sandbox(true).default_url(), OKX_SANDBOX_BUSINESS_URL);
    }

    #[test]
    fn test_account_channel_requests() {
        let protocol = OkxProtocol::private();
        let orders = ChannelSpec::account(ChannelKind::Orders, None);
        assert_eq!(protocol.channel_key(&orders), "orders");
        let value: Value = serde_json::from_slice(&protocol.subscribe_request(&orders).unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"op": "subscribe", "args": [{"channel": "orders", "instType": "ANY"}]})
        );

        let positions = ChannelSpec::account(ChannelKind::Positions, Some("BTC-USDT-SWAP"));
        assert_eq!(protocol.channel_key(&positions), "positions:BTC-USDT-SWAP");
        let value: Value = serde_json::from_slice(&protocol.subscribe_request(&positions).unwrap()).unwrap();
        assert_eq!(value["args"][0]["instType"], "ANY");
        assert_eq!(value["args"][0]["instId"], "BTC-USDT-SWAP");

        let account = ChannelSpec::account(ChannelKind::BalanceAndPosition, None);
        let value: Value = serde_json::from_slice(&protocol.unsubscribe_request(&account).unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"op": "unsubscribe", "args": [{"channel": "balance_and_position"}]})
        );

        // Pushes carry extra arg fields; the key only uses channel and instId.
        let push = envelope(r#"{"arg":{"channel":"orders","instType":"ANY","uid":"77982378738415879"},"data":[]}"#);
        assert!(matches!(protocol.route(&push), Route::Channel(key) if key == "orders"));
    }

    #[test]
    fn test_decode_ticker_and_candles() {
        let protocol = OkxProtocol::public();
        let raw = r#"{"arg":{"channel":"tickers","instId":"BTC-USDT"},"data":[{"instType":"SPOT","instId":"BTC-USDT","last":"9999.99","lastSz":"0.1","askPx":"9999.99","askSz":"11","bidPx":"8888.88","bidSz":"5","open24h":"9000","high24h":"10000","low24h":"8888.88","volCcy24h":"2222","vol24h":"2222","sodUtc0":"2222","sodUtc8":"2222","ts":"1597026383085"}]}"#;
        let parsed = envelope(raw);
        assert!(matches!(protocol.route(&parsed), Route::Channel(key) if key == "tickers:BTC-USDT"));
        let ticker = &protocol.decode_tickers(&parsed).unwrap()[0];
        assert_eq!(ticker.last.to_string(), "9999.99");
        assert_eq!(ticker.best_bid.unwrap().price.to_string(), "8888.88");
        assert_eq!(ticker.open_24h.unwrap().to_string(), "9000");
        assert_eq!(ticker.timestamp.unwrap().timestamp_millis(), 1_597_026_383_085);

        let business = OkxProtocol::business();
        let spec = ChannelSpec::candles("BTC-USDT", "1H");
        assert_eq!(business.channel_key(&spec), "candle1H:BTC-USDT");
        let raw = r#"{"arg":{"channel":"candle1H","instId":"BTC-USDT"},"data":[["1597026383085","8533.02","8553.74","8527.17","8548.26","45247","529.5858061","529.58580610","0"],["1597022783085","8520","8540","8510","8533.02","100","1","1","1"]]}"#;
        let parsed = envelope(raw);
        assert!(matches!(business.route(&parsed), Route::Channel(key) if key == "candle1H:BTC-USDT"));
        let candles = business.decode_candles(&parsed).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].interval, "1H");
        assert_eq!(candles[0].symbol, "BTC-USDT");
        assert_eq!(candles[0].close.to_string(), "8548.26");
        assert!(!candles[0].closed);
        assert!(candles[1].closed);

        let short = envelope(r#"{"arg":{"channel":"candle1m","instId":"BTC-USDT"},"data":[["1597026383085","1"]]}"#);
        assert!(matches!(business.decode_candles(&short), Err(DexError::InvalidFrame(_))));
    }

    #[test]
    fn test_decode_orders_and_fills() {
        let protocol = OkxProtocol::private();
        let raw = r#"{"arg":{"channel":"orders","instType":"ANY","uid":"614488474791936"},"data":[{"instType":"SPOT","instId":"BTC-USDT","ordId":"452197707845865472","clOrdId":"","px":"","sz":"100","ordType":"market","side":"buy","posSide":"","tdMode":"cash","accFillSz":"0.00192834","fillPx":"51858","fillSz":"0.00192834","avgPx":"51858","state":"filled","fee":"-0.00000192834","feeCcy":"BTC","uTime":"1654084353264","cTime":"1654084353263"}]}"#;
        let orders = protocol.decode_orders(&envelope(raw)).unwrap();
        let order = &orders[0];
        assert_eq!(order.order_id, "452197707845865472");
        assert_eq!(order.client_order_id, None);
        assert_eq!(order.side, Some(Side::Buy));
        assert_eq!(order.price, None);
        assert_eq!(order.filled_size.to_string(), "0.00192834");
        assert_eq!(order.fee.unwrap().to_string(), "-0.00000192834");
        assert_eq!(order.state, "filled");

        let raw = r#"{"arg":{"channel":"fills","uid":"614488474791936"},"data":[{"instId":"BTC-USDT-SWAP","fillSz":"100","fillPx":"70000","side":"buy","ts":"1705449605015","ordId":"680800019749904384","clOrdId":"mm-1","tradeId":"12345","execType":"T","count":"10"}]}"#;
        let fill = &protocol.decode_fills(&envelope(raw)).unwrap()[0];
        assert_eq!(fill.trade_id, "12345");
        assert_eq!(fill.client_order_id.as_deref(), Some("mm-1"));
        assert_eq!(fill.price.to_string(), "70000");
    }

    #[test]
    fn test_decode_positions_and_account() {
        let protocol = OkxProtocol::private();
        let raw = r#"{"arg":{"channel":"positions","instType":"ANY","uid":"77982378738415879"},"data":[{"instId":"BTC-USDT-SWAP","instType":"SWAP","mgnMode":"cross","posId":"307173036051017730","posSide":"long","pos":"10","avgPx":"61000.5","upl":"-12.3","lever":"10","uTime":"1614859751636"}]}"#;
        let position = &protocol.decode_positions(&envelope(raw)).unwrap()[0];
        assert_eq!(position.position_side, "long");
        assert_eq!(position.size.to_string(), "10");
        assert_eq!(position.unrealized_pnl.unwrap().to_string(), "-12.3");

        let raw = r#"{"arg":{"channel":"balance_and_position","uid":"77982378738415879"},"data":[{"pTime":"1597026383085","eventType":"snapshot","balData":[{"ccy":"BTC","cashBal":"1","uTime":"1597026383085"}],"posData":[{"posId":"1111111111","tradeId":"2","instId":"BTC-USD-191018","instType":"FUTURES","mgnMode":"cross","posSide":"long","pos":"10","ccy":"BTC","posCcy":"","avgPx":"3320","uTime":"1597026383085"}],"trades":[]}]}"#;
        let parsed = envelope(raw);
        assert!(matches!(protocol.route(&parsed), Route::Channel(key) if key == "balance_and_position"));
        let update = &protocol.decode_account(&parsed).unwrap()[0];
        assert_eq!(update.event_type, "snapshot");
        assert_eq!(update.balances[0].currency, "BTC");
        assert_eq!(update.balances[0].cash_balance.to_string(), "1");
        assert_eq!(update.positions[0].avg_price.unwrap().to_string(), "3320");
        assert_eq!(update.positions[0].unrealized_pnl, None);
    }
}
