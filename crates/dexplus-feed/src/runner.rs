/*
[INPUT]:  FeedConfig streams, CancellationToken
[OUTPUT]: One running ExchangeClient per stream with logged payloads and bounded shutdown
[POS]:    Execution layer - feed orchestration
[UPDATE]: When changing startup/shutdown guarantees or payload handling
*/

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use dexplus_adapter::{
    BinanceProtocol, BitstampProtocol, Candle, CoinbaseProtocol, ExchangeClient,
    ExchangeProtocol, KrakenProtocol, OkxProtocol, OrderBook, Payload, Ticker, Trade,
};
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ExchangeKind, FeedConfig, StreamConfig};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Payload counters for one stream.
#[derive(Debug, Default)]
pub struct FeedStats {
    trades: AtomicU64,
    books: AtomicU64,
    tickers: AtomicU64,
    candles: AtomicU64,
    /// Orders, fills, positions and balance pushes.
    account_events: AtomicU64,
    errors: AtomicU64,
}

impl FeedStats {
    pub fn trades(&self) -> u64 {
        self.trades.load(Ordering::Relaxed)
    }

    pub fn books(&self) -> u64 {
        self.books.load(Ordering::Relaxed)
    }

    pub fn tickers(&self) -> u64 {
        self.tickers.load(Ordering::Relaxed)
    }

    pub fn candles(&self) -> u64 {
        self.candles.load(Ordering::Relaxed)
    }

    pub fn account_events(&self) -> u64 {
        self.account_events.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Count and log one decoded payload.
    pub fn record_payload(&self, stream: &str, payload: &Payload) {
        match payload {
            Payload::Trades(trades) => {
                trades.iter().for_each(|trade| self.record_trade(stream, trade))
            }
            Payload::Book(book) => self.record_book(stream, book),
            Payload::Tickers(tickers) => {
                tickers.iter().for_each(|ticker| self.record_ticker(stream, ticker))
            }
            Payload::Candles(candles) => {
                candles.iter().for_each(|candle| self.record_candle(stream, candle))
            }
            Payload::Orders(orders) => {
                for order in orders {
                    let count = self.account_events.fetch_add(1, Ordering::Relaxed) + 1;
                    info!(
                        stream,
                        symbol = %order.symbol,
                        order_id = %order.order_id,
                        state = %order.state,
                        filled = %order.filled_size,
                        size = %order.size,
                        count,
                        "order"
                    );
                }
            }
            Payload::Fills(fills) => {
                for fill in fills {
                    let count = self.account_events.fetch_add(1, Ordering::Relaxed) + 1;
                    info!(
                        stream,
                        symbol = %fill.symbol,
                        order_id = %fill.order_id,
                        price = %fill.price,
                        size = %fill.size,
                        side = ?fill.side,
                        count,
                        "fill"
                    );
                }
            }
            Payload::Positions(positions) => {
                for position in positions {
                    let count = self.account_events.fetch_add(1, Ordering::Relaxed) + 1;
                    info!(
                        stream,
                        symbol = %position.symbol,
                        side = %position.position_side,
                        size = %position.size,
                        upl = ?position.unrealized_pnl,
                        count,
                        "position"
                    );
                }
            }
            Payload::Account(updates) => {
                for update in updates {
                    let count = self.account_events.fetch_add(1, Ordering::Relaxed) + 1;
                    info!(
                        stream,
                        event_type = %update.event_type,
                        balances = update.balances.len(),
                        positions = update.positions.len(),
                        count,
                        "balance and position"
                    );
                }
            }
        }
    }

    pub fn record_trade(&self, stream: &str, trade: &Trade) {
        let count = self.trades.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            stream,
            exchange = %trade.exchange,
            symbol = %trade.symbol,
            price = %trade.price,
            size = %trade.size,
            side = ?trade.side,
            count,
            "trade"
        );
    }

    pub fn record_book(&self, stream: &str, book: &OrderBook) {
        let count = self.books.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            stream,
            exchange = %book.exchange,
            symbol = %book.symbol,
            snapshot = book.is_snapshot,
            bids = book.bids.len(),
            asks = book.asks.len(),
            spread = ?spread(book),
            count,
            "book"
        );
    }

    pub fn record_ticker(&self, stream: &str, ticker: &Ticker) {
        let count = self.tickers.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            stream,
            exchange = %ticker.exchange,
            symbol = %ticker.symbol,
            last = %ticker.last,
            bid = ?ticker.best_bid.map(|level| level.price),
            ask = ?ticker.best_ask.map(|level| level.price),
            count,
            "ticker"
        );
    }

    pub fn record_candle(&self, stream: &str, candle: &Candle) {
        let count = self.candles.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            stream,
            exchange = %candle.exchange,
            symbol = %candle.symbol,
            interval = %candle.interval,
            close = %candle.close,
            closed = candle.closed,
            count,
            "candle"
        );
    }

    fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }
}

/// Top-of-book spread. Only meaningful for snapshots.
pub fn spread(book: &OrderBook) -> Option<Decimal> {
    if !book.is_snapshot {
        return None;
    }
    Some(book.best_ask()?.price - book.best_bid()?.price)
}

/// Type-erased running client.
trait RunningFeed: Send + Sync {
    fn close(&self) -> BoxFuture<'_, ()>;
    fn wait_terminated(&self, timeout: Duration) -> BoxFuture<'_, bool>;
}

impl<P: ExchangeProtocol> RunningFeed for ExchangeClient<P> {
    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(ExchangeClient::close(self))
    }

    fn wait_terminated(&self, timeout: Duration) -> BoxFuture<'_, bool> {
        Box::pin(ExchangeClient::wait_terminated(self, timeout))
    }
}

struct ManagedFeed {
    id: String,
    exchange: ExchangeKind,
    client: Box<dyn RunningFeed>,
    stats: Arc<FeedStats>,
}

/// Runs every configured stream until shutdown.
pub struct FeedRunner {
    session_id: Uuid,
    feeds: Vec<ManagedFeed>,
    shutdown: CancellationToken,
}

impl Default for FeedRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedRunner {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            feeds: Vec::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Token the caller cancels to request shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn stream_ids(&self) -> Vec<String> {
        self.feeds.iter().map(|feed| feed.id.clone()).collect()
    }

    pub fn stats(&self, stream_id: &str) -> Option<Arc<FeedStats>> {
        self.feeds
            .iter()
            .find(|feed| feed.id == stream_id)
            .map(|feed| feed.stats.clone())
    }

    /// Build, subscribe and start one client per stream. Must run inside a tokio runtime.
    pub fn start(&mut self, config: &FeedConfig) -> Result<()> {
        for stream in &config.streams {
            if self.feeds.iter().any(|feed| feed.id == stream.id) {
                bail!("stream '{}' already running", stream.id);
            }
            let stats = Arc::new(FeedStats::default());
            let client = start_stream(stream, stats.clone())
                .with_context(|| format!("start stream '{}'", stream.id))?;
            info!(
                session_id = %self.session_id,
                stream = %stream.id,
                exchange = %stream.exchange,
                channels = stream.channels.len(),
                "stream started"
            );
            self.feeds.push(ManagedFeed {
                id: stream.id.clone(),
                exchange: stream.exchange,
                client,
                stats,
            });
        }
        Ok(())
    }

    /// Wait for the shutdown token, then close every stream.
    pub async fn run_until_shutdown(&mut self) -> Result<()> {
        self.shutdown.cancelled().await;
        info!(session_id = %self.session_id, "shutdown requested");
        self.shutdown_and_wait().await
    }

    /// Close every stream (unsubscribe, close frame) and wait for its tasks.
    pub async fn shutdown_and_wait(&mut self) -> Result<()> {
        self.shutdown.cancel();
        let mut stuck = Vec::new();

        for feed in self.feeds.drain(..) {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, feed.client.close())
                .await
                .is_err()
            {
                warn!(stream = %feed.id, "close timed out");
            }
            if !feed.client.wait_terminated(SHUTDOWN_TIMEOUT).await {
                stuck.push(feed.id.clone());
            }
            info!(
                stream = %feed.id,
                exchange = %feed.exchange,
                trades = feed.stats.trades(),
                books = feed.stats.books(),
                tickers = feed.stats.tickers(),
                candles = feed.stats.candles(),
                account_events = feed.stats.account_events(),
                errors = feed.stats.errors(),
                "stream stopped"
            );
        }

        if !stuck.is_empty() {
            bail!(
                "streams did not terminate within {SHUTDOWN_TIMEOUT:?}: {}",
                stuck.join(", ")
            );
        }
        Ok(())
    }
}

fn start_stream(stream: &StreamConfig, stats: Arc<FeedStats>) -> Result<Box<dyn RunningFeed>> {
    match stream.exchange {
        ExchangeKind::Binance if stream.sandbox => launch(BinanceProtocol::testnet(), stream, stats),
        ExchangeKind::Binance => launch(BinanceProtocol::new(), stream, stats),
        ExchangeKind::Bitstamp => launch(BitstampProtocol::new(), stream, stats),
        ExchangeKind::Coinbase if stream.sandbox => {
            launch(CoinbaseProtocol::sandbox(), stream, stats)
        }
        ExchangeKind::Coinbase => launch(CoinbaseProtocol::new(), stream, stats),
        ExchangeKind::Kraken => launch(KrakenProtocol::new(), stream, stats),
        ExchangeKind::Okx => launch(okx_protocol(stream), stream, stats),
    }
}

/// Account channels log in on the private endpoint, candles use the business one.
fn okx_protocol(stream: &StreamConfig) -> OkxProtocol {
    OkxProtocol::public()
        .with_endpoint(stream.okx_endpoint())
        .sandbox(stream.sandbox)
}

fn launch<P: ExchangeProtocol>(
    protocol: P,
    stream: &StreamConfig,
    stats: Arc<FeedStats>,
) -> Result<Box<dyn RunningFeed>> {
    let client = ExchangeClient::with_config(protocol, stream.ws.clone(), stream.credentials.clone())
        .context("build exchange client")?;

    {
        let stats = stats.clone();
        let id = stream.id.clone();
        client.on_error(move |err| {
            stats.record_error();
            warn!(stream = %id, error = %err, "feed error");
        });
    }

    for channel in &stream.channels {
        let spec = channel.spec();
        let stats = stats.clone();
        let id = stream.id.clone();
        client
            .subscribe_payload(&spec, move |payload| {
                stats.record_payload(&id, &payload);
                Ok(())
            })
            .with_context(|| format!("subscribe {} {}", spec.kind, spec.symbol))?;
    }

    client.start();
    Ok(Box::new(client))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dexplus_adapter::{OrderUpdate, PriceLevel};
    use rust_decimal::Decimal;

    fn book(is_snapshot: bool) -> OrderBook {
        OrderBook {
            exchange: "kraken".to_string(),
            symbol: "BTC/USD".to_string(),
            bids: vec![PriceLevel::parse("100.5", "1").unwrap()],
            asks: vec![PriceLevel::parse("101.25", "2").unwrap()],
            is_snapshot,
            timestamp: None,
        }
    }

    #[test]
    fn test_spread_only_for_snapshots() {
        assert_eq!(spread(&book(true)).unwrap().to_string(), "0.75");
        assert_eq!(spread(&book(false)), None);
    }

    #[test]
    fn test_stats_counters() {
        let stats = FeedStats::default();
        stats.record_book("s", &book(true));
        stats.record_book("s", &book(false));
        stats.record_error();
        assert_eq!(stats.books(), 2);
        assert_eq!(stats.trades(), 0);
        assert_eq!(stats.errors(), 1);
    }

    #[test]
    fn test_record_payload_counts_each_item() {
        let stats = FeedStats::default();
        let order = OrderUpdate {
            exchange: "okx".to_string(),
            symbol: "BTC-USDT".to_string(),
            order_id: "1".to_string(),
            client_order_id: None,
            side: None,
            order_type: "limit".to_string(),
            state: "live".to_string(),
            price: Some(Decimal::ONE),
            size: Decimal::TEN,
            filled_size: Decimal::ZERO,
            avg_price: None,
            last_fill_price: None,
            last_fill_size: None,
            fee: None,
            timestamp: None,
        };
        stats.record_payload("s", &Payload::Orders(vec![order.clone(), order]));
        stats.record_payload("s", &Payload::Book(book(true)));
        stats.record_payload("s", &Payload::Candles(Vec::new()));
        assert_eq!(stats.account_events(), 2);
        assert_eq!(stats.books(), 1);
        assert_eq!(stats.candles(), 0);
    }

    #[test]
    fn test_okx_endpoint_follows_channels() {
        let config = FeedConfig::from_yaml(
            r#"
streams:
  - id: account
    exchange: okx
    sandbox: true
    credentials: {api_key: key, secret_key: secret, passphrase: pass}
    channels: [{kind: fills}]
  - id: candles
    exchange: okx
    channels: [{kind: candles, symbol: ETH-USDT}]
  - id: market
    exchange: okx
    channels: [{kind: ticker, symbol: ETH-USDT}]
"#,
        )
        .unwrap();
        let urls: Vec<String> = config
            .streams
            .iter()
            .map(|stream| okx_protocol(stream).default_url().to_string())
            .collect();
        assert_eq!(
            urls,
            [
                "wss://wspap.okx.com:8443/ws/v5/private",
                "wss://ws.okx.com:8443/ws/v5/business",
                "wss://ws.okx.com:8443/ws/v5/public",
            ]
        );
    }
}
