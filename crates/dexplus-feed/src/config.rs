/*
[INPUT]:  YAML configuration file
[OUTPUT]: Parsed and validated feed configuration
[POS]:    Configuration layer - stream setup
[UPDATE]: When adding new configuration options
*/

use std::collections::HashSet;

use anyhow::{Context, Result, bail};
use dexplus_adapter::ws::WsConfig;
use dexplus_adapter::{
    ApiCredentials, BinanceProtocol, BitstampProtocol, ChannelKind, ChannelSpec,
    CoinbaseProtocol, ExchangeProtocol, KrakenProtocol, OkxEndpoint,
};
use serde::{Deserialize, Serialize};

/// Top-level configuration for the feed runner
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedConfig {
    /// Exchange streams to run, one connection each
    pub streams: Vec<StreamConfig>,
}

/// Supported exchanges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    Binance,
    Bitstamp,
    Coinbase,
    Kraken,
    Okx,
}

impl std::fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ExchangeKind::Binance => "binance",
            ExchangeKind::Bitstamp => "bitstamp",
            ExchangeKind::Coinbase => "coinbase",
            ExchangeKind::Kraken => "kraken",
            ExchangeKind::Okx => "okx",
        };
        f.write_str(name)
    }
}

impl ExchangeKind {
    /// Whether any endpoint of this exchange serves `kind`.
    pub fn supports(&self, kind: ChannelKind) -> bool {
        match self {
            ExchangeKind::Binance => BinanceProtocol::new().supports(kind),
            ExchangeKind::Bitstamp => BitstampProtocol::new().supports(kind),
            ExchangeKind::Coinbase => CoinbaseProtocol::new().supports(kind),
            ExchangeKind::Kraken => KrakenProtocol::new().supports(kind),
            // Each kind maps to one of the public, private and business endpoints.
            ExchangeKind::Okx => true,
        }
    }
}

/// Configuration for one exchange connection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    /// Stream identifier used in logs
    pub id: String,
    pub exchange: ExchangeKind,
    /// Use the exchange's test environment where one exists
    #[serde(default)]
    pub sandbox: bool,
    pub channels: Vec<ChannelConfig>,
    /// Login credentials; turns on the auth gate. Only for account channels.
    #[serde(default)]
    pub credentials: Option<ApiCredentials>,
    /// Connection engine overrides
    #[serde(default)]
    pub ws: WsConfig,
}

/// One subscription
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelConfig {
    pub kind: ChannelKind,
    /// Exchange-native symbol (e.g. "BTCUSDT", "BTC-USD", "BTC/USD").
    /// Optional for account channels.
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub depth: Option<u16>,
    /// Candle interval in the exchange's notation (e.g. "1m", "1H")
    #[serde(default)]
    pub interval: Option<String>,
}

impl ChannelConfig {
    pub fn spec(&self) -> ChannelSpec {
        ChannelSpec {
            kind: self.kind,
            symbol: self.symbol.clone(),
            depth: self.depth,
            interval: self.interval.clone(),
        }
    }
}

impl StreamConfig {
    /// OKX endpoint serving this stream's channels.
    pub fn okx_endpoint(&self) -> OkxEndpoint {
        self.channels
            .first()
            .map(|channel| OkxEndpoint::for_kind(channel.kind))
            .unwrap_or_default()
    }

    fn has_account_channels(&self) -> bool {
        self.channels.iter().any(|channel| channel.kind.is_private())
    }

    fn validate_channels(&self) -> Result<()> {
        if self.channels.is_empty() {
            bail!("stream '{}' has no channels", self.id);
        }
        for channel in &self.channels {
            if channel.symbol.is_empty() && !channel.kind.is_private() {
                bail!("stream '{}' has a {} channel without symbol", self.id, channel.kind);
            }
            if !self.exchange.supports(channel.kind) {
                bail!("stream '{}': {} has no {} channel", self.id, self.exchange, channel.kind);
            }
        }

        if self.exchange == ExchangeKind::Okx {
            let endpoint = self.okx_endpoint();
            if let Some(channel) = self
                .channels
                .iter()
                .find(|channel| OkxEndpoint::for_kind(channel.kind) != endpoint)
            {
                bail!(
                    "stream '{}' mixes okx endpoints: {} channels need their own stream",
                    self.id,
                    channel.kind
                );
            }
        }

        match (&self.credentials, self.has_account_channels()) {
            (None, true) => bail!("stream '{}' has account channels but no credentials", self.id),
            (Some(_), false) => {
                bail!("stream '{}' has credentials but no account channels", self.id)
            }
            (Some(credentials), true) if !credentials.is_complete() => {
                bail!("stream '{}' credentials need api_key and secret_key", self.id)
            }
            _ => Ok(()),
        }
    }
}

impl FeedConfig {
    /// Load configuration from YAML file
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_context(|| format!("read {path}"))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content).context("parse feed config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.streams.is_empty() {
            bail!("at least one stream is required");
        }

        let mut ids = HashSet::new();
        for stream in &self.streams {
            if !ids.insert(stream.id.as_str()) {
                bail!("duplicate stream id '{}'", stream.id);
            }
            stream.validate_channels()?;
            if !stream.ws.url.is_empty() {
                // Other engine fields are checked once the exchange default URL is known.
                stream
                    .ws
                    .validate()
                    .with_context(|| format!("stream '{}' ws settings", stream.id))?;
            }
        }
        Ok(())
    }
}
