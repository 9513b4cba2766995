/*
[INPUT]:  Exchange protocol implementations and the connection engine
[OUTPUT]: ExchangeClient plus Binance, Bitstamp, Coinbase, Kraken and OKX protocols
[POS]:    Exchange layer - per-exchange adapters
[UPDATE]: When adding an exchange or changing exports
*/

pub mod binance;
pub mod bitstamp;
pub mod client;
pub mod coinbase;
pub mod kraken;
pub mod okx;
pub mod protocol;

pub use binance::{BINANCE_STREAM_URL, BINANCE_TESTNET_STREAM_URL, BinanceProtocol};
pub use bitstamp::{BITSTAMP_WS_URL, BitstampProtocol};
pub use client::{ErrorCallback, ExchangeClient};
pub use coinbase::{COINBASE_SANDBOX_WS_URL, COINBASE_WS_URL, CoinbaseProtocol};
pub use kraken::{KRAKEN_WS_URL, KrakenProtocol};
pub use okx::{OKX_BUSINESS_URL, OKX_PRIVATE_URL, OKX_PUBLIC_URL, OkxEndpoint, OkxProtocol};
pub use protocol::{ExchangeProtocol, Route};

pub type BinanceClient = ExchangeClient<BinanceProtocol>;
pub type BitstampClient = ExchangeClient<BitstampProtocol>;
pub type CoinbaseClient = ExchangeClient<CoinbaseProtocol>;
pub type KrakenClient = ExchangeClient<KrakenProtocol>;
pub type OkxClient = ExchangeClient<OkxProtocol>;
