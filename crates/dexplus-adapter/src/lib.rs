/*
[INPUT]:  Crate modules and public type definitions
[OUTPUT]: Public DexPlus market-data adapter crate surface
[POS]:    Crate root - module wiring
[UPDATE]: When public modules or exports change
*/

pub mod auth;
pub mod error;
pub mod exchanges;
pub mod registry;
pub mod types;
pub mod ws;

// Re-export commonly used types from auth
pub use auth::{ApiCredentials, HmacSigner};

pub use error::{DexError, Result};

// Re-export the exchange adapters
pub use exchanges::{
    BinanceClient,
    BinanceProtocol,
    BitstampClient,
    BitstampProtocol,
    CoinbaseClient,
    CoinbaseProtocol,
    ErrorCallback,
    ExchangeClient,
    ExchangeProtocol,
    KrakenClient,
    KrakenProtocol,
    OkxClient,
    OkxEndpoint,
    OkxProtocol,
    Route,
};

pub use registry::{ChannelRequest, DeadLetterQueue, FrameSender, Handler, SubscriptionRegistry};

// Re-export all types
pub use types::*;

// Re-export commonly used types from ws
pub use ws::{
    AuthHandshake,
    Backoff,
    ConnectionObserver,
    ConnectionState,
    Connector,
    WorkerPool,
    WsClient,
    WsConfig,
};
