/*
[INPUT]:  WebSocket configuration, connectors and connection observers
[OUTPUT]: Resilient, auth-gated WebSocket engine shared by every exchange
[POS]:    WebSocket layer - transport and dispatch engine
[UPDATE]: When adding engine components or changing exports
*/

pub mod client;
pub mod config;
pub mod connector;
pub mod gate;
pub mod observer;
pub mod pool;
mod pump;
pub mod state;
mod supervisor;

pub use client::{WeakWsClient, WsClient};
pub use config::{WsConfig, WsConfigBuilder};
pub use connector::{Connection, Connector, FrameSink, FrameStream, TungsteniteConnector};
pub use gate::{AuthGate, AuthHandshake, AuthSender, GateState};
pub use observer::ConnectionObserver;
pub use pool::WorkerPool;
pub use state::{Backoff, ConnectionState};
