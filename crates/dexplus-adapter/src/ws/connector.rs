/*
[INPUT]:  WsConfig endpoint, headers and IPv4 preference
[OUTPUT]: Split WebSocket sink/stream pair for one connection generation
[POS]:    WebSocket layer - dialing abstraction
[UPDATE]: When changing TLS, proxy or address-family handling
*/

use std::net::SocketAddr;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Sink, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::debug;

use crate::error::{DexError, Result};
use crate::ws::config::WsConfig;

pub type FrameSink = Pin<Box<dyn Sink<Message, Error = tungstenite::Error> + Send>>;
pub type FrameStream =
    Pin<Box<dyn Stream<Item = std::result::Result<Message, tungstenite::Error>> + Send>>;

/// One established WebSocket, already split into its write and read halves.
pub struct Connection {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Connection {
    /// Split a duplex WebSocket into a `Connection`.
    pub fn new<S>(socket: S) -> Self
    where
        S: Sink<Message, Error = tungstenite::Error>
            + Stream<Item = std::result::Result<Message, tungstenite::Error>>
            + Send
            + 'static,
    {
        let (sink, stream) = socket.split();
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }

    pub fn from_parts(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Dials one connection. The caller bounds each attempt with the handshake timeout.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, config: &WsConfig) -> Result<Connection>;
}

/// Production connector built on tokio-tungstenite with rustls.
#[derive(Debug, Clone, Default)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    fn build_request(config: &WsConfig) -> Result<Request> {
        let url = config.endpoint()?;
        let mut request = url.as_str().into_client_request()?;
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| DexError::Config(format!("invalid header name '{name}': {err}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|err| DexError::Config(format!("invalid header value: {err}")))?;
            request.headers_mut().insert(name, value);
        }
        Ok(request)
    }

    async fn dial_ipv4(config: &WsConfig) -> Result<TcpStream> {
        let url = config.endpoint()?;
        let host = url
            .host_str()
            .ok_or_else(|| DexError::Config("endpoint has no host".to_string()))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| DexError::Config("endpoint has no port".to_string()))?;

        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await?
            .filter(SocketAddr::is_ipv4)
            .collect();
        if addrs.is_empty() {
            return Err(DexError::Io(std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                format!("no IPv4 address for {host}"),
            )));
        }

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    debug!(exchange = %config.exchange, %addr, "tcp connected over IPv4");
                    return Ok(stream);
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err
            .map(DexError::Io)
            .unwrap_or(DexError::NotConnected))
    }
}

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, config: &WsConfig) -> Result<Connection> {
        let request = Self::build_request(config)?;

        if config.ipv4_only {
            let tcp = Self::dial_ipv4(config).await?;
            let (socket, _response) =
                tokio_tungstenite::client_async_tls_with_config(request, tcp, None, None).await?;
            return Ok(Connection::new(socket));
        }

        let (socket, _response) = tokio_tungstenite::connect_async(request).await?;
        Ok(Connection::new(socket))
    }
}
