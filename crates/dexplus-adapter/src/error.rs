/*
[INPUT]:  Error sources (transport, queues, auth, exchange replies, handlers)
[OUTPUT]: Structured error type with retry and auth classification
[POS]:    Error handling layer - unified error type for the entire crate
[UPDATE]: When adding new error sources or changing the error taxonomy
*/

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Main error type for the dexplus adapter
#[derive(Error, Debug)]
pub enum DexError {
    /// WebSocket protocol or transport failure
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// Socket-level I/O failure while dialing
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Dial or write did not finish in time
    #[error("Timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// URL parsing failed
    #[error("Invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Outbound queue has no free slot
    #[error("Send queue full")]
    QueueFull,

    /// Outbound queue stayed full for the whole send timeout
    #[error("Send queue busy after {timeout_ms}ms")]
    Busy { timeout_ms: u64 },

    /// Client was closed
    #[error("Client closed")]
    Closed,

    /// No socket is currently installed
    #[error("Not connected")]
    NotConnected,

    /// Ready gate is shut (authentication pending or reconnecting)
    #[error("Connection not ready")]
    NotReady,

    /// Authentication handshake failed
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// Exchange replied with an error frame
    #[error("Exchange error (code {code}): {message}")]
    Exchange { code: String, message: String },

    /// A message handler panicked
    #[error("Handler panicked on channel {channel}: {message}")]
    HandlerPanic { channel: String, message: String },

    /// Worker pool queue is full
    #[error("Worker pool saturated")]
    PoolSaturated,

    /// Inbound frame could not be interpreted
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Exchange or endpoint does not serve this channel kind
    #[error("{exchange} does not support {channel} channels here")]
    Unsupported { exchange: String, channel: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DexError {
    /// Check if the error is transient and the caller may try again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DexError::WebSocket(_)
                | DexError::Io(_)
                | DexError::Timeout { .. }
                | DexError::QueueFull
                | DexError::Busy { .. }
                | DexError::NotConnected
                | DexError::NotReady
                | DexError::PoolSaturated
        )
    }

    /// Check if error indicates authentication failure
    pub fn is_auth_error(&self) -> bool {
        matches!(self, DexError::Authentication { .. })
    }

    /// Create an authentication error from any message
    pub fn auth(message: impl Into<String>) -> Self {
        DexError::Authentication {
            message: message.into(),
        }
    }

    pub fn unsupported(exchange: impl Into<String>, channel: impl ToString) -> Self {
        DexError::Unsupported {
            exchange: exchange.into(),
            channel: channel.to_string(),
        }
    }

    /// Create an exchange error from a code and message
    pub fn exchange(code: impl Into<String>, message: impl Into<String>) -> Self {
        DexError::Exchange {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for dexplus operations
pub type Result<T> = std::result::Result<T, DexError>;
