/*
[INPUT]:  Lifecycle transitions driven by the connection supervisor
[OUTPUT]: ConnectionState enum and bounded exponential Backoff
[POS]:    WebSocket layer - connection state machine primitives
[UPDATE]: When adding lifecycle states or changing retry pacing
*/

use std::fmt;
use std::time::Duration;

/// Lifecycle state of a `WsClient`.
///
/// `Disconnected -> Connecting -> Connected -> (Authenticating ->) Ready -> Closing -> Closed`.
/// Runtime failures from `Connected`/`Authenticating`/`Ready` go back to `Connecting`;
/// `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Constructed, not started
    Disconnected,
    /// Dialing (includes backoff sleeps between attempts)
    Connecting,
    /// Socket installed, gate not yet open
    Connected,
    /// Auth hook running for the current generation
    Authenticating,
    /// Gate open, application traffic flows
    Ready,
    /// `close()` in progress
    Closing,
    /// Terminal
    Closed,
}

impl ConnectionState {
    /// Whether a socket is installed for the current generation.
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connected | ConnectionState::Authenticating | ConnectionState::Ready
        )
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionState::Ready)
    }

    /// Whether the client is between two stable states.
    pub fn is_transitioning(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::Connected
                | ConnectionState::Authenticating
                | ConnectionState::Closing
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Ready => "ready",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Doubling backoff clamped to `[min, max]`.
///
/// The Nth call to `next()` after a reset yields `min(min * 2^(N-1), max)`.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self {
            min,
            max,
            current: min,
        }
    }

    /// Returns the delay to wait now and advances to the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Delay the next `next_delay()` call would return.
    pub fn peek(&self) -> Duration {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }
}
