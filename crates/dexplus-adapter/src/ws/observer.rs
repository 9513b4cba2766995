/*
[INPUT]:  Lifecycle events and raw frames from the connection engine
[OUTPUT]: ConnectionObserver trait implemented by exchange adapters
[POS]:    WebSocket layer - core-to-adapter callback contract
[UPDATE]: When adding lifecycle notifications
*/

use async_trait::async_trait;

use crate::error::{DexError, Result};
use crate::ws::gate::AuthHandshake;

/// Callbacks the engine drives for one client.
///
/// `on_message` runs on a dispatcher worker; every other hook runs on the
/// supervisor or the caller of `close()`. Implementations must not block for
/// long inside lifecycle hooks since the supervisor waits on them.
#[async_trait]
pub trait ConnectionObserver: Send + Sync + 'static {
    /// A (re)connect cycle started. `reason` is human readable.
    async fn on_connecting(&self, reason: &str);

    /// A socket was installed for a new generation.
    async fn on_connected(&self);

    /// `close()` was called; the gate is still open so final frames can be sent.
    async fn on_disconnecting(&self);

    /// The socket of the previous generation was torn down.
    async fn on_disconnected(&self);

    /// One data frame. Errors are reported through `on_error`.
    async fn on_message(&self, frame: Vec<u8>) -> Result<()>;

    async fn on_error(&self, error: DexError);

    /// Authentication hook, only called when `auth_required` is set.
    ///
    /// The handshake must eventually be completed with `done`. Sending an
    /// empty payload marks the connection ready immediately.
    async fn on_auth(&self, handshake: AuthHandshake) {
        handshake.done(Ok(()));
    }

    /// The gate opened for the current generation.
    async fn on_ready(&self) {}
}
