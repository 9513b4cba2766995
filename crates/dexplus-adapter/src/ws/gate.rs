/*
[INPUT]:  Connection generations and auth hook completions
[OUTPUT]: Ready gate holding back data frames, per-generation auth handshake
[POS]:    WebSocket layer - authentication gate
[UPDATE]: When changing how the ready state is signalled or awaited
*/

use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::sync::mpsc::error::SendTimeoutError;

use crate::error::{DexError, Result};

/// Snapshot of the gate: which generation it belongs to and whether it is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateState {
    pub generation: u64,
    pub open: bool,
}

/// Ready gate shared by the supervisor, the outbound pump and callers of `wait_ready`.
#[derive(Debug)]
pub struct AuthGate {
    tx: watch::Sender<GateState>,
}

impl AuthGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(GateState {
            generation: 0,
            open: false,
        });
        Self { tx }
    }

    /// Shut the gate and bind it to a new generation.
    pub fn reset(&self, generation: u64) {
        self.tx.send_replace(GateState {
            generation,
            open: false,
        });
    }

    /// Shut the gate, keeping the generation.
    pub fn shut(&self) {
        self.tx.send_if_modified(|state| {
            let was_open = state.open;
            state.open = false;
            was_open
        });
    }

    /// Open the gate for `generation`. Returns `false` when the gate belongs to
    /// another generation or was already open.
    pub fn open(&self, generation: u64) -> bool {
        let mut opened = false;
        self.tx.send_if_modified(|state| {
            if state.generation == generation && !state.open {
                state.open = true;
                opened = true;
            }
            opened
        });
        opened
    }

    pub fn state(&self) -> GateState {
        *self.tx.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.tx.borrow().open
    }

    pub fn generation(&self) -> u64 {
        self.tx.borrow().generation
    }

    pub fn subscribe(&self) -> watch::Receiver<GateState> {
        self.tx.subscribe()
    }

    /// Wait until the gate opens, up to `timeout`.
    pub async fn wait_open(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.tx.subscribe();
        match tokio::time::timeout(timeout, rx.wait_for(|state| state.open)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(DexError::Closed),
            Err(_) => Err(DexError::NotReady),
        }
    }
}

impl Default for AuthGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Auth frame tagged with the generation it was produced for.
#[derive(Debug)]
pub(crate) struct AuthFrame {
    pub generation: u64,
    pub payload: Vec<u8>,
}

/// Capability handed to `ConnectionObserver::on_auth` for one generation.
///
/// Frames sent through it bypass the ready gate. Completion is reported once
/// through `done`; dropping the handshake without completing it fails the
/// generation's authentication.
#[derive(Debug)]
pub struct AuthHandshake {
    generation: u64,
    auth_tx: mpsc::Sender<AuthFrame>,
    send_timeout: Duration,
    completion: Option<oneshot::Sender<Result<()>>>,
}

impl AuthHandshake {
    pub(crate) fn new(
        generation: u64,
        auth_tx: mpsc::Sender<AuthFrame>,
        send_timeout: Duration,
        completion: oneshot::Sender<Result<()>>,
    ) -> Self {
        Self {
            generation,
            auth_tx,
            send_timeout,
            completion: Some(completion),
        }
    }

    /// Generation this handshake is bound to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether `done` (or an empty `send`) already completed the handshake.
    pub fn is_completed(&self) -> bool {
        self.completion.is_none()
    }

    /// Auth-queue writer for the same generation, usable after the handshake
    /// was handed off.
    pub fn sender(&self) -> AuthSender {
        AuthSender {
            generation: self.generation,
            auth_tx: self.auth_tx.clone(),
            send_timeout: self.send_timeout,
        }
    }

    /// Queue an auth frame ahead of all data frames.
    ///
    /// An empty payload means no auth is needed and completes the handshake
    /// successfully.
    pub async fn send(&mut self, payload: Vec<u8>) -> Result<()> {
        if payload.is_empty() {
            self.complete(Ok(()));
            return Ok(());
        }

        self.sender().send(payload).await
    }

    /// Complete the handshake. `Ok` opens the gate, `Err` triggers a reconnect.
    pub fn done(mut self, result: Result<()>) {
        self.complete(result);
    }

    fn complete(&mut self, result: Result<()>) {
        if let Some(completion) = self.completion.take() {
            // The receiver is gone once the generation was superseded.
            let _ = completion.send(result);
        }
    }
}

/// Auth-queue writer bound to one generation.
#[derive(Debug, Clone)]
pub struct AuthSender {
    generation: u64,
    auth_tx: mpsc::Sender<AuthFrame>,
    send_timeout: Duration,
}

impl AuthSender {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Queue an auth frame ahead of all data frames.
    pub async fn send(&self, payload: Vec<u8>) -> Result<()> {
        let frame = AuthFrame {
            generation: self.generation,
            payload,
        };
        self.auth_tx
            .send_timeout(frame, self.send_timeout)
            .await
            .map_err(|err| match err {
                SendTimeoutError::Timeout(_) => DexError::Busy {
                    timeout_ms: self.send_timeout.as_millis() as u64,
                },
                SendTimeoutError::Closed(_) => DexError::Closed,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_open_is_generation_scoped() {
        let gate = AuthGate::new();
        gate.reset(3);
        assert!(!gate.open(2));
        assert!(!gate.is_open());

        assert!(gate.open(3));
        assert!(gate.is_open());
        assert!(!gate.open(3));

        gate.reset(4);
        assert!(!gate.is_open());
        assert!(!gate.open(3));
        assert_eq!(gate.generation(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_wait_open() {
        let gate = std::sync::Arc::new(AuthGate::new());
        gate.reset(1);

        let err = gate.wait_open(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, DexError::NotReady));

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_open(Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        assert!(gate.open(1));
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_handshake_empty_send_completes() {
        let (auth_tx, mut auth_rx) = mpsc::channel(4);
        let (done_tx, done_rx) = oneshot::channel();
        let mut handshake = AuthHandshake::new(7, auth_tx, Duration::from_secs(1), done_tx);

        handshake.send(b"login".to_vec()).await.unwrap();
        let frame = auth_rx.recv().await.unwrap();
        assert_eq!(frame.generation, 7);
        assert_eq!(frame.payload, b"login");

        handshake.send(Vec::new()).await.unwrap();
        assert!(handshake.is_completed());
        assert!(done_rx.await.unwrap().is_ok());

        // A later done is a no-op.
        handshake.done(Err(DexError::auth("late")));
    }

    #[tokio::test]
    async fn test_handshake_drop_reports_failure() {
        let (auth_tx, _auth_rx) = mpsc::channel(1);
        let (done_tx, done_rx) = oneshot::channel();
        let handshake = AuthHandshake::new(1, auth_tx, Duration::from_secs(1), done_tx);
        drop(handshake);
        assert!(done_rx.await.is_err());
    }
}
