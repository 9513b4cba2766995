/*
[INPUT]:  Outbound payloads whose first send attempt failed
[OUTPUT]: FIFO retry queue flushed by a periodic sweep
[POS]:    Registry layer - pending-send (dead letter) queue
[UPDATE]: When changing retry ordering or sweep cadence
*/

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Result;

/// Ordered retry buffer for payloads that failed to send.
#[derive(Debug, Default)]
pub struct DeadLetterQueue {
    entries: Mutex<VecDeque<Vec<u8>>>,
}

impl DeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, payload: Vec<u8>) {
        self.entries.lock().push_back(payload);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Copy of the queued payloads, oldest first.
    pub fn snapshot(&self) -> Vec<Vec<u8>> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Resend queued payloads in FIFO order with `send`.
    ///
    /// Stops at the first failure: the failed payload and everything after it
    /// go back to the front of the queue, ahead of payloads pushed during the
    /// sweep. Returns how many payloads were sent.
    pub fn sweep<F>(&self, mut send: F) -> Result<usize>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        let batch = std::mem::take(&mut *self.entries.lock());
        let mut batch = batch.into_iter();
        let mut sent = 0;

        while let Some(payload) = batch.next() {
            if let Err(err) = send(&payload) {
                let mut entries = self.entries.lock();
                let newer = std::mem::take(&mut *entries);
                entries.push_back(payload);
                entries.extend(batch);
                entries.extend(newer);
                return Err(err);
            }
            sent += 1;
        }
        Ok(sent)
    }
}

/// Run `sweep` every `interval` until `token` is cancelled.
pub fn spawn_sweeper<F>(
    queue: Arc<DeadLetterQueue>,
    interval: Duration,
    token: CancellationToken,
    mut send: F,
) -> tokio::task::JoinHandle<()>
where
    F: FnMut(&[u8]) -> Result<()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if queue.is_empty() {
                        continue;
                    }
                    match queue.sweep(&mut send) {
                        Ok(sent) => debug!(sent, "dead letter sweep flushed"),
                        Err(err) => warn!(
                            error = %err,
                            remaining = queue.len(),
                            "dead letter resend failed"
                        ),
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DexError;

    #[test]
    fn test_sweep_preserves_order_after_failure() {
        let queue = DeadLetterQueue::new();
        queue.push(b"A".to_vec());
        queue.push(b"B".to_vec());
        queue.push(b"C".to_vec());

        let mut delivered = Vec::new();
        let result = queue.sweep(|payload| {
            if payload == b"B" {
                return Err(DexError::QueueFull);
            }
            delivered.push(payload.to_vec());
            Ok(())
        });

        assert!(matches!(result, Err(DexError::QueueFull)));
        assert_eq!(delivered, vec![b"A".to_vec()]);
        assert_eq!(queue.snapshot(), vec![b"B".to_vec(), b"C".to_vec()]);
    }

    #[test]
    fn test_sweep_keeps_remaining_ahead_of_newer_failures() {
        let queue = Arc::new(DeadLetterQueue::new());
        queue.push(b"A".to_vec());
        queue.push(b"B".to_vec());

        let inner = queue.clone();
        let result = queue.sweep(|payload| {
            // A send that fails mid-sweep dead-letters a newer payload.
            inner.push(b"N".to_vec());
            if payload == b"A" {
                return Err(DexError::NotReady);
            }
            Ok(())
        });

        assert!(result.is_err());
        assert_eq!(
            queue.snapshot(),
            vec![b"A".to_vec(), b"B".to_vec(), b"N".to_vec()]
        );
    }

    #[test]
    fn test_sweep_drains_on_success() {
        let queue = DeadLetterQueue::new();
        queue.push(b"A".to_vec());
        queue.push(b"B".to_vec());
        assert_eq!(queue.sweep(|_| Ok(())).unwrap(), 2);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_retries_on_interval() {
        let queue = Arc::new(DeadLetterQueue::new());
        queue.push(b"subscribe".to_vec());
        let token = CancellationToken::new();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = spawn_sweeper(queue.clone(), Duration::from_secs(20), token.clone(), move |payload| {
            let _ = tx.send(payload.to_vec());
            Ok(())
        });

        tokio::time::sleep(Duration::from_secs(19)).await;
        assert!(rx.try_recv().is_err());

        let resent = rx.recv().await.unwrap();
        assert_eq!(resent, b"subscribe");
        assert!(queue.is_empty());

        token.cancel();
        handle.await.unwrap();
    }
}
