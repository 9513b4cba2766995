/*
[INPUT]:  Boxed dispatch jobs produced by the read loop
[OUTPUT]: Bounded job queue drained by a fixed set of panic-isolated workers
[POS]:    WebSocket layer - inbound dispatcher worker pool
[UPDATE]: When changing dispatch concurrency or panic handling
*/

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

use crate::error::{DexError, Result};

pub type Job = BoxFuture<'static, ()>;

/// Fixed-size pool of long-lived workers reading from one bounded queue.
///
/// A pool can be shared by several clients via `WsClient::with_pool`; it then
/// outlives them and must be shut down by its owner.
pub struct WorkerPool {
    workers: usize,
    tx: mpsc::Sender<Job>,
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    started: AtomicBool,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    panics: Arc<AtomicU64>,
}

impl WorkerPool {
    pub fn new(workers: usize, capacity: usize) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Arc::new(Self {
            workers: workers.max(1),
            tx,
            rx: Arc::new(Mutex::new(rx)),
            started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            panics: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Spawn the workers. Later calls are no-ops.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        for worker_id in 0..self.workers {
            let rx = self.rx.clone();
            let shutdown = self.shutdown.clone();
            let panics = self.panics.clone();
            self.tracker
                .spawn(run_worker(worker_id, rx, shutdown, panics));
        }
        debug!(workers = self.workers, "worker pool started");
    }

    /// Enqueue a job without waiting. A full queue reports `PoolSaturated`.
    pub fn try_submit(&self, job: Job) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(DexError::Closed);
        }
        self.tx.try_send(job).map_err(|err| match err {
            TrySendError::Full(_) => DexError::PoolSaturated,
            TrySendError::Closed(_) => DexError::Closed,
        })
    }

    /// Jobs that panicked since the pool was created.
    pub fn panic_count(&self) -> u64 {
        self.panics.load(Ordering::Relaxed)
    }

    /// Stop every worker. Jobs still queued are discarded.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.tracker.close();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Wait for all workers to exit after `shutdown`.
    pub async fn wait_terminated(&self, timeout: Duration) -> bool {
        self.tracker.close();
        tokio::time::timeout(timeout, self.tracker.wait()).await.is_ok()
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers)
            .field("started", &self.started.load(Ordering::Relaxed))
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish()
    }
}

async fn run_worker(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    shutdown: CancellationToken,
    panics: Arc<AtomicU64>,
) {
    loop {
        let job = {
            let mut rx = rx.lock().await;
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                job = rx.recv() => job,
            }
        };
        let Some(job) = job else {
            break;
        };

        if let Err(payload) = AssertUnwindSafe(job).catch_unwind().await {
            panics.fetch_add(1, Ordering::Relaxed);
            error!(
                worker_id,
                panic = %panic_message(payload.as_ref()),
                "dispatch job panicked"
            );
        }
    }
    debug!(worker_id, "worker stopped");
}

/// Render a panic payload as text.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_pool_runs_jobs() {
        let pool = WorkerPool::new(3, 16);
        pool.start();

        let counter = Arc::new(AtomicUsize::new(0));
        let (done_tx, mut done_rx) = mpsc::channel(16);
        for _ in 0..10 {
            let counter = counter.clone();
            let done_tx = done_tx.clone();
            pool.try_submit(
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let _ = done_tx.send(()).await;
                }
                .boxed(),
            )
            .unwrap();
        }
        for _ in 0..10 {
            done_rx.recv().await.unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 10);

        pool.shutdown();
        assert!(pool.wait_terminated(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_pool_survives_panicking_job() {
        let pool = WorkerPool::new(1, 4);
        pool.start();

        let explode = true;
        pool.try_submit(
            async move {
                if explode {
                    panic!("handler exploded");
                }
            }
            .boxed(),
        )
        .unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel();
        pool.try_submit(
            async move {
                let _ = tx.send(());
            }
            .boxed(),
        )
        .unwrap();
        rx.await.unwrap();
        assert_eq!(pool.panic_count(), 1);
        pool.shutdown();
    }

    #[test]
    fn test_pool_saturation() {
        // Not started, so nothing drains the queue.
        let pool = WorkerPool::new(1, 2);
        pool.try_submit(async {}.boxed()).unwrap();
        pool.try_submit(async {}.boxed()).unwrap();
        let err = pool.try_submit(async {}.boxed()).unwrap_err();
        assert!(matches!(err, DexError::PoolSaturated));

        pool.shutdown();
        assert!(matches!(
            pool.try_submit(async {}.boxed()).unwrap_err(),
            DexError::Closed
        ));
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(panic_message(payload.as_ref()), "static str");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
