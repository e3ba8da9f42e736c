//! Background worker pool with ordered shutdown.
//!
//! Every worker registers with a `stop_id`. `stop_all` flips the shared
//! shutdown flag, then joins workers in ascending `stop_id` order;
//! workers with a negative `stop_id` are joined last, in unspecified
//! order. The ordering is a correctness contract, not a preference: a
//! receive worker (`stop_id` 1) must be gone before render workers (2),
//! which must be gone before the send worker (3), or data queues up and
//! in-flight output is truncated.

use std::future::Future;
use std::sync::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Cloneable view of the pool's shutdown flag.
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until shutdown is requested.
    pub async fn wait(&mut self) {
        // An error means the pool itself is gone, which is shutdown too.
        let _ = self.rx.wait_for(|v| *v).await;
    }
}

struct Worker {
    stop_id: i32,
    name: String,
    handle: JoinHandle<()>,
}

/// Pool of background tasks joined in ascending `stop_id` order.
pub struct WorkerPool {
    tx: watch::Sender<bool>,
    workers: Mutex<Vec<Worker>>,
}

impl WorkerPool {
    /// Create an empty pool.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            tx,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// A shutdown signal workers poll between iterations.
    #[must_use]
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Spawn a worker with the given shutdown rank.
    pub fn spawn<F>(&self, name: impl Into<String>, stop_id: i32, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let handle = tokio::spawn(future);
        self.workers
            .lock()
            .expect("worker registry lock poisoned")
            .push(Worker {
                stop_id,
                name,
                handle,
            });
    }

    /// Request shutdown without joining.
    pub fn trigger_shutdown(&self) {
        let _ = self.tx.send(true);
    }

    /// Signal shutdown and join every worker, lowest `stop_id` first,
    /// negative ids last. Returns the join order for observability.
    pub async fn stop_all(&self) -> Vec<(i32, String)> {
        self.trigger_shutdown();

        let mut workers = {
            let mut guard = self.workers.lock().expect("worker registry lock poisoned");
            std::mem::take(&mut *guard)
        };
        // Stable sort: non-negative ids ascending, negatives after them in
        // registration order.
        workers.sort_by_key(|w| {
            if w.stop_id < 0 {
                (1, 0)
            } else {
                (0, w.stop_id)
            }
        });

        let mut joined = Vec::with_capacity(workers.len());
        for worker in workers {
            if let Err(e) = worker.handle.await {
                if e.is_panic() {
                    tracing::error!(worker = %worker.name, "worker panicked during shutdown");
                } else {
                    tracing::debug!(worker = %worker.name, "worker cancelled during shutdown");
                }
            }
            joined.push((worker.stop_id, worker.name));
        }
        joined
    }

    /// Workers currently registered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.workers
            .lock()
            .expect("worker registry lock poisoned")
            .len()
    }

    /// Whether no workers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_stop_all_joins_in_stop_id_order() {
        let pool = WorkerPool::new();

        // Registration order deliberately scrambled.
        for stop_id in [3, 1, 2, 2] {
            let mut signal = pool.shutdown_signal();
            pool.spawn(format!("worker-{stop_id}"), stop_id, async move {
                signal.wait().await;
            });
        }

        let joined = pool.stop_all().await;
        let ids: Vec<i32> = joined.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![1, 2, 2, 3]);
    }

    #[tokio::test]
    async fn test_negative_stop_ids_join_last() {
        let pool = WorkerPool::new();

        for stop_id in [-1, 2, -5, 1] {
            let mut signal = pool.shutdown_signal();
            pool.spawn(format!("worker-{stop_id}"), stop_id, async move {
                signal.wait().await;
            });
        }

        let joined = pool.stop_all().await;
        let ids: Vec<i32> = joined.iter().map(|(id, _)| *id).collect();
        assert_eq!(&ids[..2], &[1, 2]);
        assert!(ids[2..].contains(&-1));
        assert!(ids[2..].contains(&-5));
    }

    #[tokio::test]
    async fn test_stop_all_blocks_until_workers_exit() {
        let pool = WorkerPool::new();
        let exited = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let flag = Arc::clone(&exited);
        let mut signal = pool.shutdown_signal();
        pool.spawn("slowpoke", 1, async move {
            signal.wait().await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        });

        pool.stop_all().await;
        assert!(exited.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_signal_observability() {
        let pool = WorkerPool::new();
        let signal = pool.shutdown_signal();
        assert!(!signal.is_shutdown());
        pool.trigger_shutdown();
        assert!(signal.is_shutdown());
    }

    #[tokio::test]
    async fn test_panicked_worker_does_not_poison_stop_all() {
        let pool = WorkerPool::new();
        pool.spawn("doomed", 1, async {
            panic!("worker blew up");
        });
        let mut signal = pool.shutdown_signal();
        pool.spawn("fine", 2, async move {
            signal.wait().await;
        });

        let joined = pool.stop_all().await;
        assert_eq!(joined.len(), 2);
    }
}
