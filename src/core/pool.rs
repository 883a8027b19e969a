//! Worker pool - a fixed set of workers exchanged through a bounded channel

use super::Worker;
use tokio::sync::mpsc;

/// Fixed-size pool; acquiring waits until a worker is released
pub struct WorkerPool {
    free_tx: mpsc::Sender<Worker>,
    free_rx: mpsc::Receiver<Worker>,
}

/// Handle used by running tasks to hand their worker back
#[derive(Clone)]
pub struct PoolReleaser {
    free_tx: mpsc::Sender<Worker>,
}

impl WorkerPool {
    /// Create `size` workers with ids `0..size`
    pub fn new(size: usize) -> Self {
        log::info!("Initializing {} workers", size);

        // The channel can hold every worker, so releasing never waits
        let (free_tx, free_rx) = mpsc::channel(size.max(1));
        for id in 0..size {
            if let Err(e) = free_tx.try_send(Worker::new(id)) {
                log::error!("Failed to seed worker {}: {}", id, e);
            }
        }

        Self { free_tx, free_rx }
    }

    /// Wait for a free worker
    pub async fn acquire(&mut self) -> Option<Worker> {
        self.free_rx.recv().await
    }

    pub fn releaser(&self) -> PoolReleaser {
        PoolReleaser {
            free_tx: self.free_tx.clone(),
        }
    }
}

impl PoolReleaser {
    /// Return a worker for reuse
    pub async fn release(&self, mut worker: Worker) {
        worker.recycle();
        let id = worker.id();
        if self.free_tx.send(worker).await.is_err() {
            log::debug!("[Thread-{}] pool already closed", id);
        }
    }
}
