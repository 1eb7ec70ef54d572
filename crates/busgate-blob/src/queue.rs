//! Bounded job queue with a fixed worker pool.
//!
//! The HTTP handler submits jobs without blocking; a full queue is the
//! caller's signal to answer 503. Workers stop pulling new jobs once the
//! shutdown token fires, and [`ProcBus::join`] waits for in-flight jobs to
//! finish.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A bounded in-process job bus.
pub struct ProcBus<M> {
    tx: mpsc::Sender<M>,
    workers: Vec<JoinHandle<()>>,
}

impl<M: Send + 'static> ProcBus<M> {
    /// Start `workers` tasks consuming a queue of depth `depth`, running
    /// `handler` for each job.
    pub fn start<F, Fut>(
        depth: usize,
        workers: usize,
        shutdown: CancellationToken,
        handler: F,
    ) -> Self
    where
        F: Fn(M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send,
    {
        // Depth counts jobs waiting beyond the one each worker holds; a
        // zero-depth queue still needs capacity for the handoff itself.
        let (tx, rx) = mpsc::channel(depth.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let handler = Arc::new(handler);

        let workers = (0..workers.max(1))
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let handler = Arc::clone(&handler);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    loop {
                        let job = {
                            let mut rx = rx.lock().await;
                            tokio::select! {
                                () = shutdown.cancelled() => None,
                                job = rx.recv() => job,
                            }
                        };
                        let Some(job) = job else { break };
                        handler(job).await;
                    }
                    debug!(worker, "blob worker stopped");
                })
            })
            .collect();

        Self { tx, workers }
    }

    /// Submit a job without blocking. Returns the job back when the queue is
    /// full or the pool has shut down.
    pub fn try_submit(&self, job: M) -> Result<(), M> {
        try_send(&self.tx, job)
    }

    /// A clonable submission handle, for callers that outlive this pool
    /// reference.
    #[must_use]
    pub fn sender(&self) -> ProcBusSender<M> {
        ProcBusSender {
            tx: self.tx.clone(),
        }
    }

    /// Stop accepting jobs and wait for the workers to finish.
    pub async fn join(self) {
        drop(self.tx);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

/// A clonable handle submitting jobs into a [`ProcBus`].
pub struct ProcBusSender<M> {
    tx: mpsc::Sender<M>,
}

impl<M> Clone for ProcBusSender<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<M: Send + 'static> ProcBusSender<M> {
    /// Submit a job without blocking. Returns the job back when the queue is
    /// full or the pool has shut down.
    pub fn try_submit(&self, job: M) -> Result<(), M> {
        try_send(&self.tx, job)
    }
}

fn try_send<M>(tx: &mpsc::Sender<M>, job: M) -> Result<(), M> {
    tx.try_send(job).map_err(|e| match e {
        mpsc::error::TrySendError::Full(job) | mpsc::error::TrySendError::Closed(job) => job,
    })
}
