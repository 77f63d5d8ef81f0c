//! Bounded worker pool draining snapshots through a [`Sender`]
//!
//! `rate_limit` bounds both the number of workers and the number of
//! snapshots that may be queued or in flight at once. Enqueueing beyond that
//! blocks the caller until a worker finishes a delivery, so an unreachable
//! collector slows the agent's report cadence instead of growing memory.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::report::Snapshot;
use super::sender::{SendError, Sender};
use crate::retry::{DEFAULT_ATTEMPTS, Retry, linear_backoff};

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("worker pool is shut down")]
    Closed,
}

struct Job {
    snapshot: Snapshot,
    // released when the worker is done with the snapshot
    _permit: OwnedSemaphorePermit,
}

type SharedReceiver = Arc<Mutex<mpsc::Receiver<Job>>>;

pub struct WorkerPool {
    tx: mpsc::Sender<Job>,
    permits: Arc<Semaphore>,
    workers: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Spawn `rate_limit` workers (at least one)
    pub fn start(sender: Arc<dyn Sender>, rate_limit: usize, cancel: CancellationToken) -> Self {
        Self::start_with_backoff(sender, rate_limit, cancel, linear_backoff)
    }

    pub fn start_with_backoff(
        sender: Arc<dyn Sender>,
        rate_limit: usize,
        cancel: CancellationToken,
        backoff: fn(u32) -> Duration,
    ) -> Self {
        let rate_limit = rate_limit.max(1);
        let (tx, rx) = mpsc::channel(rate_limit);
        let rx: SharedReceiver = Arc::new(Mutex::new(rx));

        let workers = (0..rate_limit)
            .map(|id| {
                tokio::spawn(worker(
                    id,
                    rx.clone(),
                    sender.clone(),
                    cancel.clone(),
                    backoff,
                ))
            })
            .collect();

        info!("started {rate_limit} delivery workers");

        Self {
            tx,
            permits: Arc::new(Semaphore::new(rate_limit)),
            workers,
            cancel,
        }
    }

    /// Hand a snapshot to the workers, waiting while the pool is saturated
    pub async fn enqueue(&self, snapshot: Snapshot) -> Result<(), PoolError> {
        if self.cancel.is_cancelled() {
            return Err(PoolError::Closed);
        }

        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(PoolError::Closed),
            permit = self.permits.clone().acquire_owned() => {
                permit.map_err(|_| PoolError::Closed)?
            }
        };

        debug!("queueing snapshot of {} records", snapshot.len());

        self.tx
            .send(Job {
                snapshot,
                _permit: permit,
            })
            .await
            .map_err(|_| PoolError::Closed)
    }

    /// Stop accepting snapshots and wait for the workers
    ///
    /// Queued snapshots are still delivered unless the cancellation token
    /// has fired.
    pub async fn shutdown(self) {
        drop(self.tx);
        self.permits.close();

        for handle in self.workers {
            if let Err(e) = handle.await {
                warn!("delivery worker ended abnormally: {e}");
            }
        }

        info!("delivery workers stopped");
    }
}

async fn worker(
    id: usize,
    rx: SharedReceiver,
    sender: Arc<dyn Sender>,
    cancel: CancellationToken,
    backoff: fn(u32) -> Duration,
) {
    debug!("worker {id} started");

    loop {
        let job = tokio::select! {
            job = async { rx.lock().await.recv().await } => match job {
                Some(job) => job,
                None => break,
            },
            _ = cancel.cancelled() => break,
        };

        let sender = sender.as_ref();
        let records = job.snapshot.records.as_slice();

        let delivery = Retry::new(
            || sender.request(records),
            |e: &SendError| sender.is_conn_refused(e),
            DEFAULT_ATTEMPTS,
        )
        .with_backoff(backoff)
        .run();

        let result = tokio::select! {
            result = delivery => result,
            _ = cancel.cancelled() => {
                debug!("worker {id}: delivery aborted");
                break;
            }
        };

        let taken_at = job.snapshot.taken_at;
        let age_ms = job.snapshot.age().num_milliseconds();
        match result {
            Ok(()) => debug!(
                "worker {id}: delivered {} records taken at {taken_at} ({age_ms}ms old)",
                records.len()
            ),
            Err(e) => error!("worker {id}: failed to deliver snapshot taken at {taken_at}: {e}"),
        }
    }

    debug!("worker {id} stopped");
}
