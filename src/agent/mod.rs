//! Agent side of the pipeline
//!
//! ## Message Flow
//!
//! ```text
//! poll tick   → HostSampler::poll → SampleStore
//! report tick → Report::snapshot  → WorkerPool::enqueue → Sender (retry) → collector
//! ```
//!
//! The control loop itself never talks to the network; it only blocks when
//! the worker pool is saturated.

pub mod pool;
pub mod report;
pub mod sampler;
pub mod sender;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub use pool::{PoolError, WorkerPool};
pub use report::{Report, Snapshot};
pub use sampler::{HostSampler, SampleStore};
pub use sender::{HttpSender, SendError, Sender};

#[cfg(feature = "grpc")]
pub use sender::GrpcSender;

/// Poll/report scheduling
#[derive(Debug, Clone, Copy)]
pub struct Schedule {
    pub poll_interval: Duration,
    pub report_interval: Duration,
    pub rate_limit: usize,
}

pub struct Agent {
    sampler: HostSampler,
    report: Report,
    pool: WorkerPool,
    schedule: Schedule,
}

impl Agent {
    /// Wire sampler, report and worker pool around one sender
    pub fn new(sender: Arc<dyn Sender>, schedule: Schedule, cancel: CancellationToken) -> Self {
        let store = Arc::new(SampleStore::new());

        Self {
            sampler: HostSampler::new(store.clone()),
            report: Report::new(store),
            pool: WorkerPool::start(sender, schedule.rate_limit, cancel),
            schedule,
        }
    }

    /// Run until `cancel` fires, then wait for the delivery workers
    #[instrument(skip_all)]
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        info!(
            "agent started (poll: {:?}, report: {:?}, rate limit: {})",
            self.schedule.poll_interval, self.schedule.report_interval, self.schedule.rate_limit
        );

        let mut poll_ticker = interval(self.schedule.poll_interval);
        let mut report_ticker = interval(self.schedule.report_interval);
        report_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately, nothing to report yet
        report_ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("agent loop cancelled");
                    break;
                }

                _ = poll_ticker.tick() => {
                    self.sampler.poll();
                }

                _ = report_ticker.tick() => {
                    let snapshot = self.report.snapshot();
                    if snapshot.is_empty() {
                        continue;
                    }

                    if let Err(e) = self.pool.enqueue(snapshot).await {
                        warn!("dropping snapshot: {e}");
                    }
                }
            }
        }

        self.pool.shutdown().await;
        info!("agent stopped");
        Ok(())
    }
}
