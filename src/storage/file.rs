//! File-snapshotted storage backend
//!
//! Wraps `MemoryBackend` and persists its full state as one JSON document.
//!
//! ## Flush modes
//!
//! - **Write-through** (`interval_secs == 0`): every successful save rewrites
//!   the snapshot file.
//! - **Periodic** (`interval_secs > 0`): a background task rewrites the
//!   snapshot on every tick; saves do no I/O.
//!
//! Snapshot failures are logged and swallowed. A failed flush never fails
//! the save that triggered it and never stops the flush loop.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use super::backend::StorageBackend;
use super::error::StorageResult;
use super::memory::{MemoryBackend, MemoryState};
use crate::metric::{MetricKind, MetricRecord};

/// Settings for the file backend
#[derive(Debug, Clone)]
pub struct FileConfig {
    /// Seconds between snapshots, `0` for write-through
    pub interval_secs: u64,

    /// Snapshot file location
    pub path: PathBuf,

    /// Load the snapshot before accepting writes
    pub restore: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushMode {
    WriteThrough,
    Periodic(Duration),
}

/// Memory backend plus a JSON snapshot on disk
pub struct FileBackend {
    inner: Arc<FileInner>,
    mode: FlushMode,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct FileInner {
    memory: MemoryBackend,
    path: PathBuf,
}

impl FileInner {
    async fn write_snapshot(&self) -> StorageResult<()> {
        let body = self.memory.to_json()?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(&self.path, body).await?;
        trace!("snapshot written to {}", self.path.display());
        Ok(())
    }

    async fn flush_logged(&self, reason: &str) {
        match self.write_snapshot().await {
            Ok(()) => debug!("snapshot saved ({reason})"),
            Err(e) => error!("failed to write snapshot to {}: {e}", self.path.display()),
        }
    }
}

impl FileBackend {
    /// Create the backend, optionally restore the snapshot, and start the
    /// flush loop in periodic mode
    ///
    /// Must be called from within a Tokio runtime.
    #[instrument(skip_all, fields(path = %config.path.display()))]
    pub async fn open(config: FileConfig) -> StorageResult<Self> {
        let mode = if config.interval_secs == 0 {
            FlushMode::WriteThrough
        } else {
            FlushMode::Periodic(Duration::from_secs(config.interval_secs))
        };

        info!(
            "initializing file backend (interval: {}s, restore: {}, write-through: {})",
            config.interval_secs,
            config.restore,
            mode == FlushMode::WriteThrough
        );

        let memory = MemoryBackend::new();
        if config.restore {
            memory.replace_state(load_snapshot(&config.path).await);
        }

        let inner = Arc::new(FileInner {
            memory,
            path: config.path,
        });
        let cancel = CancellationToken::new();

        let worker = match mode {
            FlushMode::Periodic(period) => Some(tokio::spawn(flush_loop(
                inner.clone(),
                period,
                cancel.clone(),
            ))),
            FlushMode::WriteThrough => None,
        };

        Ok(Self {
            inner,
            mode,
            cancel,
            worker: Mutex::new(worker),
        })
    }

    /// Write the current state to disk now
    pub async fn flush(&self) -> StorageResult<()> {
        self.inner.write_snapshot().await
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    async fn write_through(&self) {
        if self.mode == FlushMode::WriteThrough {
            self.inner.flush_logged("write-through").await;
        }
    }
}

/// Read a snapshot; missing, empty or malformed files yield an empty state
async fn load_snapshot(path: &Path) -> MemoryState {
    let content = match tokio::fs::read(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("no snapshot at {}, creating it", path.display());
            if let Err(e) = tokio::fs::write(path, b"").await {
                warn!("failed to create snapshot file {}: {e}", path.display());
            }
            return MemoryState::default();
        }
        Err(e) => {
            error!("failed to open snapshot {}: {e}", path.display());
            return MemoryState::default();
        }
    };

    if content.iter().all(u8::is_ascii_whitespace) {
        debug!("snapshot {} is empty, starting fresh", path.display());
        return MemoryState::default();
    }

    match serde_json::from_slice::<MemoryState>(&content) {
        Ok(state) => {
            info!("restored {} metrics from {}", state.len(), path.display());
            state
        }
        Err(e) => {
            error!("failed to decode snapshot {}: {e}", path.display());
            MemoryState::default()
        }
    }
}

async fn flush_loop(inner: Arc<FileInner>, period: Duration, cancel: CancellationToken) {
    debug!("starting snapshot loop every {period:?}");

    let mut ticker = tokio::time::interval(period);
    // first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                inner.flush_logged("periodic").await;
            }

            _ = cancel.cancelled() => {
                debug!("snapshot loop stopped");
                break;
            }
        }
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    async fn save(&self, record: MetricRecord) -> StorageResult<()> {
        self.inner.memory.save_sync(record)?;
        self.write_through().await;
        Ok(())
    }

    async fn mass_save(&self, records: Vec<MetricRecord>) -> StorageResult<()> {
        let result = self.inner.memory.mass_save_sync(records);
        // records applied before a failure are kept, so persist them too
        self.write_through().await;
        result
    }

    async fn find(&self, id: &str, kind: MetricKind) -> StorageResult<MetricRecord> {
        self.inner.memory.find(id, kind).await
    }

    async fn get(&self) -> StorageResult<BTreeMap<String, String>> {
        self.inner.memory.get().await
    }

    async fn ping(&self) -> StorageResult<()> {
        Ok(())
    }

    /// Stops the flush loop and writes a final snapshot
    async fn close(&self) -> StorageResult<()> {
        self.cancel.cancel();

        let worker = self.worker.lock().take();
        if let Some(worker) = worker
            && let Err(e) = worker.await
        {
            warn!("snapshot loop ended abnormally: {e}");
        }

        debug!("final snapshot before shutdown");
        self.flush().await
    }

    fn describe(&self) -> &'static str {
        "file"
    }
}

impl Drop for FileBackend {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
