//! Storage backends for metric persistence
//!
//! This module provides a trait-based abstraction over where the collector
//! keeps its metrics. Every backend applies the same aggregation rule:
//! counters sum, gauges overwrite.
//!
//! ## Backends
//!
//! - **Memory**: Two maps behind one lock, lost on restart
//! - **File**: Memory plus a JSON snapshot (write-through or periodic)
//! - **Database** (feature `storage-sqlite`): SQLite through sqlx, atomic
//!   upserts and transactional batches
//!
//! ## Usage
//!
//! ```no_run
//! use metrics_relay::storage::{StorageConfig, open_backend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = open_backend(&StorageConfig::default()).await?;
//!     backend.ping().await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
#[cfg(feature = "storage-sqlite")]
pub mod database;
pub mod error;
pub mod file;
pub mod memory;
pub mod schema;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

pub use backend::StorageBackend;
#[cfg(feature = "storage-sqlite")]
pub use database::DatabaseBackend;
pub use error::{StorageError, StorageResult};
pub use file::{FileBackend, FileConfig};
pub use memory::{MemoryBackend, MemoryState};
pub use schema::MetricRow;

/// Which backend to build, in order of precedence
#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    /// Database connection string; wins over everything else
    pub dsn: Option<String>,

    /// Snapshot file; used when no DSN is set
    pub file_path: Option<PathBuf>,

    /// Seconds between file snapshots, `0` for write-through
    pub store_interval: u64,

    /// Load the snapshot file on startup
    pub restore: bool,
}

/// Build the configured backend: DSN ⇒ database, file path ⇒ file,
/// otherwise memory
pub async fn open_backend(config: &StorageConfig) -> StorageResult<Arc<dyn StorageBackend>> {
    let dsn = config.dsn.as_deref().filter(|dsn| !dsn.trim().is_empty());
    let file_path = config
        .file_path
        .as_ref()
        .filter(|path| !path.as_os_str().is_empty());

    let backend: Arc<dyn StorageBackend> = match (dsn, file_path) {
        (Some(dsn), _) => open_database(dsn).await?,
        (None, Some(path)) => Arc::new(
            FileBackend::open(FileConfig {
                interval_secs: config.store_interval,
                path: path.clone(),
                restore: config.restore,
            })
            .await?,
        ),
        (None, None) => Arc::new(MemoryBackend::new()),
    };

    info!("using {} storage backend", backend.describe());
    Ok(backend)
}

#[cfg(feature = "storage-sqlite")]
async fn open_database(dsn: &str) -> StorageResult<Arc<dyn StorageBackend>> {
    Ok(Arc::new(DatabaseBackend::connect(dsn).await?))
}

#[cfg(not(feature = "storage-sqlite"))]
async fn open_database(_dsn: &str) -> StorageResult<Arc<dyn StorageBackend>> {
    Err(StorageError::InvalidConfig(
        "database storage requires the `storage-sqlite` feature".to_string(),
    ))
}
