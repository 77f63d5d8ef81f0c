pub mod agent;
pub mod codec;
pub mod collector;
pub mod config;
#[cfg(feature = "grpc")]
pub mod grpc;
pub mod metric;
pub mod net;
pub mod retry;
pub mod storage;
pub mod util;

pub use metric::{MetricKind, MetricRecord, ValidationError};
pub use retry::{Retry, RetryError};
pub use storage::{StorageBackend, StorageError, StorageResult};
