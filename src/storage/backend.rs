//! Storage backend trait definition
//!
//! This module defines the core `StorageBackend` trait that all
//! storage implementations must implement.

use std::collections::BTreeMap;

use async_trait::async_trait;

use super::error::StorageResult;
use crate::metric::{MetricKind, MetricRecord};

/// Trait for metric storage backends
///
/// All backends (memory, file, database) apply the same aggregation rule:
/// counters are summed, gauges are overwritten. They differ in durability:
///
/// - **Memory**: lost on restart
/// - **File**: JSON snapshot, written through or periodically
/// - **Database**: every write committed to a relational table
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` as they are shared between the
/// HTTP handlers and background tasks.
///
/// ## Batches
///
/// `mass_save` is all-or-nothing on the database backend only. Memory and
/// file backends apply records one by one and keep the ones applied before
/// a failing record.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Validate and aggregate a single record
    async fn save(&self, record: MetricRecord) -> StorageResult<()>;

    /// Validate and aggregate a batch of records
    async fn mass_save(&self, records: Vec<MetricRecord>) -> StorageResult<()>;

    /// Look up a record by its identity
    ///
    /// Fails with `StorageError::NotFound` if no such record exists.
    async fn find(&self, id: &str, kind: MetricKind) -> StorageResult<MetricRecord>;

    /// All stored values, formatted for human listing
    async fn get(&self) -> StorageResult<BTreeMap<String, String>>;

    /// Check backend liveness
    async fn ping(&self) -> StorageResult<()>;

    /// Release resources (connection pool, flush loop)
    async fn close(&self) -> StorageResult<()>;

    /// Short backend name for logs and health responses
    fn describe(&self) -> &'static str;
}
