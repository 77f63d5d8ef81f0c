//! In-memory storage backend (no persistence)
//!
//! This backend keeps gauges and counters in two maps guarded by a single
//! lock. It's the reference behavior the file and database backends match,
//! and the store the file backend snapshots.
//!
//! ## Limitations
//!
//! - **No persistence**: All data lost on restart (unless wrapped by `FileBackend`)

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::backend::StorageBackend;
use super::error::{StorageError, StorageResult};
use crate::metric::{self, MetricKind, MetricRecord};

/// Full backend state, also the on-disk snapshot format
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryState {
    #[serde(default)]
    pub gauge: HashMap<String, f64>,

    #[serde(default)]
    pub counter: HashMap<String, i64>,
}

impl MemoryState {
    fn apply(&mut self, record: MetricRecord) -> StorageResult<()> {
        record.validate()?;

        match (record.kind, record.delta, record.value) {
            (MetricKind::Counter, Some(delta), _) => {
                let stored = self.counter.entry(record.id).or_insert(0);
                *stored = metric::accumulate(*stored, delta);
            }
            (MetricKind::Gauge, _, Some(value)) => {
                self.gauge.insert(record.id, value);
            }
            // validate() rules these out
            _ => {}
        }

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.gauge.len() + self.counter.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory storage backend
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    /// Create a new, empty in-memory backend
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: MemoryState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    /// Clone of the current state, taken under the lock
    pub fn state_snapshot(&self) -> MemoryState {
        self.state.lock().clone()
    }

    /// Replace the whole state (used when restoring a snapshot)
    pub fn replace_state(&self, state: MemoryState) {
        *self.state.lock() = state;
    }

    /// Serialize the current state while holding the lock
    pub fn to_json(&self) -> StorageResult<Vec<u8>> {
        let state = self.state.lock();
        Ok(serde_json::to_vec(&*state)?)
    }

    pub(crate) fn save_sync(&self, record: MetricRecord) -> StorageResult<()> {
        trace!("saving {} {}", record.kind, record.id);
        self.state.lock().apply(record)
    }

    pub(crate) fn mass_save_sync(&self, records: Vec<MetricRecord>) -> StorageResult<()> {
        let mut state = self.state.lock();
        for record in records {
            state.apply(record)?;
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn save(&self, record: MetricRecord) -> StorageResult<()> {
        self.save_sync(record)
    }

    async fn mass_save(&self, records: Vec<MetricRecord>) -> StorageResult<()> {
        debug!("in-memory backend: saving batch of {}", records.len());
        self.mass_save_sync(records)
    }

    async fn find(&self, id: &str, kind: MetricKind) -> StorageResult<MetricRecord> {
        let state = self.state.lock();

        let record = match kind {
            MetricKind::Counter => state
                .counter
                .get(id)
                .map(|delta| MetricRecord::counter(id, *delta)),
            MetricKind::Gauge => state
                .gauge
                .get(id)
                .map(|value| MetricRecord::gauge(id, *value)),
        };

        record.ok_or_else(|| StorageError::not_found(id, kind))
    }

    async fn get(&self) -> StorageResult<BTreeMap<String, String>> {
        let state = self.state.lock();

        let mut all: BTreeMap<String, String> = state
            .gauge
            .iter()
            .map(|(name, value)| (name.clone(), metric::format_gauge(*value)))
            .collect();

        all.extend(
            state
                .counter
                .iter()
                .map(|(name, delta)| (name.clone(), metric::format_counter(*delta))),
        );

        Ok(all)
    }

    async fn ping(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend (no-op)");
        Ok(())
    }

    fn describe(&self) -> &'static str {
        "memory"
    }
}
