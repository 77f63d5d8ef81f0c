//! Snapshot assembly for the delivery pipeline

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};

use super::sampler::SampleStore;
use crate::metric::MetricRecord;

/// Immutable batch handed to the worker pool
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub records: Vec<MetricRecord>,
    pub taken_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(records: Vec<MetricRecord>) -> Self {
        Self {
            records,
            taken_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Time since the snapshot was taken
    pub fn age(&self) -> TimeDelta {
        Utc::now() - self.taken_at
    }
}

/// Produces snapshots from the local sample store
///
/// Counters are drained on every snapshot: the collector keeps the running
/// totals, the agent only reports the increments of one interval.
#[derive(Debug, Clone)]
pub struct Report {
    store: Arc<SampleStore>,
}

impl Report {
    pub fn new(store: Arc<SampleStore>) -> Self {
        Self { store }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(self.store.drain())
    }
}
