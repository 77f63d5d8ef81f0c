//! Integration tests for the file backend
//!
//! These tests verify that:
//! - State survives a restart when restore is enabled
//! - Restore disabled starts from scratch
//! - Periodic mode writes snapshots on its own schedule

use std::path::Path;
use std::time::Duration;

use metrics_relay::{
    MetricKind, MetricRecord, StorageBackend,
    storage::{FileBackend, FileConfig, MemoryState},
};

use super::helpers::wait_until;

async fn open(path: &Path, interval_secs: u64, restore: bool) -> FileBackend {
    FileBackend::open(FileConfig {
        interval_secs,
        path: path.to_path_buf(),
        restore,
    })
    .await
    .unwrap()
}

fn read_state(path: &Path) -> Option<MemoryState> {
    let bytes = std::fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[tokio::test]
async fn test_restart_restores_counters_and_gauges() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metrics.json");

    let first = open(&path, 300, false).await;
    first.save(MetricRecord::counter("PollCount", 4)).await.unwrap();
    first.save(MetricRecord::gauge("HeapAlloc", 512.0)).await.unwrap();
    first.close().await.unwrap();

    let second = open(&path, 300, true).await;
    second.save(MetricRecord::counter("PollCount", 1)).await.unwrap();

    assert_eq!(
        second.find("PollCount", MetricKind::Counter).await.unwrap().delta,
        Some(5)
    );
    assert_eq!(
        second.find("HeapAlloc", MetricKind::Gauge).await.unwrap().value,
        Some(512.0)
    );
    second.close().await.unwrap();
}

#[tokio::test]
async fn test_restore_disabled_ignores_existing_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metrics.json");

    let first = open(&path, 0, false).await;
    first.save(MetricRecord::counter("PollCount", 4)).await.unwrap();
    first.close().await.unwrap();

    let second = open(&path, 0, false).await;
    assert!(
        second
            .find("PollCount", MetricKind::Counter)
            .await
            .is_err()
    );
    second.close().await.unwrap();
}

#[tokio::test]
async fn test_periodic_mode_flushes_on_schedule() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metrics.json");

    let backend = open(&path, 1, false).await;
    backend
        .mass_save(vec![
            MetricRecord::counter("PollCount", 2),
            MetricRecord::gauge("RandomValue", 0.75),
        ])
        .await
        .unwrap();

    let flushed = wait_until(Duration::from_secs(5), || async {
        read_state(&path).is_some_and(|state| state.len() == 2)
    })
    .await;
    assert!(flushed, "periodic snapshot never appeared");

    backend.close().await.unwrap();
}
