//! Aggregation behaviour shared by every backend
//!
//! These tests go through `open_backend` so they exercise the same
//! selection path as the collector binary.

use std::sync::Arc;

use assert_matches::assert_matches;
use metrics_relay::{
    MetricKind, MetricRecord, StorageBackend, StorageError,
    storage::{StorageConfig, open_backend},
};
use pretty_assertions::assert_eq;

async fn check_aggregation(storage: Arc<dyn StorageBackend>) {
    storage.save(MetricRecord::counter("PollCount", 2)).await.unwrap();
    storage.save(MetricRecord::counter("PollCount", 3)).await.unwrap();
    storage.save(MetricRecord::gauge("Alloc", 10.5)).await.unwrap();
    storage.save(MetricRecord::gauge("Alloc", 7.0)).await.unwrap();

    assert_eq!(
        storage.find("PollCount", MetricKind::Counter).await.unwrap(),
        MetricRecord::counter("PollCount", 5)
    );
    assert_eq!(
        storage.find("Alloc", MetricKind::Gauge).await.unwrap(),
        MetricRecord::gauge("Alloc", 7.0)
    );

    let values = storage.get().await.unwrap();
    assert_eq!(values.get("PollCount").map(String::as_str), Some("5"));
    assert_eq!(values.get("Alloc").map(String::as_str), Some("7"));

    assert_matches!(
        storage.find("Missing", MetricKind::Gauge).await,
        Err(StorageError::NotFound { .. })
    );

    // saturating at the bounds, never overflowing into an unreadable row
    storage
        .save(MetricRecord::counter("Big", i64::MAX))
        .await
        .unwrap();
    storage.save(MetricRecord::counter("Big", 1)).await.unwrap();
    assert_eq!(
        storage.find("Big", MetricKind::Counter).await.unwrap().delta,
        Some(i64::MAX)
    );
    assert!(storage.get().await.is_ok());

    // non-finite gauges are rejected before they reach any backend
    assert_matches!(
        storage.save(MetricRecord::gauge("Bad", f64::NAN)).await,
        Err(StorageError::Validation(_))
    );

    storage.ping().await.unwrap();
    storage.close().await.unwrap();
}

#[tokio::test]
async fn test_memory_backend_aggregates() {
    let storage = open_backend(&StorageConfig::default()).await.unwrap();
    assert_eq!(storage.describe(), "memory");

    check_aggregation(storage).await;
}

#[tokio::test]
async fn test_file_backend_aggregates() {
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig {
        file_path: Some(dir.path().join("metrics.json")),
        store_interval: 0,
        restore: false,
        ..Default::default()
    };

    let storage = open_backend(&config).await.unwrap();
    assert_eq!(storage.describe(), "file");

    check_aggregation(storage).await;
}

#[cfg(feature = "storage-sqlite")]
#[tokio::test]
async fn test_database_backend_aggregates() {
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig {
        dsn: Some(format!("sqlite://{}", dir.path().join("metrics.db").display())),
        ..Default::default()
    };

    let storage = open_backend(&config).await.unwrap();
    assert_eq!(storage.describe(), "database");

    check_aggregation(storage).await;
}

#[tokio::test]
async fn test_batch_with_repeated_counter_sums() {
    let storage = open_backend(&StorageConfig::default()).await.unwrap();

    storage
        .mass_save(vec![
            MetricRecord::counter("PollCount", 1),
            MetricRecord::counter("PollCount", 1),
            MetricRecord::gauge("RandomValue", 0.5),
            MetricRecord::counter("PollCount", 1),
        ])
        .await
        .unwrap();

    assert_eq!(
        storage.find("PollCount", MetricKind::Counter).await.unwrap().delta,
        Some(3)
    );
}

#[tokio::test]
async fn test_concurrent_counter_updates_are_not_lost() {
    let storage = open_backend(&StorageConfig::default()).await.unwrap();

    let tasks: Vec<_> = (0..50)
        .map(|_| {
            let storage = storage.clone();
            tokio::spawn(async move {
                storage.save(MetricRecord::counter("Hits", 2)).await.unwrap();
            })
        })
        .collect();

    for task in futures::future::join_all(tasks).await {
        task.unwrap();
    }

    assert_eq!(
        storage.find("Hits", MetricKind::Counter).await.unwrap().delta,
        Some(100)
    );
}
