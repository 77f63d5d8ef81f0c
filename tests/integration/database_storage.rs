//! Integration tests for the SQLite backend
//!
//! These tests verify that:
//! - Committed metrics survive reopening the database
//! - A failing batch leaves no partial writes behind
//! - The HTTP API works on top of the database backend

use std::sync::Arc;

use axum::http::StatusCode;
use metrics_relay::{
    MetricKind, MetricRecord, StorageBackend,
    collector::api::{ApiState, DecodeKeys, router},
    storage::DatabaseBackend,
};
use tower::ServiceExt;

use super::helpers::{body_json, encoded_request, sample_batch};

fn dsn(dir: &tempfile::TempDir) -> String {
    format!("sqlite://{}", dir.path().join("metrics.db").display())
}

#[tokio::test]
async fn test_metrics_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();

    let backend = DatabaseBackend::connect(&dsn(&dir)).await.unwrap();
    backend.mass_save(sample_batch()).await.unwrap();
    backend.close().await.unwrap();

    let reopened = DatabaseBackend::connect(&dsn(&dir)).await.unwrap();
    reopened
        .save(MetricRecord::counter("PollCount", 10))
        .await
        .unwrap();

    assert_eq!(
        reopened
            .find("PollCount", MetricKind::Counter)
            .await
            .unwrap()
            .delta,
        Some(15)
    );
    assert_eq!(reopened.get().await.unwrap().len(), sample_batch().len());
}

#[tokio::test]
async fn test_invalid_batch_is_rolled_back() {
    let dir = tempfile::tempdir().unwrap();
    let backend = DatabaseBackend::connect(&dsn(&dir)).await.unwrap();

    let mut batch = sample_batch();
    batch.push(MetricRecord {
        id: "Broken".to_string(),
        kind: MetricKind::Gauge,
        delta: Some(1),
        value: None,
    });

    assert!(backend.mass_save(batch).await.is_err());
    assert!(backend.get().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_api_batch_lands_in_database() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(DatabaseBackend::connect(&dsn(&dir)).await.unwrap());
    let app = router(ApiState::new(backend.clone()), DecodeKeys::default());

    let response = app
        .oneshot(encoded_request("/updates/", &sample_batch(), None, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["saved"], 4);
    assert_eq!(
        backend
            .find("RandomValue", MetricKind::Gauge)
            .await
            .unwrap()
            .value,
        Some(0.25)
    );
}
