//! Agent-side delivery tests
//!
//! These tests verify that:
//! - The HTTP sender produces the wire format the collector expects
//! - Non-success statuses surface as errors without retries
//! - Snapshots flow from the worker pool into a live collector
//! - Agents pass a collector's trusted subnet check

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use metrics_relay::{
    MetricKind, StorageBackend,
    agent::{HttpSender, SendError, Sender, Snapshot, WorkerPool},
    codec::{self, SIGNATURE_HEADER},
    collector::api::{ApiState, DecodeKeys, spawn_api_server},
    net::REAL_IP_HEADER,
    storage::MemoryBackend,
};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::helpers::*;

#[tokio::test]
async fn test_http_sender_wire_format() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/updates/"))
        .and(header("content-encoding", "gzip"))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let sender = HttpSender::new(&mock_server.uri(), Some(TEST_SECRET.to_string()), None).unwrap();
    sender.request(&sample_batch()).await.unwrap();

    let requests = mock_server.received_requests().await.unwrap();
    let request = &requests[0];

    let json = codec::gunzip(&request.body).unwrap();
    assert_eq!(json, serde_json::to_vec(&sample_batch()).unwrap());

    let signature = request
        .headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap();
    codec::verify(TEST_SECRET.as_bytes(), &json, signature).unwrap();
}

#[tokio::test]
async fn test_unsigned_sender_omits_header() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/updates/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let sender = HttpSender::new(&mock_server.uri(), Some(String::new()), None).unwrap();
    sender.request(&sample_batch()).await.unwrap();

    let requests = mock_server.received_requests().await.unwrap();
    assert!(requests[0].headers.get(SIGNATURE_HEADER).is_none());

    // loopback collector, so the agent reports its loopback address
    assert_eq!(
        requests[0]
            .headers
            .get(REAL_IP_HEADER)
            .and_then(|v| v.to_str().ok()),
        Some("127.0.0.1")
    );
}

#[tokio::test]
async fn test_server_error_is_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/updates/"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let sender: Arc<dyn Sender> =
        Arc::new(HttpSender::new(&mock_server.uri(), None, None).unwrap());

    let err = sender.request(&sample_batch()).await.unwrap_err();
    assert_matches!(err, SendError::Status(500));
    assert!(!sender.is_conn_refused(&err));

    let pool = WorkerPool::start_with_backoff(sender, 1, CancellationToken::new(), no_backoff);
    pool.enqueue(Snapshot::new(sample_batch())).await.unwrap();
    pool.shutdown().await;

    // one direct call plus one pool attempt
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_pool_delivers_to_collector() {
    let (private, public) = test_keypair();
    let storage = Arc::new(MemoryBackend::new());
    let cancel = CancellationToken::new();

    let (addr, server) = spawn_api_server(
        "127.0.0.1:0".parse().unwrap(),
        ApiState::new(storage.clone()),
        DecodeKeys::new(Some(TEST_SECRET.to_string()), Some(private)),
        cancel.clone(),
    )
    .await
    .unwrap();

    let sender = HttpSender::new(
        &addr.to_string(),
        Some(TEST_SECRET.to_string()),
        Some(public),
    )
    .unwrap();

    let pool = WorkerPool::start_with_backoff(Arc::new(sender), 2, cancel.clone(), no_backoff);
    for _ in 0..3 {
        pool.enqueue(Snapshot::new(sample_batch())).await.unwrap();
    }
    pool.shutdown().await;

    // counters accumulate across snapshots, gauges keep the last value
    assert_eq!(
        storage
            .find("PollCount", MetricKind::Counter)
            .await
            .unwrap()
            .delta,
        Some(15)
    );
    assert_eq!(
        storage
            .find("RandomValue", MetricKind::Gauge)
            .await
            .unwrap()
            .value,
        Some(0.25)
    );

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_pool_passes_trusted_subnet() {
    let storage = Arc::new(MemoryBackend::new());
    let cancel = CancellationToken::new();

    let state =
        ApiState::new(storage.clone()).with_trusted_subnet(Some("127.0.0.0/8".parse().unwrap()));
    let (addr, server) = spawn_api_server(
        "127.0.0.1:0".parse().unwrap(),
        state,
        DecodeKeys::default(),
        cancel.clone(),
    )
    .await
    .unwrap();

    let sender = HttpSender::new(&addr.to_string(), None, None).unwrap();
    sender.request(&sample_batch()).await.unwrap();

    assert_eq!(storage.get().await.unwrap().len(), 4);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_agent_outside_subnet_is_refused() {
    let storage = Arc::new(MemoryBackend::new());
    let cancel = CancellationToken::new();

    let state =
        ApiState::new(storage.clone()).with_trusted_subnet(Some("10.0.0.0/8".parse().unwrap()));
    let (addr, _server) = spawn_api_server(
        "127.0.0.1:0".parse().unwrap(),
        state,
        DecodeKeys::default(),
        cancel.clone(),
    )
    .await
    .unwrap();

    let sender = HttpSender::new(&addr.to_string(), None, None).unwrap();
    let err = sender.request(&sample_batch()).await.unwrap_err();

    assert_matches!(err, SendError::Status(403));
    assert!(storage.get().await.unwrap().is_empty());

    cancel.cancel();
}
