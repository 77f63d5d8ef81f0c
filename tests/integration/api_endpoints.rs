//! Integration tests for API endpoints
//!
//! These tests verify that:
//! - Encoded batches are decoded and stored
//! - Signature checks reject tampered or unsigned bodies
//! - Lookups return the right status codes and formats
//! - The health check reports the backend
//! - A trusted subnet keeps foreign agents out
//! - Responses are gzipped for clients that ask

use axum::http::StatusCode;
use axum::http::header::{ACCEPT_ENCODING, CONTENT_ENCODING};
use metrics_relay::{
    MetricKind, MetricRecord, StorageBackend,
    codec::{self, SIGNATURE_HEADER},
    collector::api::DecodeKeys,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use tower::ServiceExt;

use super::helpers::*;

#[tokio::test]
async fn test_signed_gzipped_batch_is_stored() {
    let (app, storage) = memory_router(DecodeKeys::new(Some(TEST_SECRET.to_string()), None));

    let response = app
        .oneshot(encoded_request(
            "/updates/",
            &sample_batch(),
            Some(TEST_SECRET),
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "saved": 4 }));
    assert_eq!(
        storage
            .find("PollCount", MetricKind::Counter)
            .await
            .unwrap()
            .delta,
        Some(5)
    );
}

#[tokio::test]
async fn test_encrypted_batch_is_stored() {
    let (private, public) = test_keypair();
    let (app, storage) = memory_router(DecodeKeys::new(
        Some(TEST_SECRET.to_string()),
        Some(private),
    ));

    let response = app
        .oneshot(encoded_request(
            "/updates/",
            &sample_batch(),
            Some(TEST_SECRET),
            Some(&public),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(storage.get().await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_wrong_signature_is_rejected() {
    let (app, storage) = memory_router(DecodeKeys::new(Some(TEST_SECRET.to_string()), None));

    let response = app
        .oneshot(encoded_request(
            "/updates/",
            &sample_batch(),
            Some("another-secret"),
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(response).await["error"].is_string());
    assert!(storage.get().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_signature_is_rejected() {
    let (app, storage) = memory_router(DecodeKeys::new(Some(TEST_SECRET.to_string()), None));

    let response = app
        .oneshot(encoded_request("/updates/", &sample_batch(), None, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(storage.get().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_signature_header_on_plain_body() {
    let (app, _) = memory_router(DecodeKeys::new(Some(TEST_SECRET.to_string()), None));

    let body = serde_json::to_vec(&vec![MetricRecord::counter("PollCount", 1)]).unwrap();
    let signature = metrics_relay::codec::sign(TEST_SECRET.as_bytes(), &body);

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/updates/")
        .header("content-type", "application/json")
        .header(SIGNATURE_HEADER, signature)
        .body(axum::body::Body::from(body))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_update_returns_aggregated_record() {
    let (app, storage) = memory_router(DecodeKeys::default());
    storage
        .save(MetricRecord::counter("PollCount", 10))
        .await
        .unwrap();

    let response = app
        .oneshot(json_request(
            "/update/",
            json!({ "id": "PollCount", "type": "counter", "delta": 5 }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({ "id": "PollCount", "type": "counter", "delta": 15 })
    );
}

#[tokio::test]
async fn test_invalid_record_is_bad_request() {
    let (app, storage) = memory_router(DecodeKeys::default());

    let response = app
        .clone()
        .oneshot(json_request(
            "/update/",
            json!({ "id": "Alloc", "type": "gauge", "delta": 5 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(json_request(
            "/update/",
            json!({ "id": "Alloc", "type": "histogram", "value": 1.0 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(json_request("/updates/", json!({ "not": "a list" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert!(storage.get().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_update_by_path() {
    let (app, storage) = memory_router(DecodeKeys::default());

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/update/gauge/Alloc/12.5")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/update/counter/PollCount/abc")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert_eq!(
        storage.find("Alloc", MetricKind::Gauge).await.unwrap().value,
        Some(12.5)
    );
}

#[tokio::test]
async fn test_non_finite_gauge_is_bad_request() {
    let (app, storage) = memory_router(DecodeKeys::default());

    for raw in ["NaN", "inf", "-inf"] {
        let request = axum::http::Request::builder()
            .method("POST")
            .uri(format!("/update/gauge/Bad/{raw}"))
            .body(axum::body::Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "value {raw}");
    }

    // finite values at the edge of f64 are fine
    let response = app
        .clone()
        .oneshot(json_request(
            "/update/",
            json!({ "id": "Huge", "type": "gauge", "value": f64::MAX }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let values = storage.get().await.unwrap();
    assert!(!values.contains_key("Bad"));

    // the listing stays readable
    let response = app.oneshot(get_request("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_value_lookups() {
    let (app, storage) = memory_router(DecodeKeys::default());
    storage.mass_save(sample_batch()).await.unwrap();

    let response = app
        .clone()
        .oneshot(get_request("/value/gauge/RandomValue"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "0.25");

    let response = app
        .clone()
        .oneshot(json_request(
            "/value/",
            json!({ "id": "PollCount", "type": "counter" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["delta"], 5);

    let response = app
        .oneshot(get_request("/value/counter/Unknown"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_all_is_sorted_by_name() {
    let (app, storage) = memory_router(DecodeKeys::default());
    storage.mass_save(sample_batch()).await.unwrap();

    let response = app.oneshot(get_request("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let names: Vec<&str> = body
        .as_object()
        .unwrap()
        .keys()
        .map(String::as_str)
        .collect();
    assert_eq!(
        names,
        vec!["FreeMemory", "PollCount", "RandomValue", "TotalMemory"]
    );
    assert_eq!(body["TotalMemory"], "16000000000");
}

#[tokio::test]
async fn test_ping_reports_backend() {
    let (app, _) = memory_router(DecodeKeys::default());

    let response = app.oneshot(get_request("/ping")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["backend"], "memory");
}

#[tokio::test]
async fn test_untrusted_agent_is_forbidden() {
    let (app, storage) = trusted_router("10.0.0.0/8");
    let record = json!({ "id": "PollCount", "type": "counter", "delta": 1 });

    let response = app
        .clone()
        .oneshot(json_request("/update/", record.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .clone()
        .oneshot(json_request_from("/update/", record.clone(), "192.168.1.5"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .oneshot(json_request_from("/update/", record, "not-an-ip"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    assert!(storage.get().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_trusted_agent_is_accepted() {
    let (app, storage) = trusted_router("10.0.0.0/8");

    let response = app
        .clone()
        .oneshot(json_request_from(
            "/update/",
            json!({ "id": "PollCount", "type": "counter", "delta": 3 }),
            "10.1.2.3",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        storage
            .find("PollCount", MetricKind::Counter)
            .await
            .unwrap()
            .delta,
        Some(3)
    );

    // health checks come from load balancers, not agents
    let response = app.oneshot(get_request("/ping")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_listing_is_gzipped_on_request() {
    let (app, storage) = memory_router(DecodeKeys::default());
    storage.mass_save(sample_batch()).await.unwrap();

    let mut request = get_request("/");
    request
        .headers_mut()
        .insert(ACCEPT_ENCODING, "gzip".parse().unwrap());

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok()),
        Some("gzip")
    );

    let json = codec::gunzip(&body_bytes(response).await).unwrap();
    let body: serde_json::Value = serde_json::from_slice(&json).unwrap();
    assert_eq!(body.as_object().unwrap().len(), 4);
}
