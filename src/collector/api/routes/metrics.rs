//! Metric endpoints

use std::collections::BTreeMap;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::collector::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::{MetricQuery, UpdatesResponse},
};
use crate::metric::{MetricKind, MetricRecord};

/// Parse a JSON body, mapping any failure to 400
fn parse_json<T: DeserializeOwned>(body: &Bytes) -> ApiResult<T> {
    Ok(serde_json::from_slice(body)?)
}

fn parse_kind(kind: &str) -> ApiResult<MetricKind> {
    kind.parse()
        .map_err(|e| ApiError::InvalidRequest(format!("{e}")))
}

/// POST /updates/
///
/// Store a batch through `mass_save`
#[instrument(skip_all)]
pub async fn update_batch(
    State(state): State<ApiState>,
    body: Bytes,
) -> ApiResult<Json<UpdatesResponse>> {
    let records: Vec<MetricRecord> = parse_json(&body)?;
    let saved = records.len();

    debug!("saving batch of {saved} metrics");
    state.storage.mass_save(records).await?;

    Ok(Json(UpdatesResponse { saved }))
}

/// POST /update/
///
/// Store one record and return the stored (aggregated) value
#[instrument(skip_all)]
pub async fn update_json(
    State(state): State<ApiState>,
    body: Bytes,
) -> ApiResult<Json<MetricRecord>> {
    let record: MetricRecord = parse_json(&body)?;
    let (id, kind) = (record.id.clone(), record.kind);

    state.storage.save(record).await?;
    Ok(Json(state.storage.find(&id, kind).await?))
}

/// POST /update/:type/:name/:value
pub async fn update_path(
    State(state): State<ApiState>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> ApiResult<&'static str> {
    let record = match parse_kind(&kind)? {
        MetricKind::Counter => {
            let delta = value
                .parse::<i64>()
                .map_err(|_| ApiError::InvalidRequest(format!("invalid counter delta: {value}")))?;
            MetricRecord::counter(name, delta)
        }
        MetricKind::Gauge => {
            let value = value
                .parse::<f64>()
                .map_err(|_| ApiError::InvalidRequest(format!("invalid gauge value: {value}")))?;
            MetricRecord::gauge(name, value)
        }
    };

    state.storage.save(record).await?;
    Ok("ok")
}

/// POST /value/
pub async fn value_json(
    State(state): State<ApiState>,
    body: Bytes,
) -> ApiResult<Json<MetricRecord>> {
    let query: MetricQuery = parse_json(&body)?;
    let kind = parse_kind(&query.kind)?;

    Ok(Json(state.storage.find(&query.id, kind).await?))
}

/// GET /value/:type/:name
///
/// Plain-text formatted value
pub async fn value_path(
    State(state): State<ApiState>,
    Path((kind, name)): Path<(String, String)>,
) -> ApiResult<String> {
    let kind = parse_kind(&kind)?;
    let record = state.storage.find(&name, kind).await?;

    record
        .formatted_value()
        .ok_or_else(|| ApiError::Internal(format!("stored {kind} {name} has no value")))
}

/// GET /
///
/// All metrics with their formatted values, sorted by name
pub async fn list_all(State(state): State<ApiState>) -> ApiResult<Json<BTreeMap<String, String>>> {
    Ok(Json(state.storage.get().await?))
}
