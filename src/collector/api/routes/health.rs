//! Health check endpoint

use axum::{Json, extract::State};
use chrono::Utc;

use crate::collector::api::{error::ApiResult, state::ApiState, types::HealthResponse};

/// GET /ping
///
/// Pings the storage backend; a failing database yields 500
pub async fn ping(State(state): State<ApiState>) -> ApiResult<Json<HealthResponse>> {
    state.storage.ping().await?;

    let now = Utc::now();
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        backend: state.storage.describe().to_string(),
        timestamp: now.to_rfc3339(),
        uptime_secs: (now - state.started_at).num_seconds(),
    }))
}
