//! API response types

use serde::{Deserialize, Serialize};

/// Response for `GET /ping`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthResponse {
    pub status: String,

    /// Active storage backend (`memory`, `file`, `database`)
    pub backend: String,

    pub timestamp: String,

    pub uptime_secs: i64,
}

/// Response for `POST /updates/`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdatesResponse {
    pub saved: usize,
}

/// Body of `POST /value/`: identity only, payload fields are ignored
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricQuery {
    pub id: String,

    #[serde(rename = "type")]
    pub kind: String,
}
