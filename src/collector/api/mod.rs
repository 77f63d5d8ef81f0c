//! HTTP API of the collector
//!
//! ## Architecture
//!
//! - **Axum** web framework with Tower middleware
//! - **Decode middleware** on the POST routes undoes the agent's encoding
//!   (decrypt, gunzip, signature check)
//! - **Trusted subnet middleware** (optional) rejects agents whose
//!   `X-Real-IP` falls outside the configured block; `/ping` stays open
//! - **Compression** of responses for clients sending `Accept-Encoding: gzip`
//! - **Storage** is the only shared state
//!
//! ## Endpoints
//!
//! - `POST /updates/` - Store a batch of records
//! - `POST /update/` - Store one record (JSON)
//! - `POST /update/:type/:name/:value` - Store one record (path)
//! - `POST /value/` - Look up one record (JSON)
//! - `GET /value/:type/:name` - Look up one formatted value
//! - `GET /` - All formatted values
//! - `GET /ping` - Storage health check

pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod types;

pub use error::{ApiError, ApiResult};
pub use state::{ApiState, DecodeKeys};
pub use types::{HealthResponse, MetricQuery, UpdatesResponse};

use std::net::SocketAddr;

use anyhow::Context;
use axum::{
    Router,
    routing::{get, post},
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};
use tracing::{error, info};

/// Build the router without binding it
pub fn router(state: ApiState, keys: DecodeKeys) -> Router {
    let encoded = Router::new()
        .route("/updates/", post(routes::metrics::update_batch))
        .route("/update/", post(routes::metrics::update_json))
        .route("/value/", post(routes::metrics::value_json))
        .route_layer(axum::middleware::from_fn_with_state(
            keys,
            middleware::decode::decode_middleware,
        ));

    let mut metrics = Router::new()
        .route("/", get(routes::metrics::list_all))
        .route("/value/:type/:name", get(routes::metrics::value_path))
        .route(
            "/update/:type/:name/:value",
            post(routes::metrics::update_path),
        )
        .merge(encoded);

    // checked before decoding so untrusted bodies are never read
    if let Some(subnet) = state.trusted_subnet {
        metrics = metrics.route_layer(axum::middleware::from_fn_with_state(
            subnet,
            middleware::trusted::trusted_subnet_middleware,
        ));
    }

    Router::new()
        .route("/ping", get(routes::health::ping))
        .merge(metrics)
        .with_state(state)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// Spawn the API server
///
/// This starts an Axum HTTP server in a background task that shuts down
/// gracefully once `cancel` fires. Returns the server's local address.
pub async fn spawn_api_server(
    bind_addr: SocketAddr,
    state: ApiState,
    keys: DecodeKeys,
    cancel: CancellationToken,
) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let app = router(state, keys);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {bind_addr}"))?;
    let addr = listener.local_addr()?;

    info!("API server listening on {addr}");

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
        {
            error!("API server error: {e}");
        }
    });

    Ok((addr, handle))
}
