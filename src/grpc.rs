//! gRPC transport (feature `grpc`)
//!
//! The protobuf definitions are in `proto/metrics.proto` and code-generated
//! via `tonic-build`. This module holds the generated types, conversions to
//! and from [`MetricRecord`], and the collector's `UpdateMetric` service.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tonic::transport::server::TcpIncoming;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info, instrument};

use crate::metric::{MetricRecord, ValidationError};
use crate::storage::{StorageBackend, StorageError};

pub mod proto {
    tonic::include_proto!("relay.v1");
}

use proto::metrics_server::{Metrics, MetricsServer};
use proto::{UpdateMetricRequest, UpdateMetricResponse};

impl From<&MetricRecord> for proto::Metric {
    fn from(record: &MetricRecord) -> Self {
        Self {
            id: record.id.clone(),
            r#type: record.kind.to_string(),
            delta: record.delta,
            value: record.value,
        }
    }
}

impl TryFrom<proto::Metric> for MetricRecord {
    type Error = ValidationError;

    fn try_from(metric: proto::Metric) -> Result<Self, Self::Error> {
        Ok(Self {
            id: metric.id,
            kind: metric.r#type.parse()?,
            delta: metric.delta,
            value: metric.value,
        })
    }
}

/// `Metrics` service backed by a storage backend
pub struct MetricsService {
    storage: Arc<dyn StorageBackend>,
}

impl MetricsService {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }
}

fn status_from(err: StorageError) -> Status {
    if err.is_validation() {
        Status::invalid_argument(err.to_string())
    } else {
        Status::internal(err.to_string())
    }
}

#[tonic::async_trait]
impl Metrics for MetricsService {
    #[instrument(skip_all)]
    async fn update_metric(
        &self,
        request: Request<UpdateMetricRequest>,
    ) -> Result<Response<UpdateMetricResponse>, Status> {
        let records = request
            .into_inner()
            .metrics
            .into_iter()
            .map(MetricRecord::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| Status::invalid_argument(e.to_string()))?;

        debug!("received {} metrics over grpc", records.len());

        self.storage.mass_save(records).await.map_err(|e| {
            error!("grpc batch rejected: {e}");
            status_from(e)
        })?;

        Ok(Response::new(UpdateMetricResponse::default()))
    }
}

/// Spawn the gRPC server
///
/// Returns the bound address (useful when binding port 0) and the server
/// task, which ends once `cancel` fires.
pub async fn spawn_grpc_server(
    bind_addr: SocketAddr,
    storage: Arc<dyn StorageBackend>,
    cancel: CancellationToken,
) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind grpc listener on {bind_addr}"))?;
    let addr = listener.local_addr()?;

    let incoming = TcpIncoming::from_listener(listener, true, None)
        .map_err(|e| anyhow::anyhow!("failed to set up grpc listener: {e}"))?;

    info!("gRPC server listening on {addr}");

    let handle = tokio::spawn(async move {
        let result = Server::builder()
            .add_service(MetricsServer::new(MetricsService::new(storage)))
            .serve_with_incoming_shutdown(incoming, cancel.cancelled_owned())
            .await;

        if let Err(e) = result {
            error!("gRPC server error: {e}");
        }
    });

    Ok((addr, handle))
}
