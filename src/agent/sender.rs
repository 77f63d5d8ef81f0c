//! Transports that deliver a batch to the collector
//!
//! The worker pool only sees the [`Sender`] trait: one request per batch,
//! plus a classifier telling it which failures deserve a retry.

use std::error::Error as StdError;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use rsa::RsaPublicKey;
use tracing::{debug, instrument, warn};

use crate::codec::{self, CodecError, SIGNATURE_HEADER};
use crate::metric::MetricRecord;
use crate::net::{self, REAL_IP_HEADER};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("failed to encode payload: {0}")]
    Encode(#[from] CodecError),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("collector responded with status {0}")]
    Status(u16),

    #[error("grpc request failed: {0}")]
    Grpc(String),
}

/// Delivery capability used by the worker pool
#[async_trait]
pub trait Sender: Send + Sync {
    /// Deliver one batch
    async fn request(&self, records: &[MetricRecord]) -> Result<(), SendError>;

    /// Whether the failure means the collector could not be reached at all
    fn is_conn_refused(&self, err: &SendError) -> bool;
}

/// Prefix a bare `host:port` with `http://`
pub(crate) fn base_url(address: &str) -> String {
    let address = address.trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{address}")
    }
}

/// Walk the source chain looking for a refused TCP connect
fn chain_has_refused(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);

    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>()
            && io_err.kind() == io::ErrorKind::ConnectionRefused
        {
            return true;
        }

        if e.to_string().to_lowercase().contains("connection refused") {
            return true;
        }

        current = e.source();
    }

    false
}

/// JSON over HTTP: `POST {address}/updates/`
///
/// The body is gzipped and, with a public key, RSA encrypted. With a secret
/// the `HashSHA256` header carries the HMAC of the uncompressed JSON.
/// `X-Real-IP` carries the local address used to reach the collector.
pub struct HttpSender {
    client: reqwest::Client,
    url: String,
    secret: Option<String>,
    public_key: Option<RsaPublicKey>,
    real_ip: Option<String>,
}

impl HttpSender {
    pub fn new(
        address: &str,
        secret: Option<String>,
        public_key: Option<RsaPublicKey>,
    ) -> Result<Self, SendError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let real_ip = match net::local_ip_for(address) {
            Ok(ip) => Some(ip.to_string()),
            Err(e) => {
                warn!("could not determine local address for {address}: {e}");
                None
            }
        };

        Ok(Self {
            client,
            url: format!("{}/updates/", base_url(address)),
            secret: secret.filter(|s| !s.is_empty()),
            public_key,
            real_ip,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Sender for HttpSender {
    #[instrument(skip_all, fields(url = %self.url, count = records.len()))]
    async fn request(&self, records: &[MetricRecord]) -> Result<(), SendError> {
        let payload =
            codec::encode_payload(records, self.secret.as_deref(), self.public_key.as_ref())?;

        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_ENCODING, "gzip");

        if let Some(signature) = payload.signature {
            request = request.header(SIGNATURE_HEADER, signature);
        }
        if let Some(ip) = &self.real_ip {
            request = request.header(REAL_IP_HEADER, ip);
        }

        let response = request.body(payload.body).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SendError::Status(status.as_u16()));
        }

        debug!("batch delivered ({status})");
        Ok(())
    }

    fn is_conn_refused(&self, err: &SendError) -> bool {
        match err {
            SendError::Transport(e) => e.is_connect() && chain_has_refused(e),
            _ => false,
        }
    }
}

#[cfg(feature = "grpc")]
pub use grpc::GrpcSender;

#[cfg(feature = "grpc")]
mod grpc {
    use async_trait::async_trait;
    use tonic::transport::{Channel, Endpoint};
    use tracing::{debug, instrument};

    use super::{SendError, Sender, base_url};
    use crate::grpc::proto::UpdateMetricRequest;
    use crate::grpc::proto::metrics_client::MetricsClient;
    use crate::metric::MetricRecord;

    /// `UpdateMetric` unary call over a lazily connected channel
    pub struct GrpcSender {
        client: MetricsClient<Channel>,
    }

    impl GrpcSender {
        pub fn new(address: &str) -> Result<Self, SendError> {
            let channel = Endpoint::from_shared(base_url(address))
                .map_err(|e| SendError::Grpc(e.to_string()))?
                .timeout(super::REQUEST_TIMEOUT)
                .connect_lazy();

            Ok(Self {
                client: MetricsClient::new(channel),
            })
        }
    }

    #[async_trait]
    impl Sender for GrpcSender {
        #[instrument(skip_all, fields(count = records.len()))]
        async fn request(&self, records: &[MetricRecord]) -> Result<(), SendError> {
            let request = UpdateMetricRequest {
                metrics: records.iter().map(Into::into).collect(),
            };

            let response = self
                .client
                .clone()
                .update_metric(request)
                .await
                .map_err(|status| SendError::Grpc(format!("{status:?}")))?
                .into_inner();

            if !response.error.is_empty() {
                return Err(SendError::Grpc(response.error));
            }

            debug!("batch delivered over grpc");
            Ok(())
        }

        fn is_conn_refused(&self, err: &SendError) -> bool {
            matches!(err, SendError::Grpc(msg) if msg.to_lowercase().contains("connection refused"))
        }
    }
}
