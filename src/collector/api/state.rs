//! API shared state

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rsa::RsaPrivateKey;

use crate::net::TrustedSubnet;
use crate::storage::StorageBackend;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Backend every handler reads from and writes to
    pub storage: Arc<dyn StorageBackend>,

    pub started_at: DateTime<Utc>,

    /// When set, metric routes only accept agents inside this block
    pub trusted_subnet: Option<TrustedSubnet>,
}

impl ApiState {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            storage,
            started_at: Utc::now(),
            trusted_subnet: None,
        }
    }

    pub fn with_trusted_subnet(mut self, subnet: Option<TrustedSubnet>) -> Self {
        self.trusted_subnet = subnet;
        self
    }
}

/// Secrets used to undo the agent's payload encoding
#[derive(Clone, Default)]
pub struct DecodeKeys {
    /// HMAC secret; when set every decoded request must carry a valid signature
    pub secret: Option<String>,

    /// RSA private key; when set request bodies are decrypted first
    pub private_key: Option<Arc<RsaPrivateKey>>,
}

impl DecodeKeys {
    pub fn new(secret: Option<String>, private_key: Option<RsaPrivateKey>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
            private_key: private_key.map(Arc::new),
        }
    }
}
