//! Payload encoding shared by the agent and the collector
//!
//! Outgoing batches go through: JSON → HMAC-SHA256 signature (over the
//! uncompressed JSON) → gzip → optional RSA/PKCS#1 v1.5 encryption. The
//! collector undoes the steps in reverse order.
//!
//! RSA works on fixed-size blocks, so the payload is split into chunks of
//! `key_size - 11` bytes before encryption and into `key_size` byte blocks
//! before decryption.

use std::io::{Read, Write};
use std::path::Path;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use hmac::{Hmac, Mac};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use tracing::trace;

use crate::metric::MetricRecord;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex-encoded signature
pub const SIGNATURE_HEADER: &str = "HashSHA256";

/// PKCS#1 v1.5 padding overhead per block
const PKCS1_PADDING: usize = 11;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to serialize payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("compression failed: {0}")]
    Compression(#[source] std::io::Error),

    #[error("failed to read key file {path}: {source}")]
    KeyFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("encryption failed: {0}")]
    Crypto(#[from] rsa::Error),

    #[error("signature is not valid hex")]
    MalformedSignature,

    #[error("signature mismatch")]
    SignatureMismatch,
}

/// A batch ready to go on the wire
#[derive(Debug, Clone)]
pub struct EncodedPayload {
    pub body: Vec<u8>,

    /// Hex HMAC of the JSON body, present when a secret is configured
    pub signature: Option<String>,
}

/// Serialize, sign, compress and optionally encrypt a batch
pub fn encode_payload(
    records: &[MetricRecord],
    secret: Option<&str>,
    public_key: Option<&RsaPublicKey>,
) -> Result<EncodedPayload, CodecError> {
    let json = serde_json::to_vec(records)?;

    let signature = secret
        .filter(|secret| !secret.is_empty())
        .map(|secret| sign(secret.as_bytes(), &json));

    let mut body = gzip(&json)?;
    if let Some(key) = public_key {
        body = encrypt(key, &body)?;
    }

    trace!(
        "encoded {} records into {} bytes (signed: {})",
        records.len(),
        body.len(),
        signature.is_some()
    );

    Ok(EncodedPayload { body, signature })
}

/// Hex-encoded HMAC-SHA256 of `data`
pub fn sign(secret: &[u8], data: &[u8]) -> String {
    let mut mac = hmac_for(secret);
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

/// Check a hex signature in constant time
pub fn verify(secret: &[u8], data: &[u8], signature: &str) -> Result<(), CodecError> {
    let expected = hex::decode(signature.trim()).map_err(|_| CodecError::MalformedSignature)?;

    let mut mac = hmac_for(secret);
    mac.update(data);
    mac.verify_slice(&expected)
        .map_err(|_| CodecError::SignatureMismatch)
}

fn hmac_for(secret: &[u8]) -> HmacSha256 {
    // HMAC accepts keys of any length
    match <HmacSha256 as Mac>::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => unreachable!("hmac key length is unrestricted"),
    }
}

pub fn gzip(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(CodecError::Compression)?;
    encoder.finish().map_err(CodecError::Compression)
}

pub fn gunzip(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(CodecError::Compression)?;
    Ok(out)
}

/// Encrypt with PKCS#1 v1.5 in chunks of `key_size - 11` bytes
pub fn encrypt(key: &RsaPublicKey, data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let step = key.size().saturating_sub(PKCS1_PADDING);
    if step == 0 {
        return Err(CodecError::InvalidKey("key too small".to_string()));
    }

    let mut rng = rand::thread_rng();
    let mut out = Vec::with_capacity(data.len().div_ceil(step) * key.size());
    for chunk in data.chunks(step) {
        out.extend(key.encrypt(&mut rng, Pkcs1v15Encrypt, chunk)?);
    }

    Ok(out)
}

/// Decrypt `key_size` byte blocks produced by [`encrypt`]
pub fn decrypt(key: &RsaPrivateKey, data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let step = key.size();
    let mut out = Vec::with_capacity(data.len());
    for block in data.chunks(step) {
        out.extend(key.decrypt(Pkcs1v15Encrypt, block)?);
    }

    Ok(out)
}

/// Parse a PEM-encoded SubjectPublicKeyInfo RSA key
pub fn parse_public_key(pem: &str) -> Result<RsaPublicKey, CodecError> {
    RsaPublicKey::from_public_key_pem(pem).map_err(|e| CodecError::InvalidKey(e.to_string()))
}

/// Parse a PEM-encoded RSA private key (PKCS#1, falling back to PKCS#8)
pub fn parse_private_key(pem: &str) -> Result<RsaPrivateKey, CodecError> {
    RsaPrivateKey::from_pkcs1_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
        .map_err(|e| CodecError::InvalidKey(e.to_string()))
}

pub fn load_public_key(path: &Path) -> Result<RsaPublicKey, CodecError> {
    parse_public_key(&read_key_file(path)?)
}

pub fn load_private_key(path: &Path) -> Result<RsaPrivateKey, CodecError> {
    parse_private_key(&read_key_file(path)?)
}

fn read_key_file(path: &Path) -> Result<String, CodecError> {
    std::fs::read_to_string(path).map_err(|source| CodecError::KeyFile {
        path: path.display().to_string(),
        source,
    })
}
