//! Undo the agent's payload encoding before the handlers see the body
//!
//! Order: RSA decrypt (private key configured) → gunzip
//! (`Content-Encoding: gzip`) → HMAC check (secret configured).

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::header::{CONTENT_ENCODING, CONTENT_LENGTH},
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

use crate::codec::{self, SIGNATURE_HEADER};
use crate::collector::api::{error::ApiError, state::DecodeKeys};

/// Upper bound for an encoded request body
pub const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Decoding middleware
pub async fn decode_middleware(
    State(keys): State<DecodeKeys>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let (mut parts, body) = request.into_parts();

    let gzipped = parts
        .headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("gzip"));

    if keys.private_key.is_none() && keys.secret.is_none() && !gzipped {
        return Ok(next.run(Request::from_parts(parts, body)).await);
    }

    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ApiError::InvalidRequest(format!("failed to read body: {e}")))?;

    let mut payload = bytes.to_vec();

    if let Some(key) = &keys.private_key
        && !payload.is_empty()
    {
        payload = codec::decrypt(key, &payload).map_err(|e| {
            warn!("failed to decrypt request body: {e}");
            ApiError::from(e)
        })?;
    }

    if gzipped {
        payload = codec::gunzip(&payload)?;
        parts.headers.remove(CONTENT_ENCODING);
    }

    if let Some(secret) = &keys.secret {
        let signature = parts
            .headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ApiError::BadSignature("missing signature".to_string()))?;

        codec::verify(secret.as_bytes(), &payload, signature).map_err(|e| {
            warn!("rejecting request: {e}");
            ApiError::from(e)
        })?;
    }

    debug!("decoded request body ({} bytes)", payload.len());

    parts.headers.remove(CONTENT_LENGTH);
    let request = Request::from_parts(parts, Body::from(Bytes::from(payload)));
    Ok(next.run(request).await)
}
