//! Trusted subnet middleware

use std::net::IpAddr;

use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::collector::api::error::ApiError;
use crate::net::{REAL_IP_HEADER, TrustedSubnet};

/// Reject requests whose `X-Real-IP` is missing or outside `subnet`
pub async fn trusted_subnet_middleware(
    State(subnet): State<TrustedSubnet>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(REAL_IP_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Forbidden(format!("missing {REAL_IP_HEADER} header")))?;

    let ip: IpAddr = header
        .trim()
        .parse()
        .map_err(|_| ApiError::Forbidden(format!("malformed {REAL_IP_HEADER} header")))?;

    if !subnet.contains(ip) {
        warn!("rejected request from {ip}: outside {subnet}");
        return Err(ApiError::Forbidden(format!("{ip} is not trusted")));
    }

    Ok(next.run(request).await)
}
