//! Server end of the tunnel hop.
//!
//! # Responsibilities
//! - Accept one aggregated `POST /proxy` per tunnelled message
//! - Take the destination from the Host header
//! - Key the pooled connection by (origin address, destination)
//! - Return the destination's reply frame as the response body
//!
//! Failures carry no body. Retrying is left to whatever sits above the tunnel.

use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
};

use crate::error::{Result, TunnelError};
use crate::observability::metrics;
use crate::pool::{ConnectionId, ConnectionMultiplexer};
use crate::protocol::{self, Endpoint};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub multiplexer: ConnectionMultiplexer,
}

/// HTTP status for a failed tunnel exchange.
pub fn status_for(error: &TunnelError) -> StatusCode {
    match error {
        TunnelError::InvalidRequest(_) | TunnelError::InvalidEndpoint(_) => StatusCode::BAD_REQUEST,
        TunnelError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        TunnelError::PoolExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
        TunnelError::ConcurrencyViolation { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        TunnelError::ConnectionFailure(_)
        | TunnelError::Io(_)
        | TunnelError::Protocol(_)
        | TunnelError::Tls(_)
        | TunnelError::Closed => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for TunnelError {
    fn into_response(self) -> Response {
        status_for(&self).into_response()
    }
}

/// `POST /proxy` handler.
pub async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(origin): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Response {
    let start = Instant::now();
    let request_id = headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let response = match terminate(&state, origin, &headers, &uri, body).await {
        Ok(reply) => {
            tracing::debug!(request_id = %request_id, origin = %origin, bytes = reply.len(), "Tunnel exchange complete");
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, protocol::CONTENT_TYPE)],
                reply,
            )
                .into_response()
        }
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                tracing::warn!(request_id = %request_id, origin = %origin, status = status.as_u16(), error = %e, "Tunnel exchange failed");
            } else {
                tracing::debug!(request_id = %request_id, origin = %origin, error = %e, "Rejected tunnel request");
            }
            e.into_response()
        }
    };

    metrics::record_request(response.status().as_u16(), start);
    response
}

async fn terminate(
    state: &AppState,
    origin: SocketAddr,
    headers: &HeaderMap,
    uri: &Uri,
    body: Bytes,
) -> Result<Bytes> {
    let destination = destination(headers, uri)?;
    protocol::validate_frame(&body)?;

    let id = ConnectionId::new(origin, destination);
    state.multiplexer.send(id, body).await
}

/// Destination from the Host header, falling back to the request authority.
fn destination(headers: &HeaderMap, uri: &Uri) -> Result<Endpoint> {
    let host = match headers.get(header::HOST) {
        Some(value) => value
            .to_str()
            .map_err(|_| TunnelError::InvalidRequest("Host header is not ASCII".into()))?,
        None => uri
            .authority()
            .map(|a| a.as_str())
            .ok_or_else(|| TunnelError::InvalidRequest("missing Host header".into()))?,
    };
    host.parse::<Endpoint>()
        .map_err(|_| TunnelError::InvalidRequest(format!("Host {host:?} is not host:port")))
}
