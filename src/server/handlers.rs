//! RPC and health handlers

use std::sync::Arc;

use axum::{Json, body::Bytes, extract::State, http::StatusCode};
use serde::Serialize;
use tracing::{error, trace, warn};

use super::state::AppState;
use crate::logging::RPC_TRACE_TARGET;
use crate::rpc::{RpcResponse, parse_envelope};

fn status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Single RPC endpoint
///
/// - Unknown method: 404
/// - Malformed body or non-object params: 400
/// - Handler error: 500 (or the error's own status) with an error envelope
pub async fn rpc_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> (StatusCode, Json<RpcResponse>) {
    let request = match parse_envelope(&body) {
        Ok(request) => request,
        Err(e) => {
            warn!(server_id = %state.server_id, error = %e, "Rejected RPC envelope");
            return (status(e.http_status()), Json(RpcResponse::err(e.to_string())));
        }
    };

    let method = request.method();
    trace!(target: RPC_TRACE_TARGET, server_id = %state.server_id, method, ?request, "RPC in");

    match state.handler.handle(request).await {
        Ok(result) => {
            trace!(target: RPC_TRACE_TARGET, server_id = %state.server_id, method, %result, "RPC out");
            (StatusCode::OK, Json(RpcResponse::ok(result)))
        }
        Err(e) => {
            error!(server_id = %state.server_id, method, code = e.code(), error = %e, "RPC handler failed");
            (status(e.http_status()), Json(RpcResponse::err(e.to_string())))
        }
    }
}

/// Health check response data
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub server_id: String,
    pub role: &'static str,
    pub build: &'static str,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        server_id: state.server_id.clone(),
        role: state.role,
        build: env!("GIT_HASH"),
    })
}
