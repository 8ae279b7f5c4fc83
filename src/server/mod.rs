//! HTTP front of a node
//!
//! `POST /rpc` takes the `{method, params}` envelope and answers
//! `{result, error}`. `GET /health` reports the node identity.

pub mod handlers;
pub mod state;

pub use state::AppState;

use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tracing::info;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/rpc", post(handlers::rpc_handler))
        .route("/health", get(handlers::health_check))
        .with_state(Arc::new(state))
}

/// Serve on an already bound listener until the process exits
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!(server_id = %state.server_id, role = state.role, %addr, "Node listening");
    axum::serve(listener, router(state))
        .await
        .context("Server error")
}

pub async fn run_server(host: &str, port: u16, state: AppState) -> anyhow::Result<()> {
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    serve(listener, state).await
}
