//! HTTP RPC client
//!
//! POSTs the request envelope to `http://{ip}:{port}/rpc` with a fixed
//! timeout. No retries: the caller decides what silence means.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::trace;

use super::{RpcClient, RpcError, RpcRequest, RpcResponse};
use crate::cluster::NodeEntry;
use crate::logging::RPC_TRACE_TARGET;

pub struct HttpRpcClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpRpcClient {
    pub fn new(timeout: Duration) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::Transport {
                target: "<client>".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn map_err(&self, target: &NodeEntry, e: reqwest::Error) -> RpcError {
        if e.is_timeout() {
            RpcError::Timeout {
                target: target.server_id.clone(),
                after: self.timeout,
            }
        } else {
            RpcError::Transport {
                target: target.server_id.clone(),
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl RpcClient for HttpRpcClient {
    async fn invoke(&self, target: &NodeEntry, request: RpcRequest) -> Result<Value, RpcError> {
        let method = request.method();
        trace!(target: RPC_TRACE_TARGET, server_id = %target.server_id, method, "→ request");

        let response = self
            .client
            .post(target.rpc_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_err(target, e))?;

        let status = response.status();
        let envelope: RpcResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                self.map_err(target, e)
            } else {
                RpcError::Decode {
                    target: target.server_id.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        trace!(
            target: RPC_TRACE_TARGET,
            server_id = %target.server_id,
            method,
            status = status.as_u16(),
            "← response"
        );

        match envelope.error {
            Some(message) => Err(RpcError::Remote {
                target: target.server_id.clone(),
                status: status.as_u16(),
                message,
            }),
            None if !status.is_success() => Err(RpcError::Remote {
                target: target.server_id.clone(),
                status: status.as_u16(),
                message: status.to_string(),
            }),
            None => Ok(envelope.result),
        }
    }
}
