//! In-process transport
//!
//! Routes calls straight to registered [`RpcHandler`]s, round-tripping every
//! request through its JSON form like the HTTP path does. Faults can be
//! injected per node or per (node, method) to simulate slow or dead peers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use super::{RpcClient, RpcError, RpcHandler, RpcRequest};
use crate::cluster::NodeEntry;
use crate::core_types::ServerId;

/// Injected failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Call fails with [`RpcError::Timeout`] without reaching the node
    Timeout,
    /// Call fails with a transport error without reaching the node
    Unreachable,
    /// Call reaches the node after the given delay (subject to the transport timeout)
    Delay(Duration),
}

type FaultKey = (ServerId, Option<&'static str>);

pub struct LoopbackTransport {
    nodes: DashMap<ServerId, Arc<dyn RpcHandler>>,
    faults: DashMap<FaultKey, Fault>,
    calls: DashMap<(ServerId, &'static str), usize>,
    timeout: Duration,
}

impl LoopbackTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            nodes: DashMap::new(),
            faults: DashMap::new(),
            calls: DashMap::new(),
            timeout,
        }
    }

    /// Register (or replace, e.g. after a simulated restart) a node
    pub fn register(&self, server_id: &str, handler: Arc<dyn RpcHandler>) {
        self.nodes.insert(server_id.to_string(), handler);
    }

    /// Fail every call to `server_id`
    pub fn fail_node(&self, server_id: &str, fault: Fault) {
        self.faults.insert((server_id.to_string(), None), fault);
    }

    /// Fail only calls of `method` to `server_id`
    pub fn fail_method(&self, server_id: &str, method: &'static str, fault: Fault) {
        self.faults
            .insert((server_id.to_string(), Some(method)), fault);
    }

    pub fn heal(&self, server_id: &str) {
        self.faults.retain(|(id, _), _| id != server_id);
    }

    /// Calls of `method` that reached `server_id`
    pub fn call_count(&self, server_id: &str, method: &'static str) -> usize {
        self.calls
            .get(&(server_id.to_string(), method))
            .map(|c| *c)
            .unwrap_or(0)
    }

    fn fault_for(&self, server_id: &str, method: &'static str) -> Option<Fault> {
        self.faults
            .get(&(server_id.to_string(), Some(method)))
            .or_else(|| self.faults.get(&(server_id.to_string(), None)))
            .map(|f| *f)
    }
}

#[async_trait]
impl RpcClient for LoopbackTransport {
    async fn invoke(&self, target: &NodeEntry, request: RpcRequest) -> Result<Value, RpcError> {
        let server_id = target.server_id.clone();
        let method = request.method();

        let delay = match self.fault_for(&server_id, method) {
            Some(Fault::Timeout) => {
                debug!(server_id = %server_id, method, "Injected timeout");
                return Err(RpcError::Timeout {
                    target: server_id,
                    after: self.timeout,
                });
            }
            Some(Fault::Unreachable) => {
                debug!(server_id = %server_id, method, "Injected unreachable");
                return Err(RpcError::Transport {
                    target: server_id,
                    reason: "connection refused".to_string(),
                });
            }
            Some(Fault::Delay(d)) => Some(d),
            None => None,
        };

        let handler = self
            .nodes
            .get(&server_id)
            .map(|h| Arc::clone(h.value()))
            .ok_or_else(|| RpcError::Transport {
                target: server_id.clone(),
                reason: "no such node".to_string(),
            })?;

        // mirror the wire encoding
        let wire = serde_json::to_value(&request)
            .and_then(serde_json::from_value::<RpcRequest>)
            .map_err(|e| RpcError::Decode {
                target: server_id.clone(),
                reason: e.to_string(),
            })?;

        *self.calls.entry((server_id.clone(), method)).or_insert(0) += 1;

        let call = async {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            handler.handle(wire).await
        };

        match tokio::time::timeout(self.timeout, call).await {
            Err(_) => Err(RpcError::Timeout {
                target: server_id,
                after: self.timeout,
            }),
            Ok(Err(e)) => Err(RpcError::Remote {
                target: server_id,
                status: e.http_status(),
                message: e.to_string(),
            }),
            Ok(Ok(result)) => Ok(result),
        }
    }
}
