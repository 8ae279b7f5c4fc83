//! RPC layer
//!
//! Every node exposes one endpoint taking a `{method, params}` envelope and
//! answering `{result, error}`. Requests form a closed enum so dispatch is an
//! exhaustive `match` on both sides.
//!
//! - [`http`] - reqwest client with a per-call timeout
//! - [`loopback`] - in-process transport with fault injection

pub mod http;
pub mod loopback;

pub use http::HttpRpcClient;
pub use loopback::{Fault, LoopbackTransport};

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::cluster::NodeEntry;
use crate::core_types::{AccountId, Balance, TransactionId};
use crate::error::TxError;

// ============================================================================
// Requests / Responses
// ============================================================================

/// All RPC methods understood by the cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum RpcRequest {
    GetLogs {},
    GetBalance {},
    SetBalance {
        new_balance: Balance,
    },
    HandlePrepare {
        new_balance: Balance,
        transaction_id: TransactionId,
    },
    HandleCommit {
        transaction_id: TransactionId,
    },
    HandleAbort {
        #[serde(default)]
        transaction_id: Option<TransactionId>,
    },
    Recover {},
    Transfer {
        account_id_from: AccountId,
        account_id_to: AccountId,
        amount: Balance,
    },
    AddBonus {
        bonus_percentage: Balance,
    },
}

impl RpcRequest {
    /// Wire names of every method
    pub const METHODS: [&'static str; 9] = [
        "get_logs",
        "get_balance",
        "set_balance",
        "handle_prepare",
        "handle_commit",
        "handle_abort",
        "recover",
        "transfer",
        "add_bonus",
    ];

    pub fn method(&self) -> &'static str {
        match self {
            RpcRequest::GetLogs {} => "get_logs",
            RpcRequest::GetBalance {} => "get_balance",
            RpcRequest::SetBalance { .. } => "set_balance",
            RpcRequest::HandlePrepare { .. } => "handle_prepare",
            RpcRequest::HandleCommit { .. } => "handle_commit",
            RpcRequest::HandleAbort { .. } => "handle_abort",
            RpcRequest::Recover {} => "recover",
            RpcRequest::Transfer { .. } => "transfer",
            RpcRequest::AddBonus { .. } => "add_bonus",
        }
    }
}

/// Response envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub result: Value,
    pub error: Option<String>,
}

impl RpcResponse {
    pub fn ok(result: Value) -> Self {
        Self {
            result,
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            result: Value::Null,
            error: Some(message.into()),
        }
    }
}

/// Participant vote on a prepare request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareVote {
    #[serde(rename = "canPrepare")]
    pub can_prepare: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PrepareVote {
    pub fn yes() -> Self {
        Self {
            can_prepare: true,
            error: None,
        }
    }

    pub fn no(reason: impl Into<String>) -> Self {
        Self {
            can_prepare: false,
            error: Some(reason.into()),
        }
    }
}

/// Participant acknowledgement of a commit request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitAck {
    #[serde(rename = "canCommit")]
    pub can_commit: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Envelope parsing (server side)
// ============================================================================

/// Rejections produced before a request reaches a node
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnvelopeError {
    #[error("Malformed request body: {0}")]
    Malformed(String),

    #[error("Params must be a dictionary")]
    ParamsNotObject,

    #[error("Method '{0}' not found")]
    UnknownMethod(String),

    #[error("Invalid params for '{method}': {reason}")]
    InvalidParams { method: String, reason: String },
}

impl EnvelopeError {
    pub fn http_status(&self) -> u16 {
        match self {
            EnvelopeError::UnknownMethod(_) => 404,
            _ => 400,
        }
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    method: String,
    #[serde(default)]
    params: Value,
}

/// Decode a request body into a typed request
///
/// Missing or `null` params are treated as an empty object.
pub fn parse_envelope(body: &[u8]) -> Result<RpcRequest, EnvelopeError> {
    let raw: RawEnvelope =
        serde_json::from_slice(body).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;

    let params = match raw.params {
        Value::Null => Value::Object(Map::new()),
        obj @ Value::Object(_) => obj,
        _ => return Err(EnvelopeError::ParamsNotObject),
    };

    if !RpcRequest::METHODS.contains(&raw.method.as_str()) {
        return Err(EnvelopeError::UnknownMethod(raw.method));
    }

    let mut envelope = Map::new();
    envelope.insert("method".to_string(), Value::String(raw.method.clone()));
    envelope.insert("params".to_string(), params);

    serde_json::from_value(Value::Object(envelope)).map_err(|e| EnvelopeError::InvalidParams {
        method: raw.method,
        reason: e.to_string(),
    })
}

// ============================================================================
// Client / Handler seams
// ============================================================================

/// Transport failures seen by the caller
#[derive(Error, Debug, Clone)]
pub enum RpcError {
    #[error("RPC call to {target} timed out after {after:?}")]
    Timeout { target: String, after: Duration },

    #[error("RPC call to {target} failed: {reason}")]
    Transport { target: String, reason: String },

    #[error("RPC call to {target} returned {status}: {message}")]
    Remote {
        target: String,
        status: u16,
        message: String,
    },

    #[error("RPC call to {target} returned an undecodable result: {reason}")]
    Decode { target: String, reason: String },
}

impl RpcError {
    pub fn target(&self) -> &str {
        match self {
            RpcError::Timeout { target, .. }
            | RpcError::Transport { target, .. }
            | RpcError::Remote { target, .. }
            | RpcError::Decode { target, .. } => target,
        }
    }

    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcError::Timeout { .. })
    }
}

/// Synchronous call-with-timeout to another node
///
/// Implementations never retry; a timeout surfaces as [`RpcError::Timeout`].
#[async_trait]
pub trait RpcClient: Send + Sync {
    async fn invoke(&self, target: &NodeEntry, request: RpcRequest) -> Result<Value, RpcError>;
}

/// Invoke and decode the `result` field
pub async fn call<T: DeserializeOwned>(
    client: &dyn RpcClient,
    target: &NodeEntry,
    request: RpcRequest,
) -> Result<T, RpcError> {
    let result = client.invoke(target, request).await?;
    serde_json::from_value(result).map_err(|e| RpcError::Decode {
        target: target.server_id.clone(),
        reason: e.to_string(),
    })
}

/// Server side of a node: one exhaustive dispatch over [`RpcRequest`]
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(&self, request: RpcRequest) -> Result<Value, TxError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_parse_prepare() {
        let body = br#"{"method": "handle_prepare", "params": {"new_balance": 400.5, "transaction_id": 7}}"#;
        let req = parse_envelope(body).unwrap();
        assert_eq!(
            req,
            RpcRequest::HandlePrepare {
                new_balance: Decimal::new(4005, 1),
                transaction_id: 7,
            }
        );
        assert_eq!(req.method(), "handle_prepare");
    }

    #[test]
    fn test_parse_missing_params_as_empty() {
        let req = parse_envelope(br#"{"method": "get_balance"}"#).unwrap();
        assert_eq!(req, RpcRequest::GetBalance {});

        let req = parse_envelope(br#"{"method": "handle_abort", "params": null}"#).unwrap();
        assert_eq!(
            req,
            RpcRequest::HandleAbort {
                transaction_id: None
            }
        );
    }

    #[test]
    fn test_parse_rejections() {
        assert_eq!(
            parse_envelope(br#"{"method": "drop_tables", "params": {}}"#),
            Err(EnvelopeError::UnknownMethod("drop_tables".into()))
        );
        assert_eq!(
            parse_envelope(br#"{"method": "get_logs", "params": [1, 2]}"#),
            Err(EnvelopeError::ParamsNotObject)
        );
        assert!(matches!(
            parse_envelope(br#"{"method": "handle_commit", "params": {}}"#),
            Err(EnvelopeError::InvalidParams { .. })
        ));
        assert!(matches!(
            parse_envelope(b"not json"),
            Err(EnvelopeError::Malformed(_))
        ));

        assert_eq!(
            EnvelopeError::UnknownMethod("x".into()).http_status(),
            404
        );
        assert_eq!(EnvelopeError::ParamsNotObject.http_status(), 400);
    }

    #[test]
    fn test_request_serializes_as_envelope() {
        let req = RpcRequest::Transfer {
            account_id_from: "A".into(),
            account_id_to: "B".into(),
            amount: Decimal::new(100, 0),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["method"], "transfer");
        assert_eq!(json["params"]["account_id_from"], "A");

        let json = serde_json::to_value(RpcRequest::GetLogs {}).unwrap();
        assert_eq!(json["method"], "get_logs");
        assert!(json["params"].as_object().unwrap().is_empty());
    }

    #[test]
    fn test_vote_wire_names() {
        let json = serde_json::to_value(PrepareVote::no("Insufficient funds")).unwrap();
        assert_eq!(json["canPrepare"], false);
        assert_eq!(json["error"], "Insufficient funds");

        let ack: CommitAck = serde_json::from_str(r#"{"canCommit": true}"#).unwrap();
        assert!(ack.can_commit);
        assert!(ack.error.is_none());
    }
}
