//! Error Types
//!
//! `TxError` is the protocol-level taxonomy shared by coordinator and
//! participant handlers. `StorageError` covers the ledger and event log.

use thiserror::Error;

use crate::core_types::{AccountId, Balance, TransactionId};
use crate::rpc::RpcError;

/// Ledger / event log failures
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Transaction protocol errors
///
/// Error codes are stable strings so they can travel inside RPC error envelopes.
#[derive(Error, Debug, Clone)]
pub enum TxError {
    // === Vote / validation errors ===
    #[error("Insufficient funds: account {account} cannot hold {proposed}")]
    InsufficientFunds {
        account: AccountId,
        proposed: Balance,
    },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Account {account} already has transaction {pending} pending")]
    PendingConflict {
        account: AccountId,
        pending: TransactionId,
    },

    // === Stale messages ===
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    // === Transport errors ===
    #[error("RPC to {target} timed out")]
    RpcTimeout { target: String },

    #[error("RPC to {target} failed: {reason}")]
    RpcFailure { target: String, reason: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not supported by this node: {0}")]
    MethodNotSupported(String),

    // === System errors ===
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TxError {
    /// Get the error code for error envelopes and logs
    pub fn code(&self) -> &'static str {
        match self {
            TxError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            TxError::InvalidAmount(_) => "INVALID_AMOUNT",
            TxError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            TxError::PendingConflict { .. } => "PENDING_CONFLICT",
            TxError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            TxError::RpcTimeout { .. } => "RPC_TIMEOUT",
            TxError::RpcFailure { .. } => "RPC_FAILURE",
            TxError::InvalidRequest(_) => "INVALID_REQUEST",
            TxError::MethodNotSupported(_) => "METHOD_NOT_FOUND",
            TxError::Storage(_) => "STORAGE_ERROR",
            TxError::Encoding(_) => "ENCODING_ERROR",
            TxError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get HTTP status code for the RPC envelope
    pub fn http_status(&self) -> u16 {
        match self {
            TxError::MethodNotSupported(_) => 404,
            TxError::InvalidRequest(_) | TxError::InvalidAmount(_) => 400,
            TxError::RpcTimeout { .. } => 504,
            TxError::RpcFailure { .. } => 502,
            TxError::InsufficientFunds { .. }
            | TxError::AccountNotFound(_)
            | TxError::PendingConflict { .. }
            | TxError::TransactionNotFound(_)
            | TxError::Storage(_)
            | TxError::Encoding(_)
            | TxError::Internal(_) => 500,
        }
    }

    /// Whether this error is the distinguishable timeout failure
    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, TxError::RpcTimeout { .. })
    }
}

impl From<StorageError> for TxError {
    fn from(e: StorageError) -> Self {
        TxError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for TxError {
    fn from(e: serde_json::Error) -> Self {
        TxError::Encoding(e.to_string())
    }
}

impl From<RpcError> for TxError {
    fn from(e: RpcError) -> Self {
        match e {
            RpcError::Timeout { target, .. } => TxError::RpcTimeout { target },
            other => TxError::RpcFailure {
                target: other.target().to_string(),
                reason: other.to_string(),
            },
        }
    }
}
