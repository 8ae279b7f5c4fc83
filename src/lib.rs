//! twopc_ledger - Two-Phase Commit Balance Transfers
//!
//! A coordinator and one participant per account, talking JSON over HTTP.
//! Transfers and bonuses are committed atomically across accounts or not at
//! all; a restarted participant rebuilds its balance from the coordinator's
//! event log.
//!
//! # Modules
//!
//! - [`core_types`] - Core type aliases (AccountId, TransactionId, etc.)
//! - [`cluster`] - Static cluster topology and address books
//! - [`ledger`] - Per-account balance storage
//! - [`event_log`] - Append-only phase log
//! - [`rpc`] - Request/response types, HTTP client, loopback transport
//! - [`coordinator`] - Transaction state machine and decision making
//! - [`participant`] - Voting, commit/abort handling and recovery
//! - [`supervisor`] - Periodic timeout sweeps
//! - [`server`] - axum front of a node

// Core types - must be first!
pub mod core_types;

pub mod cluster;
pub mod config;
pub mod error;
pub mod event_log;
pub mod ledger;
pub mod logging;
pub mod rpc;
pub mod supervisor;

// Protocol roles
pub mod coordinator;
pub mod participant;

pub mod server;

// Convenient re-exports at crate root
pub use cluster::{AddressBook, ClusterConfig, NodeEntry};
pub use coordinator::{Coordinator, TxOutcome, TxPhase};
pub use core_types::{AccountId, Balance, ServerId, TransactionId};
pub use error::{StorageError, TxError};
pub use event_log::{EventLog, FileEventLog, LogPhase, LogRecord, MemoryEventLog};
pub use ledger::{FileLedger, Ledger, MemoryLedger};
pub use participant::{Participant, ParticipantOptions, VoteState};
pub use rpc::{RpcClient, RpcHandler, RpcRequest, RpcResponse};
pub use supervisor::{TimeoutMonitor, TimeoutSweep};
