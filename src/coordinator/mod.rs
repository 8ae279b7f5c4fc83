//! Two-Phase Commit Coordinator
//!
//! Runs balance transfers and bonuses across participant nodes. The
//! coordinator alone decides the outcome of every transaction and its event
//! log is the history participants recover from.
//!
//! # State Machine
//!
//! ```text
//! COLLECTING → DECIDING → COMMITTED
//!      ↓           ↓
//!   ABORTED ←──────┘
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Log-Before-Call**: every phase is appended to the event log before its RPC
//! 2. **No Silent Yes**: a timeout or error during prepare counts as a no-vote
//! 3. **Single Decision**: phase changes are compare-and-set steps on the table,
//!    so the timeout sweep and a late commit can never both win
//!
//! A commit that fails after some participants committed leaves those
//! participants committed. The abort records it produces do not roll them back.

pub mod service;
pub mod state;
pub mod table;
pub mod types;

mod integration_tests;

pub use service::Coordinator;
pub use state::TxPhase;
pub use table::TransactionTable;
pub use types::{AbortReason, BalanceChange, Ballot, Transaction, TxOutcome};
