//! Core types used throughout the system
//!
//! These are fundamental type aliases used by all modules.
//! They provide semantic meaning and enable future type evolution.

/// Account ID - identifies the single account a participant owns.
///
/// # Constraints:
/// - **Immutable**: Once assigned in the cluster file, NEVER changes
/// - **One owner**: Exactly one participant node holds a given account
pub type AccountId = String;

/// Server ID - names a node in the cluster file (e.g. `coordinator`, `A`).
pub type ServerId = String;

/// Transaction ID - assigned by the coordinator, strictly increasing.
///
/// # Usage:
/// - Key of the coordinator transaction table
/// - Key of every participant's pending-vote table
pub type TransactionId = u64;

/// Account balance.
///
/// Signed so that a proposed debit below zero can be represented and then
/// refused at prepare time.
pub type Balance = rust_decimal::Decimal;
