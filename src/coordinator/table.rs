//! Transaction table
//!
//! Shared by RPC handlers and the timeout sweep. Every method is one critical
//! section acting as a compare-and-update step; the lock is never held across
//! an `.await`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::state::TxPhase;
use super::types::{Ballot, BalanceChange, Transaction};
use crate::core_types::{AccountId, TransactionId};

pub struct TransactionTable {
    transactions: Mutex<HashMap<TransactionId, Transaction>>,
    last_id: AtomicU64,
}

impl Default for TransactionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionTable {
    pub fn new() -> Self {
        Self {
            transactions: Mutex::new(HashMap::new()),
            last_id: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TransactionId, Transaction>> {
        self.transactions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Make sure new ids are greater than `seen` (ids found in a durable log)
    pub fn seed_ids_after(&self, seen: TransactionId) {
        self.last_id.fetch_max(seen, Ordering::SeqCst);
    }

    /// Allocate an id and insert a COLLECTING record
    pub fn open(&self, changes: Vec<BalanceChange>, now: Instant) -> TransactionId {
        let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.lock().insert(id, Transaction::new(id, changes, now));
        id
    }

    /// Record a ballot; refused unless the transaction is still COLLECTING
    pub fn record_ballot(&self, id: TransactionId, account: &AccountId, ballot: Ballot) -> bool {
        match self.lock().get_mut(&id) {
            Some(tx) if tx.phase == TxPhase::Collecting => {
                tx.responses.insert(account.clone(), ballot);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, id: TransactionId) -> Option<Transaction> {
        self.lock().get(&id).cloned()
    }

    /// CAS `from → to`; returns the updated record on success
    pub fn transition(&self, id: TransactionId, from: TxPhase, to: TxPhase) -> Option<Transaction> {
        debug_assert!(from.can_transition_to(to));
        match self.lock().get_mut(&id) {
            Some(tx) if tx.phase == from => {
                tx.phase = to;
                Some(tx.clone())
            }
            _ => None,
        }
    }

    /// Move any non-terminal transaction to ABORTED
    ///
    /// Returns `None` if the transaction is unknown or already decided, so
    /// that exactly one caller delivers the abort.
    pub fn begin_abort(&self, id: TransactionId) -> Option<Transaction> {
        match self.lock().get_mut(&id) {
            Some(tx) if !tx.phase.is_terminal() => {
                tx.phase = TxPhase::Aborted;
                Some(tx.clone())
            }
            _ => None,
        }
    }

    /// Atomically mark as ABORTED every COLLECTING transaction with no recorded
    /// response that is older than `threshold` at `now`
    pub fn take_expired(&self, now: Instant, threshold: Duration) -> Vec<Transaction> {
        let mut transactions = self.lock();
        let mut expired: Vec<Transaction> = transactions
            .values_mut()
            .filter(|tx| {
                tx.phase == TxPhase::Collecting
                    && tx.responses.is_empty()
                    && now.saturating_duration_since(tx.created_at) > threshold
            })
            .map(|tx| {
                tx.phase = TxPhase::Aborted;
                tx.clone()
            })
            .collect();
        expired.sort_by_key(|tx| tx.id);
        expired
    }

    pub fn remove(&self, id: TransactionId) -> Option<Transaction> {
        self.lock().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: TransactionId) -> bool {
        self.lock().contains_key(&id)
    }
}
