//! Participant node
//!
//! Owns exactly one account. Votes on prepare requests, applies committed
//! balances and aborts votes whose decision never arrives.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::state::VoteState;
use crate::cluster::AddressBook;
use crate::core_types::{AccountId, Balance, TransactionId};
use crate::error::TxError;
use crate::event_log::{EventLog, LogPhase, LogRecord};
use crate::ledger::Ledger;
use crate::rpc::{CommitAck, PrepareVote, RpcClient, RpcHandler, RpcRequest};
use crate::supervisor::TimeoutSweep;

/// A yes-vote waiting for the coordinator's decision
#[derive(Debug, Clone, PartialEq)]
pub struct PendingVote {
    pub transaction_id: TransactionId,
    pub new_balance: Balance,
    pub received_at: Instant,
}

/// Participant settings
#[derive(Debug, Clone)]
pub struct ParticipantOptions {
    /// Age after which a pending vote is aborted locally
    pub vote_timeout: Duration,
    /// Refuse a prepare while another transaction is pending
    pub exclusive_prepare: bool,
}

impl Default for ParticipantOptions {
    fn default() -> Self {
        Self {
            vote_timeout: Duration::from_secs(3),
            exclusive_prepare: true,
        }
    }
}

pub struct Participant {
    pub(super) account_id: AccountId,
    pub(super) ledger: Arc<dyn Ledger>,
    pub(super) log: Arc<dyn EventLog>,
    pub(super) rpc: Arc<dyn RpcClient>,
    pub(super) address_book: AddressBook,
    pending: Mutex<HashMap<TransactionId, PendingVote>>,
    options: ParticipantOptions,
}

impl Participant {
    /// Create a participant for `account_id`
    ///
    /// The account is created with `initial_balance` if the ledger does not
    /// hold it yet; an existing balance is left untouched.
    pub fn new(
        account_id: impl Into<AccountId>,
        ledger: Arc<dyn Ledger>,
        log: Arc<dyn EventLog>,
        rpc: Arc<dyn RpcClient>,
        address_book: AddressBook,
        initial_balance: Balance,
        options: ParticipantOptions,
    ) -> Result<Self, TxError> {
        let account_id = account_id.into();
        if ledger.balance(&account_id)?.is_none() {
            ledger.set_balance(&account_id, initial_balance)?;
            info!(account = %account_id, balance = %initial_balance, "Account initialized");
        }

        Ok(Self {
            account_id,
            ledger,
            log,
            rpc,
            address_book,
            pending: Mutex::new(HashMap::new()),
            options,
        })
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<TransactionId, PendingVote>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, phase: LogPhase, balance: Balance) -> LogRecord {
        LogRecord::new(phase, &self.account_id, balance)
    }

    // ========================================================================
    // Ledger access
    // ========================================================================

    pub fn get_balance(&self) -> Result<Balance, TxError> {
        self.ledger
            .balance(&self.account_id)?
            .ok_or_else(|| TxError::AccountNotFound(self.account_id.clone()))
    }

    /// Overwrite the balance outside of any transaction
    pub fn set_balance(&self, new_balance: Balance) -> Result<String, TxError> {
        self.log.append(self.record(LogPhase::Commit, new_balance))?;
        self.ledger.set_balance(&self.account_id, new_balance)?;
        info!(account = %self.account_id, balance = %new_balance, "Balance set");
        Ok(format!("Account balance updated to {}", new_balance.normalize()))
    }

    // ========================================================================
    // Protocol handlers
    // ========================================================================

    pub fn handle_prepare(
        &self,
        new_balance: Balance,
        transaction_id: TransactionId,
    ) -> Result<PrepareVote, TxError> {
        if new_balance < Decimal::ZERO {
            let reason = TxError::InsufficientFunds {
                account: self.account_id.clone(),
                proposed: new_balance,
            };
            info!(transaction_id, error = %reason, "Voting no");
            self.log.append(
                self.record(LogPhase::Abort, self.get_balance()?)
                    .with_error("Insufficient funds")
                    .with_transaction(transaction_id),
            )?;
            return Ok(PrepareVote::no("Insufficient funds"));
        }

        {
            let mut pending = self.lock_pending();
            if pending.contains_key(&transaction_id) {
                debug!(transaction_id, "Duplicate prepare");
                return Ok(PrepareVote::yes());
            }
            if self.options.exclusive_prepare
                && let Some(other) = pending.keys().next().copied()
            {
                let reason = TxError::PendingConflict {
                    account: self.account_id.clone(),
                    pending: other,
                };
                drop(pending);
                info!(transaction_id, error = %reason, "Voting no");
                self.log.append(
                    self.record(LogPhase::Abort, self.get_balance()?)
                        .with_error(reason.to_string())
                        .with_transaction(transaction_id),
                )?;
                return Ok(PrepareVote::no(reason.to_string()));
            }
            pending.insert(
                transaction_id,
                PendingVote {
                    transaction_id,
                    new_balance,
                    received_at: Instant::now(),
                },
            );
        }

        if let Err(e) = self.log.append(
            self.record(LogPhase::Prepare, new_balance)
                .with_transaction(transaction_id),
        ) {
            // an unlogged yes must not stand
            self.lock_pending().remove(&transaction_id);
            return Err(e.into());
        }

        debug!(transaction_id, new_balance = %new_balance, "Prepared");
        Ok(PrepareVote::yes())
    }

    pub fn handle_commit(&self, transaction_id: TransactionId) -> Result<CommitAck, TxError> {
        let Some(vote) = self.lock_pending().remove(&transaction_id) else {
            warn!(transaction_id, "Commit for unknown transaction");
            return Ok(CommitAck {
                can_commit: false,
                error: Some(TxError::TransactionNotFound(transaction_id).to_string()),
            });
        };

        self.log.append(
            self.record(LogPhase::Commit, vote.new_balance)
                .with_transaction(transaction_id),
        )?;
        self.ledger.set_balance(&self.account_id, vote.new_balance)?;

        info!(transaction_id, balance = %vote.new_balance, "Committed");
        Ok(CommitAck {
            can_commit: true,
            error: None,
        })
    }

    /// Abort one pending vote, or every pending vote when no id is given
    pub fn handle_abort(&self, transaction_id: Option<TransactionId>) -> Result<(), TxError> {
        let mut record = self
            .record(LogPhase::Abort, self.get_balance()?)
            .with_error("Transaction aborted");
        if let Some(id) = transaction_id {
            record = record.with_transaction(id);
        }
        self.log.append(record)?;

        match transaction_id {
            Some(id) => {
                self.lock_pending().remove(&id);
                info!(transaction_id = id, "Aborted");
            }
            None => {
                let cleared = {
                    let mut pending = self.lock_pending();
                    let n = pending.len();
                    pending.clear();
                    n
                };
                info!(cleared, "Aborted all pending votes");
            }
        }
        Ok(())
    }

    /// Abort every pending vote older than the vote timeout
    pub async fn monitor_timeout(&self) -> usize {
        self.sweep_expired(Instant::now()).await
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    /// Drop every pending vote without logging (simulated process restart)
    pub fn forget_pending(&self) {
        self.lock_pending().clear();
    }

    /// Current state of a transaction as seen by this participant
    pub fn vote_state(&self, transaction_id: TransactionId) -> Result<VoteState, TxError> {
        if self.lock_pending().contains_key(&transaction_id) {
            return Ok(VoteState::Prepared);
        }

        let records = self.log.records()?;
        let mine = |r: &&LogRecord| {
            r.account_id == self.account_id && r.transaction_id == Some(transaction_id)
        };
        let prepared = records
            .iter()
            .filter(mine)
            .any(|r| r.phase == LogPhase::Prepare);

        Ok(match records.iter().rev().find(mine).map(|r| r.phase) {
            Some(LogPhase::Commit) => VoteState::Committed,
            Some(LogPhase::Abort) if prepared => VoteState::Aborted,
            Some(LogPhase::Abort) => VoteState::Rejected,
            Some(LogPhase::Prepare) | Some(LogPhase::Recovered) | None => VoteState::NoVote,
        })
    }
}

#[async_trait]
impl TimeoutSweep for Participant {
    fn name(&self) -> &'static str {
        "participant"
    }

    async fn sweep_expired(&self, now: Instant) -> usize {
        let expired: Vec<PendingVote> = {
            let mut pending = self.lock_pending();
            let ids: Vec<TransactionId> = pending
                .values()
                .filter(|v| now.saturating_duration_since(v.received_at) > self.options.vote_timeout)
                .map(|v| v.transaction_id)
                .collect();
            ids.iter().filter_map(|id| pending.remove(id)).collect()
        };

        for vote in &expired {
            warn!(
                account = %self.account_id,
                transaction_id = vote.transaction_id,
                "Pending vote timed out, aborting"
            );
            let balance = match self.get_balance() {
                Ok(b) => b,
                Err(e) => {
                    warn!(error = %e, "Balance unavailable for abort record");
                    continue;
                }
            };
            let record = self
                .record(LogPhase::Abort, balance)
                .with_error("Transaction timed out")
                .with_transaction(vote.transaction_id);
            if let Err(e) = self.log.append(record) {
                warn!(transaction_id = vote.transaction_id, error = %e, "Failed to log timeout abort");
            }
        }
        expired.len()
    }
}

#[async_trait]
impl RpcHandler for Participant {
    async fn handle(&self, request: RpcRequest) -> Result<Value, TxError> {
        match request {
            RpcRequest::GetLogs {} => Ok(serde_json::to_value(self.log.records()?)?),
            RpcRequest::GetBalance {} => Ok(serde_json::to_value(self.get_balance()?)?),
            RpcRequest::SetBalance { new_balance } => {
                Ok(Value::String(self.set_balance(new_balance)?))
            }
            RpcRequest::HandlePrepare {
                new_balance,
                transaction_id,
            } => Ok(serde_json::to_value(
                self.handle_prepare(new_balance, transaction_id)?,
            )?),
            RpcRequest::HandleCommit { transaction_id } => {
                Ok(serde_json::to_value(self.handle_commit(transaction_id)?)?)
            }
            RpcRequest::HandleAbort { transaction_id } => {
                self.handle_abort(transaction_id)?;
                Ok(Value::Null)
            }
            RpcRequest::Recover {} => {
                self.recover().await?;
                Ok(Value::Null)
            }
            other @ (RpcRequest::Transfer { .. } | RpcRequest::AddBonus { .. }) => {
                Err(TxError::MethodNotSupported(other.method().to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::MemoryEventLog;
    use crate::ledger::MemoryLedger;
    use crate::rpc::LoopbackTransport;

    fn participant(balance: i64, options: ParticipantOptions) -> (Participant, Arc<MemoryEventLog>) {
        let log = Arc::new(MemoryEventLog::new());
        let p = Participant::new(
            "A",
            Arc::new(MemoryLedger::with_account("A", Decimal::from(balance))),
            log.clone(),
            Arc::new(LoopbackTransport::new(Duration::from_secs(1))),
            AddressBook::default(),
            Decimal::ZERO,
            options,
        )
        .unwrap();
        (p, log)
    }

    #[test]
    fn test_negative_balance_votes_no() {
        let (p, log) = participant(100, ParticipantOptions::default());

        let vote = p.handle_prepare(Decimal::from(-50), 1).unwrap();
        assert!(!vote.can_prepare);
        assert_eq!(vote.error.as_deref(), Some("Insufficient funds"));
        assert_eq!(p.pending_count(), 0);
        assert_eq!(p.vote_state(1).unwrap(), VoteState::Rejected);

        let records = log.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].phase, LogPhase::Abort);
        assert_eq!(records[0].balance, Decimal::from(100));
    }

    #[test]
    fn test_prepare_then_commit() {
        let (p, log) = participant(100, ParticipantOptions::default());

        assert!(p.handle_prepare(Decimal::from(40), 7).unwrap().can_prepare);
        assert_eq!(p.vote_state(7).unwrap(), VoteState::Prepared);
        // ledger untouched until commit
        assert_eq!(p.get_balance().unwrap(), Decimal::from(100));

        let ack = p.handle_commit(7).unwrap();
        assert!(ack.can_commit);
        assert_eq!(p.get_balance().unwrap(), Decimal::from(40));
        assert_eq!(p.vote_state(7).unwrap(), VoteState::Committed);

        let phases: Vec<LogPhase> = log.records().unwrap().iter().map(|r| r.phase).collect();
        assert_eq!(phases, vec![LogPhase::Prepare, LogPhase::Commit]);
    }

    #[test]
    fn test_commit_unknown_transaction() {
        let (p, _) = participant(100, ParticipantOptions::default());

        let ack = p.handle_commit(99).unwrap();
        assert!(!ack.can_commit);
        assert_eq!(ack.error.as_deref(), Some("Transaction not found: 99"));
        assert_eq!(p.get_balance().unwrap(), Decimal::from(100));

        // duplicate commit is refused too
        p.handle_prepare(Decimal::from(10), 1).unwrap();
        assert!(p.handle_commit(1).unwrap().can_commit);
        assert!(!p.handle_commit(1).unwrap().can_commit);
        assert_eq!(p.get_balance().unwrap(), Decimal::from(10));
    }

    #[test]
    fn test_abort_without_id_clears_everything() {
        let options = ParticipantOptions {
            exclusive_prepare: false,
            ..Default::default()
        };
        let (p, log) = participant(100, options);
        p.handle_prepare(Decimal::from(10), 1).unwrap();
        p.handle_prepare(Decimal::from(20), 2).unwrap();
        assert_eq!(p.pending_count(), 2);

        p.handle_abort(Some(1)).unwrap();
        assert_eq!(p.pending_count(), 1);
        assert_eq!(p.vote_state(1).unwrap(), VoteState::Aborted);

        p.handle_abort(None).unwrap();
        assert_eq!(p.pending_count(), 0);
        assert_eq!(p.get_balance().unwrap(), Decimal::from(100));

        let last = log.records().unwrap().pop().unwrap();
        assert_eq!(last.phase, LogPhase::Abort);
        assert_eq!(last.balance, Decimal::from(100));
        assert_eq!(last.transaction_id, None);
    }

    #[test]
    fn test_exclusive_prepare_refuses_second_transaction() {
        let (p, _) = participant(100, ParticipantOptions::default());

        assert!(p.handle_prepare(Decimal::from(50), 1).unwrap().can_prepare);
        let vote = p.handle_prepare(Decimal::from(60), 2).unwrap();
        assert!(!vote.can_prepare);
        assert!(vote.error.unwrap().contains("already has transaction 1 pending"));

        // retry of the pending one is still a yes
        assert!(p.handle_prepare(Decimal::from(50), 1).unwrap().can_prepare);
        assert_eq!(p.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_vote_is_aborted_locally() {
        let options = ParticipantOptions {
            vote_timeout: Duration::from_millis(50),
            exclusive_prepare: true,
        };
        let (p, log) = participant(100, options);
        p.handle_prepare(Decimal::from(10), 3).unwrap();

        assert_eq!(p.sweep_expired(Instant::now()).await, 0);
        let later = Instant::now() + Duration::from_millis(100);
        assert_eq!(p.sweep_expired(later).await, 1);

        assert_eq!(p.pending_count(), 0);
        assert_eq!(p.get_balance().unwrap(), Decimal::from(100));
        let last = log.records().unwrap().pop().unwrap();
        assert_eq!(last.error.as_deref(), Some("Transaction timed out"));

        // the coordinator's late commit is refused
        assert!(!p.handle_commit(3).unwrap().can_commit);
    }

    #[tokio::test]
    async fn test_handler_dispatch() {
        let (p, _) = participant(100, ParticipantOptions::default());

        let balance = p.handle(RpcRequest::GetBalance {}).await.unwrap();
        assert_eq!(serde_json::from_value::<Decimal>(balance).unwrap(), Decimal::from(100));

        let msg = p
            .handle(RpcRequest::SetBalance {
                new_balance: Decimal::new(2505, 1),
            })
            .await
            .unwrap();
        assert_eq!(msg, Value::String("Account balance updated to 250.5".into()));

        let err = p
            .handle(RpcRequest::AddBonus {
                bonus_percentage: Decimal::ONE,
            })
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 404);
    }

    #[test]
    fn test_missing_account_is_initialized() {
        let p = Participant::new(
            "C",
            Arc::new(MemoryLedger::new()),
            Arc::new(MemoryEventLog::new()),
            Arc::new(LoopbackTransport::new(Duration::from_secs(1))),
            AddressBook::default(),
            Decimal::from(300),
            ParticipantOptions::default(),
        )
        .unwrap();
        assert_eq!(p.get_balance().unwrap(), Decimal::from(300));
    }
}
