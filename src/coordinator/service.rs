//! Transaction Coordinator
//!
//! Drives every transaction through prepare → commit | abort. Each phase is
//! appended to the event log before the matching RPC goes out, and any
//! failure during prepare counts as a no-vote.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::state::TxPhase;
use super::table::TransactionTable;
use super::types::{AbortReason, BalanceChange, Ballot, Transaction, TxOutcome};
use crate::cluster::{AddressBook, NodeEntry};
use crate::core_types::{AccountId, Balance, ServerId, TransactionId};
use crate::error::TxError;
use crate::event_log::{EventLog, LogPhase, LogRecord};
use crate::rpc::{self, CommitAck, PrepareVote, RpcClient, RpcHandler, RpcRequest};
use crate::supervisor::TimeoutSweep;

/// Cheap to clone: every clone drives the same table and log
#[derive(Clone)]
pub struct Coordinator {
    server_id: ServerId,
    address_book: Arc<AddressBook>,
    rpc: Arc<dyn RpcClient>,
    log: Arc<dyn EventLog>,
    table: Arc<TransactionTable>,
    tx_timeout: Duration,
}

impl Coordinator {
    /// Create a coordinator
    ///
    /// Transaction ids continue after the highest id found in `log`, so a
    /// restarted coordinator never reuses one.
    pub fn new(
        server_id: impl Into<ServerId>,
        address_book: AddressBook,
        rpc: Arc<dyn RpcClient>,
        log: Arc<dyn EventLog>,
        tx_timeout: Duration,
    ) -> Result<Self, TxError> {
        let table = TransactionTable::new();
        let last_seen = log
            .records()?
            .iter()
            .filter_map(|r| r.transaction_id)
            .max()
            .unwrap_or(0);
        table.seed_ids_after(last_seen);

        Ok(Self {
            server_id: server_id.into(),
            address_book: Arc::new(address_book),
            rpc,
            log,
            table: Arc::new(table),
            tx_timeout,
        })
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn table(&self) -> &TransactionTable {
        &self.table
    }

    /// Full event log, in append order
    pub fn logs(&self) -> Result<Vec<LogRecord>, TxError> {
        Ok(self.log.records()?)
    }

    // ========================================================================
    // Client operations
    // ========================================================================

    /// Move `amount` from one account to another
    ///
    /// Every outcome is reported as the returned message. Validation failures
    /// are reported before any transaction is opened and leave no log record.
    pub async fn transfer(&self, from: &str, to: &str, amount: Balance) -> String {
        let (from_node, to_node) = match self.validate_transfer(from, to, amount) {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(from, to, amount = %amount, error = %e, "Transfer rejected");
                return format!("Transfer failed: {}", e);
            }
        };

        info!(from, to, amount = %amount, "Transfer requested");

        let run = async {
            let from_balance = self.read_balance(&from_node).await?;
            let to_balance = self.read_balance(&to_node).await?;
            let (Some(from_new), Some(to_new)) = (
                from_balance.checked_sub(amount),
                to_balance.checked_add(amount),
            ) else {
                return Err(TxError::InvalidAmount(format!(
                    "transfer of {} is out of range",
                    amount
                )));
            };
            let mut changes = vec![
                BalanceChange::new(from_node, from, from_balance, from_new),
                BalanceChange::new(to_node, to, to_balance, to_new),
            ];
            self.sort_by_cluster_order(&mut changes);
            self.run_detached(changes).await
        };

        match run.await {
            Ok(TxOutcome::Committed { balances, .. }) => format!(
                "Transferred {} from {} to {}. New Balances: {}",
                amount.normalize(),
                from,
                to,
                format_balances(&balances)
            ),
            Ok(TxOutcome::Aborted { reason, .. }) if reason.is_timeout() => {
                "Failed to transfer because of timeout".to_string()
            }
            Ok(TxOutcome::Aborted { .. }) => "Failed to transfer. Transaction aborted.".to_string(),
            Err(e) if e.is_timeout() => "Failed to transfer because of timeout".to_string(),
            Err(e) => {
                error!(error = %e, "Transfer failed");
                format!("Transfer failed: {}", e)
            }
        }
    }

    /// Credit every account with `bonus_percentage` of the first account's
    /// balance
    ///
    /// A negative percentage is refused before any transaction is opened and
    /// leaves no trace in the log.
    pub async fn add_bonus(&self, bonus_percentage: Decimal) -> String {
        if bonus_percentage < Decimal::ZERO {
            warn!(bonus_percentage = %bonus_percentage, "Negative bonus rejected");
            return "Failed to add bonus due to invalid bonus. Transaction aborted.".to_string();
        }

        let participants: Vec<NodeEntry> = self.address_book.participants().cloned().collect();
        if participants.is_empty() {
            warn!("Bonus requested with no participants configured");
            return "Failed to add bonus. Error occurred: no participants configured. Transaction aborted."
                .to_string();
        }

        info!(bonus_percentage = %bonus_percentage, "Bonus requested");

        let run = async {
            let mut changes = Vec::with_capacity(participants.len());
            let mut bonus = None;
            for node in participants {
                let balance = self.read_balance(&node).await?;
                // the first account in cluster order sets the amount
                let amount = match bonus {
                    Some(amount) => amount,
                    None => *bonus.insert(
                        bonus_percentage
                            .checked_mul(balance)
                            .ok_or_else(|| bonus_out_of_range(bonus_percentage))?,
                    ),
                };
                let new_balance = balance
                    .checked_add(amount)
                    .ok_or_else(|| bonus_out_of_range(bonus_percentage))?;
                let account = node.account_id.clone().unwrap_or_default();
                changes.push(BalanceChange::new(node, account, balance, new_balance));
            }
            let bonus = bonus.unwrap_or(Decimal::ZERO);
            Ok::<_, TxError>((bonus, self.run_detached(changes).await?))
        };

        match run.await {
            Ok((bonus, TxOutcome::Committed { balances, .. })) => {
                let scope = if balances.len() == 2 {
                    "both accounts".to_string()
                } else {
                    format!("all {} accounts", balances.len())
                };
                format!(
                    "Added bonus {} to {}. New Balances: {}",
                    bonus.normalize(),
                    scope,
                    format_balances(&balances)
                )
            }
            Ok((_, TxOutcome::Aborted { reason, .. })) if reason.is_timeout() => {
                "Failed to add bonus because of timeout".to_string()
            }
            Ok((_, TxOutcome::Aborted { .. })) => {
                "Failed to add bonus. Transaction aborted.".to_string()
            }
            Err(e) if e.is_timeout() => "Failed to add bonus because of timeout".to_string(),
            Err(e) => {
                error!(error = %e, "Bonus failed");
                format!("Failed to add bonus. Error occurred: {}. Transaction aborted.", e)
            }
        }
    }

    /// Run prepare and the decision on a task of their own
    ///
    /// Once a transaction is opened it is always decided, even if the caller
    /// stops waiting.
    async fn run_detached(&self, changes: Vec<BalanceChange>) -> Result<TxOutcome, TxError> {
        let coordinator = self.clone();
        let outcome = tokio::spawn(async move { coordinator.propose_prepare(changes).await })
            .await
            .map_err(|e| TxError::Internal(format!("protocol task failed: {}", e)))?;
        debug!(
            transaction_id = outcome.id(),
            committed = outcome.is_committed(),
            "Protocol run finished"
        );
        Ok(outcome)
    }

    // ========================================================================
    // Protocol
    // ========================================================================

    /// Open a transaction and collect one ballot per participant
    ///
    /// Every participant is contacted, even after a refusal, so that each one
    /// holding a yes-vote later receives the abort.
    pub async fn propose_prepare(&self, changes: Vec<BalanceChange>) -> TxOutcome {
        let id = self.table.open(changes.clone(), Instant::now());
        debug!(transaction_id = id, participants = changes.len(), "Transaction opened");

        for change in &changes {
            let record = LogRecord::new(LogPhase::Prepare, &change.account_id, change.new_balance)
                .with_transaction(id);
            if let Err(e) = self.log.append(record) {
                error!(transaction_id = id, error = %e, "Failed to log prepare");
                return self
                    .propose_abort(
                        id,
                        AbortReason::PrepareFailed {
                            account: change.account_id.clone(),
                            reason: e.to_string(),
                        },
                    )
                    .await;
            }

            let request = RpcRequest::HandlePrepare {
                new_balance: change.new_balance,
                transaction_id: id,
            };
            let ballot = match rpc::call::<PrepareVote>(
                self.rpc.as_ref(),
                &change.participant,
                request,
            )
            .await
            {
                Ok(vote) => Ballot::Vote(vote),
                Err(e) if e.is_timeout() => {
                    warn!(transaction_id = id, account = %change.account_id, "Prepare timed out");
                    Ballot::TimedOut
                }
                Err(e) => {
                    warn!(transaction_id = id, account = %change.account_id, error = %e, "Prepare failed");
                    Ballot::Failed(e.to_string())
                }
            };
            let voted_yes = ballot.can_prepare();

            if !self.table.record_ballot(id, &change.account_id, ballot) {
                // the sweep already decided this transaction
                warn!(transaction_id = id, "Ballot arrived after abort");
                if voted_yes {
                    self.send_abort(id, &change.participant).await;
                }
                return TxOutcome::Aborted {
                    id,
                    reason: AbortReason::Expired,
                };
            }
        }

        self.process_prepare_responses(id).await
    }

    /// Tally the ballots and decide
    pub async fn process_prepare_responses(&self, id: TransactionId) -> TxOutcome {
        let Some(tx) = self.table.get(id) else {
            return TxOutcome::Aborted {
                id,
                reason: AbortReason::Expired,
            };
        };

        if tx.all_prepared() {
            self.propose_commit(id).await
        } else {
            let reason = tx.refusal().unwrap_or(AbortReason::Expired);
            info!(transaction_id = id, reason = %reason, "Prepare refused");
            self.propose_abort(id, reason).await
        }
    }

    /// Send commit to every participant, in contact order
    ///
    /// A participant that fails to commit turns the transaction into an abort,
    /// but participants that already committed keep their new balance.
    pub async fn propose_commit(&self, id: TransactionId) -> TxOutcome {
        let Some(tx) = self
            .table
            .transition(id, TxPhase::Collecting, TxPhase::Deciding)
        else {
            warn!(transaction_id = id, "Commit lost the race to an abort");
            return TxOutcome::Aborted {
                id,
                reason: AbortReason::Expired,
            };
        };

        for change in &tx.changes {
            if let Err(reason) = self.commit_one(id, change).await {
                error!(
                    transaction_id = id,
                    account = %change.account_id,
                    reason = %reason,
                    "Commit failed, aborting"
                );
                return self
                    .propose_abort(
                        id,
                        AbortReason::CommitFailed {
                            account: change.account_id.clone(),
                            reason,
                        },
                    )
                    .await;
            }
        }

        self.table
            .transition(id, TxPhase::Deciding, TxPhase::Committed);
        self.table.remove(id);
        info!(transaction_id = id, "Transaction committed");
        TxOutcome::Committed {
            id,
            balances: tx.new_balances(),
        }
    }

    async fn commit_one(&self, id: TransactionId, change: &BalanceChange) -> Result<(), String> {
        let record = LogRecord::new(LogPhase::Commit, &change.account_id, change.new_balance)
            .with_transaction(id);
        self.log.append(record).map_err(|e| e.to_string())?;

        let request = RpcRequest::HandleCommit { transaction_id: id };
        match rpc::call::<CommitAck>(self.rpc.as_ref(), &change.participant, request).await {
            Ok(ack) if ack.can_commit => Ok(()),
            Ok(ack) => Err(ack
                .error
                .unwrap_or_else(|| "commit refused".to_string())),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Decide abort and tell every participant
    pub async fn propose_abort(&self, id: TransactionId, reason: AbortReason) -> TxOutcome {
        match self.table.begin_abort(id) {
            Some(tx) => self.deliver_abort(&tx, &reason).await,
            None => debug!(transaction_id = id, "Abort already delivered"),
        }
        TxOutcome::Aborted { id, reason }
    }

    /// Log and send the abort for a transaction already marked ABORTED
    async fn deliver_abort(&self, tx: &Transaction, reason: &AbortReason) {
        for change in &tx.changes {
            let record = LogRecord::new(LogPhase::Abort, &change.account_id, change.old_balance)
                .with_error(reason.to_string())
                .with_transaction(tx.id);
            if let Err(e) = self.log.append(record) {
                warn!(transaction_id = tx.id, error = %e, "Failed to log abort");
            }
            self.send_abort(tx.id, &change.participant).await;
        }
        self.table.remove(tx.id);
        info!(transaction_id = tx.id, reason = %reason, "Transaction aborted");
    }

    /// Best-effort abort; a participant that misses it times out on its own
    async fn send_abort(&self, id: TransactionId, participant: &NodeEntry) {
        let request = RpcRequest::HandleAbort {
            transaction_id: Some(id),
        };
        match self.rpc.invoke(participant, request).await {
            Ok(_) => {}
            Err(e) if e.is_timeout() => {
                warn!(transaction_id = id, server_id = %participant.server_id, "Abort timed out")
            }
            Err(e) => {
                warn!(transaction_id = id, server_id = %participant.server_id, error = %e, "Abort failed")
            }
        }
    }

    /// Force-abort every transaction that never heard back from anyone
    pub async fn monitor_timeout(&self) -> usize {
        self.sweep_expired(Instant::now()).await
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn validate_transfer(
        &self,
        from: &str,
        to: &str,
        amount: Balance,
    ) -> Result<(NodeEntry, NodeEntry), TxError> {
        if amount <= Decimal::ZERO {
            return Err(TxError::InvalidAmount(format!(
                "transfer amount must be positive, got {}",
                amount
            )));
        }
        if from == to {
            return Err(TxError::InvalidRequest(
                "source and destination accounts must differ".to_string(),
            ));
        }
        Ok((self.participant_for(from)?, self.participant_for(to)?))
    }

    fn participant_for(&self, account: &str) -> Result<NodeEntry, TxError> {
        self.address_book
            .owner_of(account)
            .cloned()
            .ok_or_else(|| TxError::AccountNotFound(account.to_string()))
    }

    async fn read_balance(&self, node: &NodeEntry) -> Result<Balance, TxError> {
        Ok(rpc::call::<Balance>(self.rpc.as_ref(), node, RpcRequest::GetBalance {}).await?)
    }

    fn sort_by_cluster_order(&self, changes: &mut [BalanceChange]) {
        changes.sort_by_key(|c| {
            self.address_book
                .position(&c.participant.server_id)
                .unwrap_or(usize::MAX)
        });
    }
}

fn bonus_out_of_range(bonus_percentage: Decimal) -> TxError {
    TxError::InvalidAmount(format!("bonus of {} is out of range", bonus_percentage))
}

fn format_balances(balances: &[(AccountId, Balance)]) -> String {
    balances
        .iter()
        .map(|(account, balance)| format!("{}: {}", account, balance.normalize()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[async_trait]
impl TimeoutSweep for Coordinator {
    fn name(&self) -> &'static str {
        "coordinator"
    }

    async fn sweep_expired(&self, now: Instant) -> usize {
        let expired = self.table.take_expired(now, self.tx_timeout);
        for tx in &expired {
            warn!(transaction_id = tx.id, "Transaction timed out waiting for votes");
            self.deliver_abort(tx, &AbortReason::Expired).await;
        }
        expired.len()
    }
}

#[async_trait]
impl RpcHandler for Coordinator {
    async fn handle(&self, request: RpcRequest) -> Result<Value, TxError> {
        match request {
            RpcRequest::GetLogs {} => Ok(serde_json::to_value(self.logs()?)?),
            RpcRequest::Transfer {
                account_id_from,
                account_id_to,
                amount,
            } => Ok(Value::String(
                self.transfer(&account_id_from, &account_id_to, amount)
                    .await,
            )),
            RpcRequest::AddBonus { bonus_percentage } => {
                Ok(Value::String(self.add_bonus(bonus_percentage).await))
            }
            other @ (RpcRequest::GetBalance {}
            | RpcRequest::SetBalance { .. }
            | RpcRequest::HandlePrepare { .. }
            | RpcRequest::HandleCommit { .. }
            | RpcRequest::HandleAbort { .. }
            | RpcRequest::Recover {}) => Err(TxError::MethodNotSupported(other.method().to_string())),
        }
    }
}
