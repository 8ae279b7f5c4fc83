//! Crash recovery
//!
//! Rebuilds the account balance from the coordinator's commit history. The
//! participant's own ledger is not trusted: the last commit the coordinator
//! recorded for this account wins.

use tracing::{info, warn};

use super::node::Participant;
use crate::error::TxError;
use crate::event_log::{LogPhase, LogRecord, commits_for};
use crate::rpc::{self, RpcRequest};

impl Participant {
    /// Replay the coordinator's commit records for this account, in log order
    ///
    /// Returns the number of records replayed. Replaying twice gives the same
    /// balance as replaying once.
    pub async fn recover(&self) -> Result<usize, TxError> {
        let coordinator = self.address_book.coordinator().cloned().ok_or_else(|| {
            TxError::InvalidRequest("no coordinator in the address book".to_string())
        })?;

        info!(account = %self.account_id, coordinator = %coordinator.server_id, "Starting recovery");

        let records: Vec<LogRecord> =
            rpc::call(self.rpc.as_ref(), &coordinator, RpcRequest::GetLogs {}).await?;

        let mut replayed = 0;
        for commit in commits_for(&records, &self.account_id) {
            self.ledger.set_balance(&self.account_id, commit.balance)?;
            let mut record = LogRecord::new(LogPhase::Recovered, &self.account_id, commit.balance);
            if let Some(id) = commit.transaction_id {
                record = record.with_transaction(id);
            }
            if let Err(e) = self.log.append(record) {
                warn!(error = %e, "Failed to log recovered balance");
            }
            replayed += 1;
        }

        if replayed == 0 {
            info!(account = %self.account_id, "No recovery needed");
        } else {
            info!(
                account = %self.account_id,
                replayed,
                balance = %self.get_balance()?,
                "Recovery complete"
            );
        }
        Ok(replayed)
    }
}
