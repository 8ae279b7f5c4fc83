//! Coordinator transaction types

use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

use super::state::TxPhase;
use crate::cluster::NodeEntry;
use crate::core_types::{AccountId, Balance, TransactionId};
use crate::rpc::PrepareVote;

/// One participant's part of a transaction
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceChange {
    pub participant: NodeEntry,
    pub account_id: AccountId,
    pub old_balance: Balance,
    pub new_balance: Balance,
}

impl BalanceChange {
    pub fn new(
        participant: NodeEntry,
        account_id: impl Into<AccountId>,
        old_balance: Balance,
        new_balance: Balance,
    ) -> Self {
        Self {
            participant,
            account_id: account_id.into(),
            old_balance,
            new_balance,
        }
    }
}

/// What the coordinator recorded for one participant during prepare
#[derive(Debug, Clone, PartialEq)]
pub enum Ballot {
    /// The participant answered
    Vote(PrepareVote),
    /// No answer within the RPC timeout
    TimedOut,
    /// Transport or remote error
    Failed(String),
}

impl Ballot {
    /// Only an explicit yes counts as yes
    #[inline]
    pub fn can_prepare(&self) -> bool {
        matches!(self, Ballot::Vote(v) if v.can_prepare)
    }
}

/// Coordinator transaction record
#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: TransactionId,
    /// Participants in contact order
    pub changes: Vec<BalanceChange>,
    pub responses: BTreeMap<AccountId, Ballot>,
    pub created_at: Instant,
    pub phase: TxPhase,
}

impl Transaction {
    pub fn new(id: TransactionId, changes: Vec<BalanceChange>, created_at: Instant) -> Self {
        Self {
            id,
            changes,
            responses: BTreeMap::new(),
            created_at,
            phase: TxPhase::Collecting,
        }
    }

    /// Logical AND of the votes; a participant without a ballot counts as no
    pub fn all_prepared(&self) -> bool {
        self.changes.iter().all(|c| {
            self.responses
                .get(&c.account_id)
                .is_some_and(Ballot::can_prepare)
        })
    }

    /// Reason for refusing, taken from the first non-yes ballot in contact order
    pub fn refusal(&self) -> Option<AbortReason> {
        self.changes.iter().find_map(|c| {
            let account = c.account_id.clone();
            match self.responses.get(&c.account_id) {
                None => Some(AbortReason::PrepareFailed {
                    account,
                    reason: "no response recorded".to_string(),
                }),
                Some(Ballot::Vote(v)) if v.can_prepare => None,
                Some(Ballot::Vote(v)) => Some(AbortReason::VotedNo {
                    account,
                    reason: v.error.clone(),
                }),
                Some(Ballot::TimedOut) => Some(AbortReason::PrepareTimeout { account }),
                Some(Ballot::Failed(e)) => Some(AbortReason::PrepareFailed {
                    account,
                    reason: e.clone(),
                }),
            }
        })
    }

    pub fn new_balances(&self) -> Vec<(AccountId, Balance)> {
        self.changes
            .iter()
            .map(|c| (c.account_id.clone(), c.new_balance))
            .collect()
    }
}

/// Why a transaction was aborted
#[derive(Debug, Clone, PartialEq)]
pub enum AbortReason {
    VotedNo {
        account: AccountId,
        reason: Option<String>,
    },
    PrepareTimeout {
        account: AccountId,
    },
    PrepareFailed {
        account: AccountId,
        reason: String,
    },
    CommitFailed {
        account: AccountId,
        reason: String,
    },
    /// Force-aborted by the timeout sweep
    Expired,
}

impl AbortReason {
    /// Whether the abort was caused by silence rather than a refusal
    pub fn is_timeout(&self) -> bool {
        matches!(self, AbortReason::PrepareTimeout { .. } | AbortReason::Expired)
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::VotedNo {
                account,
                reason: Some(reason),
            } => write!(f, "{} voted no: {}", account, reason),
            AbortReason::VotedNo {
                account,
                reason: None,
            } => write!(f, "{} voted no", account),
            AbortReason::PrepareTimeout { account } => {
                write!(f, "{} did not answer prepare in time", account)
            }
            AbortReason::PrepareFailed { account, reason } => {
                write!(f, "prepare on {} failed: {}", account, reason)
            }
            AbortReason::CommitFailed { account, reason } => {
                write!(f, "commit on {} failed: {}", account, reason)
            }
            AbortReason::Expired => write!(f, "transaction timed out"),
        }
    }
}

/// Final result of one protocol run
#[derive(Debug, Clone, PartialEq)]
pub enum TxOutcome {
    Committed {
        id: TransactionId,
        balances: Vec<(AccountId, Balance)>,
    },
    Aborted {
        id: TransactionId,
        reason: AbortReason,
    },
}

impl TxOutcome {
    pub fn id(&self) -> TransactionId {
        match self {
            TxOutcome::Committed { id, .. } | TxOutcome::Aborted { id, .. } => *id,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, TxOutcome::Committed { .. })
    }
}
