//! Participant-side vote states

use std::fmt;

/// Where a participant stands on one transaction
///
/// ```text
/// NO_VOTE → PREPARED → COMMITTED
///    ↓          ↓
/// REJECTED   ABORTED (coordinator abort or local timeout)
/// ```
///
/// Only `Prepared` is held in memory; every other state is visible through
/// the event log alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoteState {
    NoVote,
    /// Voted yes, waiting for the decision
    Prepared,
    Committed,
    Aborted,
    /// Voted no
    Rejected,
}

impl VoteState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            VoteState::Committed | VoteState::Aborted | VoteState::Rejected
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VoteState::NoVote => "NO_VOTE",
            VoteState::Prepared => "PREPARED",
            VoteState::Committed => "COMMITTED",
            VoteState::Aborted => "ABORTED",
            VoteState::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for VoteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
