//! Coordinator-side transaction phases

use std::fmt;

/// Transaction phase on the coordinator
///
/// ```text
/// COLLECTING → DECIDING → COMMITTED
///      ↓           ↓
///   ABORTED  ←─────┘
/// ```
///
/// Terminal phases are never stored for long: the record is deleted as soon as
/// the decision has been delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxPhase {
    /// Prepare requests in flight, votes being recorded
    Collecting,
    /// Unanimous yes; commit requests in flight
    Deciding,
    /// Terminal: every participant acknowledged commit
    Committed,
    /// Terminal: abort delivered (best effort) to every participant
    Aborted,
}

impl TxPhase {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxPhase::Committed | TxPhase::Aborted)
    }

    /// Whether `self → next` is an edge of the state machine
    pub fn can_transition_to(&self, next: TxPhase) -> bool {
        matches!(
            (self, next),
            (TxPhase::Collecting, TxPhase::Deciding)
                | (TxPhase::Collecting, TxPhase::Aborted)
                | (TxPhase::Deciding, TxPhase::Committed)
                | (TxPhase::Deciding, TxPhase::Aborted)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxPhase::Collecting => "COLLECTING",
            TxPhase::Deciding => "DECIDING",
            TxPhase::Committed => "COMMITTED",
            TxPhase::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for TxPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_phases() {
        assert!(TxPhase::Committed.is_terminal());
        assert!(TxPhase::Aborted.is_terminal());
        assert!(!TxPhase::Collecting.is_terminal());
        assert!(!TxPhase::Deciding.is_terminal());
    }

    #[test]
    fn test_transitions() {
        assert!(TxPhase::Collecting.can_transition_to(TxPhase::Deciding));
        assert!(TxPhase::Collecting.can_transition_to(TxPhase::Aborted));
        assert!(TxPhase::Deciding.can_transition_to(TxPhase::Committed));
        assert!(TxPhase::Deciding.can_transition_to(TxPhase::Aborted));

        assert!(!TxPhase::Collecting.can_transition_to(TxPhase::Committed));
        assert!(!TxPhase::Committed.can_transition_to(TxPhase::Aborted));
        assert!(!TxPhase::Aborted.can_transition_to(TxPhase::Deciding));
    }

    #[test]
    fn test_display() {
        assert_eq!(TxPhase::Collecting.to_string(), "COLLECTING");
        assert_eq!(TxPhase::Aborted.to_string(), "ABORTED");
    }
}
