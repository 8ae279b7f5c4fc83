//! Two-Phase Commit Participant
//!
//! One participant per account. It votes on prepare requests, applies the
//! coordinator's decision, and rebuilds its balance from the coordinator's
//! log after a crash.
//!
//! A yes-vote is held in memory until the decision arrives or the vote
//! times out. A timed-out vote is aborted locally, which can disagree with a
//! commit the coordinator recorded after the participant stopped waiting;
//! `recover()` reconciles that in favour of the coordinator's log.

pub mod node;
pub mod recovery;
pub mod state;

pub use node::{Participant, ParticipantOptions, PendingVote};
pub use state::VoteState;
