//! The KYC status machine
//!
//! The only place that decides whether a status change is legal. Both the
//! submission service and the review engine ask it before writing `status`.
//!
//! | actor    | transition   | from                                        | to                         |
//! |----------|--------------|---------------------------------------------|----------------------------|
//! | user     | `Submit`     | NOT_SUBMITTED                               | PENDING                    |
//! | user     | `Resubmit`   | REJECTED, REQUIRES_ADDITIONAL_INFO          | PENDING (new cycle)        |
//! | reviewer | `Claim`      | PENDING                                     | IN_REVIEW                  |
//! | reviewer | `Release`    | IN_REVIEW                                   | PENDING                    |
//! | reviewer | `Approve`    | PENDING, IN_REVIEW                          | APPROVED                   |
//! | reviewer | `Reject`     | PENDING, IN_REVIEW                          | REJECTED                   |
//! | reviewer | `RequestInfo`| PENDING, IN_REVIEW                          | REQUIRES_ADDITIONAL_INFO   |

use super::error::KycError;
use super::request::{KycRequest, KycStatus};
use serde::Serialize;
use std::fmt;

/// Where a user stands, including the state before any request exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum KycState {
    NotSubmitted,
    Submitted(KycStatus),
}

impl KycState {
    pub fn from_latest(latest: Option<&KycRequest>) -> Self {
        latest.map_or(KycState::NotSubmitted, |r| KycState::Submitted(r.status))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KycState::NotSubmitted => "NOT_SUBMITTED",
            KycState::Submitted(status) => status.as_str(),
        }
    }
}

impl fmt::Display for KycState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<KycStatus> for KycState {
    fn from(status: KycStatus) -> Self {
        KycState::Submitted(status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Actor {
    User,
    Reviewer,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::User => f.write_str("user"),
            Actor::Reviewer => f.write_str("reviewer"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Transition {
    Submit,
    Resubmit,
    Claim,
    Release,
    Approve,
    Reject,
    RequestInfo,
}

impl Transition {
    pub const ALL: [Transition; 7] = [
        Transition::Submit,
        Transition::Resubmit,
        Transition::Claim,
        Transition::Release,
        Transition::Approve,
        Transition::Reject,
        Transition::RequestInfo,
    ];

    /// Who is allowed to trigger this transition.
    pub fn actor(self) -> Actor {
        match self {
            Transition::Submit | Transition::Resubmit => Actor::User,
            Transition::Claim
            | Transition::Release
            | Transition::Approve
            | Transition::Reject
            | Transition::RequestInfo => Actor::Reviewer,
        }
    }

    pub fn target(self) -> KycStatus {
        match self {
            Transition::Submit | Transition::Resubmit | Transition::Release => KycStatus::Pending,
            Transition::Claim => KycStatus::InReview,
            Transition::Approve => KycStatus::Approved,
            Transition::Reject => KycStatus::Rejected,
            Transition::RequestInfo => KycStatus::RequiresAdditionalInfo,
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

pub struct KycStatusMachine;

impl KycStatusMachine {
    pub fn is_permitted(from: KycState, transition: Transition) -> bool {
        use KycState::*;
        use KycStatus::*;

        match transition {
            Transition::Submit => from == NotSubmitted,
            Transition::Resubmit => matches!(from, Submitted(Rejected | RequiresAdditionalInfo)),
            Transition::Claim => from == Submitted(Pending),
            Transition::Release => from == Submitted(InReview),
            Transition::Approve | Transition::Reject | Transition::RequestInfo => {
                matches!(from, Submitted(Pending | InReview))
            }
        }
    }

    /// Returns the status `transition` leads to from `from`, or why it cannot
    /// be taken by `actor`.
    pub fn apply(
        from: KycState,
        transition: Transition,
        actor: Actor,
    ) -> Result<KycStatus, KycError> {
        if transition.actor() != actor {
            return Err(KycError::NotPermitted { actor, transition });
        }
        if !Self::is_permitted(from, transition) {
            return Err(KycError::InvalidTransition {
                from,
                to: transition.target(),
            });
        }
        Ok(transition.target())
    }

    /// Every transition legal from `from`.
    pub fn available(from: KycState) -> Vec<Transition> {
        Transition::ALL
            .into_iter()
            .filter(|t| Self::is_permitted(from, *t))
            .collect()
    }
}
