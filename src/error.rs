use super::request::KycStatus;
use super::review::ReviewAction;
use super::status::{Actor, KycState, Transition};
use super::validator::ValidationErrors;

/// Failures raised by the KYC core.
#[derive(thiserror::Error, Debug)]
pub enum KycError {
    #[error("submission failed validation: {0}")]
    ValidationFailed(ValidationErrors),
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: KycState, to: KycStatus },
    #[error("a {actor} may not perform {transition}")]
    NotPermitted { actor: Actor, transition: Transition },
    #[error("{0} requires at least one feedback entry")]
    MissingFeedback(ReviewAction),
    #[error("batch of {requested} exceeds the limit of {max} requests")]
    BatchSizeExceeded { max: usize, requested: usize },
    #[error("request {0} was modified concurrently, reload and retry")]
    ConcurrentModification(String),
    #[error("request {id} is claimed by reviewer {reviewer}")]
    ClaimedByAnotherReviewer { id: String, reviewer: String },
    #[error("request {0} is approved and can no longer be changed")]
    Immutable(String),
    #[error("invalid user id \"{0}\"")]
    InvalidIdentifier(String),
    #[error(transparent)]
    Store(StoreError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl KycError {
    /// Stable short name, used as the per-item reason in bulk results.
    pub fn kind(&self) -> &'static str {
        match self {
            KycError::ValidationFailed(_) => "ValidationFailed",
            KycError::InvalidTransition { .. } => "InvalidTransitionError",
            KycError::NotPermitted { .. } => "NotPermitted",
            KycError::MissingFeedback(_) => "MissingFeedbackError",
            KycError::BatchSizeExceeded { .. } => "BatchSizeExceeded",
            KycError::ConcurrentModification(_) => "ConcurrentModificationError",
            KycError::ClaimedByAnotherReviewer { .. } => "ClaimedByAnotherReviewer",
            KycError::Immutable(_) => "ImmutableRecord",
            KycError::InvalidIdentifier(_) => "InvalidIdentifier",
            KycError::Store(StoreError::NotFound(_)) => "NotFound",
            KycError::Store(_) => "StorageFault",
            KycError::Internal(_) => "InternalFault",
        }
    }

    /// Business rule failures, as opposed to infrastructure faults.
    pub fn is_rule_violation(&self) -> bool {
        !matches!(self, KycError::Store(_) | KycError::Internal(_))
    }
}

// The optimistic concurrency failures surface as one business error;
// everything else from the store is carried through untouched.
impl From<StoreError> for KycError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::StatusMismatch { id, .. } => KycError::ConcurrentModification(id),
            StoreError::HeadMoved { user_id } => KycError::ConcurrentModification(user_id),
            StoreError::Stale(id) => KycError::ConcurrentModification(id),
            other => KycError::Store(other),
        }
    }
}

/// Failures raised by the request and file stores.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("request {id} expected status {expected} but found {found}")]
    StatusMismatch {
        id: String,
        expected: KycStatus,
        found: KycStatus,
    },
    #[error("active cycle of user {user_id} changed during the write")]
    HeadMoved { user_id: String },
    #[error("request {0} changed since it was read")]
    Stale(String),
    #[error("stored file {0} does not match its recorded digest")]
    DigestMismatch(String),
    #[error("failed to encode record: {0}")]
    Encode(String),
    #[error("failed to decode record: {0}")]
    Decode(String),
    #[error("failed to allocate identifier: {0}")]
    Identifier(String),
    #[error(transparent)]
    Sled(#[from] sled::Error),
}
