//! Admin review of submitted KYC requests
use super::config::KycConfig;
use super::error::KycError;
use super::notify::{KycEvent, Notifier, dispatch};
use super::request::{KycRequest, KycStatus, TimeStamp};
use super::status::{Actor, KycState, KycStatusMachine, Transition};
use super::store::{Page, Pagination, RequestQuery, RequestStore, SortOrder};
use super::validator::{ValidationErrors, fields};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Decision a reviewer can take on a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewAction {
    Approve,
    Reject,
    RequestInfo,
}

impl ReviewAction {
    pub const ALL: [ReviewAction; 3] = [
        ReviewAction::Approve,
        ReviewAction::Reject,
        ReviewAction::RequestInfo,
    ];

    pub fn transition(self) -> Transition {
        match self {
            ReviewAction::Approve => Transition::Approve,
            ReviewAction::Reject => Transition::Reject,
            ReviewAction::RequestInfo => Transition::RequestInfo,
        }
    }

    pub fn requires_feedback(self) -> bool {
        !matches!(self, ReviewAction::Approve)
    }
}

impl fmt::Display for ReviewAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewAction::Approve => f.write_str("APPROVE"),
            ReviewAction::Reject => f.write_str("REJECT"),
            ReviewAction::RequestInfo => f.write_str("REQUEST_INFO"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkFailure {
    pub id: String,
    /// Short error name, see [`KycError::kind`]
    pub reason: String,
    pub message: String,
}

/// Outcome of a bulk review, in the order the ids were given.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkReviewResult {
    pub succeeded: Vec<String>,
    pub failed: Vec<BulkFailure>,
}

impl BulkReviewResult {
    pub fn failure(&self, id: &str) -> Option<&BulkFailure> {
        self.failed.iter().find(|f| f.id == id)
    }
}

/// A request together with every cycle of its owner, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestDetails {
    pub request: KycRequest,
    pub history: Vec<KycRequest>,
}

pub struct AdminReviewEngine {
    store: Arc<dyn RequestStore>,
    notifier: Arc<dyn Notifier>,
    config: Arc<KycConfig>,
}

impl AdminReviewEngine {
    pub fn new(
        store: Arc<dyn RequestStore>,
        notifier: Arc<dyn Notifier>,
        config: Arc<KycConfig>,
    ) -> Self {
        Self {
            store,
            notifier,
            config,
        }
    }

    /// Take a pending request into review. While `IN_REVIEW` only `reviewer`
    /// may decide it.
    pub fn claim(&self, reviewer: &str, request_id: &str) -> Result<KycRequest, KycError> {
        let snapshot = self.store.get(request_id)?;
        let next = self.transition(&snapshot, Transition::Claim)?;

        let mut request = snapshot.clone();
        request.status = next;
        request.claimed_by = Some(reviewer.to_string());
        request.updated_at = TimeStamp::new();
        self.store.update_if_unchanged(&request, &snapshot)?;

        info!(request_id, reviewer, "kyc request claimed");
        Ok(request)
    }

    /// Hand a claimed request back to the queue as `PENDING`. Only the
    /// claiming reviewer may release it unless `force` is set, which frees a
    /// request held by a reviewer who is no longer around.
    pub fn release_claim(
        &self,
        reviewer: &str,
        request_id: &str,
        force: bool,
    ) -> Result<KycRequest, KycError> {
        let snapshot = self.store.get(request_id)?;
        if let Some(holder) = snapshot.claimed_by.as_deref() {
            if holder != reviewer && !force {
                return Err(KycError::ClaimedByAnotherReviewer {
                    id: snapshot.id.clone(),
                    reviewer: holder.to_string(),
                });
            }
        }
        let next = self.transition(&snapshot, Transition::Release)?;

        let mut request = snapshot.clone();
        request.status = next;
        request.claimed_by = None;
        request.updated_at = TimeStamp::new();
        self.store.update_if_unchanged(&request, &snapshot)?;

        info!(
            request_id,
            reviewer,
            holder = snapshot.claimed_by.as_deref().unwrap_or_default(),
            forced = force,
            "kyc claim released"
        );
        Ok(request)
    }

    /// Apply a single review decision. Reject and request-info need at least
    /// one non-blank feedback entry.
    pub fn review(
        &self,
        reviewer: &str,
        request_id: &str,
        action: ReviewAction,
        feedback: &[String],
    ) -> Result<KycRequest, KycError> {
        let feedback = clean_feedback(action, feedback)?;
        self.decide(reviewer, request_id, action, feedback)
    }

    /// Apply the same decision to up to `max_bulk_batch` requests. Each id
    /// succeeds or fails on its own.
    pub fn bulk_review(
        &self,
        reviewer: &str,
        request_ids: &[String],
        action: ReviewAction,
        feedback: &[String],
    ) -> Result<BulkReviewResult, KycError> {
        let max = self.config.max_bulk_batch;
        if request_ids.is_empty() || request_ids.len() > max {
            return Err(KycError::BatchSizeExceeded {
                max,
                requested: request_ids.len(),
            });
        }
        let feedback = clean_feedback(action, feedback)?;

        let mut result = BulkReviewResult::default();
        for id in request_ids {
            match self.decide(reviewer, id, action, feedback.clone()) {
                Ok(_) => result.succeeded.push(id.clone()),
                Err(e) => result.failed.push(BulkFailure {
                    id: id.clone(),
                    reason: e.kind().to_string(),
                    message: e.to_string(),
                }),
            }
        }

        info!(
            reviewer,
            %action,
            succeeded = result.succeeded.len(),
            failed = result.failed.len(),
            "bulk review finished"
        );
        Ok(result)
    }

    fn decide(
        &self,
        reviewer: &str,
        request_id: &str,
        action: ReviewAction,
        feedback: Vec<String>,
    ) -> Result<KycRequest, KycError> {
        let snapshot = self.store.get(request_id)?;
        let from = snapshot.status;

        // Only the claiming reviewer may decide a request in review
        if let (KycStatus::InReview, Some(holder)) = (from, snapshot.claimed_by.as_deref()) {
            if holder != reviewer {
                return Err(KycError::ClaimedByAnotherReviewer {
                    id: snapshot.id.clone(),
                    reviewer: holder.to_string(),
                });
            }
        }

        let next = self.transition(&snapshot, action.transition())?;

        let mut request = snapshot.clone();
        let now = TimeStamp::new();
        request.status = next;
        request.reviewed_at = Some(now.clone());
        request.reviewed_by = Some(reviewer.to_string());
        request.updated_at = now;
        request.claimed_by = None;
        request.rejection_reason = match action {
            ReviewAction::Reject => Some(feedback.join("; ")),
            _ => None,
        };
        request.feedback = feedback;

        self.store.update_if_unchanged(&request, &snapshot)?;
        info!(request_id, reviewer, from = %from, to = %next, "kyc request reviewed");

        let event = match action {
            ReviewAction::Approve => KycEvent::Approved {
                request_id: request.id.clone(),
            },
            ReviewAction::Reject => KycEvent::Rejected {
                request_id: request.id.clone(),
                reason: request.rejection_reason.clone().unwrap_or_default(),
            },
            ReviewAction::RequestInfo => KycEvent::InfoRequested {
                request_id: request.id.clone(),
                feedback: request.feedback.clone(),
            },
        };
        dispatch(self.notifier.as_ref(), &request.user_id, event);

        Ok(request)
    }

    fn transition(&self, request: &KycRequest, transition: Transition) -> Result<KycStatus, KycError> {
        KycStatusMachine::apply(KycState::from(request.status), transition, Actor::Reviewer)
            .inspect_err(|e| {
                warn!(request_id = %request.id, error = %e, "review refused by status machine");
            })
    }

    /// Append a reviewer note. Approved records are immutable.
    pub fn add_admin_note(
        &self,
        reviewer: &str,
        request_id: &str,
        note: &str,
    ) -> Result<KycRequest, KycError> {
        let note = note.trim();
        if note.is_empty() {
            let mut errors = ValidationErrors::new();
            errors.insert(fields::ADMIN_NOTES, "Note must not be empty");
            return Err(KycError::ValidationFailed(errors));
        }

        let snapshot = self.store.get(request_id)?;
        if snapshot.status == KycStatus::Approved {
            return Err(KycError::Immutable(snapshot.id));
        }

        let mut request = snapshot.clone();
        let entry = format!("[{reviewer}] {note}");
        request.admin_notes = Some(match request.admin_notes.take() {
            Some(existing) => format!("{existing}\n{entry}"),
            None => entry,
        });
        request.updated_at = TimeStamp::new();

        // A note written since `snapshot` was read makes this write stale
        self.store.update_if_unchanged(&request, &snapshot)?;
        Ok(request)
    }

    /// The review queue: pending and in-review requests, oldest first, unless
    /// `query` names other statuses.
    pub fn list_pending(
        &self,
        query: RequestQuery,
        page: Pagination,
    ) -> Result<Page<KycRequest>, KycError> {
        let query = if query.statuses.is_empty() {
            query.with_statuses(&[KycStatus::Pending, KycStatus::InReview])
        } else {
            query
        };
        Ok(self.store.query(&query, page, SortOrder::SubmittedAsc)?)
    }

    pub fn get_details(&self, request_id: &str) -> Result<RequestDetails, KycError> {
        let request = self.store.get(request_id)?;
        let history = self.store.history_for_user(&request.user_id)?;
        Ok(RequestDetails { request, history })
    }
}

// Trims entries and drops blank ones. Fails before any store access when the
// action needs feedback and none is left.
fn clean_feedback(action: ReviewAction, feedback: &[String]) -> Result<Vec<String>, KycError> {
    let cleaned: Vec<String> = feedback
        .iter()
        .map(|f| f.trim())
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect();

    if action.requires_feedback() && cleaned.is_empty() {
        return Err(KycError::MissingFeedback(action));
    }
    Ok(cleaned)
}
