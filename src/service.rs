//! Service layer API for user-facing KYC operations
use super::config::KycConfig;
use super::draft::{KycDraft, ValidatedSubmission};
use super::error::KycError;
use super::files::FileStorage;
use super::notify::{KycEvent, Notifier, dispatch};
use super::request::{FileRef, KycRequest, SubmittedDocument, TimeStamp, Tombstone};
use super::status::{Actor, KycState, KycStatusMachine, Transition};
use super::store::RequestStore;
use super::utils::new_request_id;
use super::validator::SubmissionValidator;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What a user sees when asking for their verification status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSummary {
    pub state: KycState,
    pub request: Option<KycRequest>,
    pub can_resubmit: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    pub erased_requests: usize,
    pub deleted_files: usize,
    /// Files whose removal failed after the records were erased
    pub failed_files: Vec<String>,
}

pub struct SubmissionService {
    store: Arc<dyn RequestStore>,
    files: Arc<dyn FileStorage>,
    notifier: Arc<dyn Notifier>,
    validator: SubmissionValidator,
}

impl SubmissionService {
    pub fn new(
        store: Arc<dyn RequestStore>,
        files: Arc<dyn FileStorage>,
        notifier: Arc<dyn Notifier>,
        config: Arc<KycConfig>,
    ) -> Self {
        Self {
            store,
            files,
            notifier,
            validator: SubmissionValidator::new(config),
        }
    }

    /// Submit a draft for verification. Users without a request open their
    /// first cycle; users whose last cycle was rejected or sent back open a
    /// new one.
    pub fn submit(&self, user_id: &str, draft: KycDraft) -> Result<KycRequest, KycError> {
        self.open_cycle(user_id, draft, false)
    }

    /// Resubmit after a rejection or a request for more information.
    pub fn resubmit(&self, user_id: &str, draft: KycDraft) -> Result<KycRequest, KycError> {
        self.open_cycle(user_id, draft, true)
    }

    fn open_cycle(
        &self,
        user_id: &str,
        draft: KycDraft,
        resubmission: bool,
    ) -> Result<KycRequest, KycError> {
        check_user_id(user_id)?;
        let now = Utc::now();

        // Validate the whole draft before touching any collaborator
        let submission = self
            .validator
            .validate_and_finalise(draft, now)
            .map_err(|errors| {
                debug!(user_id, fields = %errors, "submission rejected by validation");
                KycError::ValidationFailed(errors)
            })?;

        let latest = self.store.latest_for_user(user_id)?;
        let from = KycState::from_latest(latest.as_ref());
        let transition = if latest.is_none() && !resubmission {
            Transition::Submit
        } else {
            Transition::Resubmit
        };
        let status = KycStatusMachine::apply(from, transition, Actor::User).inspect_err(|e| {
            warn!(user_id, error = %e, "submission refused by status machine");
        })?;

        let (documents, selfie) = self.store_files(&submission)?;
        let submitted_at = TimeStamp::from(now);

        let request = KycRequest {
            id: new_request_id()?,
            user_id: user_id.to_string(),
            status,
            full_name: submission.full_name,
            date_of_birth: submission.date_of_birth,
            country_of_residence: submission.country_of_residence,
            residential_address: submission.residential_address,
            documents,
            selfie,
            submitted_at: submitted_at.clone(),
            reviewed_at: None,
            reviewed_by: None,
            rejection_reason: None,
            admin_notes: None,
            feedback: vec![],
            risk_score: None,
            compliance_flags: vec![],
            cycle: latest.as_ref().map_or(1, |r| r.cycle + 1),
            previous_request_id: latest.as_ref().map(|r| r.id.clone()),
            claimed_by: None,
            updated_at: submitted_at,
        };

        let expected_head = latest.as_ref().map(|r| r.id.as_str());
        if let Err(e) = self.store.create_cycle(&request, expected_head) {
            self.discard_files(request.files());
            return Err(e.into());
        }

        info!(
            request_id = %request.id,
            user_id,
            cycle = request.cycle,
            documents = request.documents.len(),
            "kyc submission received"
        );
        dispatch(
            self.notifier.as_ref(),
            user_id,
            KycEvent::SubmissionReceived {
                request_id: request.id.clone(),
            },
        );

        Ok(request)
    }

    // Stores every document and the selfie. On failure the files written so
    // far are removed again.
    fn store_files(
        &self,
        submission: &ValidatedSubmission,
    ) -> Result<(Vec<SubmittedDocument>, FileRef), KycError> {
        let mut documents = Vec::with_capacity(submission.documents.len());

        for (document_type, upload) in &submission.documents {
            match self.files.store(upload) {
                Ok(file) => documents.push(SubmittedDocument {
                    document_type: *document_type,
                    file,
                }),
                Err(e) => {
                    self.discard_files(documents.iter().map(|d| &d.file).collect());
                    return Err(e.into());
                }
            }
        }

        match self.files.store(&submission.selfie) {
            Ok(selfie) => Ok((documents, selfie)),
            Err(e) => {
                self.discard_files(documents.iter().map(|d| &d.file).collect());
                Err(e.into())
            }
        }
    }

    fn discard_files(&self, files: Vec<&FileRef>) {
        for file in files {
            if let Err(e) = self.files.delete(file) {
                error!(file_id = %file.id, error = %e, "failed to discard stored file");
            }
        }
    }

    pub fn get_status(&self, user_id: &str) -> Result<StatusSummary, KycError> {
        check_user_id(user_id)?;
        let latest = self.store.latest_for_user(user_id)?;
        let state = KycState::from_latest(latest.as_ref());

        Ok(StatusSummary {
            state,
            can_resubmit: KycStatusMachine::is_permitted(state, Transition::Resubmit),
            request: latest,
        })
    }

    /// Erase every cycle and file of `user_id`, keeping an anonymized
    /// tombstone per cycle for statistics.
    pub fn delete_my_data(&self, user_id: &str) -> Result<DeletionReport, KycError> {
        check_user_id(user_id)?;
        let history = self.store.history_for_user(user_id)?;
        if history.is_empty() {
            return Ok(DeletionReport::default());
        }

        let tombstones: Vec<Tombstone> = history
            .iter()
            .map(|r| Tombstone::from_request(r, &history))
            .collect();
        self.store.erase_user(user_id, &history, &tombstones)?;

        let mut report = DeletionReport {
            erased_requests: history.len(),
            ..DeletionReport::default()
        };
        for file in history.iter().flat_map(KycRequest::files) {
            match self.files.delete(file) {
                Ok(()) => report.deleted_files += 1,
                Err(e) => {
                    error!(file_id = %file.id, error = %e, "failed to delete file during erasure");
                    report.failed_files.push(file.id.clone());
                }
            }
        }

        info!(user_id, cycles = report.erased_requests, "user kyc data erased");
        Ok(report)
    }
}

// User ids become parts of NUL separated store keys.
fn check_user_id(user_id: &str) -> Result<(), KycError> {
    if user_id.trim().is_empty() || user_id.contains('\0') {
        return Err(KycError::InvalidIdentifier(user_id.escape_debug().to_string()));
    }
    Ok(())
}
