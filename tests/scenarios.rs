mod common;

use anyhow::Context;
use common::{Harness, RecordingNotifier, feedback, utility_bill, valid_draft};
use kyc_verification::request::{DocumentType, Tombstone};
use kyc_verification::store::{Pagination, RequestQuery, RequestStore};
use kyc_verification::validator::fields;
use kyc_verification::{KycError, KycState, KycStatus, ReviewAction};

#[test]
fn underage_applicant_fails_validation() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let seventeen = (chrono::Utc::now() - chrono::Duration::days(17 * 365 + 30))
        .date_naive()
        .to_string();

    let err = h
        .service
        .submit("user_a", valid_draft().set_date_of_birth(&seventeen))
        .unwrap_err();

    let KycError::ValidationFailed(errors) = err else {
        panic!("expected validation failure, got {err:?}");
    };
    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors.get(fields::DATE_OF_BIRTH),
        Some("Must be at least 18 years old")
    );
    // nothing was written
    assert!(h.store.latest_for_user("user_a")?.is_none());
    assert!(h.notifier.names().is_empty());
    Ok(())
}

#[test]
fn more_types_than_documents_fails_validation() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let draft = valid_draft()
        .add_document(DocumentType::UtilityBill, utility_bill())
        .add_document_type(DocumentType::BankStatement);

    let err = h.service.submit("user_b", draft).unwrap_err();

    let KycError::ValidationFailed(errors) = err else {
        panic!("expected validation failure, got {err:?}");
    };
    assert!(errors.contains(fields::DOCUMENT_TYPES));
    assert!(h.store.latest_for_user("user_b")?.is_none());
    Ok(())
}

#[test]
fn submit_and_approve() -> anyhow::Result<()> {
    let h = Harness::new()?;

    let request = h
        .service
        .submit("user_c", valid_draft())
        .context("submission failed: ")?;
    assert_eq!(request.status, KycStatus::Pending);
    assert_eq!(request.cycle, 1);
    assert_eq!(request.country_of_residence, "GB");
    assert!(request.id.starts_with("kyc_1"));

    let claimed = h.engine.claim("admin_1", &request.id)?;
    assert_eq!(claimed.status, KycStatus::InReview);
    assert_eq!(claimed.claimed_by.as_deref(), Some("admin_1"));

    let approved = h
        .engine
        .review("admin_1", &request.id, ReviewAction::Approve, &[])?;
    assert_eq!(approved.status, KycStatus::Approved);
    assert_eq!(approved.reviewed_by.as_deref(), Some("admin_1"));
    assert!(approved.reviewed_at.is_some());
    assert!(approved.is_consistent());

    assert_eq!(h.store.get(&request.id)?, approved);
    assert_eq!(h.notifier.names(), vec!["submission_received", "approved"]);
    Ok(())
}

#[test]
fn reject_without_feedback_changes_nothing() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let request = h.service.submit("user_d", valid_draft())?;

    let err = h
        .engine
        .review("admin_1", &request.id, ReviewAction::Reject, &feedback(&["  "]))
        .unwrap_err();

    assert!(matches!(err, KycError::MissingFeedback(ReviewAction::Reject)));
    let stored = h.store.get(&request.id)?;
    assert_eq!(stored.status, KycStatus::Pending);
    assert_eq!(stored, request);
    Ok(())
}

#[test]
fn second_approval_is_rejected() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let request = h.service.submit("user_e", valid_draft())?;

    let approved = h
        .engine
        .review("admin_1", &request.id, ReviewAction::Approve, &[])?;
    let err = h
        .engine
        .review("admin_1", &request.id, ReviewAction::Approve, &[])
        .unwrap_err();

    assert!(matches!(err, KycError::InvalidTransition { .. }));
    assert_eq!(
        err.to_string(),
        "invalid transition from APPROVED to APPROVED"
    );
    assert_eq!(h.store.get(&request.id)?, approved);
    Ok(())
}

#[test]
fn bulk_review_reports_each_item() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let first = h.service.submit("user_f1", valid_draft())?;
    let second = h.service.submit("user_f2", valid_draft())?;
    let third = h.service.submit("user_f3", valid_draft())?;

    h.engine
        .review("admin_1", &second.id, ReviewAction::Approve, &[])?;
    let second_before = h.store.get(&second.id)?;

    let ids = vec![first.id.clone(), second.id.clone(), third.id.clone()];
    let result = h
        .engine
        .bulk_review("admin_2", &ids, ReviewAction::Approve, &[])?;

    assert_eq!(result.succeeded, vec![first.id.clone(), third.id.clone()]);
    assert_eq!(result.failed.len(), 1);
    assert_eq!(result.failed[0].id, second.id);
    assert_eq!(result.failed[0].reason, "InvalidTransitionError");

    assert_eq!(h.store.get(&first.id)?.status, KycStatus::Approved);
    assert_eq!(h.store.get(&third.id)?.status, KycStatus::Approved);
    assert_eq!(h.store.get(&second.id)?, second_before);
    Ok(())
}

#[test]
fn bulk_review_reports_unknown_ids() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let request = h.service.submit("user_g", valid_draft())?;

    let ids = vec!["kyc_missing".to_string(), request.id.clone()];
    let result = h.engine.bulk_review(
        "admin_1",
        &ids,
        ReviewAction::RequestInfo,
        &feedback(&["Upload a clearer scan"]),
    )?;

    assert_eq!(result.succeeded, vec![request.id.clone()]);
    assert_eq!(result.failure("kyc_missing").map(|f| f.reason.as_str()), Some("NotFound"));

    let stored = h.store.get(&request.id)?;
    assert_eq!(stored.status, KycStatus::RequiresAdditionalInfo);
    assert_eq!(stored.feedback, feedback(&["Upload a clearer scan"]));
    Ok(())
}

#[test]
fn bulk_review_enforces_batch_limits() -> anyhow::Result<()> {
    let h = Harness::new()?;

    let err = h
        .engine
        .bulk_review("admin_1", &[], ReviewAction::Approve, &[])
        .unwrap_err();
    assert!(matches!(
        err,
        KycError::BatchSizeExceeded {
            max: 50,
            requested: 0
        }
    ));

    let too_many: Vec<String> = (0..51).map(|i| format!("kyc_{i}")).collect();
    let err = h
        .engine
        .bulk_review("admin_1", &too_many, ReviewAction::Approve, &[])
        .unwrap_err();
    assert!(matches!(
        err,
        KycError::BatchSizeExceeded {
            max: 50,
            requested: 51
        }
    ));
    Ok(())
}

#[test]
fn bulk_reject_without_feedback_touches_no_item() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let request = h.service.submit("user_h", valid_draft())?;

    let err = h
        .engine
        .bulk_review("admin_1", &[request.id.clone()], ReviewAction::Reject, &[])
        .unwrap_err();

    assert!(matches!(err, KycError::MissingFeedback(_)));
    assert_eq!(h.store.get(&request.id)?.status, KycStatus::Pending);
    Ok(())
}

#[test]
fn resubmission_opens_new_cycle() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let first = h.service.submit("user_i", valid_draft())?;
    h.engine.review(
        "admin_1",
        &first.id,
        ReviewAction::RequestInfo,
        &feedback(&["Proof of address is missing"]),
    )?;

    let status = h.service.get_status("user_i")?;
    assert_eq!(
        status.state,
        KycState::Submitted(KycStatus::RequiresAdditionalInfo)
    );
    assert!(status.can_resubmit);

    let second = h.service.resubmit(
        "user_i",
        valid_draft().add_document(DocumentType::ProofOfAddress, utility_bill()),
    )?;
    assert_eq!(second.status, KycStatus::Pending);
    assert_eq!(second.cycle, 2);
    assert_eq!(second.previous_request_id.as_deref(), Some(first.id.as_str()));

    // prior cycle kept for audit, untouched
    let prior = h.store.get(&first.id)?;
    assert_eq!(prior.status, KycStatus::RequiresAdditionalInfo);
    assert_eq!(prior.feedback, feedback(&["Proof of address is missing"]));

    let details = h.engine.get_details(&second.id)?;
    assert_eq!(details.history.len(), 2);
    assert_eq!(details.history[0].id, first.id);
    assert_eq!(details.history[1].id, second.id);

    let status = h.service.get_status("user_i")?;
    assert_eq!(status.state, KycState::Submitted(KycStatus::Pending));
    assert!(!status.can_resubmit);
    Ok(())
}

#[test]
fn submit_after_rejection_is_a_resubmission() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let first = h.service.submit("user_j", valid_draft())?;
    let rejected = h.engine.review(
        "admin_1",
        &first.id,
        ReviewAction::Reject,
        &feedback(&["Document expired", "Selfie does not match"]),
    )?;
    assert_eq!(
        rejected.rejection_reason.as_deref(),
        Some("Document expired; Selfie does not match")
    );

    let second = h.service.submit("user_j", valid_draft())?;
    assert_eq!(second.cycle, 2);
    assert_eq!(h.store.history_for_user("user_j")?.len(), 2);
    Ok(())
}

#[test]
fn cannot_resubmit_while_pending_or_after_approval() -> anyhow::Result<()> {
    let h = Harness::new()?;

    let err = h.service.resubmit("user_k", valid_draft()).unwrap_err();
    assert!(matches!(
        err,
        KycError::InvalidTransition {
            from: KycState::NotSubmitted,
            ..
        }
    ));

    let request = h.service.submit("user_k", valid_draft())?;
    let err = h.service.submit("user_k", valid_draft()).unwrap_err();
    assert!(matches!(err, KycError::InvalidTransition { .. }));

    h.engine
        .review("admin_1", &request.id, ReviewAction::Approve, &[])?;
    let err = h.service.resubmit("user_k", valid_draft()).unwrap_err();
    assert_eq!(err.kind(), "InvalidTransitionError");
    assert_eq!(h.store.history_for_user("user_k")?.len(), 1);
    Ok(())
}

#[test]
fn claimed_request_is_locked_to_its_reviewer() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let request = h.service.submit("user_l", valid_draft())?;
    h.engine.claim("admin_1", &request.id)?;

    let err = h
        .engine
        .review("admin_2", &request.id, ReviewAction::Approve, &[])
        .unwrap_err();
    assert!(matches!(err, KycError::ClaimedByAnotherReviewer { .. }));

    let err = h.engine.claim("admin_2", &request.id).unwrap_err();
    assert!(matches!(err, KycError::InvalidTransition { .. }));

    let decided = h.engine.review(
        "admin_1",
        &request.id,
        ReviewAction::Reject,
        &feedback(&["Name mismatch"]),
    )?;
    assert_eq!(decided.status, KycStatus::Rejected);
    assert!(decided.claimed_by.is_none());
    Ok(())
}

#[test]
fn stale_update_is_a_concurrent_modification() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let request = h.service.submit("user_m", valid_draft())?;

    // another reviewer decided in the meantime
    h.engine
        .review("admin_1", &request.id, ReviewAction::Approve, &[])?;

    let mut stale = request.clone();
    stale.status = KycStatus::InReview;
    let err: KycError = h
        .store
        .update_if_unchanged(&stale, &request)
        .unwrap_err()
        .into();

    assert_eq!(err.kind(), "ConcurrentModificationError");
    assert_eq!(h.store.get(&request.id)?.status, KycStatus::Approved);
    Ok(())
}

#[test]
fn admin_notes_append_until_approval() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let request = h.service.submit("user_n", valid_draft())?;

    h.engine.add_admin_note("admin_1", &request.id, "Called the applicant")?;
    let noted = h.engine.add_admin_note("admin_2", &request.id, "Address confirmed")?;
    assert_eq!(
        noted.admin_notes.as_deref(),
        Some("[admin_1] Called the applicant\n[admin_2] Address confirmed")
    );
    assert_eq!(noted.status, KycStatus::Pending);

    h.engine
        .review("admin_1", &request.id, ReviewAction::Approve, &[])?;
    let err = h
        .engine
        .add_admin_note("admin_1", &request.id, "late note")
        .unwrap_err();
    assert!(matches!(err, KycError::Immutable(_)));
    Ok(())
}

#[test]
fn review_queue_lists_open_requests_oldest_first() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let first = h.service.submit("user_o1", valid_draft())?;
    let second = h
        .service
        .submit("user_o2", valid_draft().set_country("DE"))?;
    let third = h.service.submit("user_o3", valid_draft())?;
    h.engine.claim("admin_1", &second.id)?;
    h.engine
        .review("admin_1", &third.id, ReviewAction::Approve, &[])?;

    let page = h
        .engine
        .list_pending(RequestQuery::new(), Pagination::default())?;
    let listed: Vec<&str> = page.items.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(listed, vec![first.id.as_str(), second.id.as_str()]);
    assert_eq!(page.total, 2);

    let german = h
        .engine
        .list_pending(RequestQuery::new().with_country("de"), Pagination::default())?;
    assert_eq!(german.total, 1);
    assert_eq!(german.items[0].id, second.id);

    let paged = h.engine.list_pending(RequestQuery::new(), Pagination::new(2, 1))?;
    assert_eq!(paged.items.len(), 1);
    assert_eq!(paged.items[0].id, second.id);
    assert_eq!(paged.total_pages(), 2);
    Ok(())
}

#[test]
fn delete_my_data_leaves_tombstones() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let first = h.service.submit("user_p", valid_draft())?;
    h.engine.review(
        "admin_1",
        &first.id,
        ReviewAction::Reject,
        &feedback(&["Blurry"]),
    )?;
    let second = h.service.resubmit("user_p", valid_draft())?;

    let report = h.service.delete_my_data("user_p")?;
    assert_eq!(report.erased_requests, 2);
    // one document and one selfie per cycle
    assert_eq!(report.deleted_files, 4);
    assert!(report.failed_files.is_empty());

    assert!(h.store.latest_for_user("user_p")?.is_none());
    assert!(h.store.history_for_user("user_p")?.is_empty());
    assert_eq!(h.engine.get_details(&second.id).unwrap_err().kind(), "NotFound");

    let tombstones = h.store.tombstones(None)?;
    assert_eq!(tombstones.len(), 2);
    let rejected = tombstones.iter().find(|t| t.id == first.id).context("tombstone")?;
    assert_eq!(rejected.final_status, KycStatus::Rejected);
    assert_eq!(rejected.country_of_residence, "GB");

    let status = h.service.get_status("user_p")?;
    assert_eq!(status.state, KycState::NotSubmitted);
    assert!(status.request.is_none());

    // a fresh start is a first submission again
    let fresh = h.service.submit("user_p", valid_draft())?;
    assert_eq!(fresh.cycle, 1);
    Ok(())
}

#[test]
fn failed_notification_keeps_state_change() -> anyhow::Result<()> {
    let h = Harness::with_notifier(RecordingNotifier {
        fail: true,
        ..RecordingNotifier::default()
    })?;

    let request = h.service.submit("user_q", valid_draft())?;
    let approved = h
        .engine
        .review("admin_1", &request.id, ReviewAction::Approve, &[])?;

    assert_eq!(approved.status, KycStatus::Approved);
    assert_eq!(h.store.get(&request.id)?.status, KycStatus::Approved);
    assert_eq!(h.notifier.names().len(), 2);
    Ok(())
}

#[test]
fn stale_note_write_is_refused() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let request = h.service.submit("user_r", valid_draft())?;
    let snapshot = h.store.get(&request.id)?;

    // a note lands between the read and the write; the status is unchanged
    h.engine.add_admin_note("admin_1", &request.id, "first note")?;

    let mut stale = snapshot.clone();
    stale.admin_notes = Some("[admin_2] second note".to_string());
    let err: KycError = h
        .store
        .update_if_unchanged(&stale, &snapshot)
        .unwrap_err()
        .into();

    assert_eq!(err.kind(), "ConcurrentModificationError");
    assert_eq!(
        h.store.get(&request.id)?.admin_notes.as_deref(),
        Some("[admin_1] first note")
    );
    Ok(())
}

#[test]
fn erasure_from_a_stale_history_is_refused() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let request = h.service.submit("user_s", valid_draft())?;

    let history = h.store.history_for_user("user_s")?;
    let tombstones: Vec<Tombstone> = history
        .iter()
        .map(|r| Tombstone::from_request(r, &history))
        .collect();

    // approved after the tombstones were built, the head pointer is unchanged
    h.engine
        .review("admin_1", &request.id, ReviewAction::Approve, &[])?;

    let err: KycError = h
        .store
        .erase_user("user_s", &history, &tombstones)
        .unwrap_err()
        .into();
    assert_eq!(err.kind(), "ConcurrentModificationError");
    assert_eq!(h.store.get(&request.id)?.status, KycStatus::Approved);
    assert!(h.store.tombstones(None)?.is_empty());

    // a fresh erasure records what was actually there
    h.service.delete_my_data("user_s")?;
    let tombstones = h.store.tombstones(None)?;
    assert_eq!(tombstones.len(), 1);
    assert_eq!(tombstones[0].final_status, KycStatus::Approved);
    Ok(())
}

#[test]
fn claim_can_be_released_or_taken_over() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let request = h.service.submit("user_t", valid_draft())?;

    let err = h.engine.release_claim("admin_1", &request.id, false).unwrap_err();
    assert_eq!(err.kind(), "InvalidTransitionError");

    h.engine.claim("admin_gone", &request.id)?;
    let err = h.engine.release_claim("admin_2", &request.id, false).unwrap_err();
    assert!(matches!(err, KycError::ClaimedByAnotherReviewer { .. }));
    assert_eq!(h.store.get(&request.id)?.status, KycStatus::InReview);

    let released = h.engine.release_claim("admin_2", &request.id, true)?;
    assert_eq!(released.status, KycStatus::Pending);
    assert!(released.claimed_by.is_none());

    h.engine.claim("admin_2", &request.id)?;
    let released = h.engine.release_claim("admin_2", &request.id, false)?;
    assert_eq!(released.status, KycStatus::Pending);

    h.engine.claim("admin_2", &request.id)?;
    let approved = h
        .engine
        .review("admin_2", &request.id, ReviewAction::Approve, &[])?;
    assert_eq!(approved.status, KycStatus::Approved);
    assert_eq!(approved.reviewed_by.as_deref(), Some("admin_2"));
    Ok(())
}

#[test]
fn blank_admin_note_is_rejected() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let request = h.service.submit("user_u", valid_draft())?;

    let err = h
        .engine
        .add_admin_note("admin_1", &request.id, "  \n\t ")
        .unwrap_err();
    let KycError::ValidationFailed(errors) = err else {
        panic!("expected validation failure, got {err:?}");
    };
    assert_eq!(errors.get(fields::ADMIN_NOTES), Some("Note must not be empty"));
    assert_eq!(h.store.get(&request.id)?, request);
    Ok(())
}

#[test]
fn user_ids_with_nul_are_refused() -> anyhow::Result<()> {
    let h = Harness::new()?;
    let existing = h.service.submit("a", valid_draft())?;

    for user_id in ["a\0b", "a\0", "", "   "] {
        let err = h.service.submit(user_id, valid_draft()).unwrap_err();
        assert_eq!(err.kind(), "InvalidIdentifier");
        assert_eq!(h.service.get_status(user_id).unwrap_err().kind(), "InvalidIdentifier");
        assert_eq!(
            h.service.delete_my_data(user_id).unwrap_err().kind(),
            "InvalidIdentifier"
        );
    }

    let history = h.store.history_for_user("a")?;
    assert_eq!(history, vec![existing]);
    Ok(())
}
