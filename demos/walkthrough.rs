//! Walks one applicant through rejection, resubmission and approval against a
//! throwaway database, then prints the resulting statistics.
//!
//! Run with `RUST_LOG=debug cargo run --example walkthrough` to see every step.
use kyc_verification::files::SledFileStorage;
use kyc_verification::notify::LogNotifier;
use kyc_verification::store::{Pagination, RequestQuery, SledRequestStore};
use kyc_verification::{
    AdminReviewEngine, DocumentType, FileUpload, KycConfig, KycDraft, ReviewAction,
    StatisticsAggregator, SubmissionService,
};
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

fn draft() -> KycDraft {
    KycDraft::new()
        .set_full_name("Mary Jackson")
        .set_date_of_birth("1991-04-09")
        .set_country("us")
        .set_address("600 Langley Boulevard, Hampton, VA")
        .add_document(
            DocumentType::DriversLicense,
            FileUpload::new("license.jpg", "image/jpeg", vec![0xFF, 0xD8, 0xFF, 0x01]),
        )
        .set_selfie(FileUpload::new("selfie.png", "image/png", vec![0x89, 0x50, 0x4E, 0x47]))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let dir = tempfile::tempdir()?;
    let db = Arc::new(sled::open(dir.path().join("walkthrough.db"))?);
    let config = Arc::new(KycConfig::load()?);

    let store = Arc::new(SledRequestStore::new(db.clone()));
    let files = Arc::new(SledFileStorage::open(&db)?);
    let notifier = Arc::new(LogNotifier);

    let service = SubmissionService::new(store.clone(), files, notifier.clone(), config.clone());
    let engine = AdminReviewEngine::new(store.clone(), notifier, config);
    let stats = StatisticsAggregator::new(store);

    let first = service.submit("user_mary", draft())?;
    let queue = engine.list_pending(RequestQuery::new(), Pagination::default())?;
    println!("queue holds {} request(s)", queue.total);

    // a reviewer goes off shift and the claim is handed back
    engine.claim("admin_bob", &first.id)?;
    engine.release_claim("admin_dorothy", &first.id, true)?;

    engine.claim("admin_dorothy", &first.id)?;
    engine.review(
        "admin_dorothy",
        &first.id,
        ReviewAction::RequestInfo,
        &["Add a proof of address".to_string()],
    )?;
    println!("status: {:?}", service.get_status("user_mary")?.state);

    let second = service.resubmit(
        "user_mary",
        draft().add_document(
            DocumentType::UtilityBill,
            FileUpload::new("bill.pdf", "application/pdf", b"%PDF-1.4".to_vec()),
        ),
    )?;
    let result = engine.bulk_review(
        "admin_dorothy",
        &[second.id.clone(), first.id.clone()],
        ReviewAction::Approve,
        &[],
    )?;
    println!("bulk review: {}", serde_json::to_string_pretty(&result)?);

    let details = engine.get_details(&second.id)?;
    println!("user has {} cycle(s) on record", details.history.len());

    println!(
        "statistics: {}",
        serde_json::to_string_pretty(&stats.compute_statistics(None)?)?
    );
    Ok(())
}
