#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use kyc_verification::draft::{FileUpload, KycDraft};
use kyc_verification::files::SledFileStorage;
use kyc_verification::notify::{KycEvent, Notifier};
use kyc_verification::request::DocumentType;
use kyc_verification::store::SledRequestStore;
use kyc_verification::{AdminReviewEngine, KycConfig, StatisticsAggregator, SubmissionService};
use tempfile::{TempDir, tempdir};

/// Keeps every event it is handed, optionally failing each delivery.
#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<(String, KycEvent)>>,
    pub fail: bool,
}

impl RecordingNotifier {
    pub fn names(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, e)| e.name())
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, user_id: &str, event: &KycEvent) -> anyhow::Result<()> {
        self.events
            .lock()
            .unwrap()
            .push((user_id.to_string(), event.clone()));
        if self.fail {
            anyhow::bail!("mailbox unreachable");
        }
        Ok(())
    }
}

pub struct Harness {
    // Sled holds a file lock, so every test gets its own database in a
    // temporary directory that is removed on drop.
    _dir: TempDir,
    pub db: Arc<sled::Db>,
    pub store: Arc<SledRequestStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub service: SubmissionService,
    pub engine: AdminReviewEngine,
    pub stats: StatisticsAggregator,
}

impl Harness {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_notifier(RecordingNotifier::default())
    }

    pub fn with_notifier(notifier: RecordingNotifier) -> anyhow::Result<Self> {
        let dir = tempdir()?;
        let db = Arc::new(sled::open(dir.path().join("kyc.db"))?);
        let store = Arc::new(SledRequestStore::new(db.clone()));
        let files = Arc::new(SledFileStorage::open(&db)?);
        let notifier = Arc::new(notifier);
        let config = Arc::new(KycConfig::default());

        Ok(Self {
            service: SubmissionService::new(
                store.clone(),
                files,
                notifier.clone(),
                config.clone(),
            ),
            engine: AdminReviewEngine::new(store.clone(), notifier.clone(), config),
            stats: StatisticsAggregator::new(store.clone()),
            _dir: dir,
            db,
            store,
            notifier,
        })
    }
}

pub fn passport_scan() -> FileUpload {
    FileUpload::new("passport.pdf", "application/pdf", b"%PDF-1.7 passport".to_vec())
}

pub fn utility_bill() -> FileUpload {
    FileUpload::new("bill.png", "image/png", vec![0x89, b'P', b'N', b'G', 1, 2, 3])
}

pub fn selfie() -> FileUpload {
    FileUpload::new("selfie.jpg", "image/jpeg", vec![0xFF, 0xD8, 0xFF, 7, 7, 7])
}

/// A draft that passes every rule.
pub fn valid_draft() -> KycDraft {
    KycDraft::new()
        .set_full_name("Ada Lovelace")
        .set_date_of_birth("1990-12-10")
        .set_country("gb")
        .set_address("12 St James's Square, London")
        .add_document(DocumentType::Passport, passport_scan())
        .set_selfie(selfie())
}

pub fn feedback(entries: &[&str]) -> Vec<String> {
    entries.iter().map(|e| e.to_string()).collect()
}
