pub mod config;
pub mod draft;
pub mod error;
pub mod file_validator;
pub mod files;
pub mod notify;
pub mod request;
pub mod review;
pub mod service;
pub mod stats;
pub mod status;
pub mod store;
pub mod utils;
pub mod validator;

pub use config::KycConfig;
pub use draft::{FileUpload, KycDraft};
pub use error::{KycError, StoreError};
pub use request::{DocumentType, KycRequest, KycStatus, TimeRange};
pub use review::{AdminReviewEngine, BulkReviewResult, ReviewAction};
pub use service::SubmissionService;
pub use stats::{Statistics, StatisticsAggregator};
pub use status::{KycState, KycStatusMachine};
