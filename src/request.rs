//! Core KYC request types and their CBOR encodings
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Review status of one submission cycle.
///
/// `RequiresAdditionalInfo` is the canonical name for the state users see as
/// "requires resubmission"; both spellings parse to it.
#[derive(
    minicbor::Encode,
    minicbor::Decode,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KycStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    InReview,
    #[n(2)]
    Approved,
    #[n(3)]
    Rejected,
    #[n(4)]
    RequiresAdditionalInfo,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("unknown value: {0}")]
pub struct UnknownValue(pub String);

impl KycStatus {
    pub const ALL: [KycStatus; 5] = [
        KycStatus::Pending,
        KycStatus::InReview,
        KycStatus::Approved,
        KycStatus::Rejected,
        KycStatus::RequiresAdditionalInfo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KycStatus::Pending => "PENDING",
            KycStatus::InReview => "IN_REVIEW",
            KycStatus::Approved => "APPROVED",
            KycStatus::Rejected => "REJECTED",
            KycStatus::RequiresAdditionalInfo => "REQUIRES_ADDITIONAL_INFO",
        }
    }

    /// User facing label
    pub fn label(&self) -> &'static str {
        match self {
            KycStatus::Pending => "Pending review",
            KycStatus::InReview => "In review",
            KycStatus::Approved => "Approved",
            KycStatus::Rejected => "Rejected",
            KycStatus::RequiresAdditionalInfo => "Requires resubmission",
        }
    }

    /// A reviewer has made a decision on this cycle.
    pub fn is_decided(&self) -> bool {
        matches!(
            self,
            KycStatus::Approved | KycStatus::Rejected | KycStatus::RequiresAdditionalInfo
        )
    }

    pub fn allows_resubmission(&self) -> bool {
        matches!(self, KycStatus::Rejected | KycStatus::RequiresAdditionalInfo)
    }
}

impl fmt::Display for KycStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KycStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(KycStatus::Pending),
            "IN_REVIEW" => Ok(KycStatus::InReview),
            "APPROVED" => Ok(KycStatus::Approved),
            "REJECTED" => Ok(KycStatus::Rejected),
            "REQUIRES_ADDITIONAL_INFO" | "REQUIRES_RESUBMISSION" => {
                Ok(KycStatus::RequiresAdditionalInfo)
            }
            _ => Err(UnknownValue(s.to_string())),
        }
    }
}

#[derive(
    minicbor::Encode,
    minicbor::Decode,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentType {
    #[n(0)]
    Passport,
    #[n(1)]
    NationalId,
    #[n(2)]
    DriversLicense,
    #[n(3)]
    ResidencePermit,
    #[n(4)]
    UtilityBill,
    #[n(5)]
    BankStatement,
    #[n(6)]
    ProofOfAddress,
}

impl DocumentType {
    pub const ALL: [DocumentType; 7] = [
        DocumentType::Passport,
        DocumentType::NationalId,
        DocumentType::DriversLicense,
        DocumentType::ResidencePermit,
        DocumentType::UtilityBill,
        DocumentType::BankStatement,
        DocumentType::ProofOfAddress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Passport => "PASSPORT",
            DocumentType::NationalId => "NATIONAL_ID",
            DocumentType::DriversLicense => "DRIVERS_LICENSE",
            DocumentType::ResidencePermit => "RESIDENCE_PERMIT",
            DocumentType::UtilityBill => "UTILITY_BILL",
            DocumentType::BankStatement => "BANK_STATEMENT",
            DocumentType::ProofOfAddress => "PROOF_OF_ADDRESS",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        DocumentType::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| UnknownValue(s.to_string()))
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

// `Utc` itself is not `Ord`, so ordering cannot be derived for the generic type.
impl PartialOrd for TimeStamp<Utc> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeStamp<Utc> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        min: u32,
        sec: u32,
    ) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(TimeStamp)
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl Serialize for TimeStamp<Utc> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// Average year length used for age arithmetic.
const SECONDS_PER_YEAR: f64 = 365.25 * 24.0 * 60.0 * 60.0;

/// A calendar date of birth. Encoded as days from the common era.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Serialize)]
pub struct BirthDate(NaiveDate);

impl BirthDate {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Accepts `YYYY-MM-DD`, optionally followed by an RFC 3339 time part.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        NaiveDate::parse_from_str(input, "%Y-%m-%d")
            .ok()
            .or_else(|| {
                DateTime::parse_from_rfc3339(input)
                    .ok()
                    .map(|dt| dt.date_naive())
            })
            .map(BirthDate)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// Whole years elapsed at `now`: floor((now - dob) / 365.25 days).
    pub fn age_years(&self, now: DateTime<Utc>) -> i64 {
        let born = self.0.and_time(chrono::NaiveTime::MIN).and_utc();
        let elapsed = (now - born).num_seconds() as f64;
        (elapsed / SECONDS_PER_YEAR).floor() as i64
    }
}

impl<C> minicbor::Encode<C> for BirthDate {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.i32(self.0.num_days_from_ce())?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for BirthDate {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let days = d.i32()?;

        NaiveDate::from_num_days_from_ce_opt(days)
            .map(BirthDate)
            .ok_or(minicbor::decode::Error::message(
                "failed to convert day count to a calendar date",
            ))
    }
}

/// Reference to a file held by the file storage collaborator.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRef {
    #[n(0)]
    pub id: String, // bech32 encoded uuid7
    #[n(1)]
    pub file_name: String,
    #[n(2)]
    pub mime_type: String,
    #[n(3)]
    pub size: u64,
    #[n(4)]
    pub digest: String, // sha256 of the contents
}

/// One identity document paired with the type the user declared for it.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmittedDocument {
    #[n(0)]
    pub document_type: DocumentType,
    #[n(1)]
    pub file: FileRef,
}

/// One submission cycle. Keyed by `id` in the request store.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Serialize)]
pub struct KycRequest {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub user_id: String,
    #[n(2)]
    pub status: KycStatus,
    #[n(3)]
    pub full_name: String,
    #[n(4)]
    pub date_of_birth: BirthDate,
    #[n(5)]
    pub country_of_residence: String, // ISO 3166-1 alpha-2, upper case
    #[n(6)]
    pub residential_address: String,
    #[n(7)]
    pub documents: Vec<SubmittedDocument>,
    #[n(8)]
    pub selfie: FileRef,
    #[n(9)]
    pub submitted_at: TimeStamp<Utc>,
    #[n(10)]
    pub reviewed_at: Option<TimeStamp<Utc>>,
    #[n(11)]
    pub reviewed_by: Option<String>,
    #[n(12)]
    pub rejection_reason: Option<String>,
    #[n(13)]
    pub admin_notes: Option<String>,
    #[n(14)]
    pub feedback: Vec<String>,
    #[n(15)]
    pub risk_score: Option<f64>,
    #[n(16)]
    pub compliance_flags: Vec<String>,
    #[n(17)]
    pub cycle: u32, // 1 for a user's first submission
    #[n(18)]
    pub previous_request_id: Option<String>,
    #[n(19)]
    pub claimed_by: Option<String>,
    #[n(20)]
    pub updated_at: TimeStamp<Utc>,
}

impl KycRequest {
    pub fn document_types(&self) -> Vec<DocumentType> {
        self.documents.iter().map(|d| d.document_type).collect()
    }

    /// All files this cycle references, selfie last.
    pub fn files(&self) -> Vec<&FileRef> {
        self.documents
            .iter()
            .map(|d| &d.file)
            .chain(std::iter::once(&self.selfie))
            .collect()
    }

    pub fn processing_time(&self) -> Option<Duration> {
        self.reviewed_at
            .as_ref()
            .map(|r| r.to_datetime_utc() - self.submitted_at.to_datetime_utc())
    }

    /// Checks the record level invariants a stored request must satisfy.
    pub fn is_consistent(&self) -> bool {
        let documents_ok = (1..=3).contains(&self.documents.len());
        let review_ok = match self.status {
            KycStatus::Approved | KycStatus::Rejected => {
                self.reviewed_at.is_some() && self.reviewed_by.is_some()
            }
            KycStatus::RequiresAdditionalInfo => !self.feedback.is_empty(),
            KycStatus::Pending | KycStatus::InReview => true,
        };
        documents_ok && review_ok
    }

    /// True when no earlier cycle of the same user ended rejected or sent back
    /// for more information.
    pub fn is_first_attempt(&self, history: &[KycRequest]) -> bool {
        !history.iter().any(|other| {
            other.user_id == self.user_id
                && other.id != self.id
                && other.submitted_at < self.submitted_at
                && other.status.allows_resubmission()
        })
    }
}

/// What survives of a cycle after its owner erased their personal data.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tombstone {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub submitted_at: TimeStamp<Utc>,
    #[n(2)]
    pub reviewed_at: Option<TimeStamp<Utc>>,
    #[n(3)]
    pub final_status: KycStatus,
    #[n(4)]
    pub document_types: Vec<DocumentType>,
    #[n(5)]
    pub country_of_residence: String,
    #[n(6)]
    pub first_attempt: bool,
    #[n(7)]
    pub erased_at: TimeStamp<Utc>,
}

impl Tombstone {
    pub fn from_request(request: &KycRequest, history: &[KycRequest]) -> Self {
        Self {
            id: request.id.clone(),
            submitted_at: request.submitted_at.clone(),
            reviewed_at: request.reviewed_at.clone(),
            final_status: request.status,
            document_types: request.document_types(),
            country_of_residence: request.country_of_residence.clone(),
            first_attempt: request.is_first_attempt(history),
            erased_at: TimeStamp::new(),
        }
    }
}

/// Half open `[start, end)` window over submission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// The `days` days leading up to `now`.
    pub fn last_days(now: DateTime<Utc>, days: i64) -> Self {
        Self {
            start: now - Duration::days(days.max(0)),
            end: now,
        }
    }

    pub fn contains(&self, instant: &DateTime<Utc>) -> bool {
        self.start <= *instant && *instant < self.end
    }
}
