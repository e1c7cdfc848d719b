//! Aggregate metrics over KYC requests
//!
//! Every ratio is taken over the population inside the requested time range,
//! never over the whole store. Tombstones of erased users count like the
//! requests they replaced.
use super::error::KycError;
use super::request::{DocumentType, KycRequest, KycStatus, TimeRange, Tombstone};
use super::store::RequestStore;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub in_review: usize,
    pub approved: usize,
    pub rejected: usize,
    pub requires_additional_info: usize,
}

impl StatusCounts {
    fn record(&mut self, status: KycStatus) {
        match status {
            KycStatus::Pending => self.pending += 1,
            KycStatus::InReview => self.in_review += 1,
            KycStatus::Approved => self.approved += 1,
            KycStatus::Rejected => self.rejected += 1,
            KycStatus::RequiresAdditionalInfo => self.requires_additional_info += 1,
        }
    }

    pub fn get(&self, status: KycStatus) -> usize {
        match status {
            KycStatus::Pending => self.pending,
            KycStatus::InReview => self.in_review,
            KycStatus::Approved => self.approved,
            KycStatus::Rejected => self.rejected,
            KycStatus::RequiresAdditionalInfo => self.requires_additional_info,
        }
    }

    pub fn total(&self) -> usize {
        KycStatus::ALL.iter().map(|s| self.get(*s)).sum()
    }
}

/// Hours between submission and review, over reviewed requests.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProcessingTime {
    pub reviewed: usize,
    pub average_hours: f64,
    pub min_hours: f64,
    pub max_hours: f64,
    pub median_hours: f64,
    pub p90_hours: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakdownEntry {
    pub key: String,
    pub count: usize,
    /// Share of the breakdown's population, 0 to 100
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub submitted: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub range: Option<TimeRange>,
    pub total_submissions: usize,
    pub by_status: StatusCounts,
    /// approved / (approved + rejected), 0 when nothing was decided
    pub approval_rate: f64,
    pub rejection_rate: f64,
    /// Share of approvals reached without an earlier rejected or sent back cycle
    pub first_time_approval_rate: f64,
    pub processing_time: Option<ProcessingTime>,
    /// Flattened over every submitted document
    pub document_types: Vec<BreakdownEntry>,
    pub countries: Vec<BreakdownEntry>,
    pub daily_submissions: Vec<DailyCount>,
}

// The fields statistics read, shared by live requests and tombstones.
struct Sample<'a> {
    status: KycStatus,
    submitted_at: DateTime<Utc>,
    processing_hours: Option<f64>,
    document_types: Vec<DocumentType>,
    country: &'a str,
    first_attempt: bool,
}

pub struct StatisticsAggregator {
    store: Arc<dyn RequestStore>,
}

impl StatisticsAggregator {
    pub fn new(store: Arc<dyn RequestStore>) -> Self {
        Self { store }
    }

    pub fn compute_statistics(&self, range: Option<TimeRange>) -> Result<Statistics, KycError> {
        // First-attempt flags need each user's earlier cycles, even those
        // outside the range
        let requests = self.store.scan(None)?;
        let tombstones = self.store.tombstones(range.as_ref())?;

        let statistics = aggregate(&requests, &tombstones, range);
        debug!(
            total = statistics.total_submissions,
            approval_rate = statistics.approval_rate,
            "statistics computed"
        );
        Ok(statistics)
    }
}

/// Statistics over `requests` and `tombstones` submitted inside `range`.
/// `requests` may hold cycles outside the range; they are only consulted for
/// first-attempt history.
pub fn aggregate(
    requests: &[KycRequest],
    tombstones: &[Tombstone],
    range: Option<TimeRange>,
) -> Statistics {
    let mut by_user: HashMap<&str, Vec<&KycRequest>> = HashMap::new();
    for request in requests {
        by_user.entry(request.user_id.as_str()).or_default().push(request);
    }

    let in_range = |at: &DateTime<Utc>| range.is_none_or(|r| r.contains(at));

    let live = requests
        .iter()
        .filter(|r| in_range(&r.submitted_at.to_datetime_utc()))
        .map(|r| Sample {
            status: r.status,
            submitted_at: r.submitted_at.to_datetime_utc(),
            processing_hours: r.processing_time().map(hours),
            document_types: r.document_types(),
            country: &r.country_of_residence,
            first_attempt: !by_user.get(r.user_id.as_str()).is_some_and(|cycles| {
                cycles.iter().any(|other| {
                    other.id != r.id
                        && other.submitted_at < r.submitted_at
                        && other.status.allows_resubmission()
                })
            }),
        });
    let erased = tombstones
        .iter()
        .filter(|t| in_range(&t.submitted_at.to_datetime_utc()))
        .map(|t| Sample {
            status: t.final_status,
            submitted_at: t.submitted_at.to_datetime_utc(),
            processing_hours: t
                .reviewed_at
                .as_ref()
                .map(|at| hours(at.to_datetime_utc() - t.submitted_at.to_datetime_utc())),
            document_types: t.document_types.clone(),
            country: &t.country_of_residence,
            first_attempt: t.first_attempt,
        });
    let samples: Vec<Sample> = live.chain(erased).collect();

    let mut by_status = StatusCounts::default();
    let mut durations = Vec::new();
    let mut first_time_approvals = 0;
    let mut documents: BTreeMap<String, usize> = BTreeMap::new();
    let mut countries: BTreeMap<String, usize> = BTreeMap::new();
    let mut daily: BTreeMap<NaiveDate, usize> = BTreeMap::new();

    for sample in &samples {
        by_status.record(sample.status);
        if sample.status == KycStatus::Approved && sample.first_attempt {
            first_time_approvals += 1;
        }
        if let Some(h) = sample.processing_hours {
            durations.push(h);
        }
        for document_type in &sample.document_types {
            *documents.entry(document_type.to_string()).or_default() += 1;
        }
        *countries.entry(sample.country.to_string()).or_default() += 1;
        *daily.entry(sample.submitted_at.date_naive()).or_default() += 1;
    }

    let decided = by_status.approved + by_status.rejected;

    Statistics {
        range,
        total_submissions: samples.len(),
        by_status,
        approval_rate: ratio(by_status.approved, decided),
        rejection_rate: ratio(by_status.rejected, decided),
        first_time_approval_rate: ratio(first_time_approvals, by_status.approved),
        processing_time: processing_time(durations),
        document_types: breakdown(documents),
        countries: breakdown(countries),
        daily_submissions: daily
            .into_iter()
            .map(|(date, submitted)| DailyCount { date, submitted })
            .collect(),
    }
}

fn hours(duration: chrono::Duration) -> f64 {
    duration.num_seconds() as f64 / 3600.0
}

/// `part / whole`, 0 when `whole` is 0.
pub fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Nearest-rank percentile of an ascending slice. `p` is in `[0, 100]`.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = ((p.clamp(0.0, 100.0) / 100.0) * sorted.len() as f64).ceil() as usize;
    Some(sorted[rank.saturating_sub(1).min(sorted.len() - 1)])
}

fn processing_time(mut durations: Vec<f64>) -> Option<ProcessingTime> {
    durations.sort_by(f64::total_cmp);
    let (&min_hours, &max_hours) = (durations.first()?, durations.last()?);
    let reviewed = durations.len();

    Some(ProcessingTime {
        reviewed,
        average_hours: durations.iter().sum::<f64>() / reviewed as f64,
        min_hours,
        max_hours,
        median_hours: percentile(&durations, 50.0)?,
        p90_hours: percentile(&durations, 90.0)?,
    })
}

// Largest share first, ties by key.
fn breakdown(counts: BTreeMap<String, usize>) -> Vec<BreakdownEntry> {
    let total: usize = counts.values().sum();
    let mut entries: Vec<BreakdownEntry> = counts
        .into_iter()
        .map(|(key, count)| BreakdownEntry {
            key,
            count,
            percentage: ratio(count, total) * 100.0,
        })
        .collect();
    entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
    entries
}
