//! Durable storage for KYC requests
//!
//! Layout of the sled keyspace (parts joined by a NUL byte):
//!
//! - `req <id>`: the CBOR encoded [`KycRequest`]
//! - `head <user_id>`: id of the user's active cycle
//! - `user <user_id> <id>`: history index, one entry per cycle
//! - `tomb <id>`: CBOR encoded [`Tombstone`] left behind by data erasure
//!
//! Every write that changes a status or opens a cycle runs in one sled
//! transaction, so a write either lands completely or not at all. Updates
//! compare the stored record against the snapshot they were derived from.

use super::error::StoreError;
use super::request::{DocumentType, KycRequest, KycStatus, TimeRange, Tombstone};
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult, TransactionError};
use std::sync::Arc;
use tracing::{debug, error};

/// Contract the KYC core expects from its persistence layer.
pub trait RequestStore: Send + Sync {
    /// Stores a new cycle and makes it the user's active one. Fails with
    /// [`StoreError::HeadMoved`] unless the active cycle is still
    /// `expected_head` (`None` for a user without requests).
    fn create_cycle(&self, request: &KycRequest, expected_head: Option<&str>)
    -> Result<(), StoreError>;

    fn get(&self, id: &str) -> Result<KycRequest, StoreError>;

    fn latest_for_user(&self, user_id: &str) -> Result<Option<KycRequest>, StoreError>;

    /// All cycles of a user, oldest first.
    fn history_for_user(&self, user_id: &str) -> Result<Vec<KycRequest>, StoreError>;

    /// Replaces the stored request only if it still equals `expected`, the
    /// snapshot the change was derived from.
    fn update_if_unchanged(&self, request: &KycRequest, expected: &KycRequest)
    -> Result<(), StoreError>;

    fn query(
        &self,
        query: &RequestQuery,
        page: Pagination,
        sort: SortOrder,
    ) -> Result<Page<KycRequest>, StoreError>;

    /// Requests submitted inside `range`, or all of them.
    fn scan(&self, range: Option<&TimeRange>) -> Result<Vec<KycRequest>, StoreError>;

    fn tombstones(&self, range: Option<&TimeRange>) -> Result<Vec<Tombstone>, StoreError>;

    /// Removes every cycle of `user_id` and records one tombstone per cycle.
    /// `history` is the snapshot the tombstones were built from, oldest first.
    /// Fails with [`StoreError::HeadMoved`] if a cycle was opened since, or
    /// [`StoreError::Stale`] if any cycle changed.
    fn erase_user(
        &self,
        user_id: &str,
        history: &[KycRequest],
        tombstones: &[Tombstone],
    ) -> Result<(), StoreError>;
}

/// Filters for admin listings. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestQuery {
    pub statuses: Vec<KycStatus>,
    pub country: Option<String>,
    pub document_type: Option<DocumentType>,
    pub user_id: Option<String>,
    pub submitted: Option<TimeRange>,
}

impl RequestQuery {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_statuses(mut self, statuses: &[KycStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }
    pub fn with_country(mut self, code: &str) -> Self {
        self.country = Some(code.trim().to_ascii_uppercase());
        self
    }
    pub fn with_document_type(mut self, document_type: DocumentType) -> Self {
        self.document_type = Some(document_type);
        self
    }
    pub fn with_user(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }
    pub fn submitted_within(mut self, range: TimeRange) -> Self {
        self.submitted = Some(range);
        self
    }

    pub fn matches(&self, request: &KycRequest) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&request.status))
            && self
                .country
                .as_ref()
                .is_none_or(|c| *c == request.country_of_residence)
            && self
                .document_type
                .is_none_or(|t| request.documents.iter().any(|d| d.document_type == t))
            && self.user_id.as_ref().is_none_or(|u| *u == request.user_id)
            && self
                .submitted
                .is_none_or(|r| r.contains(&request.submitted_at.to_datetime_utc()))
    }
}

/// 1-based page selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: usize,
    pub per_page: usize,
}

impl Pagination {
    pub const MAX_PER_PAGE: usize = 100;

    pub fn new(page: usize, per_page: usize) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, Self::MAX_PER_PAGE),
        }
    }
    fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.per_page)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(1, 20)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Oldest submission first, the natural review queue order
    #[default]
    SubmittedAsc,
    SubmittedDesc,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> usize {
        self.total.div_ceil(self.per_page.max(1))
    }
}

const SEP: u8 = 0;
const REQUEST_PREFIX: &[u8] = b"req\0";
const TOMB_PREFIX: &[u8] = b"tomb\0";

fn key(parts: &[&[u8]]) -> Vec<u8> {
    parts.join(&SEP)
}

fn request_key(id: &str) -> Vec<u8> {
    key(&[b"req".as_slice(), id.as_bytes()])
}

fn head_key(user_id: &str) -> Vec<u8> {
    key(&[b"head".as_slice(), user_id.as_bytes()])
}

fn history_prefix(user_id: &str) -> Vec<u8> {
    let mut prefix = key(&[b"user".as_slice(), user_id.as_bytes()]);
    prefix.push(SEP);
    prefix
}

fn history_key(user_id: &str, id: &str) -> Vec<u8> {
    key(&[b"user".as_slice(), user_id.as_bytes(), id.as_bytes()])
}

fn tomb_key(id: &str) -> Vec<u8> {
    key(&[b"tomb".as_slice(), id.as_bytes()])
}

pub(crate) fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, StoreError> {
    minicbor::to_vec(value).map_err(|e| StoreError::Encode(e.to_string()))
}

pub(crate) fn decode<T>(bytes: &[u8]) -> Result<T, StoreError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    minicbor::decode(bytes).map_err(|e| StoreError::Decode(e.to_string()))
}

fn abort<T>(err: StoreError) -> ConflictableTransactionResult<T, StoreError> {
    Err(ConflictableTransactionError::Abort(err))
}

fn from_transaction(err: TransactionError<StoreError>) -> StoreError {
    match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => {
            error!(error = %e, "sled transaction failed");
            StoreError::Sled(e)
        }
    }
}

fn in_range(range: Option<&TimeRange>, submitted: &chrono::DateTime<chrono::Utc>) -> bool {
    range.is_none_or(|r| r.contains(submitted))
}

pub struct SledRequestStore {
    instance: Arc<sled::Db>,
}

impl SledRequestStore {
    pub fn new(instance: Arc<sled::Db>) -> Self {
        Self { instance }
    }

    fn all_requests(&self) -> Result<Vec<KycRequest>, StoreError> {
        self.instance
            .scan_prefix(REQUEST_PREFIX)
            .map(|item| {
                let (_, value) = item?;
                decode(&value)
            })
            .collect()
    }
}

impl RequestStore for SledRequestStore {
    fn create_cycle(
        &self,
        request: &KycRequest,
        expected_head: Option<&str>,
    ) -> Result<(), StoreError> {
        let bytes = encode(request)?;
        let req_key = request_key(&request.id);
        let head = head_key(&request.user_id);
        let history = history_key(&request.user_id, &request.id);
        let expected = expected_head.map(str::as_bytes);

        self.instance
            .transaction(|tx| -> ConflictableTransactionResult<(), StoreError> {
                let current = tx.get(head.as_slice())?;
                if current.as_deref() != expected {
                    return abort(StoreError::HeadMoved {
                        user_id: request.user_id.clone(),
                    });
                }
                tx.insert(req_key.as_slice(), bytes.as_slice())?;
                tx.insert(history.as_slice(), Vec::<u8>::new())?;
                tx.insert(head.as_slice(), request.id.as_bytes())?;
                Ok(())
            })
            .map_err(from_transaction)?;

        debug!(request_id = %request.id, user_id = %request.user_id, cycle = request.cycle, "cycle stored");
        Ok(())
    }

    fn get(&self, id: &str) -> Result<KycRequest, StoreError> {
        match self.instance.get(request_key(id))? {
            Some(bytes) => decode(&bytes),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    fn latest_for_user(&self, user_id: &str) -> Result<Option<KycRequest>, StoreError> {
        match self.instance.get(head_key(user_id))? {
            Some(id) => {
                let id = String::from_utf8(id.to_vec())
                    .map_err(|e| StoreError::Decode(e.to_string()))?;
                self.get(&id).map(Some)
            }
            None => Ok(None),
        }
    }

    fn history_for_user(&self, user_id: &str) -> Result<Vec<KycRequest>, StoreError> {
        let prefix = history_prefix(user_id);
        let mut history = Vec::new();

        for item in self.instance.scan_prefix(&prefix) {
            let (key, _) = item?;
            let id = String::from_utf8(key[prefix.len()..].to_vec())
                .map_err(|e| StoreError::Decode(e.to_string()))?;
            history.push(self.get(&id)?);
        }

        history.sort_by(|a, b| {
            a.cycle
                .cmp(&b.cycle)
                .then_with(|| a.submitted_at.cmp(&b.submitted_at))
        });
        Ok(history)
    }

    fn update_if_unchanged(
        &self,
        request: &KycRequest,
        expected: &KycRequest,
    ) -> Result<(), StoreError> {
        let bytes = encode(request)?;
        let req_key = request_key(&request.id);

        self.instance
            .transaction(|tx| -> ConflictableTransactionResult<(), StoreError> {
                let Some(stored) = tx.get(req_key.as_slice())? else {
                    return abort(StoreError::NotFound(request.id.clone()));
                };
                let stored: KycRequest = match decode(&stored) {
                    Ok(stored) => stored,
                    Err(e) => return abort(e),
                };
                if stored.status != expected.status {
                    return abort(StoreError::StatusMismatch {
                        id: request.id.clone(),
                        expected: expected.status,
                        found: stored.status,
                    });
                }
                if stored != *expected {
                    return abort(StoreError::Stale(request.id.clone()));
                }
                tx.insert(req_key.as_slice(), bytes.as_slice())?;
                Ok(())
            })
            .map_err(from_transaction)?;

        debug!(request_id = %request.id, from = %expected.status, to = %request.status, "request updated");
        Ok(())
    }

    fn query(
        &self,
        query: &RequestQuery,
        page: Pagination,
        sort: SortOrder,
    ) -> Result<Page<KycRequest>, StoreError> {
        let mut matching: Vec<KycRequest> = self
            .all_requests()?
            .into_iter()
            .filter(|r| query.matches(r))
            .collect();

        matching.sort_by(|a, b| {
            let order = a
                .submitted_at
                .cmp(&b.submitted_at)
                .then_with(|| a.id.cmp(&b.id));
            match sort {
                SortOrder::SubmittedAsc => order,
                SortOrder::SubmittedDesc => order.reverse(),
            }
        });

        let total = matching.len();
        let items = matching
            .into_iter()
            .skip(page.offset())
            .take(page.per_page)
            .collect();

        Ok(Page {
            items,
            total,
            page: page.page,
            per_page: page.per_page,
        })
    }

    fn scan(&self, range: Option<&TimeRange>) -> Result<Vec<KycRequest>, StoreError> {
        Ok(self
            .all_requests()?
            .into_iter()
            .filter(|r| in_range(range, &r.submitted_at.to_datetime_utc()))
            .collect())
    }

    fn tombstones(&self, range: Option<&TimeRange>) -> Result<Vec<Tombstone>, StoreError> {
        let mut tombstones = Vec::new();
        for item in self.instance.scan_prefix(TOMB_PREFIX) {
            let (_, value) = item?;
            let tombstone: Tombstone = decode(&value)?;
            if in_range(range, &tombstone.submitted_at.to_datetime_utc()) {
                tombstones.push(tombstone);
            }
        }
        Ok(tombstones)
    }

    fn erase_user(
        &self,
        user_id: &str,
        history: &[KycRequest],
        tombstones: &[Tombstone],
    ) -> Result<(), StoreError> {
        let Some(expected_head) = history.last().map(|r| r.id.as_str()) else {
            return Ok(());
        };
        let head = head_key(user_id);
        let snapshot: Vec<(Vec<u8>, &KycRequest)> = history
            .iter()
            .map(|r| (request_key(&r.id), r))
            .collect();
        let mut removals = Vec::with_capacity(history.len());
        let mut inserts = Vec::with_capacity(tombstones.len());
        for request in history {
            removals.push(history_key(user_id, &request.id));
        }
        for tombstone in tombstones {
            inserts.push((tomb_key(&tombstone.id), encode(tombstone)?));
        }

        self.instance
            .transaction(|tx| -> ConflictableTransactionResult<(), StoreError> {
                let current = tx.get(head.as_slice())?;
                if current.as_deref() != Some(expected_head.as_bytes()) {
                    return abort(StoreError::HeadMoved {
                        user_id: user_id.to_string(),
                    });
                }
                // Tombstones must describe the cycles as they are erased
                for (key, expected) in &snapshot {
                    let stored = match tx.get(key.as_slice())?.map(|b| decode::<KycRequest>(&b)) {
                        Some(Ok(stored)) => stored,
                        Some(Err(e)) => return abort(e),
                        None => return abort(StoreError::Stale(expected.id.clone())),
                    };
                    if stored != **expected {
                        return abort(StoreError::Stale(expected.id.clone()));
                    }
                    tx.remove(key.as_slice())?;
                }
                for key in &removals {
                    tx.remove(key.as_slice())?;
                }
                for (key, value) in &inserts {
                    tx.insert(key.as_slice(), value.as_slice())?;
                }
                tx.remove(head.as_slice())?;
                Ok(())
            })
            .map_err(from_transaction)?;

        debug!(user_id, cycles = history.len(), "user data erased");
        Ok(())
    }
}
