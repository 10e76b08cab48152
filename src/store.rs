//! sled backed persistence for leave requests
//!
//! Records are CBOR encoded and keyed by leave id. Two index trees order ids by
//! creation time, one globally and one per employee, so listings walk keys in
//! order instead of sorting decoded records. Every update is a
//! compare-and-swap against the exact bytes that were read, which gives
//! single-document atomicity without any locking.
use super::document::{self, DOCUMENT_REFS_TREE, DOCUMENT_TREE, PreparedDocument};
use super::error::{LeaveError, codec};
use super::leave::{DateRange, LeaveRequest, LeaveStatus, TimeStamp};
use sled::Transactional;
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionResult};
use tracing::warn;

pub const LEAVE_TREE: &str = "leaves";
pub const CREATED_INDEX_TREE: &str = "leaves_by_created";
pub const EMPLOYEE_INDEX_TREE: &str = "leaves_by_employee";

const CREATED_KEY_LEN: usize = 8;

pub struct LeaveStore {
    leaves: sled::Tree,
    by_created: sled::Tree,
    by_employee: sled::Tree,
    documents: sled::Tree,
    document_refs: sled::Tree,
}

/// Field filters for listing. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaveFilter {
    pub employee_id: Option<String>,
    pub status: Option<LeaveStatus>,
    pub date_range: Option<DateRange>,
}

/// A decoded record together with the bytes it was decoded from.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub request: LeaveRequest,
    raw: sled::IVec,
}

impl LeaveFilter {
    pub fn for_employee(employee_id: &str) -> Self {
        Self {
            employee_id: Some(employee_id.to_string()),
            ..Self::default()
        }
    }
    pub fn with_status(mut self, status: LeaveStatus) -> Self {
        self.status = Some(status);
        self
    }
    pub fn within(mut self, range: DateRange) -> Self {
        self.date_range = Some(range);
        self
    }

    pub fn matches(&self, request: &LeaveRequest) -> bool {
        self.employee_id
            .as_ref()
            .is_none_or(|id| id == &request.employee_id)
            && self.status.is_none_or(|status| status == request.status)
            && self
                .date_range
                .as_ref()
                .is_none_or(|range| request.overlaps(range))
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

// Big-endian with the sign bit flipped, so byte order follows time order.
fn created_key(created_at: &TimeStamp) -> Result<[u8; CREATED_KEY_LEN], LeaveError> {
    let nanos = created_at
        .to_datetime_utc()
        .timestamp_nanos_opt()
        .ok_or_else(|| LeaveError::Codec("created_at out of range".to_string()))?;
    Ok(((nanos as u64) ^ (1 << 63)).to_be_bytes())
}

fn index_prefix(employee_id: &str) -> Vec<u8> {
    let mut prefix = employee_id.as_bytes().to_vec();
    prefix.push(0);
    prefix
}

fn created_index_key(request: &LeaveRequest) -> Result<Vec<u8>, LeaveError> {
    let mut key = created_key(&request.created_at)?.to_vec();
    key.extend_from_slice(request.id.as_bytes());
    Ok(key)
}

fn employee_index_key(request: &LeaveRequest) -> Result<Vec<u8>, LeaveError> {
    let mut key = index_prefix(&request.employee_id);
    key.extend_from_slice(&created_index_key(request)?);
    Ok(key)
}

fn decode(raw: &[u8]) -> Result<LeaveRequest, LeaveError> {
    minicbor::decode(raw).map_err(codec)
}

fn settle<T>(result: TransactionResult<T, LeaveError>) -> Result<T, LeaveError> {
    result.map_err(|e| match e {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => e.into(),
    })
}

impl LeaveStore {
    pub fn open(db: &sled::Db) -> Result<Self, LeaveError> {
        Ok(Self {
            leaves: db.open_tree(LEAVE_TREE)?,
            by_created: db.open_tree(CREATED_INDEX_TREE)?,
            by_employee: db.open_tree(EMPLOYEE_INDEX_TREE)?,
            documents: db.open_tree(DOCUMENT_TREE)?,
            document_refs: db.open_tree(DOCUMENT_REFS_TREE)?,
        })
    }

    /// Insert a new record, its index entries and its proof document in one
    /// transaction. An existing id aborts the whole write.
    pub fn insert(
        &self,
        request: &LeaveRequest,
        document: Option<&PreparedDocument>,
    ) -> Result<(), LeaveError> {
        let encoded = minicbor::to_vec(request).map_err(codec)?;
        let key = request.id.as_bytes();
        let created_idx = created_index_key(request)?;
        let employee_idx = employee_index_key(request)?;

        settle(
            (
                &self.leaves,
                &self.by_created,
                &self.by_employee,
                &self.documents,
                &self.document_refs,
            )
                .transaction(|(leaves, by_created, by_employee, documents, refs)| {
                    if leaves.get(key)?.is_some() {
                        return Err(ConflictableTransactionError::Abort(
                            LeaveError::PersistenceConflict(request.id.clone()),
                        ));
                    }
                    leaves.insert(key, encoded.as_slice())?;
                    by_created.insert(created_idx.as_slice(), &b""[..])?;
                    by_employee.insert(employee_idx.as_slice(), &b""[..])?;
                    if let Some(doc) = document {
                        document::attach(documents, refs, doc)?;
                    }
                    Ok(())
                }),
        )
    }

    pub fn load(&self, id: &str) -> Result<Snapshot, LeaveError> {
        let raw = self
            .leaves
            .get(id.as_bytes())?
            .ok_or_else(|| LeaveError::NotFound(id.to_string()))?;
        let request = decode(&raw)?;
        Ok(Snapshot { request, raw })
    }

    pub fn get(&self, id: &str) -> Result<LeaveRequest, LeaveError> {
        self.load(id).map(|snapshot| snapshot.request)
    }

    /// Write `updated` only if the stored bytes still equal the snapshot.
    /// Bumps the record version on success.
    pub fn commit(&self, snapshot: &Snapshot, updated: &mut LeaveRequest) -> Result<(), LeaveError> {
        updated.version = snapshot.request.version + 1;
        let encoded = minicbor::to_vec(&*updated).map_err(codec)?;

        match self.leaves.compare_and_swap(
            updated.id.as_bytes(),
            Some(&snapshot.raw),
            Some(encoded),
        )? {
            Ok(()) => Ok(()),
            Err(_) => {
                updated.version = snapshot.request.version;
                Err(LeaveError::PersistenceConflict(updated.id.clone()))
            }
        }
    }

    // Follow one index entry to its record. Purged or undecodable records are
    // skipped so one bad entry cannot break a listing.
    fn resolve(&self, key: &[u8], prefix_len: usize) -> Result<Option<LeaveRequest>, LeaveError> {
        let id = key
            .get(prefix_len + CREATED_KEY_LEN..)
            .ok_or_else(|| LeaveError::Codec("truncated index key".to_string()))?;
        let Some(raw) = self.leaves.get(id)? else {
            return Ok(None);
        };
        match decode(&raw) {
            Ok(request) => Ok(Some(request)),
            Err(e) => {
                warn!(
                    leave_id = %String::from_utf8_lossy(id),
                    error = %e,
                    "Skipping undecodable leave record"
                );
                Ok(None)
            }
        }
    }

    /// Matching records, newest first, ties broken by id descending.
    fn ordered<'a>(
        &'a self,
        filter: &'a LeaveFilter,
    ) -> impl Iterator<Item = Result<LeaveRequest, LeaveError>> + 'a {
        let (keys, prefix_len) = match &filter.employee_id {
            Some(employee_id) => {
                let prefix = index_prefix(employee_id);
                let len = prefix.len();
                (self.by_employee.scan_prefix(prefix), len)
            }
            None => (self.by_created.iter(), 0),
        };

        keys.rev()
            .filter_map(move |entry| {
                entry
                    .map_err(LeaveError::from)
                    .and_then(|(key, _)| self.resolve(&key, prefix_len))
                    .transpose()
            })
            .filter(move |found| found.as_ref().map_or(true, |r| filter.matches(r)))
    }

    /// Every matching record, newest first.
    pub fn scan(&self, filter: &LeaveFilter) -> Result<Vec<LeaveRequest>, LeaveError> {
        self.ordered(filter).collect()
    }

    /// One window of matching records plus the total match count. Without a
    /// filter the walk stops at the end of the window and the total is the
    /// index size.
    pub fn page(
        &self,
        filter: &LeaveFilter,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<LeaveRequest>, usize), LeaveError> {
        if filter.is_empty() {
            let data = self
                .ordered(filter)
                .skip(offset)
                .take(limit)
                .collect::<Result<Vec<_>, _>>()?;
            return Ok((data, self.by_created.len()));
        }

        let mut data = Vec::new();
        let mut total = 0;
        for request in self.ordered(filter) {
            let request = request?;
            if total >= offset && data.len() < limit {
                data.push(request);
            }
            total += 1;
        }
        Ok((data, total))
    }

    /// Administrative delete of a record and its index entries. Drops the proof
    /// document when no other request references it; the flag reports that.
    pub fn purge(&self, id: &str) -> Result<(LeaveRequest, bool), LeaveError> {
        let request = self.get(id)?;
        let key = request.id.as_bytes();
        let created_idx = created_index_key(&request)?;
        let employee_idx = employee_index_key(&request)?;

        let document_removed = settle(
            (
                &self.leaves,
                &self.by_created,
                &self.by_employee,
                &self.documents,
                &self.document_refs,
            )
                .transaction(|(leaves, by_created, by_employee, documents, refs)| {
                    if leaves.remove(key)?.is_none() {
                        return Err(ConflictableTransactionError::Abort(LeaveError::NotFound(
                            id.to_string(),
                        )));
                    }
                    by_created.remove(created_idx.as_slice())?;
                    by_employee.remove(employee_idx.as_slice())?;
                    match &request.document {
                        Some(doc) => document::detach(documents, refs, doc),
                        None => Ok(false),
                    }
                }),
        )?;

        Ok((request, document_removed))
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }
}
