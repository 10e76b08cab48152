//! Content addressed store for proof documents attached at submission
//!
//! Blobs are keyed by the sha256 digest of their bytes, so two requests that
//! attach the same file share one blob. A second tree counts the requests
//! referencing each digest. Both trees are only written inside the leave
//! store's transactions, which keeps a blob alive exactly as long as some
//! request points at it.
use super::error::{LeaveError, ValidationError, codec};
use super::leave::{DocumentRef, TimeStamp};
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree,
};

pub const DOCUMENT_TREE: &str = "documents";
pub const DOCUMENT_REFS_TREE: &str = "document_refs";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

// key is the sha256 digest of `bytes`
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    #[n(0)]
    pub file_name: String,
    #[n(1)]
    pub content_type: String,
    #[n(2)]
    pub bytes: Vec<u8>,
    #[n(3)]
    pub stored_at: TimeStamp,
}

/// An upload that has been hashed and encoded but not written yet.
#[derive(Debug, Clone)]
pub struct PreparedDocument {
    pub reference: DocumentRef,
    encoded: Vec<u8>,
}

pub struct DocumentStore {
    tree: sled::Tree,
    refs: sled::Tree,
}

impl DocumentUpload {
    pub fn new(file_name: &str, content_type: &str, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.to_string(),
            content_type: content_type.to_string(),
            bytes,
        }
    }

    pub fn prepare(self) -> Result<PreparedDocument, LeaveError> {
        if self.bytes.is_empty() {
            return Err(ValidationError::EmptyDocument.into());
        }
        let digest = sha256::digest(self.bytes.as_slice());
        let record = StoredDocument {
            file_name: self.file_name,
            content_type: self.content_type,
            bytes: self.bytes,
            stored_at: TimeStamp::now(),
        };
        let encoded = minicbor::to_vec(&record).map_err(codec)?;

        Ok(PreparedDocument {
            reference: DocumentRef(digest),
            encoded,
        })
    }
}

fn read_count(raw: Option<sled::IVec>) -> ConflictableTransactionResult<u64, LeaveError> {
    match raw {
        None => Ok(0),
        Some(raw) => <[u8; 8]>::try_from(&raw[..])
            .map(u64::from_be_bytes)
            .map_err(|e| ConflictableTransactionError::Abort(codec(e))),
    }
}

/// Write the blob if it is new and count one more reference to it.
/// The first writer's metadata wins for identical bytes.
pub(crate) fn attach(
    documents: &TransactionalTree,
    refs: &TransactionalTree,
    doc: &PreparedDocument,
) -> ConflictableTransactionResult<(), LeaveError> {
    let key = doc.reference.0.as_bytes();
    let count = read_count(refs.get(key)?)?;
    if documents.get(key)?.is_none() {
        documents.insert(key, doc.encoded.as_slice())?;
    }
    let next = (count + 1).to_be_bytes();
    refs.insert(key, &next[..])?;
    Ok(())
}

/// Drop one reference. Returns true when that was the last one and the blob
/// went with it.
pub(crate) fn detach(
    documents: &TransactionalTree,
    refs: &TransactionalTree,
    doc: &DocumentRef,
) -> ConflictableTransactionResult<bool, LeaveError> {
    let key = doc.0.as_bytes();
    let count = read_count(refs.get(key)?)?;
    if count > 1 {
        let next = (count - 1).to_be_bytes();
        refs.insert(key, &next[..])?;
        return Ok(false);
    }
    refs.remove(key)?;
    documents.remove(key)?;
    Ok(true)
}

impl DocumentStore {
    pub fn open(db: &sled::Db) -> Result<Self, LeaveError> {
        Ok(Self {
            tree: db.open_tree(DOCUMENT_TREE)?,
            refs: db.open_tree(DOCUMENT_REFS_TREE)?,
        })
    }

    pub fn load_document(&self, doc: &DocumentRef) -> Result<StoredDocument, LeaveError> {
        let raw = self
            .tree
            .get(doc.0.as_bytes())?
            .ok_or_else(|| LeaveError::NotFound(doc.0.clone()))?;
        minicbor::decode(&raw).map_err(codec)
    }

    /// Number of stored requests pointing at `doc`.
    pub fn references(&self, doc: &DocumentRef) -> Result<u64, LeaveError> {
        match self.refs.get(doc.0.as_bytes())? {
            None => Ok(0),
            Some(raw) => <[u8; 8]>::try_from(&raw[..])
                .map(u64::from_be_bytes)
                .map_err(codec),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}
