//! # Document Storage
//!
//! Revisioned document persistence with explicit units of work.
//!
//! ## Envelope
//!
//! Every stored document is a postcard envelope `{version, revision, body}`.
//! `revision` starts at 1 and increases by one on every committed write.
//!
//! ## Units of work
//!
//! A [`Transaction`] borrows a [`DocumentStore`] read-only, records the
//! revision of every document it reads, and stages every write in memory.
//! [`Transaction::into_changes`] yields a [`ChangeSet`] that the backend
//! applies atomically: all recorded revisions are re-checked first, and a
//! single mismatch rejects the whole set with `WriteConflict` before
//! anything is written.
//!
//! ## Backends
//!
//! - [`MemoryStore`]: BTreeMap tables (fast, volatile)
//! - [`RedbStore`]: redb database (ACID, persistent)

mod memory;
mod redb_store;

pub use memory::MemoryStore;
pub use redb_store::RedbStore;

use crate::CapstoneError;
use crate::primitives::FORMAT_VERSION;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// DOCUMENT TRAIT
// =============================================================================

/// A persisted document type with a typed identifier.
pub trait Document: Serialize + DeserializeOwned + Clone {
    type Id: Copy + Ord + fmt::Debug;

    /// Backend table holding this document kind.
    const TABLE: &'static str;
    /// Name used in `NotFound` errors.
    const KIND: &'static str;

    fn id(&self) -> Self::Id;
    fn raw_id(id: Self::Id) -> u64;
    fn from_raw(raw: u64) -> Self::Id;
}

// =============================================================================
// ENVELOPE
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u8,
    revision: u64,
    body: Vec<u8>,
}

/// A decoded envelope: revision plus postcard body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stored {
    pub revision: u64,
    pub body: Vec<u8>,
}

impl Stored {
    /// Encode to envelope bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CapstoneError> {
        let envelope = Envelope {
            version: FORMAT_VERSION,
            revision: self.revision,
            body: self.body.clone(),
        };
        postcard::to_allocvec(&envelope).map_err(|e| CapstoneError::Serialization(e.to_string()))
    }

    /// Decode envelope bytes, rejecting unknown format versions.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CapstoneError> {
        let envelope: Envelope = postcard::from_bytes(bytes)
            .map_err(|e| CapstoneError::Serialization(e.to_string()))?;
        if envelope.version != FORMAT_VERSION {
            return Err(CapstoneError::Serialization(format!(
                "Unsupported document version: {} (expected {})",
                envelope.version, FORMAT_VERSION
            )));
        }
        Ok(Self {
            revision: envelope.revision,
            body: envelope.body,
        })
    }

    fn decode<D: Document>(&self) -> Result<D, CapstoneError> {
        postcard::from_bytes(&self.body).map_err(|e| {
            CapstoneError::Serialization(format!("{} decode failed: {}", D::KIND, e))
        })
    }
}

// =============================================================================
// STORE TRAIT
// =============================================================================

/// Storage backend contract.
pub trait DocumentStore {
    /// Read one document envelope.
    fn read(&self, table: &'static str, id: u64) -> Result<Option<Stored>, CapstoneError>;

    /// Read every envelope of a table in ascending id order.
    fn scan(&self, table: &'static str) -> Result<Vec<(u64, Stored)>, CapstoneError>;

    /// Highest identifier ever allocated in `table` (0 if none).
    fn sequence(&self, table: &'static str) -> Result<u64, CapstoneError>;

    /// Validate and apply a change set atomically.
    fn apply(&mut self, changes: ChangeSet) -> Result<(), CapstoneError>;
}

// =============================================================================
// CHANGE SET
// =============================================================================

/// A write staged by a unit of work.
#[derive(Debug, Clone)]
pub struct StagedWrite {
    /// Revision observed when the document was first read (`None` = absent).
    pub expected: Option<u64>,
    pub stored: Stored,
}

/// Everything one unit of work read and wants to write.
#[derive(Debug, Default, Clone)]
pub struct ChangeSet {
    /// Revisions observed for documents read but not written.
    pub reads: BTreeMap<(&'static str, u64), Option<u64>>,
    pub writes: BTreeMap<(&'static str, u64), StagedWrite>,
    /// Sequence bumps: table -> (observed, new).
    pub sequences: BTreeMap<&'static str, (u64, u64)>,
}

impl ChangeSet {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.sequences.is_empty()
    }

    /// Number of documents this change set writes.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    /// Re-check every observed revision against the current store state.
    ///
    /// Backends call this inside their write transaction, before writing.
    pub fn validate(
        &self,
        mut current_revision: impl FnMut(&'static str, u64) -> Result<Option<u64>, CapstoneError>,
        mut current_sequence: impl FnMut(&'static str) -> Result<u64, CapstoneError>,
    ) -> Result<(), CapstoneError> {
        let observed = self
            .reads
            .iter()
            .map(|(k, v)| (*k, *v))
            .chain(self.writes.iter().map(|(k, w)| (*k, w.expected)));
        for ((table, id), expected) in observed {
            if current_revision(table, id)? != expected {
                return Err(CapstoneError::WriteConflict { table, id });
            }
        }
        for (&table, &(observed, _)) in &self.sequences {
            if current_sequence(table)? != observed {
                return Err(CapstoneError::WriteConflict { table, id: observed });
            }
        }
        Ok(())
    }
}

// =============================================================================
// TRANSACTION
// =============================================================================

/// A unit of work over a document store.
///
/// Reads see the transaction's own staged writes. Nothing reaches the store
/// until the resulting [`ChangeSet`] is applied.
pub struct Transaction<'s, S: DocumentStore + ?Sized> {
    store: &'s S,
    changes: ChangeSet,
}

impl<'s, S: DocumentStore + ?Sized> Transaction<'s, S> {
    /// Begin a unit of work.
    pub fn begin(store: &'s S) -> Self {
        Self {
            store,
            changes: ChangeSet::default(),
        }
    }

    /// Fetch a document, or `None` if it does not exist.
    pub fn get<D: Document>(&mut self, id: D::Id) -> Result<Option<D>, CapstoneError> {
        let key = (D::TABLE, D::raw_id(id));
        if let Some(staged) = self.changes.writes.get(&key) {
            return staged.stored.decode().map(Some);
        }
        let stored = self.store.read(D::TABLE, key.1)?;
        self.changes
            .reads
            .entry(key)
            .or_insert_with(|| stored.as_ref().map(|s| s.revision));
        stored.map(|s| s.decode()).transpose()
    }

    /// Fetch a document that must exist.
    pub fn load<D: Document>(&mut self, id: D::Id) -> Result<D, CapstoneError> {
        self.get::<D>(id)?.ok_or(CapstoneError::NotFound {
            kind: D::KIND,
            id: D::raw_id(id),
        })
    }

    /// All documents of a kind, with staged writes overlaid, in id order.
    pub fn scan<D: Document>(&mut self) -> Result<Vec<D>, CapstoneError> {
        let mut docs: BTreeMap<u64, D> = BTreeMap::new();
        for (id, stored) in self.store.scan(D::TABLE)? {
            self.changes
                .reads
                .entry((D::TABLE, id))
                .or_insert(Some(stored.revision));
            docs.insert(id, stored.decode()?);
        }
        for ((table, id), staged) in &self.changes.writes {
            if *table == D::TABLE {
                docs.insert(*id, staged.stored.decode()?);
            }
        }
        Ok(docs.into_values().collect())
    }

    /// Stage a write of `doc`.
    pub fn put<D: Document>(&mut self, doc: &D) -> Result<(), CapstoneError> {
        let key = (D::TABLE, D::raw_id(doc.id()));
        let body =
            postcard::to_allocvec(doc).map_err(|e| CapstoneError::Serialization(e.to_string()))?;

        let expected = match self.changes.writes.get(&key) {
            Some(staged) => staged.expected,
            None => match self.changes.reads.remove(&key) {
                Some(observed) => observed,
                None => self.store.read(D::TABLE, key.1)?.map(|s| s.revision),
            },
        };
        let revision = expected.map_or(1, |r| r.saturating_add(1));
        self.changes.writes.insert(
            key,
            StagedWrite {
                expected,
                stored: Stored { revision, body },
            },
        );
        Ok(())
    }

    /// Reserve the next identifier for a document kind.
    pub fn allocate<D: Document>(&mut self) -> Result<D::Id, CapstoneError> {
        let (observed, last) = match self.changes.sequences.get(D::TABLE) {
            Some(&(observed, last)) => (observed, last),
            None => {
                let current = self.store.sequence(D::TABLE)?;
                (current, current)
            }
        };
        let next = last.saturating_add(1);
        self.changes.sequences.insert(D::TABLE, (observed, next));
        Ok(D::from_raw(next))
    }

    /// Finish the unit of work.
    #[must_use]
    pub fn into_changes(self) -> ChangeSet {
        self.changes
    }
}

// =============================================================================
// TESTS
// =============================================================================
