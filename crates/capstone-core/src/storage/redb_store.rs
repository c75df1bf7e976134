//! # redb-backed Document Storage
//!
//! A disk-backed document store using the redb embedded database:
//! - ACID transactions
//! - Crash safety (copy-on-write B-trees)
//! - MVCC (concurrent readers, single writer)
//!
//! Each document kind lives in its own `u64 -> envelope bytes` table. A
//! change set is validated and written inside one redb write transaction;
//! any error drops the transaction uncommitted.

use super::{ChangeSet, DocumentStore, Stored};
use crate::CapstoneError;
use crate::model::ALL_TABLES;
use crate::primitives::{FORMAT_VERSION, MAGIC_BYTES};
use redb::{
    Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction,
};
use std::path::Path;

/// Table for id sequences: table name -> highest allocated id
const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

/// Table for store metadata: key -> raw bytes
const METADATA: TableDefinition<&str, &[u8]> = TableDefinition::new("metadata");

fn documents(table: &str) -> TableDefinition<'_, u64, &'static [u8]> {
    TableDefinition::new(table)
}

fn io(e: impl std::fmt::Display) -> CapstoneError {
    CapstoneError::Io(e.to_string())
}

/// A persistent document store backed by redb.
pub struct RedbStore {
    db: Database,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a store at `path`.
    ///
    /// A fresh file is stamped with the magic bytes and format version; an
    /// existing file must carry matching ones.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CapstoneError> {
        let db = Database::create(path.as_ref()).map_err(io)?;

        let write_txn = db.begin_write().map_err(io)?;
        for table in ALL_TABLES {
            let _ = write_txn.open_table(documents(table)).map_err(io)?;
        }
        let _ = write_txn.open_table(SEQUENCES).map_err(io)?;
        {
            let mut meta = write_txn.open_table(METADATA).map_err(io)?;
            let existing = meta
                .get("magic")
                .map_err(io)?
                .map(|v| v.value().to_vec());
            match existing {
                None => {
                    meta.insert("magic", MAGIC_BYTES.as_slice()).map_err(io)?;
                    meta.insert("format_version", [FORMAT_VERSION].as_slice())
                        .map_err(io)?;
                }
                Some(magic) if magic.as_slice() != MAGIC_BYTES.as_slice() => {
                    return Err(CapstoneError::Serialization(
                        "Invalid magic bytes: not a Capstone store".to_string(),
                    ));
                }
                Some(_) => {
                    let version = meta
                        .get("format_version")
                        .map_err(io)?
                        .and_then(|v| v.value().first().copied());
                    if version != Some(FORMAT_VERSION) {
                        return Err(CapstoneError::Serialization(format!(
                            "Unsupported store version: {:?} (expected {})",
                            version, FORMAT_VERSION
                        )));
                    }
                }
            }
        }
        write_txn.commit().map_err(io)?;

        tracing::debug!(path = %path.as_ref().display(), "redb store opened");
        Ok(Self { db })
    }

    fn revision_in(
        txn: &WriteTransaction,
        table: &'static str,
        id: u64,
    ) -> Result<Option<u64>, CapstoneError> {
        let t = txn.open_table(documents(table)).map_err(io)?;
        let guard = t.get(id).map_err(io)?;
        guard
            .map(|v| Stored::from_bytes(v.value()).map(|s| s.revision))
            .transpose()
    }

    fn sequence_in(txn: &WriteTransaction, table: &'static str) -> Result<u64, CapstoneError> {
        let t = txn.open_table(SEQUENCES).map_err(io)?;
        let value = t.get(table).map_err(io)?.map(|v| v.value());
        Ok(value.unwrap_or(0))
    }
}

impl DocumentStore for RedbStore {
    fn read(&self, table: &'static str, id: u64) -> Result<Option<Stored>, CapstoneError> {
        let read_txn = self.db.begin_read().map_err(io)?;
        let t = read_txn.open_table(documents(table)).map_err(io)?;
        let guard = t.get(id).map_err(io)?;
        guard.map(|v| Stored::from_bytes(v.value())).transpose()
    }

    fn scan(&self, table: &'static str) -> Result<Vec<(u64, Stored)>, CapstoneError> {
        let read_txn = self.db.begin_read().map_err(io)?;
        let t = read_txn.open_table(documents(table)).map_err(io)?;
        let mut out = Vec::new();
        for entry in t.iter().map_err(io)? {
            let (key, value) = entry.map_err(io)?;
            out.push((key.value(), Stored::from_bytes(value.value())?));
        }
        Ok(out)
    }

    fn sequence(&self, table: &'static str) -> Result<u64, CapstoneError> {
        let read_txn = self.db.begin_read().map_err(io)?;
        let t = read_txn.open_table(SEQUENCES).map_err(io)?;
        let value = t.get(table).map_err(io)?.map(|v| v.value());
        Ok(value.unwrap_or(0))
    }

    fn apply(&mut self, changes: ChangeSet) -> Result<(), CapstoneError> {
        if changes.is_empty() && changes.reads.is_empty() {
            return Ok(());
        }

        // Single writer: validation and writes see the same snapshot.
        let write_txn = self.db.begin_write().map_err(io)?;
        changes.validate(
            |table, id| Self::revision_in(&write_txn, table, id),
            |table| Self::sequence_in(&write_txn, table),
        )?;

        for ((table, id), staged) in &changes.writes {
            let bytes = staged.stored.to_bytes()?;
            let mut t = write_txn.open_table(documents(table)).map_err(io)?;
            t.insert(*id, bytes.as_slice()).map_err(io)?;
        }
        {
            let mut seq = write_txn.open_table(SEQUENCES).map_err(io)?;
            for (table, (_, next)) in &changes.sequences {
                seq.insert(*table, *next).map_err(io)?;
            }
        }
        write_txn.commit().map_err(io)?;
        Ok(())
    }
}
