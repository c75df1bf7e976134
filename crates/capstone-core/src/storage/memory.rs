//! # In-Memory Document Store
//!
//! BTreeMap tables holding envelope bytes. Used for tests and for
//! throwaway sessions. Change sets are validated in full before the first
//! write, so a rejected set leaves the store untouched.

use super::{ChangeSet, DocumentStore, Stored};
use crate::CapstoneError;
use std::collections::BTreeMap;

/// Volatile document store.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    tables: BTreeMap<&'static str, BTreeMap<u64, Vec<u8>>>,
    sequences: BTreeMap<&'static str, u64>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in `table`.
    #[cfg(test)]
    fn len(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, BTreeMap::len)
    }

    fn revision(&self, table: &'static str, id: u64) -> Result<Option<u64>, CapstoneError> {
        self.read(table, id).map(|s| s.map(|s| s.revision))
    }
}

impl DocumentStore for MemoryStore {
    fn read(&self, table: &'static str, id: u64) -> Result<Option<Stored>, CapstoneError> {
        self.tables
            .get(table)
            .and_then(|t| t.get(&id))
            .map(|bytes| Stored::from_bytes(bytes))
            .transpose()
    }

    fn scan(&self, table: &'static str) -> Result<Vec<(u64, Stored)>, CapstoneError> {
        let Some(t) = self.tables.get(table) else {
            return Ok(Vec::new());
        };
        t.iter()
            .map(|(id, bytes)| Ok((*id, Stored::from_bytes(bytes)?)))
            .collect()
    }

    fn sequence(&self, table: &'static str) -> Result<u64, CapstoneError> {
        Ok(self.sequences.get(table).copied().unwrap_or(0))
    }

    fn apply(&mut self, changes: ChangeSet) -> Result<(), CapstoneError> {
        changes.validate(
            |table, id| self.revision(table, id),
            |table| self.sequence(table),
        )?;

        // Encode everything before touching the tables.
        let mut encoded = Vec::with_capacity(changes.writes.len());
        for ((table, id), staged) in changes.writes {
            encoded.push((table, id, staged.stored.to_bytes()?));
        }

        for (table, id, bytes) in encoded {
            self.tables.entry(table).or_default().insert(id, bytes);
        }
        for (table, (_, next)) in changes.sequences {
            self.sequences.insert(table, next);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StagedWrite;

    fn write(expected: Option<u64>, revision: u64) -> StagedWrite {
        StagedWrite {
            expected,
            stored: Stored {
                revision,
                body: vec![revision as u8],
            },
        }
    }

    #[test]
    fn rejected_change_set_writes_nothing() {
        let mut store = MemoryStore::new();
        let mut changes = ChangeSet::default();
        changes.writes.insert(("students", 1), write(None, 1));
        // Claims a revision the store never had.
        changes.writes.insert(("students", 2), write(Some(4), 5));

        assert!(store.apply(changes).is_err());
        assert_eq!(store.len("students"), 0);
    }

    #[test]
    fn sequences_advance_on_apply() {
        let mut store = MemoryStore::new();
        let mut changes = ChangeSet::default();
        changes.sequences.insert("projects", (0, 3));
        store.apply(changes).expect("apply");
        assert_eq!(store.sequence("projects").expect("seq"), 3);

        let mut stale = ChangeSet::default();
        stale.sequences.insert("projects", (0, 1));
        assert!(matches!(
            store.apply(stale),
            Err(CapstoneError::WriteConflict { table: "projects", .. })
        ));
    }
}
