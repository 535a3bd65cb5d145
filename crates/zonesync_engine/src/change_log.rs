//! Durable change log.
//!
//! [`ChangeLog`] wraps a [`ChangeLedger`] behind a lock and, when opened on a
//! path, rewrites the backing file after every mutation. A mutation becomes
//! visible in memory only after it reached disk.

use crate::error::ChangeLogError;
use crate::persist;
use parking_lot::RwLock;
use std::fs::File;
use std::path::{Path, PathBuf};
use zonesync_protocol::{
    seal, unseal, ChangeLedger, ChangeLogEntry, ChangePage, Mutation, RecordId,
};

const CHANGE_LOG_MAGIC: [u8; 4] = *b"ZSCL";

#[derive(Debug)]
struct Backing {
    path: PathBuf,
    _lock: File,
}

/// The pending-change log shared by the local store and the coordinator.
///
/// Callers append through [`ChangeLog::record`]; the coordinator captures a
/// pass with [`ChangeLog::begin_pass`], pages over the queued entries and
/// purges them once the pass committed.
#[derive(Debug)]
pub struct ChangeLog {
    ledger: RwLock<ChangeLedger>,
    backing: Option<Backing>,
}

impl ChangeLog {
    /// Creates a log that lives only in memory.
    pub fn in_memory() -> Self {
        Self {
            ledger: RwLock::new(ChangeLedger::new()),
            backing: None,
        }
    }

    /// Opens or creates a log persisted at `path`.
    ///
    /// # Errors
    ///
    /// Returns `Locked` if another handle has the file open, or a format
    /// error if the file is not a change log.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ChangeLogError> {
        let path = path.as_ref();
        let lock = persist::acquire_lock(path)?.ok_or_else(|| ChangeLogError::Locked {
            path: path.display().to_string(),
        })?;

        let ledger = Self::read_ledger(path)?.unwrap_or_default();
        tracing::debug!(
            path = %path.display(),
            entries = ledger.len(),
            "opened change log"
        );

        Ok(Self {
            ledger: RwLock::new(ledger),
            backing: Some(Backing {
                path: path.to_path_buf(),
                _lock: lock,
            }),
        })
    }

    /// Reads a persisted log without taking its lock.
    ///
    /// Intended for inspection tooling; returns an empty ledger if the file
    /// does not exist.
    pub fn inspect(path: impl AsRef<Path>) -> Result<ChangeLedger, ChangeLogError> {
        Ok(Self::read_ledger(path.as_ref())?.unwrap_or_default())
    }

    fn read_ledger(path: &Path) -> Result<Option<ChangeLedger>, ChangeLogError> {
        match persist::read_if_exists(path)? {
            Some(bytes) => Ok(Some(unseal(CHANGE_LOG_MAGIC, &bytes)?)),
            None => Ok(None),
        }
    }

    /// Applies `change` to a copy of the ledger, persists it, then swaps it in.
    fn update<T, F>(&self, change: F) -> Result<T, ChangeLogError>
    where
        F: FnOnce(&mut ChangeLedger) -> T,
    {
        let mut ledger = self.ledger.write();
        let mut next = ledger.clone();
        let result = change(&mut next);

        if let Some(backing) = &self.backing {
            let bytes = seal(CHANGE_LOG_MAGIC, &next)?;
            persist::write_atomic(&backing.path, &bytes)?;
        }

        *ledger = next;
        Ok(result)
    }

    /// Records a local mutation, coalescing with the record's open entry.
    pub fn record(&self, mutation: Mutation) -> Result<Option<u64>, ChangeLogError> {
        self.update(|ledger| ledger.record(mutation))
    }

    /// Returns a bounded page of every pending entry after `after`.
    pub fn pending_changes(
        &self,
        after: Option<u64>,
        limit: usize,
    ) -> Result<ChangePage, ChangeLogError> {
        Ok(self.ledger.read().pending_page(after, limit))
    }

    /// Captures every unqueued entry for the pass about to start.
    pub fn begin_pass(&self) -> Result<usize, ChangeLogError> {
        self.update(ChangeLedger::mark_queued)
    }

    /// Returns a bounded page of queued entries after `after`.
    pub fn queued_changes(
        &self,
        after: Option<u64>,
        limit: usize,
    ) -> Result<ChangePage, ChangeLogError> {
        Ok(self.ledger.read().queued_page(after, limit))
    }

    /// Returns the record's entry recorded since the running pass started.
    pub fn open_entry(&self, unique_id: &RecordId) -> Option<ChangeLogEntry> {
        self.ledger.read().open_entry(unique_id).cloned()
    }

    /// Removes exactly the given entries.
    pub fn purge(&self, seqs: &[u64]) -> Result<usize, ChangeLogError> {
        if seqs.is_empty() {
            return Ok(0);
        }
        self.update(|ledger| ledger.purge(seqs))
    }

    /// Returns a copy of the current ledger.
    pub fn snapshot(&self) -> ChangeLedger {
        self.ledger.read().clone()
    }

    /// Total number of entries.
    pub fn len(&self) -> usize {
        self.ledger.read().len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.ledger.read().is_empty()
    }

    /// Path of the backing file, if persisted.
    pub fn path(&self) -> Option<&Path> {
        self.backing.as_ref().map(|b| b.path.as_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use zonesync_protocol::{MutationKind, RecordId};

    #[test]
    fn in_memory_log_records_and_purges() {
        let log = ChangeLog::in_memory();
        let seq = log.record(Mutation::inserted("a", "Stop", 1)).unwrap().unwrap();
        log.record(Mutation::updated("b", "Stop", ["name"], 2)).unwrap();

        assert_eq!(log.len(), 2);
        assert_eq!(log.begin_pass().unwrap(), 2);
        assert_eq!(log.queued_changes(None, 10).unwrap().entries.len(), 2);

        assert_eq!(log.purge(&[seq]).unwrap(), 1);
        assert_eq!(log.len(), 1);
        assert!(log.path().is_none());
    }

    #[test]
    fn persisted_log_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("changes.log");

        {
            let log = ChangeLog::open(&path).unwrap();
            log.record(Mutation::updated("a", "Stop", ["name"], 1)).unwrap();
            log.record(Mutation::updated("a", "Stop", ["status"], 2)).unwrap();
            log.begin_pass().unwrap();
        }

        let log = ChangeLog::open(&path).unwrap();
        let page = log.queued_changes(None, 10).unwrap();
        assert_eq!(page.entries.len(), 1);
        let entry = &page.entries[0];
        assert_eq!(entry.unique_id, RecordId::new("a"));
        assert_eq!(entry.mutation_kind, MutationKind::Updated);
        assert_eq!(entry.changed_fields.len(), 2);
        assert!(entry.queued);
    }

    #[test]
    fn second_handle_is_refused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("changes.log");

        let _first = ChangeLog::open(&path).unwrap();
        assert!(matches!(
            ChangeLog::open(&path),
            Err(ChangeLogError::Locked { .. })
        ));

        // inspection does not need the lock
        assert!(ChangeLog::inspect(&path).unwrap().is_empty());
    }

    #[test]
    fn foreign_file_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("changes.log");
        std::fs::write(&path, b"not a change log").unwrap();

        assert!(matches!(
            ChangeLog::open(&path),
            Err(ChangeLogError::Format(_))
        ));
    }
}
