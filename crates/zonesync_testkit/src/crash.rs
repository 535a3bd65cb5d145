//! Crash injection around the end of a pass.
//!
//! A pass writes to the local store, then commits the cursor, then purges
//! the change log. These wrappers fail one of those writes on demand so
//! tests can check that the next pass re-pushes what was not purged and
//! converges.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use zonesync_testkit::crash::{CrashPoint, CrashingCursorStore};
//!
//! let cursors = Arc::new(CrashingCursorStore::new(MemoryCursorStore::new()));
//! cursors.arm();
//! assert!(coordinator.sync().is_err());
//! assert!(coordinator.sync().is_ok());
//! ```

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use zonesync_engine::{CursorError, CursorStore, LocalStore, LocalStoreError};
use zonesync_protocol::{RecordId, SchemaRegistry, ServerCursor, Snapshot, ZoneId};

/// Points at which a crash can be simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// Local writes of the pass fail to save.
    LocalSave,
    /// The cursor fails to commit after the local save.
    CursorCommit,
}

/// One-shot trigger shared by the crashing wrappers.
#[derive(Debug, Default)]
struct Trigger {
    armed: AtomicBool,
    fired: AtomicUsize,
}

impl Trigger {
    fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    fn fire(&self) -> bool {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.fired.fetch_add(1, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    fn fired(&self) -> usize {
        self.fired.load(Ordering::SeqCst)
    }
}

/// A cursor store whose next commit can be made to fail.
#[derive(Debug)]
pub struct CrashingCursorStore<S> {
    inner: S,
    trigger: Trigger,
}

impl<S: CursorStore> CrashingCursorStore<S> {
    /// Wraps `inner`.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            trigger: Trigger::default(),
        }
    }

    /// Makes the next `store` call fail.
    pub fn arm(&self) {
        self.trigger.arm();
    }

    /// Number of simulated crashes so far.
    pub fn crashes(&self) -> usize {
        self.trigger.fired()
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: CursorStore> CursorStore for CrashingCursorStore<S> {
    fn load(&self, zone: &ZoneId) -> Result<Option<ServerCursor>, CursorError> {
        self.inner.load(zone)
    }

    fn store(&self, zone: &ZoneId, cursor: &ServerCursor) -> Result<(), CursorError> {
        if self.trigger.fire() {
            return Err(CursorError::Io(io::Error::new(
                io::ErrorKind::Other,
                "simulated crash during cursor commit",
            )));
        }
        self.inner.store(zone, cursor)
    }

    fn clear(&self, zone: &ZoneId) -> Result<(), CursorError> {
        self.inner.clear(zone)
    }
}

/// A local store whose next save can be made to fail.
#[derive(Debug)]
pub struct CrashingLocalStore<L> {
    inner: L,
    trigger: Trigger,
}

impl<L: LocalStore> CrashingLocalStore<L> {
    /// Wraps `inner`.
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            trigger: Trigger::default(),
        }
    }

    /// Makes the next `save_if_changed` call fail.
    pub fn arm(&self) {
        self.trigger.arm();
    }

    /// Number of simulated crashes so far.
    pub fn crashes(&self) -> usize {
        self.trigger.fired()
    }

    /// The wrapped store.
    pub fn inner(&self) -> &L {
        &self.inner
    }
}

impl<L: LocalStore> LocalStore for CrashingLocalStore<L> {
    fn schemas(&self) -> &SchemaRegistry {
        self.inner.schemas()
    }

    fn fetch(&self, id: &RecordId) -> Result<Option<Snapshot>, LocalStoreError> {
        self.inner.fetch(id)
    }

    fn upsert(&self, snapshot: &Snapshot) -> Result<(), LocalStoreError> {
        self.inner.upsert(snapshot)
    }

    fn delete(&self, id: &RecordId) -> Result<bool, LocalStoreError> {
        self.inner.delete(id)
    }

    fn set_change_tag(&self, id: &RecordId, tag: Option<String>) -> Result<bool, LocalStoreError> {
        self.inner.set_change_tag(id, tag)
    }

    fn save_if_changed(&self) -> Result<bool, LocalStoreError> {
        if self.trigger.fire() {
            return Err(LocalStoreError::Backend(
                "simulated crash during local save".into(),
            ));
        }
        self.inner.save_if_changed()
    }

    fn discard_unsaved(&self) {
        self.inner.discard_unsaved();
    }
}
