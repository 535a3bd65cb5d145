//! Sync cursors and their stores.

use crate::error::CursorError;
use crate::persist;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zonesync_protocol::{seal, unseal, ServerCursor, ZoneId};

const CURSOR_MAGIC: [u8; 4] = *b"ZSCU";

/// Durable storage for per-zone cursors.
pub trait CursorStore: Send + Sync {
    /// Loads the committed cursor for a zone.
    fn load(&self, zone: &ZoneId) -> Result<Option<ServerCursor>, CursorError>;

    /// Stores the cursor for a zone.
    fn store(&self, zone: &ZoneId, cursor: &ServerCursor) -> Result<(), CursorError>;

    /// Forgets the cursor for a zone, forcing a full pull next pass.
    fn clear(&self, zone: &ZoneId) -> Result<(), CursorError>;
}

/// Cursor store kept in memory.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    cursors: RwLock<BTreeMap<ZoneId, ServerCursor>>,
}

impl MemoryCursorStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CursorStore for MemoryCursorStore {
    fn load(&self, zone: &ZoneId) -> Result<Option<ServerCursor>, CursorError> {
        Ok(self.cursors.read().get(zone).cloned())
    }

    fn store(&self, zone: &ZoneId, cursor: &ServerCursor) -> Result<(), CursorError> {
        self.cursors.write().insert(zone.clone(), cursor.clone());
        Ok(())
    }

    fn clear(&self, zone: &ZoneId) -> Result<(), CursorError> {
        self.cursors.write().remove(zone);
        Ok(())
    }
}

/// Cursor store persisted in a single file holding every zone's cursor.
#[derive(Debug)]
pub struct FileCursorStore {
    path: PathBuf,
    cursors: RwLock<BTreeMap<ZoneId, ServerCursor>>,
    _lock: File,
}

impl FileCursorStore {
    /// Opens or creates the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CursorError> {
        let path = path.as_ref();
        let lock = persist::acquire_lock(path)?.ok_or_else(|| CursorError::Locked {
            path: path.display().to_string(),
        })?;
        let cursors = Self::inspect(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            cursors: RwLock::new(cursors),
            _lock: lock,
        })
    }

    /// Reads every stored cursor without taking the lock.
    pub fn inspect(path: impl AsRef<Path>) -> Result<BTreeMap<ZoneId, ServerCursor>, CursorError> {
        match persist::read_if_exists(path.as_ref())? {
            Some(bytes) => Ok(unseal(CURSOR_MAGIC, &bytes)?),
            None => Ok(BTreeMap::new()),
        }
    }

    fn write(&self, cursors: &BTreeMap<ZoneId, ServerCursor>) -> Result<(), CursorError> {
        let bytes = seal(CURSOR_MAGIC, cursors)?;
        persist::write_atomic(&self.path, &bytes)?;
        Ok(())
    }
}

impl CursorStore for FileCursorStore {
    fn load(&self, zone: &ZoneId) -> Result<Option<ServerCursor>, CursorError> {
        Ok(self.cursors.read().get(zone).cloned())
    }

    fn store(&self, zone: &ZoneId, cursor: &ServerCursor) -> Result<(), CursorError> {
        let mut cursors = self.cursors.write();
        let mut next = cursors.clone();
        next.insert(zone.clone(), cursor.clone());
        self.write(&next)?;
        *cursors = next;
        Ok(())
    }

    fn clear(&self, zone: &ZoneId) -> Result<(), CursorError> {
        let mut cursors = self.cursors.write();
        if !cursors.contains_key(zone) {
            return Ok(());
        }
        let mut next = cursors.clone();
        next.remove(zone);
        self.write(&next)?;
        *cursors = next;
        Ok(())
    }
}

/// The committed cursor of one zone.
#[derive(Clone)]
pub struct SyncCursor {
    zone: ZoneId,
    store: Arc<dyn CursorStore>,
}

impl SyncCursor {
    /// Binds a zone to a cursor store.
    pub fn new(zone: ZoneId, store: Arc<dyn CursorStore>) -> Self {
        Self { zone, store }
    }

    /// Zone this cursor tracks.
    pub fn zone(&self) -> &ZoneId {
        &self.zone
    }

    /// Loads the last committed cursor.
    pub fn load(&self) -> Result<Option<ServerCursor>, CursorError> {
        self.store.load(&self.zone)
    }

    /// Commits a new cursor.
    pub fn commit(&self, cursor: &ServerCursor) -> Result<(), CursorError> {
        tracing::debug!(zone = %self.zone, cursor = %cursor.to_hex(), "committing cursor");
        self.store.store(&self.zone, cursor)
    }

    /// Drops the committed cursor.
    pub fn reset(&self) -> Result<(), CursorError> {
        self.store.clear(&self.zone)
    }
}

impl std::fmt::Debug for SyncCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCursor").field("zone", &self.zone).finish()
    }
}
