//! Test fixtures and device helpers.
//!
//! A [`TestDevice`] is one engine instance (local store, change log, cursor
//! store, remote adapter and coordinator) synced against a shared
//! [`ZoneServer`]. Several devices on one server model several installs of
//! the same app.

use crate::crash::{CrashPoint, CrashingCursorStore, CrashingLocalStore};
use crate::remote::FaultyRemote;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use zonesync_engine::{
    ChangeLog, LocalStoreError, MemoryCursorStore, MemoryLocalStore, SyncConfig, SyncCoordinator,
    SyncOutcome, SyncResult,
};
use zonesync_protocol::{
    EntitySchema, FieldKind, FieldValue, RecordId, SchemaRegistry, Snapshot, ZoneId,
};
use zonesync_server::ZoneServer;

/// Zone name used by the fixtures.
pub const TEST_ZONE: &str = "Notes";

/// Local store type of a [`TestDevice`].
pub type DeviceStore = CrashingLocalStore<MemoryLocalStore>;

/// Coordinator type of a [`TestDevice`].
pub type DeviceCoordinator = SyncCoordinator<DeviceStore, FaultyRemote>;

/// Schemas for folders and the notes filed in them.
pub fn schemas() -> SchemaRegistry {
    SchemaRegistry::new()
        .register(
            EntitySchema::new("Folder")
                .field("name", FieldKind::Text)
                .field("status", FieldKind::Text),
        )
        .register(
            EntitySchema::new("Note")
                .field("title", FieldKind::Text)
                .field("body", FieldKind::Text)
                .reference("folder", "Folder"),
        )
}

/// A folder snapshot.
pub fn folder(id: &str, name: &str) -> Snapshot {
    Snapshot::new(id, "Folder")
        .with_field("name", name)
        .with_field("status", "open")
}

/// A note filed in `folder_id`.
pub fn note(id: &str, title: &str, folder_id: &str) -> Snapshot {
    Snapshot::new(id, "Note")
        .with_field("title", title)
        .with_field("folder", FieldValue::Reference(RecordId::new(folder_id)))
}

/// A shared server with the test zone already created.
pub fn cloud() -> Arc<ZoneServer> {
    let server = Arc::new(ZoneServer::default());
    server.create_zone(&zone());
    server
}

/// The test zone.
pub fn zone() -> ZoneId {
    ZoneId::new(TEST_ZONE)
}

/// One engine instance synced against a shared server.
pub struct TestDevice {
    /// The coordinator under test.
    pub coordinator: DeviceCoordinator,
    /// Local store wrapped for crash injection.
    pub local: Arc<DeviceStore>,
    /// Remote adapter wrapped for fault injection.
    pub remote: Arc<FaultyRemote>,
    /// Cursor store wrapped for crash injection.
    pub cursors: Arc<CrashingCursorStore<MemoryCursorStore>>,
    /// The change log application edits go into.
    pub log: Arc<ChangeLog>,
}

impl TestDevice {
    /// Creates a device with an in-memory change log.
    pub fn new(server: &Arc<ZoneServer>, config: SyncConfig) -> Self {
        Self::with_change_log(server, config, Arc::new(ChangeLog::in_memory()))
    }

    /// Creates a device with the default configuration.
    pub fn default_on(server: &Arc<ZoneServer>) -> Self {
        Self::new(server, SyncConfig::new(TEST_ZONE))
    }

    /// Creates a device recording into `log`.
    pub fn with_change_log(
        server: &Arc<ZoneServer>,
        config: SyncConfig,
        log: Arc<ChangeLog>,
    ) -> Self {
        let local = Arc::new(CrashingLocalStore::new(MemoryLocalStore::new(
            schemas(),
            log.clone(),
        )));
        let remote = Arc::new(FaultyRemote::new(server.clone()));
        let cursors = Arc::new(CrashingCursorStore::new(MemoryCursorStore::new()));
        let coordinator = SyncCoordinator::new(
            config,
            local.clone(),
            remote.clone(),
            log.clone(),
            cursors.clone(),
        );
        Self {
            coordinator,
            local,
            remote,
            cursors,
            log,
        }
    }

    /// The unwrapped local store.
    pub fn store(&self) -> &MemoryLocalStore {
        self.local.inner()
    }

    /// Inserts a record as an application edit.
    pub fn insert(&self, snapshot: Snapshot) -> Result<(), LocalStoreError> {
        self.store().insert(snapshot)
    }

    /// Changes fields of a record as an application edit.
    pub fn update(&self, patch: Snapshot) -> Result<(), LocalStoreError> {
        self.store().update(patch)
    }

    /// Deletes a record as an application edit.
    pub fn remove(&self, id: &str) -> Result<(), LocalStoreError> {
        self.store().remove(&RecordId::new(id))
    }

    /// Returns the committed local copy of a record.
    pub fn record(&self, id: &str) -> Option<Snapshot> {
        self.store().get(&RecordId::new(id))
    }

    /// Runs one pass.
    pub fn sync(&self) -> SyncResult<SyncOutcome> {
        self.coordinator.sync()
    }

    /// Makes the next pass fail at `point`.
    pub fn crash_at(&self, point: CrashPoint) {
        match point {
            CrashPoint::LocalSave => self.local.arm(),
            CrashPoint::CursorCommit => self.cursors.arm(),
        }
    }
}

/// Paths for file-backed change logs and cursors, removed on drop.
pub struct TempFiles {
    dir: TempDir,
}

impl TempFiles {
    /// Creates a fresh temporary directory.
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            dir: TempDir::new()?,
        })
    }

    /// Path for a change log file.
    pub fn change_log(&self) -> PathBuf {
        self.dir.path().join("changes.zsl")
    }

    /// Path for a cursor file.
    pub fn cursors(&self) -> PathBuf {
        self.dir.path().join("cursors.zsc")
    }
}

/// Returns the text value of a field.
pub fn text<'a>(snapshot: &'a Snapshot, field: &str) -> Option<&'a str> {
    snapshot.get(field).and_then(FieldValue::as_text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn devices_share_the_server() {
        let server = cloud();
        let a = TestDevice::default_on(&server);
        let b = TestDevice::default_on(&server);

        a.insert(folder("f1", "Inbox")).unwrap();
        a.sync().unwrap();
        b.sync().unwrap();

        assert_eq!(text(&b.record("f1").unwrap(), "name"), Some("Inbox"));
    }

    #[test]
    fn fixtures_match_schemas() {
        let schemas = schemas();
        schemas.validate(&folder("f1", "Inbox")).unwrap();
        schemas.validate(&note("n1", "hello", "f1")).unwrap();
    }
}
