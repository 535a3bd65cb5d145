//! Local object store collaborator.
//!
//! The coordinator reads and writes local records only through
//! [`LocalStore`]. Sync-side writes are staged until
//! [`LocalStore::save_if_changed`], so a failed pass can drop them with
//! [`LocalStore::discard_unsaved`].

use crate::change_log::ChangeLog;
use crate::error::LocalStoreError;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use zonesync_protocol::{Mutation, RecordId, SchemaRegistry, Snapshot};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// The local object store as seen by the sync coordinator.
pub trait LocalStore: Send + Sync {
    /// Entity schemas managed by this store.
    fn schemas(&self) -> &SchemaRegistry;

    /// Fetches the current snapshot of a record, including its change tag.
    fn fetch(&self, id: &RecordId) -> Result<Option<Snapshot>, LocalStoreError>;

    /// Inserts or merges a remote snapshot.
    ///
    /// Fields in `snapshot` overwrite stored fields; the stored change tag
    /// becomes the snapshot's. Fails with `MissingReference` if a reference
    /// points at a record that does not exist locally.
    fn upsert(&self, snapshot: &Snapshot) -> Result<(), LocalStoreError>;

    /// Deletes a record. Returns false if it did not exist.
    fn delete(&self, id: &RecordId) -> Result<bool, LocalStoreError>;

    /// Replaces a record's change tag. Returns false if it did not exist.
    fn set_change_tag(&self, id: &RecordId, tag: Option<String>) -> Result<bool, LocalStoreError>;

    /// Persists staged sync writes. Returns true if anything was saved.
    fn save_if_changed(&self) -> Result<bool, LocalStoreError>;

    /// Drops staged sync writes.
    fn discard_unsaved(&self) {}
}

#[derive(Debug, Default)]
struct Tables {
    committed: BTreeMap<RecordId, Snapshot>,
    // None marks a staged delete
    staged: BTreeMap<RecordId, Option<Snapshot>>,
}

impl Tables {
    fn current(&self, id: &RecordId) -> Option<&Snapshot> {
        match self.staged.get(id) {
            Some(staged) => staged.as_ref(),
            None => self.committed.get(id),
        }
    }
}

/// In-memory [`LocalStore`].
///
/// Application edits go through [`insert`](Self::insert),
/// [`update`](Self::update) and [`remove`](Self::remove); they are committed
/// immediately and recorded into the change log. Sync-side writes through the
/// trait are not recorded.
pub struct MemoryLocalStore {
    schemas: SchemaRegistry,
    change_log: Arc<ChangeLog>,
    tables: RwLock<Tables>,
}

impl MemoryLocalStore {
    /// Creates an empty store.
    pub fn new(schemas: SchemaRegistry, change_log: Arc<ChangeLog>) -> Self {
        Self {
            schemas,
            change_log,
            tables: RwLock::new(Tables::default()),
        }
    }

    /// The change log edits are recorded into.
    pub fn change_log(&self) -> &Arc<ChangeLog> {
        &self.change_log
    }

    /// Inserts a new record as an application edit.
    ///
    /// A zero `modified_at` is replaced by the current time.
    pub fn insert(&self, mut snapshot: Snapshot) -> Result<(), LocalStoreError> {
        self.schemas.validate(&snapshot)?;
        if snapshot.modified_at == 0 {
            snapshot.modified_at = now_millis();
        }

        let mutation = Mutation::inserted(
            snapshot.record_id.clone(),
            snapshot.entity_type.clone(),
            snapshot.modified_at,
        );
        {
            let mut tables = self.tables.write();
            tables.staged.remove(&snapshot.record_id);
            tables
                .committed
                .insert(snapshot.record_id.clone(), snapshot);
        }
        self.change_log.record(mutation)?;
        Ok(())
    }

    /// Changes fields of an existing record as an application edit.
    ///
    /// Only the fields carried by `patch` are touched.
    pub fn update(&self, patch: Snapshot) -> Result<(), LocalStoreError> {
        self.schemas.validate(&patch)?;
        let at = if patch.modified_at == 0 {
            now_millis()
        } else {
            patch.modified_at
        };

        let mutation = {
            let mut tables = self.tables.write();
            let stored = tables
                .committed
                .get_mut(&patch.record_id)
                .ok_or_else(|| LocalStoreError::NotFound(patch.record_id.clone()))?;

            for (name, value) in &patch.fields {
                stored.fields.insert(name.clone(), value.clone());
            }
            stored.modified_at = at;
            let entity_type = stored.entity_type.clone();

            // a staged sync write must not overwrite the edit when saved
            if let Some(Some(staged)) = tables.staged.get_mut(&patch.record_id) {
                for (name, value) in &patch.fields {
                    staged.fields.insert(name.clone(), value.clone());
                }
                staged.modified_at = at;
            }

            Mutation::updated(
                patch.record_id.clone(),
                entity_type,
                patch.fields.keys().cloned(),
                at,
            )
        };
        self.change_log.record(mutation)?;
        Ok(())
    }

    /// Deletes a record as an application edit.
    pub fn remove(&self, id: &RecordId) -> Result<(), LocalStoreError> {
        let removed = {
            let mut tables = self.tables.write();
            tables.staged.remove(id);
            tables
                .committed
                .remove(id)
                .ok_or_else(|| LocalStoreError::NotFound(id.clone()))?
        };

        self.change_log
            .record(Mutation::deleted(id.clone(), removed.entity_type, now_millis()))?;
        Ok(())
    }

    /// Returns the committed snapshot of a record.
    pub fn get(&self, id: &RecordId) -> Option<Snapshot> {
        self.tables.read().committed.get(id).cloned()
    }

    /// Returns true if a committed record exists.
    pub fn contains(&self, id: &RecordId) -> bool {
        self.tables.read().committed.contains_key(id)
    }

    /// Number of committed records.
    pub fn len(&self) -> usize {
        self.tables.read().committed.len()
    }

    /// Returns true if no records are committed.
    pub fn is_empty(&self) -> bool {
        self.tables.read().committed.is_empty()
    }

    /// Number of staged sync writes.
    pub fn staged_len(&self) -> usize {
        self.tables.read().staged.len()
    }
}

impl LocalStore for MemoryLocalStore {
    fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    fn fetch(&self, id: &RecordId) -> Result<Option<Snapshot>, LocalStoreError> {
        Ok(self.tables.read().current(id).cloned())
    }

    fn upsert(&self, snapshot: &Snapshot) -> Result<(), LocalStoreError> {
        self.schemas.validate(snapshot)?;

        let mut tables = self.tables.write();
        for (field, target) in snapshot.references() {
            if target != &snapshot.record_id && tables.current(target).is_none() {
                return Err(LocalStoreError::MissingReference {
                    record: snapshot.record_id.clone(),
                    field: field.to_string(),
                    target: target.clone(),
                });
            }
        }

        let merged = match tables.current(&snapshot.record_id) {
            Some(existing) => {
                let mut merged = existing.overlay(snapshot);
                merged.change_tag = snapshot.change_tag.clone();
                merged
            }
            None => snapshot.clone(),
        };
        tables
            .staged
            .insert(snapshot.record_id.clone(), Some(merged));
        Ok(())
    }

    fn delete(&self, id: &RecordId) -> Result<bool, LocalStoreError> {
        let mut tables = self.tables.write();
        let existed = tables.current(id).is_some();
        if existed {
            tables.staged.insert(id.clone(), None);
        }
        Ok(existed)
    }

    fn set_change_tag(&self, id: &RecordId, tag: Option<String>) -> Result<bool, LocalStoreError> {
        let mut tables = self.tables.write();
        let Some(mut snapshot) = tables.current(id).cloned() else {
            return Ok(false);
        };
        snapshot.change_tag = tag;
        tables.staged.insert(id.clone(), Some(snapshot));
        Ok(true)
    }

    fn save_if_changed(&self) -> Result<bool, LocalStoreError> {
        let mut tables = self.tables.write();
        if tables.staged.is_empty() {
            return Ok(false);
        }

        let staged = std::mem::take(&mut tables.staged);
        for (id, write) in staged {
            match write {
                Some(snapshot) => {
                    tables.committed.insert(id, snapshot);
                }
                None => {
                    tables.committed.remove(&id);
                }
            }
        }
        Ok(true)
    }

    fn discard_unsaved(&self) {
        self.tables.write().staged.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zonesync_protocol::{EntitySchema, FieldKind, FieldValue, MutationKind};

    fn store() -> MemoryLocalStore {
        let schemas = SchemaRegistry::new()
            .register(EntitySchema::new("Folder").field("name", FieldKind::Text))
            .register(
                EntitySchema::new("Note")
                    .field("title", FieldKind::Text)
                    .reference("folder", "Folder"),
            );
        MemoryLocalStore::new(schemas, Arc::new(ChangeLog::in_memory()))
    }

    #[test]
    fn application_edits_are_recorded() {
        let store = store();
        store
            .insert(Snapshot::new("f1", "Folder").with_field("name", "Inbox"))
            .unwrap();
        store
            .update(Snapshot::new("f1", "Folder").with_field("name", "Archive"))
            .unwrap();

        let ledger = store.change_log().snapshot();
        let entries = ledger.entries_for(&RecordId::new("f1"));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].mutation_kind, MutationKind::Inserted);

        assert_eq!(
            store.get(&RecordId::new("f1")).unwrap().get("name"),
            Some(&FieldValue::from("Archive"))
        );

        store.remove(&RecordId::new("f1")).unwrap();
        assert!(store.change_log().is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn update_of_unknown_record_fails() {
        let store = store();
        let err = store
            .update(Snapshot::new("nope", "Folder").with_field("name", "x"))
            .unwrap_err();
        assert!(matches!(err, LocalStoreError::NotFound(_)));
    }

    #[test]
    fn sync_writes_are_staged_and_not_recorded() {
        let store = store();
        let folder = Snapshot::new("f1", "Folder")
            .with_field("name", "Inbox")
            .with_change_tag("v1");

        store.upsert(&folder).unwrap();
        assert_eq!(store.staged_len(), 1);
        assert!(!store.contains(&RecordId::new("f1")));
        assert!(store.fetch(&RecordId::new("f1")).unwrap().is_some());

        assert!(store.save_if_changed().unwrap());
        assert!(!store.save_if_changed().unwrap());
        assert!(store.contains(&RecordId::new("f1")));
        assert!(store.change_log().is_empty());
    }

    #[test]
    fn upsert_merges_fields_and_adopts_tag() {
        let store = store();
        store
            .insert(
                Snapshot::new("n1", "Note")
                    .with_field("title", "draft")
                    .with_change_tag("v1"),
            )
            .unwrap();

        store
            .upsert(&Snapshot::new("n1", "Note").with_change_tag("v2"))
            .unwrap();
        store.save_if_changed().unwrap();

        let stored = store.get(&RecordId::new("n1")).unwrap();
        assert_eq!(stored.get("title"), Some(&FieldValue::from("draft")));
        assert_eq!(stored.change_tag.as_deref(), Some("v2"));
    }

    #[test]
    fn application_edit_survives_staged_sync_write() {
        let store = store();
        store
            .insert(Snapshot::new("f1", "Folder").with_field("name", "Inbox"))
            .unwrap();
        store
            .upsert(
                &Snapshot::new("f1", "Folder")
                    .with_field("name", "Remote")
                    .with_change_tag("v2"),
            )
            .unwrap();

        store
            .update(Snapshot::new("f1", "Folder").with_field("name", "Edited"))
            .unwrap();
        store.save_if_changed().unwrap();

        let stored = store.get(&RecordId::new("f1")).unwrap();
        assert_eq!(stored.get("name"), Some(&FieldValue::from("Edited")));
        assert_eq!(stored.change_tag.as_deref(), Some("v2"));
    }

    #[test]
    fn dangling_reference_is_refused_until_target_exists() {
        let store = store();
        let note = Snapshot::new("n1", "Note")
            .with_field("title", "hello")
            .with_field("folder", FieldValue::Reference(RecordId::new("f1")));

        let err = store.upsert(&note).unwrap_err();
        assert!(matches!(err, LocalStoreError::MissingReference { .. }));

        store
            .upsert(&Snapshot::new("f1", "Folder").with_field("name", "Inbox"))
            .unwrap();
        store.upsert(&note).unwrap();
    }

    #[test]
    fn discard_drops_staged_writes() {
        let store = store();
        store
            .upsert(&Snapshot::new("f1", "Folder").with_field("name", "Inbox"))
            .unwrap();
        store.discard_unsaved();

        assert_eq!(store.fetch(&RecordId::new("f1")).unwrap(), None);
        assert!(!store.save_if_changed().unwrap());
    }

    #[test]
    fn staged_delete_and_tag_write() {
        let store = store();
        store
            .insert(Snapshot::new("f1", "Folder").with_field("name", "Inbox"))
            .unwrap();

        assert!(store
            .set_change_tag(&RecordId::new("f1"), Some("v3".into()))
            .unwrap());
        assert!(!store.set_change_tag(&RecordId::new("zz"), None).unwrap());
        store.save_if_changed().unwrap();
        assert_eq!(
            store.get(&RecordId::new("f1")).unwrap().change_tag.as_deref(),
            Some("v3")
        );

        assert!(store.delete(&RecordId::new("f1")).unwrap());
        assert!(!store.delete(&RecordId::new("f1")).unwrap());
        store.save_if_changed().unwrap();
        assert!(store.is_empty());
    }
}
