//! Property-based test generators using proptest.
//!
//! Edits are generated against a small pool of record IDs so that random
//! sequences hit the same records often enough to coalesce and conflict.

use crate::fixtures::{folder, TestDevice};
use proptest::prelude::*;
use std::collections::BTreeSet;
use zonesync_protocol::{ConflictPolicy, ConflictRecord, FieldValue, Snapshot};

/// Number of distinct folder IDs the generators draw from.
pub const ID_POOL: usize = 6;

/// One application edit on a folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderEdit {
    /// Create folder `id` with a name.
    Insert {
        /// Index into the ID pool.
        id: usize,
        /// Folder name.
        name: String,
    },
    /// Change one field of folder `id`.
    Update {
        /// Index into the ID pool.
        id: usize,
        /// Either `name` or `status`.
        field: &'static str,
        /// New value.
        value: String,
    },
    /// Delete folder `id`.
    Delete {
        /// Index into the ID pool.
        id: usize,
    },
}

/// Folder ID for a pool index.
pub fn folder_id(index: usize) -> String {
    format!("folder-{index}")
}

/// Strategy for short field values.
pub fn value_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]{1,8}").expect("Invalid regex")
}

/// Strategy for one folder edit.
pub fn folder_edit_strategy() -> impl Strategy<Value = FolderEdit> {
    prop_oneof![
        (0..ID_POOL, value_strategy()).prop_map(|(id, name)| FolderEdit::Insert { id, name }),
        (0..ID_POOL, prop_oneof![Just("name"), Just("status")], value_strategy())
            .prop_map(|(id, field, value)| FolderEdit::Update { id, field, value }),
        (0..ID_POOL).prop_map(|id| FolderEdit::Delete { id }),
    ]
}

/// Strategy for rounds of edits, each round followed by a pass.
pub fn edit_rounds_strategy(
    rounds: usize,
    per_round: usize,
) -> impl Strategy<Value = Vec<Vec<FolderEdit>>> {
    prop::collection::vec(
        prop::collection::vec(folder_edit_strategy(), 0..=per_round),
        1..=rounds,
    )
}

/// Strategy for a conflict policy.
pub fn policy_strategy() -> impl Strategy<Value = ConflictPolicy> {
    prop_oneof![
        Just(ConflictPolicy::ServerWins),
        Just(ConflictPolicy::ClientWins),
        Just(ConflictPolicy::CallerDecides),
    ]
}

/// Strategy for a folder snapshot with a change tag.
pub fn snapshot_strategy() -> impl Strategy<Value = Snapshot> {
    (
        0..ID_POOL,
        value_strategy(),
        value_strategy(),
        0u64..1_000_000,
        1u32..100,
    )
        .prop_map(|(id, name, status, at, version)| {
            Snapshot::new(folder_id(id), "Folder")
                .with_field("name", name)
                .with_field("status", status)
                .with_modified_at(at)
                .with_change_tag(format!("v{version}"))
        })
}

/// Strategy for a conflict on one record, with or without a server copy.
pub fn conflict_strategy() -> impl Strategy<Value = ConflictRecord> {
    (
        snapshot_strategy(),
        prop::option::of(snapshot_strategy()),
    )
        .prop_map(|(client, server)| {
            let server = server.map(|mut s| {
                s.record_id = client.record_id.clone();
                s
            });
            ConflictRecord::new(client, server)
        })
}

/// Applies edits to a device, skipping those that make no sense.
///
/// Inserts only create IDs that never existed on this device, and updates
/// and deletes only touch records that currently exist. `retired` collects
/// deleted IDs across calls.
pub fn apply_edits(device: &TestDevice, edits: &[FolderEdit], retired: &mut BTreeSet<usize>) {
    for edit in edits {
        match edit {
            FolderEdit::Insert { id, name } => {
                let key = folder_id(*id);
                if retired.contains(id) || device.record(&key).is_some() {
                    continue;
                }
                device
                    .insert(folder(&key, name))
                    .expect("insert of a fresh folder");
            }
            FolderEdit::Update { id, field, value } => {
                let key = folder_id(*id);
                if device.record(&key).is_none() {
                    continue;
                }
                let patch = Snapshot::new(key, "Folder")
                    .with_field(*field, FieldValue::from(value.as_str()));
                device.update(patch).expect("update of an existing folder");
            }
            FolderEdit::Delete { id } => {
                let key = folder_id(*id);
                if device.record(&key).is_none() {
                    continue;
                }
                device.remove(&key).expect("delete of an existing folder");
                retired.insert(*id);
            }
        }
    }
}
