//! Pending-mutation ledger.
//!
//! The ledger records every local insert, update and delete that has not yet
//! completed a sync pass. Repeated edits to the same record before the next
//! pass coalesce into one entry whose changed-field set widens by union.
//!
//! # Invariants
//!
//! - Sequence numbers are assigned in record order and never reused
//! - Queued entries belong to an in-flight pass and are never modified
//! - At most one unqueued entry exists per record

use crate::record::RecordId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Kind of local mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationKind {
    /// Record was created locally.
    Inserted,
    /// Record fields were changed locally.
    Updated,
    /// Record was deleted locally.
    Deleted,
}

impl MutationKind {
    /// Converts to a numeric code.
    pub fn to_code(&self) -> u8 {
        match self {
            MutationKind::Inserted => 0,
            MutationKind::Updated => 1,
            MutationKind::Deleted => 2,
        }
    }

    /// Converts from a numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(MutationKind::Inserted),
            1 => Some(MutationKind::Updated),
            2 => Some(MutationKind::Deleted),
            _ => None,
        }
    }
}

/// A mutation observed by the local store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    /// Record identity.
    pub unique_id: RecordId,
    /// Entity type of the record.
    pub entity_type: String,
    /// What happened.
    pub kind: MutationKind,
    /// Changed field names (meaningful for updates only).
    pub changed_fields: BTreeSet<String>,
    /// Observation time in milliseconds.
    pub at: u64,
}

impl Mutation {
    /// Creates an insert mutation.
    pub fn inserted(unique_id: impl Into<RecordId>, entity_type: impl Into<String>, at: u64) -> Self {
        Self {
            unique_id: unique_id.into(),
            entity_type: entity_type.into(),
            kind: MutationKind::Inserted,
            changed_fields: BTreeSet::new(),
            at,
        }
    }

    /// Creates an update mutation touching `fields`.
    pub fn updated<I, S>(
        unique_id: impl Into<RecordId>,
        entity_type: impl Into<String>,
        fields: I,
        at: u64,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            unique_id: unique_id.into(),
            entity_type: entity_type.into(),
            kind: MutationKind::Updated,
            changed_fields: fields.into_iter().map(Into::into).collect(),
            at,
        }
    }

    /// Creates a delete mutation.
    pub fn deleted(unique_id: impl Into<RecordId>, entity_type: impl Into<String>, at: u64) -> Self {
        Self {
            unique_id: unique_id.into(),
            entity_type: entity_type.into(),
            kind: MutationKind::Deleted,
            changed_fields: BTreeSet::new(),
            at,
        }
    }
}

/// One pending change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    /// Ledger sequence number.
    pub seq: u64,
    /// Record identity.
    pub unique_id: RecordId,
    /// Entity type of the record.
    pub entity_type: String,
    /// Effective mutation.
    pub mutation_kind: MutationKind,
    /// Changed field names (only meaningful for updates).
    pub changed_fields: BTreeSet<String>,
    /// Creation time in milliseconds.
    pub created_at: u64,
    /// Whether the entry was captured by an in-flight pass.
    pub queued: bool,
}

impl ChangeLogEntry {
    fn from_mutation(seq: u64, mutation: Mutation) -> Self {
        let changed_fields = if mutation.kind == MutationKind::Updated {
            mutation.changed_fields
        } else {
            BTreeSet::new()
        };
        Self {
            seq,
            unique_id: mutation.unique_id,
            entity_type: mutation.entity_type,
            mutation_kind: mutation.kind,
            changed_fields,
            created_at: mutation.at,
            queued: false,
        }
    }

    /// Adds changed field names (set union).
    pub fn add_fields<I>(&mut self, fields: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.changed_fields.extend(fields);
    }

    /// Folds a later mutation of the same record into this entry.
    ///
    /// Returns `false` when the two cancel out (insert then delete) and the
    /// entry should disappear.
    pub fn absorb(&mut self, kind: MutationKind, fields: BTreeSet<String>) -> bool {
        use MutationKind::*;
        match (self.mutation_kind, kind) {
            (Inserted, Deleted) => return false,
            (Inserted, _) => {}
            (Updated, Updated) => self.add_fields(fields),
            (Updated, Inserted) => {
                self.mutation_kind = Inserted;
                self.changed_fields.clear();
            }
            (Updated, Deleted) => {
                self.mutation_kind = Deleted;
                self.changed_fields.clear();
            }
            (Deleted, Inserted) => self.mutation_kind = Inserted,
            (Deleted, _) => {}
        }
        true
    }

    /// Folds a mutation recorded after this entry was captured by a pass.
    ///
    /// The capturing pass may already have pushed the entry, so an insert
    /// followed by a delete becomes a delete instead of cancelling out.
    pub fn absorb_captured(&mut self, kind: MutationKind, fields: BTreeSet<String>) {
        if self.mutation_kind == MutationKind::Inserted && kind == MutationKind::Deleted {
            self.mutation_kind = MutationKind::Deleted;
            self.changed_fields.clear();
        } else {
            self.absorb(kind, fields);
        }
    }
}

/// A bounded page of ledger entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangePage {
    /// Entries in sequence order.
    pub entries: Vec<ChangeLogEntry>,
    /// Sequence to resume after, if more entries remain.
    pub next: Option<u64>,
}

/// The in-memory change ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeLedger {
    entries: BTreeMap<u64, ChangeLogEntry>,
    next_seq: u64,
}

impl ChangeLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_seq: 1,
        }
    }

    /// Records a mutation, coalescing with the record's unqueued entry.
    ///
    /// Returns the sequence of the entry now holding the change, or `None`
    /// if the mutation cancelled the pending entry out.
    pub fn record(&mut self, mutation: Mutation) -> Option<u64> {
        let open = self.open_entry(&mutation.unique_id).map(|e| e.seq);

        if let Some(seq) = open {
            let keep = match self.entries.get_mut(&seq) {
                Some(entry) => entry.absorb(mutation.kind, mutation.changed_fields),
                None => true,
            };
            if keep {
                return Some(seq);
            }
            self.entries.remove(&seq);
            return None;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries
            .insert(seq, ChangeLogEntry::from_mutation(seq, mutation));
        Some(seq)
    }

    /// Returns the record's unqueued entry, if an edit is waiting for a pass.
    pub fn open_entry(&self, unique_id: &RecordId) -> Option<&ChangeLogEntry> {
        self.entries
            .values()
            .rev()
            .find(|e| !e.queued && &e.unique_id == unique_id)
    }

    /// Returns a page of all entries after `after`.
    pub fn pending_page(&self, after: Option<u64>, limit: usize) -> ChangePage {
        self.page(after, limit, |_| true)
    }

    /// Returns a page of queued entries after `after`.
    pub fn queued_page(&self, after: Option<u64>, limit: usize) -> ChangePage {
        self.page(after, limit, |e| e.queued)
    }

    fn page<F>(&self, after: Option<u64>, limit: usize, filter: F) -> ChangePage
    where
        F: Fn(&ChangeLogEntry) -> bool,
    {
        let start = after.map_or(0, |seq| seq.saturating_add(1));
        let mut matching = self
            .entries
            .range(start..)
            .map(|(_, e)| e)
            .filter(|e| filter(e));

        let entries: Vec<ChangeLogEntry> = matching.by_ref().take(limit).cloned().collect();
        let next = match (entries.last(), matching.next()) {
            (Some(last), Some(_)) => Some(last.seq),
            _ => None,
        };
        ChangePage { entries, next }
    }

    /// Marks every unqueued entry as queued. Returns how many were marked.
    pub fn mark_queued(&mut self) -> usize {
        let mut marked = 0;
        for entry in self.entries.values_mut().filter(|e| !e.queued) {
            entry.queued = true;
            marked += 1;
        }
        marked
    }

    /// Removes the given entries. Unknown sequences are ignored.
    pub fn purge(&mut self, seqs: &[u64]) -> usize {
        seqs.iter()
            .filter(|seq| self.entries.remove(seq).is_some())
            .count()
    }

    /// Returns every entry for a record, oldest first.
    pub fn entries_for(&self, unique_id: &RecordId) -> Vec<&ChangeLogEntry> {
        self.entries
            .values()
            .filter(|e| &e.unique_id == unique_id)
            .collect()
    }

    /// Returns the number of unqueued entries.
    pub fn unqueued_count(&self) -> usize {
        self.entries.values().filter(|e| !e.queued).count()
    }

    /// Returns the number of queued entries.
    pub fn queued_count(&self) -> usize {
        self.entries.values().filter(|e| e.queued).count()
    }

    /// Returns the next sequence to be assigned.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Returns the total number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the ledger is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ChangeLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn mutation_kind_codes() {
        assert_eq!(MutationKind::Inserted.to_code(), 0);
        assert_eq!(MutationKind::from_code(2), Some(MutationKind::Deleted));
        assert_eq!(MutationKind::from_code(9), None);
    }

    #[test]
    fn disjoint_updates_coalesce_into_union() {
        let mut ledger = ChangeLedger::new();

        let first = ledger.record(Mutation::updated("a", "Stop", ["name"], 1));
        let second = ledger.record(Mutation::updated("a", "Stop", ["status"], 2));

        assert_eq!(first, second);
        assert_eq!(ledger.len(), 1);
        let entry = &ledger.entries_for(&RecordId::new("a"))[0];
        assert_eq!(entry.changed_fields, fields(&["name", "status"]));
        assert_eq!(entry.created_at, 1);
    }

    #[test]
    fn repeated_field_is_idempotent() {
        let mut ledger = ChangeLedger::new();
        ledger.record(Mutation::updated("a", "Stop", ["name"], 1));
        ledger.record(Mutation::updated("a", "Stop", ["name"], 2));

        let entry = &ledger.entries_for(&RecordId::new("a"))[0];
        assert_eq!(entry.changed_fields, fields(&["name"]));
    }

    #[test]
    fn insert_then_delete_cancels_out() {
        let mut ledger = ChangeLedger::new();
        ledger.record(Mutation::inserted("a", "Stop", 1));
        ledger.record(Mutation::updated("a", "Stop", ["name"], 2));
        assert_eq!(ledger.len(), 1);

        let result = ledger.record(Mutation::deleted("a", "Stop", 3));
        assert_eq!(result, None);
        assert!(ledger.is_empty());
    }

    #[test]
    fn update_then_delete_becomes_delete() {
        let mut ledger = ChangeLedger::new();
        ledger.record(Mutation::updated("a", "Stop", ["name"], 1));
        ledger.record(Mutation::deleted("a", "Stop", 2));

        let entry = &ledger.entries_for(&RecordId::new("a"))[0];
        assert_eq!(entry.mutation_kind, MutationKind::Deleted);
        assert!(entry.changed_fields.is_empty());
    }

    #[test]
    fn queued_entries_are_not_coalesced() {
        let mut ledger = ChangeLedger::new();
        ledger.record(Mutation::updated("a", "Stop", ["name"], 1));
        assert_eq!(ledger.mark_queued(), 1);

        ledger.record(Mutation::updated("a", "Stop", ["status"], 2));

        let entries = ledger.entries_for(&RecordId::new("a"));
        assert_eq!(entries.len(), 2);
        assert!(entries[0].queued);
        assert_eq!(entries[0].changed_fields, fields(&["name"]));
        assert!(!entries[1].queued);
        assert_eq!(ledger.queued_count(), 1);
        assert_eq!(ledger.unqueued_count(), 1);
    }

    #[test]
    fn captured_insert_then_delete_becomes_delete() {
        let mut ledger = ChangeLedger::new();
        ledger.record(Mutation::inserted("a", "Stop", 1));
        ledger.mark_queued();
        ledger.record(Mutation::deleted("a", "Stop", 2));

        let entries = ledger.entries_for(&RecordId::new("a"));
        let mut captured = entries[0].clone();
        captured.absorb_captured(entries[1].mutation_kind, entries[1].changed_fields.clone());
        assert_eq!(captured.mutation_kind, MutationKind::Deleted);
        assert!(captured.changed_fields.is_empty());

        let mut update = entries[0].clone();
        update.absorb_captured(MutationKind::Updated, fields(&["name"]));
        assert_eq!(update.mutation_kind, MutationKind::Inserted);
    }

    #[test]
    fn open_entry_skips_queued() {
        let mut ledger = ChangeLedger::new();
        ledger.record(Mutation::updated("a", "Stop", ["name"], 1));
        assert!(ledger.open_entry(&RecordId::new("a")).is_some());

        ledger.mark_queued();
        assert!(ledger.open_entry(&RecordId::new("a")).is_none());

        ledger.record(Mutation::updated("a", "Stop", ["status"], 2));
        let open = ledger.open_entry(&RecordId::new("a")).unwrap();
        assert_eq!(open.changed_fields, fields(&["status"]));
    }

    #[test]
    fn pages_resume_until_exhausted() {
        let mut ledger = ChangeLedger::new();
        for i in 0..7 {
            ledger.record(Mutation::inserted(format!("r{i}"), "Stop", i));
        }

        let mut seen = Vec::new();
        let mut after = None;
        loop {
            let page = ledger.pending_page(after, 3);
            seen.extend(page.entries.iter().map(|e| e.seq));
            match page.next {
                Some(next) => after = Some(next),
                None => break,
            }
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn exact_page_boundary_has_no_next() {
        let mut ledger = ChangeLedger::new();
        for i in 0..3 {
            ledger.record(Mutation::inserted(format!("r{i}"), "Stop", i));
        }
        let page = ledger.pending_page(None, 3);
        assert_eq!(page.entries.len(), 3);
        assert_eq!(page.next, None);
    }

    #[test]
    fn queued_page_skips_fresh_entries() {
        let mut ledger = ChangeLedger::new();
        ledger.record(Mutation::inserted("a", "Stop", 1));
        ledger.mark_queued();
        ledger.record(Mutation::inserted("b", "Stop", 2));

        let page = ledger.queued_page(None, 10);
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].unique_id, RecordId::new("a"));
    }

    #[test]
    fn purge_removes_only_named_entries() {
        let mut ledger = ChangeLedger::new();
        let a = ledger.record(Mutation::inserted("a", "Stop", 1)).unwrap();
        ledger.record(Mutation::inserted("b", "Stop", 2));

        assert_eq!(ledger.purge(&[a, 99]), 1);
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.next_seq(), 3);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn updates_union_into_one_entry(
                edits in proptest::collection::vec(
                    proptest::collection::btree_set("[a-e]", 1..3),
                    1..12,
                )
            ) {
                let mut ledger = ChangeLedger::new();
                let mut expected = BTreeSet::new();
                for (at, edit) in edits.iter().enumerate() {
                    expected.extend(edit.iter().cloned());
                    ledger.record(Mutation::updated("r", "Stop", edit.clone(), at as u64));
                }

                prop_assert_eq!(ledger.len(), 1);
                let entry = &ledger.entries_for(&RecordId::new("r"))[0];
                prop_assert_eq!(&entry.changed_fields, &expected);
                prop_assert_eq!(entry.mutation_kind, MutationKind::Updated);
            }
        }
    }
}
