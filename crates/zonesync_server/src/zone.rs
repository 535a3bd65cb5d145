//! Server-side zone state.

use crate::error::{ServerError, ServerResult};
use std::collections::{BTreeMap, BTreeSet};
use zonesync_protocol::{ChangesPage, RecordId, RecordOutcome, RecordRef, ServerCursor, Snapshot};

/// One entry of a zone's change history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneChange {
    /// Position in the zone's history, starting at 1.
    pub seq: u64,
    /// The record that changed.
    pub record: RecordRef,
    /// Whether the record was deleted.
    pub deleted: bool,
}

/// A record zone.
///
/// The zone maintains:
/// - Current records with their change tags
/// - Change history in commit order
/// - The version counter that mints change tags
#[derive(Debug)]
pub struct ServerZone {
    records: BTreeMap<RecordId, Snapshot>,
    history: Vec<ZoneChange>,
    next_seq: u64,
    next_version: u64,
}

impl ServerZone {
    /// Creates an empty zone.
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            history: Vec::new(),
            next_seq: 1,
            next_version: 1,
        }
    }

    /// Returns the stored record.
    pub fn get(&self, id: &RecordId) -> Option<&Snapshot> {
        self.records.get(id)
    }

    /// Returns the number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the zone holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the full change history.
    pub fn history(&self) -> &[ZoneChange] {
        &self.history
    }

    /// Returns the cursor positioned after the latest change.
    pub fn head(&self) -> ServerCursor {
        encode_cursor(self.next_seq - 1)
    }

    /// Applies one save with optimistic concurrency on the change tag.
    ///
    /// A save carrying no tag creates the record; a save carrying a tag
    /// updates the record only if the tag is the stored one. Submitted
    /// fields are merged into the stored fields.
    pub fn save(&mut self, incoming: &Snapshot) -> RecordOutcome {
        let stored = match (self.records.get(&incoming.record_id), &incoming.change_tag) {
            (None, None) => None,
            (Some(current), Some(tag)) if current.change_tag.as_ref() == Some(tag) => {
                if current.entity_type != incoming.entity_type {
                    return RecordOutcome::Failed(format!(
                        "record {} is a {}, not a {}",
                        incoming.record_id, current.entity_type, incoming.entity_type
                    ));
                }
                Some(current)
            }
            _ => return RecordOutcome::StaleVersion,
        };

        let mut saved = match stored {
            Some(current) => current.overlay(incoming),
            None => incoming.clone(),
        };
        saved.change_tag = Some(format!("v{}", self.next_version));
        self.next_version += 1;

        self.append(RecordRef::new(saved.record_id.clone(), saved.entity_type.clone()), false);
        self.records.insert(saved.record_id.clone(), saved.clone());
        RecordOutcome::Saved(saved)
    }

    /// Deletes a record. Deleting an absent record succeeds without a change.
    pub fn delete(&mut self, id: &RecordId) -> RecordOutcome {
        if let Some(removed) = self.records.remove(id) {
            self.append(RecordRef::new(removed.record_id, removed.entity_type), true);
        }
        RecordOutcome::Deleted
    }

    /// Returns the page of changes after `since`.
    pub fn changes_since(
        &self,
        since: Option<&ServerCursor>,
        limit: usize,
    ) -> ServerResult<ChangesPage> {
        let after = match since {
            Some(cursor) => decode_cursor(cursor)?,
            None => 0,
        };
        let head = self.next_seq - 1;
        if after > head {
            return Err(ServerError::InvalidCursor(format!(
                "position {after} is beyond the zone head {head}"
            )));
        }

        let start = self.history.partition_point(|c| c.seq <= after);
        let page = &self.history[start..];
        let taken = &page[..page.len().min(limit)];

        // each record is reported once, in its latest state within the page
        let mut seen = BTreeSet::new();
        let mut changed = Vec::new();
        let mut deleted = Vec::new();
        for change in taken.iter().rev() {
            if !seen.insert(&change.record.record_id) {
                continue;
            }
            if change.deleted {
                deleted.push(change.record.clone());
            } else {
                changed.push(change.record.clone());
            }
        }
        changed.reverse();
        deleted.reverse();

        let last = taken.last().map_or(after, |c| c.seq);
        Ok(ChangesPage {
            changed,
            deleted,
            more_coming: page.len() > taken.len(),
            cursor: encode_cursor(last),
        })
    }

    /// Returns the requested records that exist, projected to `fields`.
    pub fn fetch(&self, ids: &[RecordId], fields: Option<&BTreeSet<String>>) -> Vec<Snapshot> {
        ids.iter()
            .filter_map(|id| self.records.get(id))
            .map(|record| match fields {
                Some(names) => record.project(names),
                None => record.clone(),
            })
            .collect()
    }

    fn append(&mut self, record: RecordRef, deleted: bool) {
        self.history.push(ZoneChange {
            seq: self.next_seq,
            record,
            deleted,
        });
        self.next_seq += 1;
    }
}

impl Default for ServerZone {
    fn default() -> Self {
        Self::new()
    }
}

/// Encodes a history position as a cursor.
pub fn encode_cursor(seq: u64) -> ServerCursor {
    ServerCursor::from_bytes(seq.to_le_bytes().to_vec())
}

/// Decodes a cursor issued by [`encode_cursor`]. An empty cursor is the start.
pub fn decode_cursor(cursor: &ServerCursor) -> ServerResult<u64> {
    let bytes = cursor.as_bytes();
    if bytes.is_empty() {
        return Ok(0);
    }
    let array: [u8; 8] = bytes.try_into().map_err(|_| {
        ServerError::InvalidCursor(format!("expected 8 bytes, got {}", bytes.len()))
    })?;
    Ok(u64::from_le_bytes(array))
}
