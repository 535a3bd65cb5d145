//! Types exchanged with the remote backing store.

use crate::record::{RecordId, Snapshot};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of a remote record zone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ZoneId(String);

impl ZoneId {
    /// Creates a zone ID.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the zone name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a change subscription on a zone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    /// Derives the subscription ID for a zone.
    pub fn for_zone(zone: &ZoneId) -> Self {
        Self(format!("{}-subscription", zone.as_str()))
    }

    /// Returns the subscription ID string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque position in a zone's change history.
///
/// Only the remote interprets the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerCursor(Vec<u8>);

impl ServerCursor {
    /// Wraps raw cursor bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Returns the raw cursor bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Hex rendering for logs and tooling.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Identity and type of a record, without its fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordRef {
    /// Record identity.
    pub record_id: RecordId,
    /// Entity type name.
    pub entity_type: String,
}

impl RecordRef {
    /// Creates a record reference.
    pub fn new(record_id: impl Into<RecordId>, entity_type: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            entity_type: entity_type.into(),
        }
    }
}

/// Saves and deletes submitted in one remote call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushBatch {
    /// Records to save. A `None` change tag means "create".
    pub saves: Vec<Snapshot>,
    /// Records to delete.
    pub deletes: Vec<RecordId>,
}

impl PushBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if there is nothing to push.
    pub fn is_empty(&self) -> bool {
        self.saves.is_empty() && self.deletes.is_empty()
    }

    /// Number of records touched by the batch.
    pub fn len(&self) -> usize {
        self.saves.len() + self.deletes.len()
    }
}

/// Per-record result of a push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordOutcome {
    /// Saved; carries the stored record with its new change tag.
    Saved(Snapshot),
    /// Deleted (or already absent).
    Deleted,
    /// Refused because the submitted change tag is out of date.
    StaleVersion,
    /// Refused for another reason.
    Failed(String),
}

/// Result of a push, one outcome per submitted record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResult {
    /// Outcomes in submission order (saves first, then deletes).
    pub outcomes: Vec<(RecordId, RecordOutcome)>,
}

impl PushResult {
    /// Iterates over the records refused with a stale version.
    pub fn stale(&self) -> impl Iterator<Item = &RecordId> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, RecordOutcome::StaleVersion))
            .map(|(id, _)| id)
    }

    /// Iterates over the records that failed outright, with the reason.
    pub fn failed(&self) -> impl Iterator<Item = (&RecordId, &str)> {
        self.outcomes.iter().filter_map(|(id, o)| match o {
            RecordOutcome::Failed(reason) => Some((id, reason.as_str())),
            _ => None,
        })
    }

    /// Iterates over the stored snapshots of saved records.
    pub fn saved(&self) -> impl Iterator<Item = &Snapshot> {
        self.outcomes.iter().filter_map(|(_, o)| match o {
            RecordOutcome::Saved(snapshot) => Some(snapshot),
            _ => None,
        })
    }
}

/// One page of a zone's change feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesPage {
    /// Records changed since the requested cursor.
    pub changed: Vec<RecordRef>,
    /// Records deleted since the requested cursor.
    pub deleted: Vec<RecordRef>,
    /// Whether another page follows.
    pub more_coming: bool,
    /// Cursor positioned after this page.
    pub cursor: ServerCursor,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_id_is_derived_from_zone() {
        let zone = ZoneId::new("Routes");
        assert_eq!(SubscriptionId::for_zone(&zone).as_str(), "Routes-subscription");
    }

    #[test]
    fn cursor_hex() {
        let cursor = ServerCursor::from_bytes(vec![0x00, 0x1f, 0xa0]);
        assert_eq!(cursor.to_hex(), "001fa0");
    }

    #[test]
    fn push_result_partitions_outcomes() {
        let result = PushResult {
            outcomes: vec![
                (
                    RecordId::new("a"),
                    RecordOutcome::Saved(Snapshot::new("a", "Stop").with_change_tag("v2")),
                ),
                (RecordId::new("b"), RecordOutcome::StaleVersion),
                (RecordId::new("c"), RecordOutcome::Failed("quota".into())),
                (RecordId::new("d"), RecordOutcome::Deleted),
            ],
        };

        assert_eq!(result.stale().collect::<Vec<_>>(), vec![&RecordId::new("b")]);
        assert_eq!(
            result.failed().collect::<Vec<_>>(),
            vec![(&RecordId::new("c"), "quota")]
        );
        assert_eq!(result.saved().count(), 1);
    }

    #[test]
    fn empty_batch() {
        let mut batch = PushBatch::new();
        assert!(batch.is_empty());
        batch.deletes.push(RecordId::new("x"));
        assert_eq!(batch.len(), 1);
    }
}
