//! Record identities, typed field values and snapshots.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Stable identity of a logical record.
///
/// The same `RecordId` names a record in the local store and in the remote
/// zone, so it is the join key for pushes, pulls and conflict resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(String);

impl RecordId {
    /// Creates a record ID from its unique string.
    pub fn new(unique_id: impl Into<String>) -> Self {
        Self(unique_id.into())
    }

    /// Returns the unique string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A typed field value.
///
/// Floats are intentionally not supported so that snapshots compare and
/// encode deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Explicit absence of a value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// UTF-8 text.
    Text(String),
    /// Opaque bytes.
    Bytes(Vec<u8>),
    /// Milliseconds since the Unix epoch.
    Timestamp(u64),
    /// Reference to another record by identity.
    Reference(RecordId),
}

impl FieldValue {
    /// Returns the referenced record, if this is a reference.
    pub fn as_reference(&self) -> Option<&RecordId> {
        match self {
            FieldValue::Reference(id) => Some(id),
            _ => None,
        }
    }

    /// Returns the text, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer, if this is an integer value.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Short name of the value's kind, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Bool(_) => "bool",
            FieldValue::Integer(_) => "integer",
            FieldValue::Text(_) => "text",
            FieldValue::Bytes(_) => "bytes",
            FieldValue::Timestamp(_) => "timestamp",
            FieldValue::Reference(_) => "reference",
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

/// A full or partial capture of one record's fields at a point in time.
///
/// # Fields
///
/// - `record_id`: identity shared by local and remote
/// - `entity_type`: schema name of the record
/// - `fields`: captured field values (may be a subset of the schema)
/// - `modified_at`: modification time in milliseconds
/// - `change_tag`: remote version token, `None` if never saved remotely
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Record identity.
    pub record_id: RecordId,
    /// Entity type name.
    pub entity_type: String,
    /// Field values by name.
    pub fields: BTreeMap<String, FieldValue>,
    /// Modification time (milliseconds since epoch).
    pub modified_at: u64,
    /// Remote version token.
    pub change_tag: Option<String>,
}

impl Snapshot {
    /// Creates an empty snapshot.
    pub fn new(record_id: impl Into<RecordId>, entity_type: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            entity_type: entity_type.into(),
            fields: BTreeMap::new(),
            modified_at: 0,
            change_tag: None,
        }
    }

    /// Sets a field value.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Sets the modification time.
    pub fn with_modified_at(mut self, modified_at: u64) -> Self {
        self.modified_at = modified_at;
        self
    }

    /// Sets the remote change tag.
    pub fn with_change_tag(mut self, tag: impl Into<String>) -> Self {
        self.change_tag = Some(tag.into());
        self
    }

    /// Returns a field value.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Iterates over every record this snapshot references.
    pub fn references(&self) -> impl Iterator<Item = (&str, &RecordId)> {
        self.fields
            .iter()
            .filter_map(|(name, value)| value.as_reference().map(|id| (name.as_str(), id)))
    }

    /// Returns a copy restricted to the given field names.
    ///
    /// Names that the snapshot does not carry are skipped.
    pub fn project<'a, I>(&self, names: I) -> Self
    where
        I: IntoIterator<Item = &'a String>,
    {
        let fields = names
            .into_iter()
            .filter_map(|name| self.fields.get(name).map(|v| (name.clone(), v.clone())))
            .collect();
        Self {
            record_id: self.record_id.clone(),
            entity_type: self.entity_type.clone(),
            fields,
            modified_at: self.modified_at,
            change_tag: self.change_tag.clone(),
        }
    }

    /// Lays `other`'s fields over this snapshot's fields.
    ///
    /// Identity, type and change tag stay those of `self`; the modification
    /// time becomes the later of the two.
    pub fn overlay(&self, other: &Snapshot) -> Self {
        let mut merged = self.clone();
        for (name, value) in &other.fields {
            merged.fields.insert(name.clone(), value.clone());
        }
        merged.modified_at = self.modified_at.max(other.modified_at);
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_lists_only_reference_fields() {
        let snapshot = Snapshot::new("n1", "Note")
            .with_field("title", "hello")
            .with_field("folder", FieldValue::Reference(RecordId::new("f1")));

        let refs: Vec<_> = snapshot.references().collect();
        assert_eq!(refs, vec![("folder", &RecordId::new("f1"))]);
    }

    #[test]
    fn project_keeps_requested_fields() {
        let snapshot = Snapshot::new("n1", "Note")
            .with_field("title", "hello")
            .with_field("body", "text")
            .with_change_tag("v3");

        let names = vec!["title".to_string(), "missing".to_string()];
        let projected = snapshot.project(&names);

        assert_eq!(projected.fields.len(), 1);
        assert_eq!(projected.get("title"), Some(&FieldValue::from("hello")));
        assert_eq!(projected.change_tag.as_deref(), Some("v3"));
    }

    #[test]
    fn overlay_prefers_other_fields_and_keeps_own_tag() {
        let server = Snapshot::new("a", "Stop")
            .with_field("name", "old")
            .with_field("status", "closed")
            .with_modified_at(20)
            .with_change_tag("v7");
        let client = Snapshot::new("a", "Stop")
            .with_field("name", "new")
            .with_modified_at(10);

        let merged = server.overlay(&client);
        assert_eq!(merged.get("name"), Some(&FieldValue::from("new")));
        assert_eq!(merged.get("status"), Some(&FieldValue::from("closed")));
        assert_eq!(merged.change_tag.as_deref(), Some("v7"));
        assert_eq!(merged.modified_at, 20);
    }
}
