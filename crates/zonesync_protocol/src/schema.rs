//! Entity schemas.
//!
//! Records cross the store boundary as field maps. A [`SchemaRegistry`]
//! describes which fields each entity type declares and what kind of value
//! each holds, so snapshots can be validated before they reach sync logic.

use crate::error::SchemaError;
use crate::record::{FieldValue, Snapshot};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Local bookkeeping field holding the record's unique ID.
pub const RECORD_ID_FIELD: &str = "__record_id";

/// Local bookkeeping field holding the remote system fields (change tag).
pub const SYSTEM_FIELDS_FIELD: &str = "__system_fields";

/// Returns true for field names reserved for local bookkeeping.
pub fn is_bookkeeping_field(name: &str) -> bool {
    name == RECORD_ID_FIELD || name == SYSTEM_FIELDS_FIELD
}

/// Kind of value a field holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    /// Boolean.
    Bool,
    /// Signed integer.
    Integer,
    /// UTF-8 text.
    Text,
    /// Opaque bytes.
    Bytes,
    /// Milliseconds since epoch.
    Timestamp,
    /// To-one reference to a record of the named entity type.
    Reference {
        /// Target entity type.
        target: String,
    },
}

impl FieldKind {
    /// Returns true if `value` is acceptable for this kind.
    ///
    /// `Null` is accepted for every kind.
    pub fn accepts(&self, value: &FieldValue) -> bool {
        matches!(
            (self, value),
            (_, FieldValue::Null)
                | (FieldKind::Bool, FieldValue::Bool(_))
                | (FieldKind::Integer, FieldValue::Integer(_))
                | (FieldKind::Text, FieldValue::Text(_))
                | (FieldKind::Bytes, FieldValue::Bytes(_))
                | (FieldKind::Timestamp, FieldValue::Timestamp(_))
                | (FieldKind::Reference { .. }, FieldValue::Reference(_))
        )
    }
}

/// Schema of one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchema {
    /// Entity type name.
    pub name: String,
    /// Declared fields.
    pub fields: BTreeMap<String, FieldKind>,
}

impl EntitySchema {
    /// Creates a schema with no fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Declares a field.
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.insert(name.into(), kind);
        self
    }

    /// Declares a to-one reference field.
    pub fn reference(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.field(
            name,
            FieldKind::Reference {
                target: target.into(),
            },
        )
    }

    /// Field names that are exchanged with the remote store.
    pub fn syncable_fields(&self) -> BTreeSet<String> {
        self.fields
            .keys()
            .filter(|name| !is_bookkeeping_field(name))
            .cloned()
            .collect()
    }

    /// Validates a snapshot against this schema.
    pub fn validate(&self, snapshot: &Snapshot) -> Result<(), SchemaError> {
        if snapshot.entity_type != self.name {
            return Err(SchemaError::EntityMismatch {
                expected: self.name.clone(),
                actual: snapshot.entity_type.clone(),
            });
        }

        for (name, value) in &snapshot.fields {
            let kind = self
                .fields
                .get(name)
                .ok_or_else(|| SchemaError::UndeclaredField {
                    entity: self.name.clone(),
                    field: name.clone(),
                })?;
            if !kind.accepts(value) {
                return Err(SchemaError::KindMismatch {
                    entity: self.name.clone(),
                    field: name.clone(),
                    found: value.kind_name(),
                });
            }
        }

        Ok(())
    }
}

/// All entity types managed by a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRegistry {
    entities: BTreeMap<String, EntitySchema>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entity schema, replacing any previous one of that name.
    pub fn register(mut self, schema: EntitySchema) -> Self {
        self.entities.insert(schema.name.clone(), schema);
        self
    }

    /// Looks up an entity schema.
    pub fn get(&self, entity_type: &str) -> Option<&EntitySchema> {
        self.entities.get(entity_type)
    }

    /// Returns true if the entity type is managed.
    pub fn contains(&self, entity_type: &str) -> bool {
        self.entities.contains_key(entity_type)
    }

    /// Iterates over managed entity type names.
    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    /// Validates a snapshot against its entity schema.
    pub fn validate(&self, snapshot: &Snapshot) -> Result<(), SchemaError> {
        self.get(&snapshot.entity_type)
            .ok_or_else(|| SchemaError::UnknownEntity(snapshot.entity_type.clone()))?
            .validate(snapshot)
    }

    /// Union of the syncable fields of the given entity types.
    ///
    /// Unknown types contribute nothing.
    pub fn syncable_fields_for<'a, I>(&self, entity_types: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        entity_types
            .into_iter()
            .filter_map(|name| self.get(name))
            .flat_map(|schema| schema.syncable_fields())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordId;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new()
            .register(
                EntitySchema::new("Folder")
                    .field("name", FieldKind::Text)
                    .field(SYSTEM_FIELDS_FIELD, FieldKind::Bytes),
            )
            .register(
                EntitySchema::new("Note")
                    .field("title", FieldKind::Text)
                    .field("pinned", FieldKind::Bool)
                    .reference("folder", "Folder"),
            )
    }

    #[test]
    fn syncable_fields_exclude_bookkeeping() {
        let registry = registry();
        let fields = registry.get("Folder").unwrap().syncable_fields();
        assert!(fields.contains("name"));
        assert!(!fields.contains(SYSTEM_FIELDS_FIELD));
    }

    #[test]
    fn union_of_fields_across_types() {
        let registry = registry();
        let fields = registry.syncable_fields_for(["Folder", "Note", "Unknown"]);
        let expected: BTreeSet<String> = ["folder", "name", "pinned", "title"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(fields, expected);
    }

    #[test]
    fn validate_accepts_well_typed_snapshot() {
        let snapshot = Snapshot::new("n1", "Note")
            .with_field("title", "hi")
            .with_field("pinned", FieldValue::Null)
            .with_field("folder", FieldValue::Reference(RecordId::new("f1")));
        assert!(registry().validate(&snapshot).is_ok());
    }

    #[test]
    fn validate_rejects_bad_snapshots() {
        let registry = registry();

        let unknown = Snapshot::new("x", "Ghost");
        assert!(matches!(
            registry.validate(&unknown),
            Err(SchemaError::UnknownEntity(_))
        ));

        let undeclared = Snapshot::new("n1", "Note").with_field("color", "red");
        assert!(matches!(
            registry.validate(&undeclared),
            Err(SchemaError::UndeclaredField { .. })
        ));

        let wrong_kind = Snapshot::new("n1", "Note").with_field("pinned", 3i64);
        assert!(matches!(
            registry.validate(&wrong_kind),
            Err(SchemaError::KindMismatch { found: "integer", .. })
        ));
    }
}
