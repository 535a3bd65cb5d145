//! # zonesync protocol
//!
//! Data model shared by the sync engine and remote backing stores.
//!
//! This crate provides:
//! - [`Snapshot`], [`RecordId`] and [`FieldValue`] for record captures
//! - [`SchemaRegistry`] describing which fields each entity type syncs
//! - [`ChangeLedger`] holding pending local mutations with coalescing
//! - [`ConflictPolicy`] and [`ConflictRecord`]
//! - Remote wire types (zones, cursors, push batches, change pages)
//! - CBOR encoding helpers
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_log;
mod codec;
mod conflict;
mod error;
mod messages;
mod record;
mod schema;

pub use change_log::{ChangeLedger, ChangeLogEntry, ChangePage, Mutation, MutationKind};
pub use codec::{from_cbor, seal, to_cbor, unseal, FORMAT_VERSION};
pub use conflict::{ConflictPolicy, ConflictRecord};
pub use error::{ProtocolError, ProtocolResult, SchemaError};
pub use messages::{
    ChangesPage, PushBatch, PushResult, RecordOutcome, RecordRef, ServerCursor, SubscriptionId,
    ZoneId,
};
pub use record::{FieldValue, RecordId, Snapshot};
pub use schema::{
    is_bookkeeping_field, EntitySchema, FieldKind, SchemaRegistry, RECORD_ID_FIELD,
    SYSTEM_FIELDS_FIELD,
};
