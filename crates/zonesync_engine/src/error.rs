//! Error types for the sync engine.

use std::io;
use thiserror::Error;
use zonesync_protocol::{ConflictRecord, ProtocolError, RecordId, SchemaError};

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors raised by the durable change log.
#[derive(Error, Debug)]
pub enum ChangeLogError {
    /// I/O error on the backing file.
    #[error("change log I/O error: {0}")]
    Io(#[from] io::Error),

    /// Another process holds the change log.
    #[error("change log is locked by another process: {path}")]
    Locked {
        /// Path of the locked file.
        path: String,
    },

    /// The backing file could not be encoded or decoded.
    #[error("change log format error: {0}")]
    Format(#[from] ProtocolError),
}

/// Errors raised by cursor stores.
#[derive(Error, Debug)]
pub enum CursorError {
    /// I/O error on the backing file.
    #[error("cursor I/O error: {0}")]
    Io(#[from] io::Error),

    /// Another process holds the cursor file.
    #[error("cursor file is locked by another process: {path}")]
    Locked {
        /// Path of the locked file.
        path: String,
    },

    /// The backing file could not be encoded or decoded.
    #[error("cursor format error: {0}")]
    Format(#[from] ProtocolError),
}

/// Errors raised by the local object store.
#[derive(Error, Debug)]
pub enum LocalStoreError {
    /// A reference points at a record that is not stored locally yet.
    #[error("record {record} references missing record {target} via {field}")]
    MissingReference {
        /// Record being written.
        record: RecordId,
        /// Reference field.
        field: String,
        /// Missing target record.
        target: RecordId,
    },

    /// The record does not exist.
    #[error("record not found: {0}")]
    NotFound(RecordId),

    /// The snapshot does not match its schema.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Recording a caller edit failed.
    #[error("{0}")]
    ChangeLog(#[from] ChangeLogError),

    /// Backend-specific failure.
    #[error("local store error: {0}")]
    Backend(String),
}

/// Errors that can occur during a sync pass.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Reading pending local changes failed.
    #[error("failed to fetch local changes: {source}")]
    LocalChangesFetch {
        /// Underlying store error.
        #[source]
        source: LocalStoreError,
    },

    /// The remote refused records with stale change tags.
    ///
    /// Raised inside a pass and consumed by conflict resolution.
    #[error("{} conflicting records detected", .0.len())]
    ConflictsDetected(Vec<ConflictRecord>),

    /// Records still conflicted after resolution was pushed.
    #[error("conflicts remain after resolution for {} records", .0.len())]
    UnresolvedConflicts(Vec<RecordId>),

    /// Pulled records whose references never became resolvable.
    #[error("{} records reference missing records", .0.len())]
    MissingReferences(Vec<RecordId>),

    /// The remote zone could not be created.
    #[error("failed to create zone {zone}: {message}")]
    ZoneCreationFailed {
        /// Zone name.
        zone: String,
        /// Remote error message.
        message: String,
    },

    /// The zone subscription could not be created.
    #[error("failed to create subscription {subscription}: {message}")]
    ZoneSubscriptionCreationFailed {
        /// Subscription ID.
        subscription: String,
        /// Remote error message.
        message: String,
    },

    /// A remote batch call failed as a whole.
    #[error("remote error: {message}")]
    RemoteBatch {
        /// Error message.
        message: String,
        /// Whether the pass can be retried.
        retryable: bool,
    },

    /// A remote call exceeded the configured timeout.
    #[error("operation timed out")]
    Timeout,

    /// Local store error while applying changes.
    #[error("local store error: {0}")]
    LocalStore(#[from] LocalStoreError),

    /// Change log error.
    #[error("{0}")]
    ChangeLog(#[from] ChangeLogError),

    /// Cursor store error.
    #[error("{0}")]
    Cursor(#[from] CursorError),

    /// Encoding error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Another pass is already running.
    #[error("a sync pass is already in progress")]
    PassInProgress,

    /// Anything else.
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl SyncError {
    /// Creates a retryable remote batch error.
    pub fn remote_retryable(message: impl Into<String>) -> Self {
        Self::RemoteBatch {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable remote batch error.
    pub fn remote_fatal(message: impl Into<String>) -> Self {
        Self::RemoteBatch {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if the pass can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::RemoteBatch { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            _ => false,
        }
    }
}
