//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for codec operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding or decoding protocol values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Failed to encode a value to CBOR.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode CBOR bytes.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// Persisted data has an unexpected header or version.
    #[error("invalid format: {0}")]
    InvalidFormat(String),
}

impl ProtocolError {
    /// Creates an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Creates a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }
}

/// Errors raised when a snapshot does not match its schema.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// The entity type is not managed.
    #[error("unknown entity type: {0}")]
    UnknownEntity(String),

    /// A schema was asked to validate a snapshot of another type.
    #[error("entity mismatch: expected {expected}, got {actual}")]
    EntityMismatch {
        /// Schema's entity type.
        expected: String,
        /// Snapshot's entity type.
        actual: String,
    },

    /// The snapshot carries a field the schema does not declare.
    #[error("field {field} is not declared on {entity}")]
    UndeclaredField {
        /// Entity type.
        entity: String,
        /// Field name.
        field: String,
    },

    /// The value's kind does not match the declared kind.
    #[error("field {field} on {entity} cannot hold a value of kind {found}")]
    KindMismatch {
        /// Entity type.
        entity: String,
        /// Field name.
        field: String,
        /// Kind of the offending value.
        found: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = SchemaError::KindMismatch {
            entity: "Note".into(),
            field: "pinned".into(),
            found: "integer",
        };
        assert_eq!(err.to_string(), "field pinned on Note cannot hold a value of kind integer");

        let err = ProtocolError::decoding_failed("truncated");
        assert!(err.to_string().contains("truncated"));
    }
}
