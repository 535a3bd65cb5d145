//! Error types for the reference remote.

use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the reference remote.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    /// The zone does not exist.
    #[error("zone not found: {0}")]
    ZoneNotFound(String),

    /// The cursor was not issued by this server.
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    /// The request is malformed or too large.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The server is temporarily unable to serve the request.
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl ServerError {
    /// Returns true if the caller sent something wrong.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::ZoneNotFound(_)
                | ServerError::InvalidCursor(_)
                | ServerError::InvalidRequest(_)
        )
    }

    /// Returns true if repeating the request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServerError::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::ZoneNotFound("z".into()).is_client_error());
        assert!(!ServerError::ZoneNotFound("z".into()).is_retryable());
        assert!(ServerError::Unavailable("maintenance".into()).is_retryable());
        assert!(!ServerError::Unavailable("maintenance".into()).is_client_error());
    }

    #[test]
    fn error_display() {
        let err = ServerError::InvalidCursor("expected 8 bytes, got 3".into());
        assert_eq!(err.to_string(), "invalid cursor: expected 8 bytes, got 3");
    }
}
