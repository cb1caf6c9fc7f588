//! Error types for the migration engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for migration operations
#[derive(Error, Debug)]
pub enum MigrationError {
    /// A remote call to the source or target service timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The replica that received the call is not the authoritative primary
    #[error("Replica is not authoritative: {0}")]
    NotAuthoritative(String),

    /// The remote service endpoint could not be resolved
    #[error("Endpoint not found: {0}")]
    EndpointNotFound(String),

    /// Invalid or missing configuration, fatal at startup
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Post-migration data validation failed
    #[error("Data validation failed: {0}")]
    Validation(String),

    /// A storage key matched more than one registered actor identity
    #[error("Ambiguous actor identity for key: {0}")]
    AmbiguousIdentity(String),

    /// Actor calls are rejected while both sides are in their downtime window
    #[error("Actor calls are temporarily disallowed, retry after migration downtime")]
    CallsDisallowed,

    /// The migration run was aborted
    #[error("Migration aborted: {0}")]
    Aborted(String),

    /// State store operation failed
    #[error("Store error: {0}")]
    Store(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Protocol error during message exchange
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid operation for the current migration phase
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Channel closed
    #[error("Channel closed")]
    ChannelClosed,
}

/// Type alias for Result with MigrationError
pub type Result<T> = std::result::Result<T, MigrationError>;

impl MigrationError {
    /// Whether the error is expected to clear on retry with backoff
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MigrationError::Timeout(_)
                | MigrationError::NotAuthoritative(_)
                | MigrationError::EndpointNotFound(_)
                | MigrationError::CallsDisallowed
                | MigrationError::ChannelClosed
        )
    }

    /// Stable numeric code reported in the operator payload
    pub fn error_code(&self) -> u32 {
        match self {
            MigrationError::Timeout(_) => 1,
            MigrationError::NotAuthoritative(_) => 2,
            MigrationError::EndpointNotFound(_) => 3,
            MigrationError::Configuration(_) => 10,
            MigrationError::Validation(_) => 20,
            MigrationError::AmbiguousIdentity(_) => 30,
            MigrationError::CallsDisallowed => 40,
            MigrationError::Aborted(_) => 50,
            MigrationError::Store(_) => 60,
            MigrationError::Serialization(_) => 61,
            MigrationError::Protocol(_) => 62,
            MigrationError::InvalidOperation(_) => 63,
            MigrationError::ChannelClosed => 64,
        }
    }

    /// Short kind label reported in the operator payload
    pub fn kind(&self) -> &'static str {
        match self {
            MigrationError::Timeout(_) => "Timeout",
            MigrationError::NotAuthoritative(_) => "NotAuthoritative",
            MigrationError::EndpointNotFound(_) => "EndpointNotFound",
            MigrationError::Configuration(_) => "Configuration",
            MigrationError::Validation(_) => "Validation",
            MigrationError::AmbiguousIdentity(_) => "AmbiguousIdentity",
            MigrationError::CallsDisallowed => "CallsDisallowed",
            MigrationError::Aborted(_) => "Aborted",
            MigrationError::Store(_) => "Store",
            MigrationError::Serialization(_) => "Serialization",
            MigrationError::Protocol(_) => "Protocol",
            MigrationError::InvalidOperation(_) => "InvalidOperation",
            MigrationError::ChannelClosed => "ChannelClosed",
        }
    }

    /// Whether the error originated in the hosting platform rather than this engine
    pub fn is_platform_error(&self) -> bool {
        matches!(
            self,
            MigrationError::Timeout(_)
                | MigrationError::NotAuthoritative(_)
                | MigrationError::EndpointNotFound(_)
        )
    }
}

impl From<anyhow::Error> for MigrationError {
    fn from(err: anyhow::Error) -> Self {
        MigrationError::Store(err.to_string())
    }
}

impl From<bincode::Error> for MigrationError {
    fn from(err: bincode::Error) -> Self {
        MigrationError::Serialization(err.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for MigrationError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        MigrationError::ChannelClosed
    }
}

/// Flat error record polled by operators alongside the migration status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human readable message
    pub message: String,
    /// Stable numeric error code
    pub error_code: u32,
    /// Error kind label
    pub error_kind: String,
    /// Whether the error originated in the hosting platform
    pub is_platform_error: bool,
}

impl ErrorResponse {
    /// Serialize the response as a JSON payload
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.message.clone())
    }
}

impl From<&MigrationError> for ErrorResponse {
    fn from(err: &MigrationError) -> Self {
        ErrorResponse {
            message: err.to_string(),
            error_code: err.error_code(),
            error_kind: err.kind().to_string(),
            is_platform_error: err.is_platform_error(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(MigrationError::Timeout("t".into()).is_transient());
        assert!(MigrationError::NotAuthoritative("n".into()).is_transient());
        assert!(MigrationError::CallsDisallowed.is_transient());
        assert!(!MigrationError::Validation("v".into()).is_transient());
        assert!(!MigrationError::Configuration("c".into()).is_transient());
        assert!(!MigrationError::AmbiguousIdentity("k".into()).is_transient());
    }

    #[test]
    fn test_error_response_payload() {
        let err = MigrationError::Validation("digest mismatch".into());
        let resp = ErrorResponse::from(&err);
        assert_eq!(resp.error_code, 20);
        assert_eq!(resp.error_kind, "Validation");
        assert!(!resp.is_platform_error);
        assert!(resp.to_json().contains("digest mismatch"));
    }
}
