//! Error types for the taskboard backend.
//!
//! One crate-wide taxonomy, translated to HTTP statuses in a single place at
//! the transport boundary:
//! - validation failures (missing/empty required field, malformed identifier) map to 400
//! - missing update/delete targets map to 404
//! - store faults and anything unexpected map to 500, with detail logged but
//!   never sent to the client

use thiserror::Error;

/// Result type alias using the taskboard error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by services, the store adapter, and the bridge.
#[derive(Error, Debug)]
pub enum Error {
    /// A required request field is absent or empty.
    #[error("missing required field: {field}")]
    MissingField {
        /// Name of the missing field (wire name, e.g. `displayName`).
        field: &'static str,
    },

    /// An identifier could not be parsed into the store's native id type.
    #[error("invalid {entity} id: {value}")]
    InvalidId {
        /// The kind of record the id was meant to address.
        entity: &'static str,
        /// The raw identifier as received.
        value: String,
    },

    /// The target of an update or delete does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of record that was looked up.
        entity: &'static str,
        /// The identifier that matched nothing.
        id: String,
    },

    /// The store could not be reached or the operation timed out. Retryable.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The store rejected an operation for a non-connectivity reason.
    #[error("store error: {0}")]
    Store(String),

    /// A document could not be converted to or from its wire shape.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Startup configuration is unusable.
    #[error("configuration error: {0}")]
    Config(String),

    /// Anything else. Detail is for logs only.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// A required field was missing or empty.
    pub fn missing_field(field: &'static str) -> Self {
        Self::MissingField { field }
    }

    /// An identifier failed to parse as the store's native id type.
    pub fn invalid_id(entity: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidId {
            entity,
            value: value.into(),
        }
    }

    /// The addressed record does not exist.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// The store is unreachable or the operation timed out.
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable(message.into())
    }

    /// A non-connectivity store failure.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// An unexpected internal fault.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// True for client errors that map to 400.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::MissingField { .. } | Self::InvalidId { .. })
    }

    /// True for missing-target errors that map to 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True when retrying the same operation later could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_field_is_validation() {
        let err = Error::missing_field("title");
        assert!(err.is_validation());
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("title"));
    }

    #[test]
    fn invalid_id_is_validation_not_not_found() {
        let err = Error::invalid_id("task", "not-an-id");
        assert!(err.is_validation());
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("not-an-id"));
    }

    #[test]
    fn not_found_classification() {
        let err = Error::not_found("task", "6568a1");
        assert!(err.is_not_found());
        assert!(!err.is_validation());
        assert!(!err.is_retryable());
    }

    #[test]
    fn store_unavailable_is_retryable() {
        let err = Error::store_unavailable("server selection timed out");
        assert!(err.is_retryable());
        assert!(!err.is_validation());
    }

    #[test]
    fn serde_error_converts_to_serialization() {
        let bad = serde_json::from_str::<serde_json::Value>("{not json");
        let err: Error = bad.unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
