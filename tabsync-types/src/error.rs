//! Error types for tabsync shared types.

use thiserror::Error;

/// Errors that can occur while parsing or serializing tabsync types.
#[derive(Debug, Error)]
pub enum TypesError {
    /// JSON serialization failed.
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// JSON deserialization failed.
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] serde_json::Error),

    /// Unknown operation kind discriminator.
    #[error("invalid operation kind: {0}")]
    InvalidOpKind(String),

    /// Unknown table name.
    #[error("invalid table: {0}")]
    InvalidTable(String),

    /// Malformed identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] uuid::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = TypesError::InvalidTable("receipts".to_string());
        assert_eq!(err.to_string(), "invalid table: receipts");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TypesError>();
    }
}
