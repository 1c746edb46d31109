//! Remote data service abstraction.
//!
//! The remote is a table-like CRUD collection keyed by record
//! identifier. Implementations translate into whatever transport the
//! deployment uses; tests use [`MockRemote`].
//!
//! Errors are structured so the sync processor can apply its
//! per-operation policy: unique-constraint conflicts convert an insert
//! into an update, foreign-key violations trigger the cascade discard,
//! and "not found" on delete already is the desired end state.

mod mock;

pub use mock::MockRemote;

use async_trait::async_trait;
use tabsync_types::TableKind;
use thiserror::Error;
use uuid::Uuid;

/// Structured errors returned by the remote data service.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RemoteError {
    /// Unique-constraint violation (duplicate key).
    #[error("duplicate key")]
    UniqueViolation,

    /// Check-constraint violation.
    #[error("check constraint violated: {0}")]
    CheckViolation(String),

    /// Foreign-key violation: the referenced parent record is gone.
    #[error("foreign key violation: parent {parent_id} missing")]
    ForeignKeyViolation {
        /// Identifier of the missing parent record.
        parent_id: Uuid,
    },

    /// The targeted record does not exist.
    #[error("record not found")]
    NotFound,

    /// The service could not be reached or answered with a transient
    /// failure; the operation should be retried.
    #[error("remote unavailable: {0}")]
    Unavailable(String),
}

impl RemoteError {
    /// Check whether this error is transient (worth retrying).
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_))
    }
}

/// Trait for the remote data service.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Create a record. The JSON value carries the full record including
    /// its `id`.
    async fn insert(&self, table: TableKind, record: serde_json::Value)
        -> Result<(), RemoteError>;

    /// Partially update the record with the given identifier. The patch
    /// carries no `id` field; the identifier travels in the request key.
    async fn update(
        &self,
        table: TableKind,
        id: Uuid,
        patch: serde_json::Value,
    ) -> Result<(), RemoteError>;

    /// Delete the record with the given identifier.
    async fn delete(&self, table: TableKind, id: Uuid) -> Result<(), RemoteError>;
}
