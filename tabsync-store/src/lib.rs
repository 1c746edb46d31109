//! Local store for tabsync.
//!
//! Mirrors the remote entities in an embedded SQLite database and holds
//! the durable pending-operation queue. The sync subsystem owns this
//! store exclusively; the UI layer reads snapshots and enqueues
//! mutations through the coordinator, never by touching queue rows.

mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use tabsync_types::{
    Expense, Group, GroupId, Member, OpKind, OpPayload, QueuedOperation, Settlement, Split,
    TypesError,
};
use thiserror::Error;
use uuid::Uuid;

/// Store layer errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be decoded back into an entity.
    #[error("corrupt row in {table}: {reason}")]
    Corrupt {
        /// Table the row came from.
        table: &'static str,
        /// Why decoding failed.
        reason: String,
    },

    /// Payload serialization failed.
    #[error(transparent)]
    Types(#[from] TypesError),
}

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// One row loaded from the durable queue.
///
/// A row whose payload no longer parses is surfaced as `Malformed`
/// instead of failing the whole load, so one corrupt entry never blocks
/// the entries behind it.
#[derive(Debug, Clone)]
pub enum QueueRow {
    /// A well-formed pending operation.
    Valid(QueuedOperation),
    /// A row whose payload failed to parse.
    Malformed {
        /// Queue identifier of the bad row.
        id: i64,
        /// Parse error description.
        error: String,
    },
}

/// Trait for the local ledger store.
///
/// Backends mirror the remote tables, apply optimistic local writes, and
/// persist the pending-operation queue in enqueue order.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // --- mirrored cache ---

    /// Apply a mutation to the local mirror (optimistic write).
    async fn apply_local(&self, kind: OpKind, payload: &OpPayload) -> StoreResult<()>;

    /// Merge a record arriving from the remote service into the mirror,
    /// resolving concurrent edits last-write-wins.
    async fn merge_remote(&self, payload: &OpPayload) -> StoreResult<()>;

    /// Fetch one group.
    async fn group(&self, id: GroupId) -> StoreResult<Option<Group>>;

    /// List all groups.
    async fn groups(&self) -> StoreResult<Vec<Group>>;

    /// List the members of a group.
    async fn members(&self, group: GroupId) -> StoreResult<Vec<Member>>;

    /// List the expenses of a group.
    async fn expenses(&self, group: GroupId) -> StoreResult<Vec<Expense>>;

    /// List the splits of all expenses of a group.
    async fn splits(&self, group: GroupId) -> StoreResult<Vec<Split>>;

    /// List the settlements of a group.
    async fn settlements(&self, group: GroupId) -> StoreResult<Vec<Settlement>>;

    /// Record a settlement idempotently.
    ///
    /// Identical submissions (same group, payer, payee, amount, method)
    /// store exactly one row; returns `false` when the row already
    /// existed.
    async fn record_settlement(&self, settlement: &Settlement) -> StoreResult<bool>;

    /// Delete a group and everything it owns, including queued
    /// operations referencing it or its expenses.
    async fn delete_group(&self, id: GroupId) -> StoreResult<()>;

    // --- durable queue ---

    /// Append an operation; returns its strictly increasing identifier.
    async fn enqueue(&self, kind: OpKind, payload: &OpPayload) -> StoreResult<i64>;

    /// Load all pending operations in ascending identifier order (FIFO).
    async fn load_queue(&self) -> StoreResult<Vec<QueueRow>>;

    /// Remove one queue entry.
    async fn remove_op(&self, id: i64) -> StoreResult<()>;

    /// Remove several queue entries.
    async fn remove_ops(&self, ids: &[i64]) -> StoreResult<()>;

    /// Remove every queued operation targeting or owned by the given
    /// record (foreign-key cascade discard). Returns removed queue ids.
    async fn remove_ops_for_record(&self, record: Uuid) -> StoreResult<Vec<i64>>;

    /// Record a failed attempt; returns the new attempt count.
    async fn record_attempt(&self, id: i64) -> StoreResult<u32>;

    /// Reset the attempt counter of an exhausted operation so the next
    /// drain retries it.
    async fn reset_attempts(&self, id: i64) -> StoreResult<()>;

    /// Number of pending operations.
    async fn pending_count(&self) -> StoreResult<u64>;
}
