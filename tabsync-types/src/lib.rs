//! Shared types for tabsync.
//!
//! This crate defines the entities mirrored from the remote data service
//! (groups, members, expenses, splits, settlements), the typed payload
//! union carried by the pending-operation queue, and the process-wide
//! sync status. Everything here is plain data with serde support; no I/O.

mod entities;
mod error;
mod ids;
mod ops;
mod status;

pub use entities::{Expense, Group, Member, SettleMethod, Settlement, Split};
pub use error::TypesError;
pub use ids::{ExpenseId, GroupId, MemberId, SettlementId, SplitId};
pub use ops::{OpKind, OpPayload, QueuedOperation, TableKind};
pub use status::SyncStatus;
