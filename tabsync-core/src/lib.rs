//! Pure logic for tabsync - NO I/O, instant tests.
//!
//! This crate holds everything the sync subsystem and the balance
//! screens compute without touching the network or the local store:
//! last-write-wins conflict resolution, pending-queue compaction, retry
//! backoff, per-group balance calculation, debt simplification, and
//! cross-group aggregation. Every function here is deterministic and
//! safe to call concurrently; the I/O lives in tabsync-store and
//! tabsync-client.

mod aggregate;
mod backoff;
mod balance;
mod compact;
mod conflict;
mod settle;

pub use aggregate::{aggregate_across_groups, CrossGroupSummary, GroupLedgerView, GroupShare, PartnerBalance};
pub use backoff::{is_retry_due, retry_delay, MAX_ATTEMPTS};
pub use balance::{compute_balances, round_minor, ZERO_SUM_EPSILON};
pub use compact::compact;
pub use conflict::{resolve_conflict, Versioned};
pub use settle::{simplify_debts, Transfer};
