//! Last-write-wins conflict resolution.
//!
//! Two eventually-consistent copies of the same logical record are merged
//! by update timestamp, with ties and missing timestamps resolved toward
//! the remote copy. Repeated pairwise application over any arrival order
//! of N versions converges to the single version with the maximum
//! timestamp, which is what makes the scheme safe without a central
//! sequencer.

use chrono::{DateTime, Utc};
use tabsync_types::{Expense, Group, Member, Settlement, Split};

/// A record carrying an optional update timestamp.
pub trait Versioned {
    /// Time of the last modification, if known.
    fn updated_at(&self) -> Option<DateTime<Utc>>;
}

impl Versioned for Group {
    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}

impl Versioned for Member {
    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}

impl Versioned for Expense {
    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}

// Splits and settlements are immutable once created; with no update
// timestamp the remote copy always wins.
impl Versioned for Split {
    fn updated_at(&self) -> Option<DateTime<Utc>> {
        None
    }
}

impl Versioned for Settlement {
    fn updated_at(&self) -> Option<DateTime<Utc>> {
        None
    }
}

/// Merge two versions of the same logical record.
///
/// Rules, in order:
/// 1. Neither has a timestamp: remote wins.
/// 2. Exactly one has a timestamp: that one wins.
/// 3. Both have timestamps: remote wins on tie or when remote is newer;
///    local wins only when strictly newer.
pub fn resolve_conflict<T: Versioned>(local: T, remote: T) -> T {
    match (local.updated_at(), remote.updated_at()) {
        (None, None) => remote,
        (None, Some(_)) => remote,
        (Some(_), None) => local,
        (Some(l), Some(r)) => {
            if l > r {
                local
            } else {
                remote
            }
        }
    }
}
