//! Process-wide sync status.

use serde::{Deserialize, Serialize};

/// Lifecycle state of the sync subsystem.
///
/// `Offline` whenever reachability is false, `Syncing` while a drain is
/// running, `Error` if the most recent drain left failures, `Idle`
/// otherwise. Transitions are broadcast to subscribers via a watch
/// channel owned by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Queue is empty or fully applied, network reachable.
    #[default]
    Idle,
    /// A drain is in progress.
    Syncing,
    /// The most recent drain left failed operations.
    Error,
    /// No network reachability; nothing is attempted.
    Offline,
}

impl SyncStatus {
    /// Check whether work can currently be attempted.
    pub fn is_online(&self) -> bool {
        !matches!(self, SyncStatus::Offline)
    }

    /// Check whether a drain is currently running.
    pub fn is_syncing(&self) -> bool {
        matches!(self, SyncStatus::Syncing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_idle() {
        assert_eq!(SyncStatus::default(), SyncStatus::Idle);
    }

    #[test]
    fn online_helpers() {
        assert!(SyncStatus::Idle.is_online());
        assert!(SyncStatus::Syncing.is_online());
        assert!(SyncStatus::Error.is_online());
        assert!(!SyncStatus::Offline.is_online());
        assert!(SyncStatus::Syncing.is_syncing());
        assert!(!SyncStatus::Idle.is_syncing());
    }

    #[test]
    fn serde_tags_are_snake_case() {
        let json = serde_json::to_string(&SyncStatus::Offline).unwrap();
        assert_eq!(json, "\"offline\"");
    }
}
