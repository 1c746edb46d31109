//! tabsync-client - offline-first sync for the tabsync ledger.
//!
//! Wires the local store, the remote data service, and the connectivity
//! signal into a [`SyncCoordinator`]: mutations apply locally first and
//! reach the remote directly when reachable, or through the durable
//! pending queue otherwise. The queue drains on reconnect, on a fixed
//! interval, and on foreground resume, with bounded per-operation
//! retries and structured handling of remote constraint failures.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tabsync_client::{NullConnectivity, MockRemote, SyncConfig, SyncCoordinator};
//! use tabsync_store::SqliteStore;
//!
//! # async fn start() -> Result<(), tabsync_client::SyncError> {
//! let store = SqliteStore::open("ledger.db").await?;
//! let coordinator = Arc::new(SyncCoordinator::new(
//!     store,
//!     MockRemote::new(),
//!     NullConnectivity::new(),
//!     SyncConfig::default(),
//! ));
//! tokio::spawn(Arc::clone(&coordinator).run());
//! # Ok(())
//! # }
//! ```

mod coordinator;
mod network;
mod remote;

pub use coordinator::{
    DrainOutcome, DrainReport, SubmitOutcome, SyncConfig, SyncCoordinator, SyncError,
};
pub use network::{Connectivity, NetworkMonitor, NullConnectivity, StaticConnectivity};
pub use remote::{MockRemote, RemoteError, RemoteService};
