//! SyncCoordinator - the main interface of the sync subsystem.
//!
//! Owns the sync status channel, the single-flight drain flag, and the
//! debounce window. UI code submits mutations and reads snapshots; the
//! coordinator decides whether a mutation goes straight to the remote
//! service or into the durable queue, and drains the queue on
//! reconnect, on a fixed interval, and on foreground resume.
//!
//! ```text
//! UI mutation → local store (optimistic) → queue (offline/failure)
//!                                        ↘ drain → remote service
//! remote refresh → local store → balances → settlement suggestions
//! ```

use crate::network::{Connectivity, NetworkMonitor};
use crate::remote::{RemoteError, RemoteService};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tabsync_core::{
    aggregate_across_groups, compact, compute_balances, is_retry_due, simplify_debts,
    CrossGroupSummary, GroupLedgerView, Transfer, MAX_ATTEMPTS,
};
use tabsync_store::{LedgerStore, QueueRow, StoreError};
use tabsync_types::{GroupId, MemberId, OpKind, OpPayload, Settlement, SyncStatus, TypesError};
use thiserror::Error;
use tokio::sync::{watch, Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Sync subsystem errors.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Local store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Structured remote failure surfaced to the caller.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Payload serialization error.
    #[error(transparent)]
    Types(#[from] TypesError),
}

/// Configuration for the sync coordinator.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Background drain interval.
    pub drain_interval: Duration,
    /// Minimum spacing between drains triggered by distinct signals.
    pub debounce: Duration,
    /// Failed attempts after which an operation is surfaced instead of
    /// retried.
    pub max_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            drain_interval: Duration::from_secs(30),
            debounce: Duration::from_secs(1),
            max_attempts: MAX_ATTEMPTS,
        }
    }
}

impl SyncConfig {
    /// Set the background drain interval.
    pub fn with_drain_interval(mut self, interval: Duration) -> Self {
        self.drain_interval = interval;
        self
    }

    /// Set the trigger debounce window.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Set the bounded retry count.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// Counts from one completed drain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    /// Operations applied remotely and removed from the queue.
    pub synced: usize,
    /// Operations that failed transiently and stay queued.
    pub failed: usize,
    /// Operations permanently discarded (compaction, malformed rows,
    /// constraint violations, foreign-key cascades).
    pub discarded: usize,
    /// Queue ids that exhausted their retry budget and need manual
    /// attention.
    pub exhausted: Vec<i64>,
}

/// Result of a drain request.
#[derive(Debug, Clone, PartialEq)]
pub enum DrainOutcome {
    /// A full pass over the queue ran.
    Completed(DrainReport),
    /// No reachability; nothing was attempted.
    Offline,
    /// Another drain was already running; this request was a no-op.
    AlreadyRunning,
}

/// Result of submitting a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Applied remotely right away.
    Applied,
    /// Written locally and queued for a later drain.
    Queued,
}

/// Per-operation outcome of one remote attempt.
enum Verdict {
    Applied,
    Transient(RemoteError),
    Discard(RemoteError),
    Cascade(Uuid),
}

/// The sync coordinator.
///
/// Constructed once per process; all consumers share it by reference.
pub struct SyncCoordinator<S, R, C> {
    store: S,
    remote: R,
    connectivity: C,
    config: SyncConfig,
    status_tx: watch::Sender<SyncStatus>,
    drain_lock: Mutex<()>,
    last_trigger: std::sync::Mutex<Option<Instant>>,
    foreground: Notify,
}

impl<S, R, C> SyncCoordinator<S, R, C>
where
    S: LedgerStore,
    R: RemoteService,
    C: Connectivity,
{
    /// Create a new coordinator.
    pub fn new(store: S, remote: R, connectivity: C, config: SyncConfig) -> Self {
        let initial = if connectivity.is_reachable() {
            SyncStatus::Idle
        } else {
            SyncStatus::Offline
        };
        let (status_tx, _rx) = watch::channel(initial);
        Self {
            store,
            remote,
            connectivity,
            config,
            status_tx,
            drain_lock: Mutex::new(()),
            last_trigger: std::sync::Mutex::new(None),
            foreground: Notify::new(),
        }
    }

    /// Read-only access to the local store for snapshot reads.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Subscribe to sync status transitions.
    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    /// Current sync status.
    pub fn current_status(&self) -> SyncStatus {
        *self.status_tx.borrow()
    }

    /// Number of queued operations, for status indicators.
    pub async fn pending_count(&self) -> Result<u64, SyncError> {
        Ok(self.store.pending_count().await?)
    }

    /// Wake the coordinator because the application returned to the
    /// foreground.
    pub fn notify_foregrounded(&self) {
        self.foreground.notify_one();
    }

    fn set_status(&self, status: SyncStatus) {
        let previous = self.status_tx.send_replace(status);
        if previous != status {
            debug!(?previous, ?status, "sync status changed");
        }
    }

    /// Submit a mutation: optimistic local write, then either a direct
    /// remote attempt or the durable queue.
    ///
    /// Structural remote failures (constraint violations, missing
    /// parents) are returned to the caller; transient ones queue the
    /// operation for the next drain.
    pub async fn submit(&self, kind: OpKind, payload: OpPayload) -> Result<SubmitOutcome, SyncError> {
        self.store.apply_local(kind, &payload).await?;

        if !self.connectivity.is_reachable() {
            self.store.enqueue(kind, &payload).await?;
            self.set_status(SyncStatus::Offline);
            return Ok(SubmitOutcome::Queued);
        }

        match self.apply_remote(kind, &payload).await? {
            Verdict::Applied => Ok(SubmitOutcome::Applied),
            Verdict::Transient(error) => {
                debug!(%error, table = %payload.table(), "remote attempt failed, queueing");
                self.store.enqueue(kind, &payload).await?;
                Ok(SubmitOutcome::Queued)
            }
            Verdict::Discard(error) => Err(SyncError::Remote(error)),
            Verdict::Cascade(parent_id) => {
                Err(SyncError::Remote(RemoteError::ForeignKeyViolation { parent_id }))
            }
        }
    }

    /// Record a settlement idempotently and sync it.
    ///
    /// Returns `false` when an identical settlement already existed; no
    /// duplicate is stored or submitted.
    pub async fn submit_settlement(&self, settlement: Settlement) -> Result<bool, SyncError> {
        if !self.store.record_settlement(&settlement).await? {
            return Ok(false);
        }
        let payload = OpPayload::Settlements(settlement);
        if !self.connectivity.is_reachable() {
            self.store.enqueue(OpKind::Insert, &payload).await?;
            self.set_status(SyncStatus::Offline);
            return Ok(true);
        }
        match self.apply_remote(OpKind::Insert, &payload).await? {
            Verdict::Applied => Ok(true),
            Verdict::Transient(error) => {
                debug!(%error, "settlement submission failed, queueing");
                self.store.enqueue(OpKind::Insert, &payload).await?;
                Ok(true)
            }
            Verdict::Discard(error) => Err(SyncError::Remote(error)),
            Verdict::Cascade(parent_id) => {
                Err(SyncError::Remote(RemoteError::ForeignKeyViolation { parent_id }))
            }
        }
    }

    /// Request a drain, respecting the debounce window.
    ///
    /// Returns `true` when a drain actually ran.
    pub async fn request_drain(&self) -> bool {
        if !self.debounce_elapsed() {
            debug!("drain request debounced");
            return false;
        }
        match self.drain().await {
            Ok(DrainOutcome::Completed(report)) => {
                info!(
                    synced = report.synced,
                    failed = report.failed,
                    discarded = report.discarded,
                    "drain finished"
                );
                true
            }
            Ok(DrainOutcome::Offline) => true,
            Ok(DrainOutcome::AlreadyRunning) => false,
            Err(error) => {
                warn!(%error, "drain failed");
                true
            }
        }
    }

    fn debounce_elapsed(&self) -> bool {
        let mut last = match self.last_trigger.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        match *last {
            Some(t) if now.duration_since(t) < self.config.debounce => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    /// One full pass over the queue.
    ///
    /// Only one drain runs at a time; concurrent calls return
    /// [`DrainOutcome::AlreadyRunning`] without touching the queue.
    pub async fn drain(&self) -> Result<DrainOutcome, SyncError> {
        let Ok(_guard) = self.drain_lock.try_lock() else {
            return Ok(DrainOutcome::AlreadyRunning);
        };

        if !self.connectivity.is_reachable() {
            self.set_status(SyncStatus::Offline);
            return Ok(DrainOutcome::Offline);
        }
        self.set_status(SyncStatus::Syncing);

        let mut report = DrainReport::default();
        let mut ops = Vec::new();
        for row in self.store.load_queue().await? {
            match row {
                QueueRow::Valid(op) => ops.push(op),
                QueueRow::Malformed { id, error } => {
                    warn!(queue_id = id, %error, "discarding malformed queue entry");
                    self.store.remove_op(id).await?;
                    report.discarded += 1;
                }
            }
        }

        // Insert..delete chains never need to reach the remote.
        let (ops, compacted) = compact(ops);
        if !compacted.is_empty() {
            debug!(count = compacted.len(), "compacted away insert..delete chains");
            self.store.remove_ops(&compacted).await?;
            report.discarded += compacted.len();
        }

        // Queue ids already removed by an earlier cascade in this pass.
        let mut cascaded: HashSet<i64> = HashSet::new();
        let now = Utc::now();
        for op in ops {
            if cascaded.contains(&op.id) {
                continue;
            }

            if op.attempts >= self.config.max_attempts {
                report.exhausted.push(op.id);
                continue;
            }
            if !is_retry_due(op.attempts, op.last_attempt_at, now) {
                continue;
            }

            match self.apply_remote(op.kind, &op.payload).await? {
                Verdict::Applied => {
                    self.store.remove_op(op.id).await?;
                    report.synced += 1;
                }
                Verdict::Transient(error) => {
                    let attempts = self.store.record_attempt(op.id).await?;
                    report.failed += 1;
                    if attempts >= self.config.max_attempts {
                        warn!(queue_id = op.id, attempts, %error, "operation exhausted its retries");
                        report.exhausted.push(op.id);
                    } else {
                        debug!(queue_id = op.id, attempts, %error, "transient failure, will retry");
                    }
                }
                Verdict::Discard(error) => {
                    warn!(queue_id = op.id, %error, "discarding operation");
                    self.store.remove_op(op.id).await?;
                    report.discarded += 1;
                }
                Verdict::Cascade(parent_id) => {
                    warn!(
                        queue_id = op.id,
                        %parent_id,
                        "parent deleted remotely, discarding operation and dependents"
                    );
                    self.store.remove_op(op.id).await?;
                    report.discarded += 1;
                    let removed = self.store.remove_ops_for_record(parent_id).await?;
                    report.discarded += removed.len();
                    cascaded.extend(removed);
                }
            }
        }

        // Reachability may have dropped while remote calls were in
        // flight; offline always wins over the drain result.
        self.set_status(if !self.connectivity.is_reachable() {
            SyncStatus::Offline
        } else if report.failed > 0 {
            SyncStatus::Error
        } else {
            SyncStatus::Idle
        });
        Ok(DrainOutcome::Completed(report))
    }

    async fn apply_remote(&self, kind: OpKind, payload: &OpPayload) -> Result<Verdict, SyncError> {
        let table = payload.table();
        let id = payload.record_id();
        let verdict = match kind {
            OpKind::Insert => match self.remote.insert(table, payload.to_record_json()?).await {
                Ok(()) => Verdict::Applied,
                // Already created (e.g. by an earlier half-applied drain):
                // converge by updating the same record instead.
                Err(RemoteError::UniqueViolation) => {
                    debug!(%table, %id, "duplicate key on insert, converting to update");
                    match self.remote.update(table, id, payload.to_patch_json()?).await {
                        Ok(()) => Verdict::Applied,
                        Err(error) => classify(error),
                    }
                }
                Err(error) => classify(error),
            },
            OpKind::Update => match self.remote.update(table, id, payload.to_patch_json()?).await {
                Ok(()) => Verdict::Applied,
                // Deleted remotely; the deletion wins.
                Err(RemoteError::NotFound) => Verdict::Discard(RemoteError::NotFound),
                Err(error) => classify(error),
            },
            OpKind::Delete => match self.remote.delete(table, id).await {
                // Absence is the desired end state.
                Ok(()) | Err(RemoteError::NotFound) => Verdict::Applied,
                Err(error) => classify(error),
            },
        };
        Ok(verdict)
    }

    /// Merge a record arriving from the remote service (a refresh or a
    /// realtime subscription event) into the local mirror. Concurrent
    /// edits resolve last-write-wins.
    pub async fn ingest_remote(&self, payload: OpPayload) -> Result<(), SyncError> {
        self.store.merge_remote(&payload).await?;
        Ok(())
    }

    /// Discard a queued operation that needs manual resolution.
    pub async fn discard_operation(&self, id: i64) -> Result<(), SyncError> {
        warn!(queue_id = id, "operation discarded by caller");
        self.store.remove_op(id).await?;
        Ok(())
    }

    /// Give an exhausted operation a fresh retry budget.
    pub async fn retry_operation(&self, id: i64) -> Result<(), SyncError> {
        self.store.reset_attempts(id).await?;
        Ok(())
    }

    // --- ledger reads ---

    /// Net balance per member of a group, in the group base currency.
    pub async fn group_balances(
        &self,
        group: GroupId,
    ) -> Result<std::collections::BTreeMap<MemberId, f64>, SyncError> {
        let expenses = self.store.expenses(group).await?;
        let splits = self.store.splits(group).await?;
        let settlements = self.store.settlements(group).await?;
        let members = self.store.members(group).await?;
        Ok(compute_balances(&expenses, &splits, &settlements, &members))
    }

    /// Suggested transfers that settle a group's balances.
    pub async fn suggested_settlements(&self, group: GroupId) -> Result<Vec<Transfer>, SyncError> {
        let balances = self.group_balances(group).await?;
        Ok(simplify_debts(&balances))
    }

    /// Aggregate balances against every partner across all groups where
    /// a member matches the given display name (case-insensitive).
    pub async fn cross_group_summary(&self, my_name: &str) -> Result<CrossGroupSummary, SyncError> {
        // Same folding the aggregator keys partners by.
        let folded = my_name.to_lowercase();
        let mut views = Vec::new();
        for group in self.store.groups().await? {
            let members = self.store.members(group.id).await?;
            let Some(me) = members.iter().find(|m| m.name.to_lowercase() == folded) else {
                continue;
            };
            let transfers = self.suggested_settlements(group.id).await?;
            views.push(GroupLedgerView {
                group_id: group.id,
                group_name: group.name.clone(),
                me: me.id,
                members,
                transfers,
            });
        }
        Ok(aggregate_across_groups(&views))
    }

    /// Background loop: drains on a fixed interval, on reconnect, and on
    /// foreground resume. Runs until the process shuts down.
    pub async fn run(self: Arc<Self>) {
        let mut monitor = NetworkMonitor::new(&self.connectivity);
        let mut interval = tokio::time::interval(self.config.drain_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so startup is quiet.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.request_drain().await;
                }
                Some(reachable) = monitor.transition() => {
                    if reachable {
                        info!("network reachable, draining queue");
                        self.request_drain().await;
                    } else {
                        info!("network lost");
                        self.set_status(SyncStatus::Offline);
                    }
                }
                _ = self.foreground.notified() => {
                    debug!("foreground resume, draining queue");
                    self.request_drain().await;
                }
            }
        }
    }
}

fn classify(error: RemoteError) -> Verdict {
    match error {
        RemoteError::ForeignKeyViolation { parent_id } => Verdict::Cascade(parent_id),
        RemoteError::UniqueViolation | RemoteError::CheckViolation(_) => Verdict::Discard(error),
        RemoteError::NotFound => Verdict::Discard(error),
        RemoteError::Unavailable(_) => Verdict::Transient(error),
    }
}
