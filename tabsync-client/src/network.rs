//! Connectivity capability and network monitoring.
//!
//! Reachability is modeled as a capability trait so runtimes without a
//! connectivity signal plug in [`NullConnectivity`] (always reachable)
//! instead of probing for optional platform modules at runtime.

use tokio::sync::watch;

/// Source of the device's reachability signal.
pub trait Connectivity: Send + Sync {
    /// Current reachability.
    fn is_reachable(&self) -> bool;

    /// Subscribe to reachability transitions.
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Always-reachable capability for runtimes without a connectivity
/// signal. Sync then behaves as if the device were permanently online.
#[derive(Debug)]
pub struct NullConnectivity {
    tx: watch::Sender<bool>,
}

impl NullConnectivity {
    /// Create the no-op connectivity source.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(true);
        Self { tx }
    }
}

impl Default for NullConnectivity {
    fn default() -> Self {
        Self::new()
    }
}

impl Connectivity for NullConnectivity {
    fn is_reachable(&self) -> bool {
        true
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Manually driven connectivity source, fed by the platform's
/// reachability callback (or by tests).
#[derive(Debug)]
pub struct StaticConnectivity {
    tx: watch::Sender<bool>,
}

impl StaticConnectivity {
    /// Create a source with the given initial reachability.
    pub fn new(reachable: bool) -> Self {
        let (tx, _rx) = watch::channel(reachable);
        Self { tx }
    }

    /// Report a reachability change.
    pub fn set_reachable(&self, reachable: bool) {
        // send_replace notifies even if some receiver lagged behind.
        self.tx.send_replace(reachable);
    }
}

impl Connectivity for StaticConnectivity {
    fn is_reachable(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Edge-triggered view of a connectivity stream.
///
/// Collapses flapping within one tick: a transition is reported only
/// when the observed value actually differs from the last one reported,
/// so a false→true edge triggers exactly one sync attempt.
pub struct NetworkMonitor {
    rx: watch::Receiver<bool>,
    last: bool,
}

impl NetworkMonitor {
    /// Start monitoring the given connectivity source.
    pub fn new(connectivity: &dyn Connectivity) -> Self {
        let rx = connectivity.subscribe();
        let last = *rx.borrow();
        Self { rx, last }
    }

    /// Current reachability.
    pub fn is_reachable(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for the next reachability transition; returns the new value,
    /// or `None` once the source is gone.
    pub async fn transition(&mut self) -> Option<bool> {
        loop {
            self.rx.changed().await.ok()?;
            let now = *self.rx.borrow_and_update();
            if now != self.last {
                self.last = now;
                return Some(now);
            }
        }
    }
}
