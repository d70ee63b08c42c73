//! Runner watchdog
//!
//! `check_runners` watches the worker pool on an interval and flips the
//! process `Liveness` to dead once every worker task has exited.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

/// Process-wide health flag read by the health endpoint
///
/// Starts alive and only ever goes from alive to dead.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Default for Liveness {
    fn default() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }
}

impl Liveness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn mark_dead(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Per-worker alive flag, cleared when the worker task ends for any reason
#[derive(Debug, Clone)]
pub struct WorkerFlag(Arc<AtomicBool>);

impl WorkerFlag {
    pub(crate) fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Guard that clears the flag on drop, including on panic
    pub(crate) fn guard(&self) -> WorkerFlagGuard {
        WorkerFlagGuard(Arc::clone(&self.0))
    }
}

pub(crate) struct WorkerFlagGuard(Arc<AtomicBool>);

impl Drop for WorkerFlagGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Marks the process dead once every worker has stopped
///
/// Checks every `interval` until `shutdown` turns true. A pool that is shutting
/// down on purpose is not reported as dead.
pub async fn check_runners(
    workers: Vec<WorkerFlag>,
    liveness: Liveness,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Runner watchdog stopped");
                    return;
                }
                continue;
            }
        }

        if !workers.is_empty() && workers.iter().all(|w| !w.is_alive()) {
            error!("All runner processes have failed!");
            liveness.mark_dead();
            return;
        }
    }
}
