//! Auto lock renewal
//!
//! Work done under a session lock can outlive the broker's lock duration (a
//! deployment can run for many minutes). The renewer extends the lock in the
//! background until the work ends or `max_lock_renewal` has elapsed.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use crate::broker::SessionReceiver;

/// Background task renewing one session lock
pub struct AutoLockRenewer {
    handle: JoinHandle<()>,
}

impl AutoLockRenewer {
    /// Starts renewing `receiver`'s lock every `renew_every`, for at most `max_lock_renewal`
    pub fn register(
        receiver: Arc<dyn SessionReceiver>,
        max_lock_renewal: Duration,
        renew_every: Duration,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let mut ticker = time::interval_at(started + renew_every, renew_every);

            loop {
                ticker.tick().await;

                if started.elapsed() >= max_lock_renewal {
                    debug!(
                        "Stopped renewing session {} after {:?}",
                        receiver.session_id(),
                        max_lock_renewal
                    );
                    break;
                }

                if let Err(e) = receiver.renew_lock().await {
                    warn!("Failed to renew lock on session {}: {}", receiver.session_id(), e);
                    break;
                }
                debug!("Renewed lock on session {}", receiver.session_id());
            }
        });

        Self { handle }
    }

    /// Stops renewing
    pub fn close(self) {
        self.handle.abort();
    }
}

impl Drop for AutoLockRenewer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
