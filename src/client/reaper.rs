//! Periodic timeout sweeper for the correlation table.
//!
//! Callers waiting in [`RpcClient::send`](crate::RpcClient::send) already stop
//! at their own deadline. The reaper covers everything else: handles obtained
//! directly from [`CorrelationTable::register`], waiters that are not being
//! polled, and entries whose owner is slow to notice its deadline.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::{
    // ---
    lock_ignore_poison,
    log_debug,
    CorrelationTable,
};

/// Handle to a running reaper task.
///
/// Dropping the handle does not stop the task. It keeps sweeping until
/// [`shutdown`](Reaper::shutdown) is called or the table itself is dropped.
pub struct Reaper {
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    task: JoinHandle<()>,
}

impl Reaper {
    /// Spawn a reaper that sweeps `table` every `interval`.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if `interval` is zero. [`RpcSessionBuilder`](crate::RpcSessionBuilder)
    /// validates this before spawning.
    pub fn spawn(table: &CorrelationTable, interval: Duration) -> Self {
        // ---
        let weak = table.downgrade();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            // ---
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            // Set once the handle is dropped without a shutdown. From then on
            // only the table going away ends the loop.
            let mut detached = false;

            loop {
                tokio::select! {
                    res = &mut shutdown_rx, if !detached => match res {
                        Ok(()) => break,
                        Err(_) => detached = true,
                    },
                    now = ticker.tick() => {
                        let Some(table) = weak.upgrade() else {
                            break;
                        };
                        let expired = table.sweep_expired(now);
                        if !expired.is_empty() {
                            log_debug!("reaper timed out {} pending request(s)", expired.len());
                        }
                    }
                }
            }

            log_debug!("reaper stopped");
        });

        Self {
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            task,
        }
    }

    /// Stop the reaper. Idempotent.
    pub fn shutdown(&self) {
        // ---
        let tx = lock_ignore_poison(&self.shutdown_tx).take();
        if let Some(tx) = tx {
            let _ = tx.send(());
        }
    }

    /// True once the background task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
