//! Correlation table: pending requests waiting for their reply.
//!
//! Every outgoing request registers an entry keyed by its correlation key.
//! Exactly one of the following removes it and fulfils the waiter:
//! a reply ([`CorrelationTable::resolve`]), a caller cancel
//! ([`CorrelationTable::cancel`]), the reaper ([`CorrelationTable::sweep_expired`])
//! or connection loss ([`CorrelationTable::fail_all`]).
//!
//! All mutations happen under one mutex, so they are linearizable with respect
//! to each other: whichever call removes the entry first wins and every later
//! call for the same key is a reported no-op. The lock is never held across an
//! `.await`, and waiters are woken after it is released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::{
    // ---
    lock_ignore_poison,
    log_debug,
    CorrelationKey,
    Envelope,
    Result,
    RpcError,
};

/// Final result delivered to a waiter: the reply envelope or a failure.
pub type Outcome = Result<Envelope>;

struct PendingEntry {
    ticket: u64,
    deadline: Instant,
    tx: oneshot::Sender<Outcome>,
}

impl PendingEntry {
    fn fulfil(self, key: &CorrelationKey, outcome: Outcome) {
        if self.tx.send(outcome).is_err() {
            log_debug!("waiter for {key} already gone, outcome dropped");
        }
    }
}

#[derive(Default)]
struct Shared {
    entries: Mutex<HashMap<CorrelationKey, PendingEntry>>,
    next_ticket: AtomicU64,
}

impl Shared {
    /// Remove `key` only if it still belongs to registration `ticket`.
    fn remove_ticket(&self, key: &CorrelationKey, ticket: u64) -> Option<PendingEntry> {
        let mut entries = lock_ignore_poison(&self.entries);
        match entries.get(key) {
            Some(entry) if entry.ticket == ticket => entries.remove(key),
            _ => None,
        }
    }
}

/// Concurrent map from correlation key to pending request.
///
/// Cheap to clone (internally `Arc`-backed); all clones share the same table.
#[derive(Clone, Default)]
pub struct CorrelationTable {
    shared: Arc<Shared>,
}

impl CorrelationTable {
    // ---

    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending request.
    ///
    /// Returns a handle the caller awaits for the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::DuplicateKey`] if `key` is already pending. The
    /// existing entry is left untouched; the caller should retry with a new key.
    pub fn register(&self, key: CorrelationKey, deadline: Instant) -> Result<PendingHandle> {
        // ---
        let (tx, rx) = oneshot::channel();
        let ticket = self.shared.next_ticket.fetch_add(1, Ordering::Relaxed);

        {
            let mut entries = lock_ignore_poison(&self.shared.entries);
            if entries.contains_key(&key) {
                return Err(RpcError::DuplicateKey(key));
            }
            entries.insert(
                key.clone(),
                PendingEntry {
                    ticket,
                    deadline,
                    tx,
                },
            );
        }

        Ok(PendingHandle {
            key,
            ticket,
            created_at: Instant::now(),
            deadline,
            rx,
            table: Arc::downgrade(&self.shared),
            settled: false,
        })
    }

    /// Deliver `outcome` to the request registered under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::UnknownCorrelation`] if nothing is pending under
    /// `key` (never registered, already resolved, cancelled or timed out).
    /// Nothing is delivered in that case.
    pub fn resolve(&self, key: &CorrelationKey, outcome: Outcome) -> Result<()> {
        // ---
        let entry = lock_ignore_poison(&self.shared.entries).remove(key);

        match entry {
            Some(entry) => {
                entry.fulfil(key, outcome);
                Ok(())
            }
            None => Err(RpcError::UnknownCorrelation(key.clone())),
        }
    }

    /// Cancel the request registered under `key`; its waiter observes
    /// [`RpcError::Cancelled`].
    ///
    /// Returns `false` if the request had already been settled.
    pub fn cancel(&self, key: &CorrelationKey) -> bool {
        // ---
        let entry = lock_ignore_poison(&self.shared.entries).remove(key);

        match entry {
            Some(entry) => {
                entry.fulfil(key, Err(RpcError::Cancelled));
                true
            }
            None => false,
        }
    }

    /// Time out every request whose deadline is strictly before `now`.
    ///
    /// Selection and removal happen in one critical section, so an entry that a
    /// concurrent `resolve` or `cancel` already removed is never touched.
    /// Returns the keys that were timed out.
    pub fn sweep_expired(&self, now: Instant) -> Vec<CorrelationKey> {
        // ---
        let expired: Vec<(CorrelationKey, PendingEntry)> = {
            let mut entries = lock_ignore_poison(&self.shared.entries);
            let keys: Vec<CorrelationKey> = entries
                .iter()
                .filter(|(_, entry)| entry.deadline < now)
                .map(|(key, _)| key.clone())
                .collect();

            keys.into_iter()
                .filter_map(|key| entries.remove(&key).map(|entry| (key, entry)))
                .collect()
        };

        expired
            .into_iter()
            .map(|(key, entry)| {
                entry.fulfil(&key, Err(RpcError::Timeout));
                key
            })
            .collect()
    }

    /// Fail every pending request with the error produced by `make_error`.
    ///
    /// Used when the inbound stream ends and no reply can arrive anymore.
    /// Returns the number of requests failed.
    pub fn fail_all(&self, make_error: impl Fn() -> RpcError) -> usize {
        // ---
        let drained: Vec<(CorrelationKey, PendingEntry)> =
            lock_ignore_poison(&self.shared.entries).drain().collect();

        let count = drained.len();
        for (key, entry) in drained {
            entry.fulfil(&key, Err(make_error()));
        }
        count
    }

    /// Number of pending requests.
    pub fn len(&self) -> usize {
        lock_ignore_poison(&self.shared.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if a request is pending under `key`.
    pub fn contains(&self, key: &CorrelationKey) -> bool {
        lock_ignore_poison(&self.shared.entries).contains_key(key)
    }

    /// Non-owning reference, for background tasks that must not keep the
    /// table alive.
    pub(crate) fn downgrade(&self) -> WeakTable {
        WeakTable(Arc::downgrade(&self.shared))
    }
}

/// Weak reference to a [`CorrelationTable`].
#[derive(Clone)]
pub(crate) struct WeakTable(Weak<Shared>);

impl WeakTable {
    pub(crate) fn upgrade(&self) -> Option<CorrelationTable> {
        self.0.upgrade().map(|shared| CorrelationTable { shared })
    }
}

/// Waiting side of a registered request.
///
/// Dropping a handle that has not observed its outcome cancels the
/// registration, so an abandoned request never lingers in the table. The
/// cancel only touches the entry this handle created, even if the same key has
/// since been registered again.
pub struct PendingHandle {
    key: CorrelationKey,
    ticket: u64,
    created_at: Instant,
    deadline: Instant,
    rx: oneshot::Receiver<Outcome>,
    table: Weak<Shared>,
    settled: bool,
}

impl PendingHandle {
    // ---

    pub fn key(&self) -> &CorrelationKey {
        &self.key
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Wait for the outcome.
    ///
    /// Cancel-safe: dropping the returned future leaves the handle usable.
    /// Once an outcome has been returned, further calls report
    /// [`RpcError::Cancelled`].
    pub async fn wait(&mut self) -> Outcome {
        // ---
        if self.settled {
            return Err(RpcError::Cancelled);
        }

        let outcome = match (&mut self.rx).await {
            Ok(outcome) => outcome,
            // Sender dropped without an outcome: the table itself went away.
            Err(_) => Err(RpcError::ConnectionLost),
        };
        self.settled = true;
        outcome
    }

    /// Non-blocking check for an outcome.
    pub fn try_outcome(&mut self) -> Option<Outcome> {
        // ---
        if self.settled {
            return None;
        }
        match self.rx.try_recv() {
            Ok(outcome) => {
                self.settled = true;
                Some(outcome)
            }
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.settled = true;
                Some(Err(RpcError::ConnectionLost))
            }
        }
    }
}

impl Drop for PendingHandle {
    fn drop(&mut self) {
        // ---
        if self.settled {
            return;
        }
        if let Some(shared) = self.table.upgrade() {
            if shared.remove_ticket(&self.key, self.ticket).is_some() {
                log_debug!("pending request {} abandoned by caller", self.key);
            }
        }
    }
}
