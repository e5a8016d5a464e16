// src/session/locks.rs
// Per-session advisory workflow locks.
//
// Any code path performing a multi-operation critical section against one
// session (read state, do work, write results) holds that session's lock for
// the whole section. Locks are tokio mutexes: FIFO-fair within a session,
// independent across sessions. Lock acquisition order is always
// (workflow lock) -> (store transaction); no lock is acquired while a store
// transaction is open.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::OwnedMutexGuard;

struct LockEntry {
    lock: Arc<tokio::sync::Mutex<()>>,
    last_used: Instant,
}

/// Registry of per-session advisory locks.
#[derive(Default)]
pub struct WorkflowLocks {
    inner: Mutex<HashMap<String, LockEntry>>,
}

impl WorkflowLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        #[allow(clippy::unwrap_used)] // poisoned map mutex is unrecoverable
        let mut map = self.inner.lock().unwrap();
        let entry = map
            .entry(session_id.to_string())
            .or_insert_with(|| LockEntry {
                lock: Arc::new(tokio::sync::Mutex::new(())),
                last_used: Instant::now(),
            });
        entry.last_used = Instant::now();
        entry.lock.clone()
    }

    /// Acquire the workflow lock for one session. Waiters are served in
    /// FIFO order.
    pub async fn acquire(&self, session_id: &str) -> OwnedMutexGuard<()> {
        self.entry(session_id).lock_owned().await
    }

    /// Acquire locks for several sessions at once.
    ///
    /// Ids are sorted (and deduplicated) before acquisition so that any two
    /// batch mutators take their locks in the same order; this is the
    /// deadlock-avoidance contract for cross-session operations.
    pub async fn acquire_many(&self, session_ids: &[&str]) -> Vec<OwnedMutexGuard<()>> {
        let mut ids: Vec<&str> = session_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push(self.acquire(id).await);
        }
        guards
    }

    /// Whether the session's lock is currently held. Used by the TTL sweeper
    /// to defer reclamation of sessions with a workflow in flight.
    pub fn is_held(&self, session_id: &str) -> bool {
        #[allow(clippy::unwrap_used)]
        let map = self.inner.lock().unwrap();
        match map.get(session_id) {
            Some(entry) => entry.lock.try_lock().is_err(),
            None => false,
        }
    }

    /// Drop lock entries that are unheld and idle longer than `max_idle`.
    /// Reclaims entries left behind by deleted or abandoned sessions.
    pub fn sweep_idle(&self, max_idle: Duration) -> usize {
        #[allow(clippy::unwrap_used)]
        let mut map = self.inner.lock().unwrap();
        let before = map.len();
        map.retain(|_, entry| {
            entry.last_used.elapsed() < max_idle || entry.lock.try_lock().is_err()
        });
        before - map.len()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        #[allow(clippy::unwrap_used)]
        let map = self.inner.lock().unwrap();
        map.len()
    }
}
