//! Per-key bookkeeping for fetches that are currently running.
//!
//! The first caller to miss on a key becomes the leader and owns the fetch.
//! Everyone who misses on the same key while the leader is outstanding
//! registers a waiter and receives a clone of the leader's outcome.
//!
//! # Locking
//!
//! One mutex guards the whole table. It is only held for check-then-insert,
//! append, and remove-then-drain; never across an `.await`.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

type Waiters<T> = Vec<oneshot::Sender<T>>;

/// Mapping from cache key to the ordered waiters of its running fetch.
pub(crate) struct InFlightTable<T> {
    entries: Mutex<HashMap<String, Waiters<T>>>,
}

/// Role assigned to a caller by [`InFlightTable::join`].
pub(crate) enum Join<'a, T> {
    /// No fetch was running; this caller must run it and then call
    /// [`LeaderGuard::complete`].
    Leader(LeaderGuard<'a, T>),
    /// A fetch is already running; await its outcome.
    Waiter(oneshot::Receiver<T>),
}

impl<T> InFlightTable<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Claim leadership for `key`, or queue behind the current leader.
    pub(crate) fn join(&self, key: &str) -> Join<'_, T> {
        let mut entries = self.lock();
        match entries.get_mut(key) {
            Some(waiters) => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                Join::Waiter(rx)
            }
            None => {
                entries.insert(key.to_string(), Vec::new());
                Join::Leader(LeaderGuard {
                    table: self,
                    key: key.to_string(),
                    completed: false,
                })
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    fn take(&self, key: &str) -> Waiters<T> {
        self.lock().remove(key).unwrap_or_default()
    }

    // The table holds no invariant a panicking holder could break halfway,
    // so a poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Waiters<T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Proof of leadership for one key.
///
/// Dropping the guard without calling [`complete`](Self::complete) removes
/// the entry and closes every waiter's channel, so waiters can elect a new
/// leader instead of hanging.
pub(crate) struct LeaderGuard<'a, T> {
    table: &'a InFlightTable<T>,
    key: String,
    completed: bool,
}

impl<T: Clone> LeaderGuard<'_, T> {
    /// Remove the entry and deliver `outcome` to every waiter in the order
    /// they joined. Returns the number of waiters notified.
    pub(crate) fn complete(mut self, outcome: &T) -> usize {
        self.completed = true;
        let waiters = self.table.take(&self.key);
        let notified = waiters.len();
        for waiter in waiters {
            // A waiter whose future was dropped has nobody left to tell.
            let _ = waiter.send(outcome.clone());
        }
        notified
    }
}

impl<T> Drop for LeaderGuard<'_, T> {
    fn drop(&mut self) {
        if !self.completed {
            drop(self.table.take(&self.key));
        }
    }
}
