//! Wait-for graph used to break circular waits between transfers.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use ledgerlock_core::TransferId;

/// Directed graph of `waiter -> holder` edges.
///
/// A transfer waits on at most one lock at a time, so each waiter has at most
/// one outgoing edge. Edges are refreshed every time a waiter wakes up; an
/// edge can briefly point at a previous holder, which may pick a victim that
/// was not strictly part of a cycle. Victims are always safe to retry.
#[derive(Debug, Default)]
pub struct WaitForGraph {
    edges: Mutex<HashMap<TransferId, TransferId>>,
}

impl WaitForGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // Plain data; a panic elsewhere cannot leave it half-updated.
    fn edges(&self) -> MutexGuard<'_, HashMap<TransferId, TransferId>> {
        self.edges.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records that `waiter` waits on `holder`.
    ///
    /// If the new edge would close a cycle, the edge is not recorded and the
    /// cycle (starting at `waiter`) is returned: the caller is the victim.
    pub fn wait_on(&self, waiter: TransferId, holder: TransferId) -> Option<Vec<TransferId>> {
        let mut edges = self.edges();

        let mut cycle = vec![waiter];
        let mut seen = HashSet::new();
        let mut cursor = holder;
        loop {
            if cursor == waiter {
                edges.remove(&waiter);
                return Some(cycle);
            }
            if !seen.insert(cursor) {
                break;
            }
            cycle.push(cursor);
            match edges.get(&cursor) {
                Some(next) => cursor = *next,
                None => break,
            }
        }

        edges.insert(waiter, holder);
        None
    }

    /// Drops the outgoing edge of `waiter` (lock granted, timed out, or aborted).
    pub fn clear(&self, waiter: TransferId) {
        self.edges().remove(&waiter);
    }

    /// Number of transfers currently blocked on a lock.
    pub fn waiting(&self) -> usize {
        self.edges().len()
    }
}
