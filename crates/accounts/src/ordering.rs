//! Canonical lock acquisition order.
//!
//! Every multi-account operation that goes through the same policy requests
//! its locks in the same relative order, so no wait-for cycle can form.

use core::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Direction of the total order over keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockOrder {
    #[default]
    Ascending,
    Descending,
}

/// Comparator over the full key space.
///
/// Works for any `Ord` key; the ledger uses `AccountId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LockOrderingPolicy {
    direction: LockOrder,
}

impl LockOrderingPolicy {
    pub const fn ascending() -> Self {
        Self {
            direction: LockOrder::Ascending,
        }
    }

    pub const fn descending() -> Self {
        Self {
            direction: LockOrder::Descending,
        }
    }

    pub fn direction(&self) -> LockOrder {
        self.direction
    }

    pub fn compare<K: Ord>(&self, a: &K, b: &K) -> Ordering {
        match self.direction {
            LockOrder::Ascending => a.cmp(b),
            LockOrder::Descending => b.cmp(a),
        }
    }

    /// Returns `(first, second)` in acquisition order, independent of argument order.
    pub fn order<K: Ord>(&self, a: K, b: K) -> (K, K) {
        if self.compare(&a, &b) == Ordering::Greater {
            (b, a)
        } else {
            (a, b)
        }
    }

    /// Acquisition order for an arbitrary key set (duplicates removed).
    pub fn order_all<K: Ord + Clone>(&self, keys: &[K]) -> Vec<K> {
        let mut out = keys.to_vec();
        out.sort_by(|a, b| self.compare(a, b));
        out.dedup();
        out
    }
}
