//! Retention policy.
//!
//! A pure function from the existing snapshots of one (volume, cadence)
//! partition plus the snapshot just created to the set to keep and the set
//! to delete. No I/O happens here.

use crate::models::Snapshot;
use serde::Serialize;
use std::cmp::Ordering;

/// Outcome of applying the retention policy to one partition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetentionDecision {
    /// Snapshots to keep, in descending name order. A pinned new snapshot
    /// sorts below every other kept snapshot and is therefore last.
    pub keep: Vec<Snapshot>,
    /// Snapshots to delete, in descending name order.
    pub remove: Vec<Snapshot>,
}

impl RetentionDecision {
    /// Returns `true` if nothing has to be deleted.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.remove.is_empty()
    }
}

/// Exact-N retention over lexicographically ordered snapshot names.
pub struct RetentionPolicy;

impl RetentionPolicy {
    /// Decides which snapshots of a partition survive.
    ///
    /// The union of `existing` and `new` is sorted by name descending (ties
    /// broken by the larger provider id), then the first `retention` entries
    /// are kept. The same snapshot listed twice counts once.
    ///
    /// `new` is never removed: if it sorts below the retention window (clock
    /// skew, cyclic formats) it displaces the lowest kept snapshot and takes
    /// the last slot of `keep`. Both lists stay in descending name order.
    ///
    /// A `retention` of zero is treated as one.
    #[must_use]
    pub fn decide(existing: &[Snapshot], new: &Snapshot, retention: u32) -> RetentionDecision {
        let retention = usize::try_from(retention.max(1)).unwrap_or(usize::MAX);

        let mut candidates = Vec::with_capacity(existing.len() + 1);
        candidates.push(new.clone());
        candidates.extend(existing.iter().cloned());
        candidates.sort_by(newest_first);
        candidates.dedup_by(|a, b| same_snapshot(a, b));

        if candidates.len() <= retention {
            return RetentionDecision {
                keep: candidates,
                remove: Vec::new(),
            };
        }

        let mut remove = candidates.split_off(retention);
        let mut keep = candidates;

        if let Some(pos) = remove.iter().position(|s| same_snapshot(s, new)) {
            let pinned = remove.remove(pos);
            if let Some(displaced) = keep.pop() {
                remove.insert(0, displaced);
            }
            keep.push(pinned);
        }

        RetentionDecision { keep, remove }
    }
}

fn newest_first(a: &Snapshot, b: &Snapshot) -> Ordering {
    b.order_key()
        .cmp(a.order_key())
        .then_with(|| b.provider_id.cmp(&a.provider_id))
}

fn same_snapshot(a: &Snapshot, b: &Snapshot) -> bool {
    a.id == b.id && a.provider_id == b.provider_id
}
