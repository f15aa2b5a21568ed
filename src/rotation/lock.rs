//! Per-(volume, cadence) mutual exclusion.
//!
//! Two overlapping runs of the same cadence would both create a snapshot
//! for the same volume, possibly with a colliding name, and both prune. The
//! registry lets exactly one run hold a partition at a time; the other
//! records a `Locked` failure for that volume instead of waiting.

use crate::models::{Cadence, VolumeId};
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

/// Set of (volume, cadence) partitions currently being rotated.
#[derive(Debug, Default)]
pub struct PartitionLocks {
    held: Mutex<HashSet<(VolumeId, Cadence)>>,
}

impl PartitionLocks {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tries to take the partition; `None` if another run holds it.
    #[must_use]
    pub fn try_acquire(&self, volume: &VolumeId, cadence: &Cadence) -> Option<PartitionGuard<'_>> {
        let key = (volume.clone(), cadence.clone());
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(key.clone()) {
            return None;
        }
        drop(held);
        Some(PartitionGuard { locks: self, key })
    }

    /// Returns `true` if the partition is currently held.
    #[must_use]
    pub fn is_held(&self, volume: &VolumeId, cadence: &Cadence) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(volume.clone(), cadence.clone()))
    }
}

/// Releases its partition on drop.
#[derive(Debug)]
pub struct PartitionGuard<'a> {
    locks: &'a PartitionLocks,
    key: (VolumeId, Cadence),
}

impl Drop for PartitionGuard<'_> {
    fn drop(&mut self) {
        self.locks
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclusive_per_partition() {
        let locks = PartitionLocks::new();
        let disk1 = VolumeId::new("disk1");

        let guard = locks.try_acquire(&disk1, &Cadence::daily());
        assert!(guard.is_some());
        assert!(locks.try_acquire(&disk1, &Cadence::daily()).is_none());
        assert!(locks.try_acquire(&disk1, &Cadence::weekly()).is_some());
        assert!(locks.try_acquire(&VolumeId::new("disk2"), &Cadence::daily()).is_some());

        drop(guard);
        assert!(!locks.is_held(&disk1, &Cadence::daily()));
        assert!(locks.try_acquire(&disk1, &Cadence::daily()).is_some());
    }
}
