//! Data models for snapshot rotation.
//!
//! This module contains the core data structures used throughout the crate.

mod cadence;
mod snapshot;
mod volume;

pub use cadence::{BUILTIN_CADENCES, Cadence, CadencePolicy, CadenceTable};
pub use snapshot::{Snapshot, SnapshotId};
pub use volume::{Volume, VolumeId};
