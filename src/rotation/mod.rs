//! Snapshot rotation.
//!
//! | Component | Role |
//! |-----------|------|
//! | [`RetentionPolicy`] | Pure keep/remove decision for one partition |
//! | [`RotationOrchestrator`] | Per-volume list, create, decide, delete |
//! | [`PartitionLocks`] | Excludes overlapping runs per (volume, cadence) |
//! | [`RotationReport`] | Per-volume outcome of a run |

mod lock;
mod orchestrator;
mod policy;
mod report;

pub use lock::{PartitionGuard, PartitionLocks};
pub use orchestrator::{DEFAULT_MAX_CONCURRENT, RotationOptions, RotationOrchestrator};
pub use policy::{RetentionDecision, RetentionPolicy};
pub use report::{FailureKind, FailureStage, RotationFailure, RotationReport, VolumeReport};
