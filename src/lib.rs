//! # Snaprot
//!
//! Scheduled, policy-driven rotation of block-storage volume snapshots.
//!
//! For every volume and every cadence (hourly, daily, weekly, monthly, or a
//! custom one), a rotation run creates a fresh snapshot and then prunes the
//! older snapshots of that same cadence beyond the configured retention count.
//!
//! ## Features
//!
//! - Sortable, fixed-width snapshot names (`<volume>-<cadence>-<timestamp>`)
//! - Exact per-(volume, cadence) partitioning; cadences never prune each other
//! - Create-before-delete ordering on every volume
//! - Partial-failure isolation with a detailed [`RotationReport`]
//! - Bounded parallelism, run deadlines, and per-(volume, cadence) locking
//! - Pluggable providers behind the [`ProviderClient`] capability trait
//!
//! ## Example
//!
//! ```rust,ignore
//! use snaprot::provider::InMemoryProvider;
//! use snaprot::{RotationOptions, RotationOrchestrator};
//! use std::sync::Arc;
//!
//! let provider = Arc::new(InMemoryProvider::new());
//! provider.add_volume("disk1");
//!
//! let orchestrator = RotationOrchestrator::new(provider, RotationOptions::default());
//! let report = orchestrator.rotate("daily", "YYYYMMDD", 7)?;
//! println!("{}", report.summary());
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod cli;
pub mod config;
pub mod models;
pub mod naming;
pub mod observability;
pub mod provider;
pub mod rotation;
pub mod trigger;

pub use config::RotatorConfig;
pub use models::{Cadence, CadencePolicy, CadenceTable, Snapshot, SnapshotId, Volume, VolumeId};
pub use naming::{SnapshotNamer, TimestampFormat};
pub use provider::{DeleteOutcome, ProviderClient, ProviderError, SnapshotFilter};
pub use rotation::{
    FailureKind, FailureStage, RetentionDecision, RetentionPolicy, RotationFailure,
    RotationOptions, RotationOrchestrator, RotationReport, VolumeReport,
};
pub use trigger::CronTrigger;

/// Error type for snaprot operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Retention of zero, malformed cadence names, bad CLI arguments |
/// | `UnknownCadence` | A trigger names a cadence missing from the cadence table |
/// | `InvalidFormat` | A timestamp pattern is not fixed-width, sortable, or fine enough |
/// | `InvalidName` | A generated snapshot name is not a valid resource name |
/// | `OperationFailed` | Config file I/O, state file I/O, listener setup |
/// | `FeatureNotEnabled` | Using features requiring compile-time flags |
/// | `Provider` | Listing volumes fails before any volume was touched |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The cadence is not present in the cadence table.
    #[error("unknown cadence: {0}")]
    UnknownCadence(String),

    /// A timestamp format cannot produce sortable names for a cadence.
    ///
    /// Raised when:
    /// - The pattern contains unpadded tokens (`M`, `D`, `W`, ...)
    /// - Tokens are not ordered most-significant first
    /// - The pattern is coarser than the cadence (e.g. `YYYYMM` for `daily`)
    #[error("invalid timestamp format '{format}': {reason}")]
    InvalidFormat {
        /// The offending pattern.
        format: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A generated snapshot name is not acceptable to the provider.
    #[error("invalid snapshot name '{name}': {reason}")]
    InvalidName {
        /// The offending name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// An operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// Feature not enabled (requires feature flag).
    #[error("feature not enabled: {0} (compile with --features {0})")]
    FeatureNotEnabled(String),

    /// The provider failed before any volume was rotated.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
}

impl Error {
    /// Returns `true` for errors caused by a broken cadence table or format.
    ///
    /// These abort a rotation run before any volume is touched.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput(_)
                | Self::UnknownCadence(_)
                | Self::InvalidFormat { .. }
                | Self::InvalidName { .. }
        )
    }
}

/// Result type alias for snaprot operations.
pub type Result<T> = std::result::Result<T, Error>;
