//! Provider capability interface.
//!
//! The provider is the block-storage service that owns volumes and
//! snapshots. Rotation only needs four operations from it, captured by
//! [`ProviderClient`]. Implementations:
//!
//! | Provider | Description |
//! |----------|-------------|
//! | [`InMemoryProvider`] | Process-local state with call journal and fault injection |
//! | [`FilesystemProvider`] | JSON state file, for local runs and dry runs |
//! | [`ResilientProvider`] | Wrapper adding timeouts, retry, and circuit breaking |
//!
//! Listings are lazily produced sequences with per-item errors; callers that
//! need the whole set collect them with `collect::<Result<Vec<_>, _>>()`.

mod filesystem;
mod memory;
mod resilience;

pub use filesystem::FilesystemProvider;
pub use memory::{FaultOp, InMemoryProvider, ProviderCall};
pub use resilience::{ProviderResilienceConfig, ResilientProvider};

use crate::models::{Snapshot, SnapshotId, Volume};
use std::fmt;
use thiserror::Error as ThisError;

/// Errors reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum ProviderError {
    /// Transport or server-side (5xx-class) failure.
    #[error("provider unavailable during {operation}: {cause}")]
    Unavailable {
        /// The provider operation.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// The call did not complete within the per-call timeout.
    #[error("provider call {operation} timed out after {after_ms}ms")]
    Timeout {
        /// The provider operation.
        operation: String,
        /// The timeout that elapsed.
        after_ms: u64,
    },

    /// The project has no snapshot quota left.
    #[error("snapshot quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The provider rejected a snapshot name.
    #[error("provider rejected name '{name}': {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// The provider's reason.
        reason: String,
    },

    /// The resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A snapshot with this name already exists.
    #[error("snapshot already exists: {0}")]
    AlreadyExists(String),
}

impl ProviderError {
    /// Returns `true` for failures worth retrying.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }

    /// Creates an [`ProviderError::Unavailable`] error.
    #[must_use]
    pub fn unavailable(operation: &str, cause: impl Into<String>) -> Self {
        Self::Unavailable {
            operation: operation.to_string(),
            cause: cause.into(),
        }
    }
}

/// Result type alias for provider calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// A lazily produced listing.
pub type Listing<'a, T> = Box<dyn Iterator<Item = ProviderResult<T>> + Send + 'a>;

/// Result of a delete call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The snapshot was deleted.
    Deleted,
    /// The snapshot was already gone.
    NotFound,
}

/// Conjunction of a source-volume match and an anchored name-prefix match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFilter {
    /// Provider identifier the snapshot's source volume must equal.
    pub source_volume_id: String,
    /// Prefix the snapshot name must start with.
    pub name_prefix: String,
}

impl SnapshotFilter {
    /// Creates a new filter.
    #[must_use]
    pub fn new(source_volume_id: impl Into<String>, name_prefix: impl Into<String>) -> Self {
        Self {
            source_volume_id: source_volume_id.into(),
            name_prefix: name_prefix.into(),
        }
    }

    /// Returns `true` if `snapshot` satisfies both conditions.
    #[must_use]
    pub fn matches(&self, snapshot: &Snapshot) -> bool {
        snapshot.source_volume_id == self.source_volume_id
            && snapshot.id.as_str().starts_with(&self.name_prefix)
    }

    /// Renders the filter in the provider's list-filter syntax.
    ///
    /// The name condition is an RE2 regex anchored at the start, with the
    /// prefix escaped.
    #[must_use]
    pub fn to_expression(&self) -> String {
        format!(
            "(sourceDiskId eq \"{}\") (name eq \"^{}.*\")",
            self.source_volume_id,
            regex::escape(&self.name_prefix)
        )
    }
}

impl fmt::Display for SnapshotFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_expression())
    }
}

/// Capability interface for the block-storage provider.
///
/// Implementations must be safe to call from several worker threads at once.
pub trait ProviderClient: Send + Sync {
    /// Returns the provider name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Lists all volumes.
    fn list_volumes(&self) -> ProviderResult<Listing<'_, Volume>>;

    /// Lists snapshots matching `filter`.
    fn list_snapshots(&self, filter: &SnapshotFilter) -> ProviderResult<Listing<'_, Snapshot>>;

    /// Creates a snapshot of `volume` named `name`.
    fn create_snapshot(&self, volume: &Volume, name: &SnapshotId) -> ProviderResult<Snapshot>;

    /// Deletes `snapshot`; a missing snapshot is reported as
    /// [`DeleteOutcome::NotFound`], not as an error.
    fn delete_snapshot(&self, snapshot: &Snapshot) -> ProviderResult<DeleteOutcome>;
}

impl<P: ProviderClient + ?Sized> ProviderClient for std::sync::Arc<P> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn list_volumes(&self) -> ProviderResult<Listing<'_, Volume>> {
        (**self).list_volumes()
    }

    fn list_snapshots(&self, filter: &SnapshotFilter) -> ProviderResult<Listing<'_, Snapshot>> {
        (**self).list_snapshots(filter)
    }

    fn create_snapshot(&self, volume: &Volume, name: &SnapshotId) -> ProviderResult<Snapshot> {
        (**self).create_snapshot(volume, name)
    }

    fn delete_snapshot(&self, snapshot: &Snapshot) -> ProviderResult<DeleteOutcome> {
        (**self).delete_snapshot(snapshot)
    }
}
