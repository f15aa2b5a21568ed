//! Snapshot types and identifiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Snapshot name: `<volume>-<cadence>-<formatted timestamp>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(String);

impl SnapshotId {
    /// Creates a new snapshot ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SnapshotId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SnapshotId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// An immutable point-in-time snapshot of one volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Snapshot name.
    pub id: SnapshotId,
    /// Provider-assigned identifier.
    pub provider_id: String,
    /// Provider identifier of the volume this snapshot was taken from.
    pub source_volume_id: String,
    /// Creation time reported by the provider, if any.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    /// Returns the key snapshots of one (volume, cadence) are ordered by.
    ///
    /// Names share the `<volume>-<cadence>-` prefix and end in a fixed-width
    /// timestamp, so byte order of the name is chronological order.
    #[must_use]
    pub fn order_key(&self) -> &str {
        self.id.as_str()
    }
}
