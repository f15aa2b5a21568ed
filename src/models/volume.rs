//! Volume types and identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of a block-storage volume, as used in snapshot names.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VolumeId(String);

impl VolumeId {
    /// Creates a new volume ID.
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

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for VolumeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VolumeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A block-storage volume visible to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    /// Volume name, the first segment of every snapshot name.
    pub id: VolumeId,
    /// Provider-internal identifier, matched against a snapshot's source volume.
    pub provider_id: String,
}

impl Volume {
    /// Creates a new volume.
    #[must_use]
    pub fn new(id: impl Into<VolumeId>, provider_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider_id: provider_id.into(),
        }
    }
}
