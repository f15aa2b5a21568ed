//! Snapshot naming.
//!
//! A snapshot name binds a snapshot to its volume, cadence, and creation
//! time: `<volume>-<cadence>-<timestamp>`. Because the timestamp is
//! fixed-width and most-significant first, names sharing a
//! `<volume>-<cadence>-` prefix sort chronologically, which is what the
//! retention policy relies on.
//!
//! # Example
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use snaprot::naming::{SnapshotNamer, TimestampFormat};
//! use snaprot::{Cadence, VolumeId};
//!
//! let format = TimestampFormat::parse("YYYYMMDD").unwrap();
//! let ts = Utc.with_ymd_and_hms(2024, 1, 4, 3, 0, 0).unwrap();
//! let name = SnapshotNamer::name(&VolumeId::new("disk1"), &Cadence::daily(), &ts, &format).unwrap();
//! assert_eq!(name.as_str(), "disk1-daily-20240104");
//! ```

mod format;

pub use format::{TimeUnit, TimestampFormat};

use crate::models::{Cadence, SnapshotId, VolumeId};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

/// Maximum length of a provider resource name.
pub const MAX_NAME_LEN: usize = 63;

/// Provider resource names: lowercase letter first, no trailing hyphen.
static RESOURCE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z]([-a-z0-9]{0,61}[a-z0-9])?$").unwrap_or_else(|_| unreachable!())
});

/// Deterministic snapshot namer.
pub struct SnapshotNamer;

impl SnapshotNamer {
    /// Builds the name of a snapshot taken at `timestamp`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFormat`] if `format` is coarser than the
    /// cadence, and [`Error::InvalidName`] if the result is not a valid
    /// resource name (too long, uppercase volume name, ...).
    pub fn name(
        volume: &VolumeId,
        cadence: &Cadence,
        timestamp: &DateTime<Utc>,
        format: &TimestampFormat,
    ) -> Result<SnapshotId> {
        format.check_resolution(cadence)?;
        let name = format!("{}{}", Self::prefix(volume, cadence), format.render(timestamp));
        Self::validate(&name)?;
        Ok(SnapshotId::new(name))
    }

    /// Returns the `<volume>-<cadence>-` prefix shared by a partition.
    #[must_use]
    pub fn prefix(volume: &VolumeId, cadence: &Cadence) -> String {
        format!("{}-{}-", volume.as_str(), cadence.as_str())
    }

    /// Returns `true` if `name` belongs to the (volume, cadence) partition.
    ///
    /// The match is anchored on the full `-<cadence>-` delimiter, so `daily`
    /// never claims `disk1-dailyx-...` or `disk1-weekly-...`.
    #[must_use]
    pub fn matches(name: &str, volume: &VolumeId, cadence: &Cadence) -> bool {
        name.strip_prefix(&Self::prefix(volume, cadence))
            .is_some_and(|rest| !rest.is_empty())
    }

    /// Checks that `name` is a valid provider resource name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidName`] describing the first violated rule.
    pub fn validate(name: &str) -> Result<()> {
        if name.len() > MAX_NAME_LEN {
            return Err(Error::InvalidName {
                name: name.to_string(),
                reason: format!("longer than {MAX_NAME_LEN} characters"),
            });
        }
        if !RESOURCE_NAME.is_match(name) {
            return Err(Error::InvalidName {
                name: name.to_string(),
                reason: "must match [a-z]([-a-z0-9]*[a-z0-9])?".to_string(),
            });
        }
        Ok(())
    }
}
