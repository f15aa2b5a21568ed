//! Rotation run reports.

use crate::models::{Cadence, SnapshotId, VolumeId};
use crate::provider::ProviderError;
use serde::Serialize;
use std::fmt;

/// Step of the per-volume unit of work a failure occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    /// Another run holds the (volume, cadence) lock.
    Lock,
    /// Listing existing snapshots.
    List,
    /// Building the snapshot name.
    Name,
    /// Creating the new snapshot.
    Create,
    /// Deleting an expired snapshot.
    Delete,
}

impl FailureStage {
    /// Returns the stage as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lock => "lock",
            Self::List => "list",
            Self::Name => "name",
            Self::Create => "create",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Transport or server-side failure (after retry).
    Unavailable,
    /// The provider call timed out (after retry).
    Timeout,
    /// No snapshot quota left.
    QuotaExceeded,
    /// A snapshot name was rejected.
    InvalidName,
    /// The volume disappeared mid-run.
    NotFound,
    /// A snapshot with the name exists but could not be resolved.
    AlreadyExists,
    /// An overlapping run holds the (volume, cadence) lock.
    Locked,
}

impl FailureKind {
    /// Returns the kind as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unavailable => "unavailable",
            Self::Timeout => "timeout",
            Self::QuotaExceeded => "quota_exceeded",
            Self::InvalidName => "invalid_name",
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::Locked => "locked",
        }
    }

    /// Returns `true` for failures that indicate a configuration bug.
    #[must_use]
    pub const fn halts_run(self) -> bool {
        matches!(self, Self::InvalidName)
    }
}

impl From<&ProviderError> for FailureKind {
    fn from(error: &ProviderError) -> Self {
        match error {
            ProviderError::Unavailable { .. } => Self::Unavailable,
            ProviderError::Timeout { .. } => Self::Timeout,
            ProviderError::QuotaExceeded(_) => Self::QuotaExceeded,
            ProviderError::InvalidName { .. } => Self::InvalidName,
            ProviderError::NotFound(_) => Self::NotFound,
            ProviderError::AlreadyExists(_) => Self::AlreadyExists,
        }
    }
}

/// A failure recorded for one volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RotationFailure {
    /// Volume the failure belongs to.
    pub volume: VolumeId,
    /// Step that failed.
    pub stage: FailureStage,
    /// Snapshot involved, if any.
    pub snapshot: Option<SnapshotId>,
    /// Failure classification.
    pub kind: FailureKind,
    /// Human-readable detail.
    pub message: String,
}

impl RotationFailure {
    /// Builds a failure from a provider error.
    #[must_use]
    pub fn from_provider(
        volume: &VolumeId,
        stage: FailureStage,
        snapshot: Option<&SnapshotId>,
        error: &ProviderError,
    ) -> Self {
        Self {
            volume: volume.clone(),
            stage,
            snapshot: snapshot.cloned(),
            kind: FailureKind::from(error),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for RotationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.volume, self.stage)?;
        if let Some(snapshot) = &self.snapshot {
            write!(f, " {snapshot}")?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Outcome of rotating one volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeReport {
    /// The volume.
    pub volume: VolumeId,
    /// Snapshot created this run (or, in a dry run, the one that would be).
    pub created: Option<SnapshotId>,
    /// Snapshots deleted (or that would be deleted), in descending name order.
    pub deleted: Vec<SnapshotId>,
    /// Snapshots retained, in descending name order.
    pub retained: Vec<SnapshotId>,
    /// Failures, in the order they occurred.
    pub failures: Vec<RotationFailure>,
}

impl VolumeReport {
    /// Creates an empty report for `volume`.
    #[must_use]
    pub const fn new(volume: VolumeId) -> Self {
        Self {
            volume,
            created: None,
            deleted: Vec::new(),
            retained: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Returns `true` if anything failed for this volume.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Result of one rotation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RotationReport {
    /// Cadence rotated.
    pub cadence: Cadence,
    /// Run identifier, also recorded on log spans.
    pub run_id: String,
    /// Whether this was a plan only (nothing created or deleted).
    pub dry_run: bool,
    /// Per-volume outcomes, ordered by volume name.
    pub volumes: Vec<VolumeReport>,
    /// Volumes not started because of the deadline or a halt.
    pub skipped: Vec<VolumeId>,
    /// Reason the run stopped starting new volumes, if it did.
    pub halted: Option<String>,
    /// Run duration in milliseconds.
    pub duration_ms: u64,
}

impl RotationReport {
    /// Creates an empty report.
    #[must_use]
    pub const fn new(cadence: Cadence, run_id: String, dry_run: bool) -> Self {
        Self {
            cadence,
            run_id,
            dry_run,
            volumes: Vec::new(),
            skipped: Vec::new(),
            halted: None,
            duration_ms: 0,
        }
    }

    /// Number of snapshots created.
    #[must_use]
    pub fn created(&self) -> usize {
        self.volumes.iter().filter(|v| v.created.is_some()).count()
    }

    /// Number of snapshots deleted.
    #[must_use]
    pub fn deleted(&self) -> usize {
        self.volumes.iter().map(|v| v.deleted.len()).sum()
    }

    /// All failures across volumes.
    pub fn failures(&self) -> impl Iterator<Item = &RotationFailure> {
        self.volumes.iter().flat_map(|v| v.failures.iter())
    }

    /// Returns `true` if any volume failed, a volume was skipped, or the run
    /// halted.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.halted.is_some() || !self.skipped.is_empty() || self.failures().next().is_some()
    }

    /// Returns the report for `volume`, if it was processed.
    #[must_use]
    pub fn volume(&self, volume: &str) -> Option<&VolumeReport> {
        self.volumes.iter().find(|v| v.volume.as_str() == volume)
    }

    /// Returns a human-readable summary of the run.
    #[must_use]
    pub fn summary(&self) -> String {
        let (created, deleted) = if self.dry_run {
            ("would create", "would delete")
        } else {
            ("created", "deleted")
        };
        let failures = self.failures().count();

        let mut summary = format!(
            "{}: {} {}, {} {} across {} volume(s)",
            self.cadence,
            created,
            self.created(),
            deleted,
            self.deleted(),
            self.volumes.len(),
        );
        if failures > 0 {
            summary.push_str(&format!(", {failures} failure(s)"));
        }
        if !self.skipped.is_empty() {
            summary.push_str(&format!(", {} skipped", self.skipped.len()));
        }
        if let Some(reason) = &self.halted {
            summary.push_str(&format!(", halted: {reason}"));
        }
        summary.push_str(&format!(" in {}ms", self.duration_ms));
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> RotationReport {
        let mut report = RotationReport::new(Cadence::daily(), "run-1".to_string(), false);
        let mut ok = VolumeReport::new(VolumeId::new("a"));
        ok.created = Some(SnapshotId::new("a-daily-20240104"));
        ok.deleted = vec![SnapshotId::new("a-daily-20240101")];
        let mut failed = VolumeReport::new(VolumeId::new("b"));
        failed.failures.push(RotationFailure::from_provider(
            &failed.volume,
            FailureStage::Create,
            Some(&SnapshotId::new("b-daily-20240104")),
            &ProviderError::QuotaExceeded("SNAPSHOTS".to_string()),
        ));
        report.volumes = vec![ok, failed];
        report.duration_ms = 12;
        report
    }

    #[test]
    fn test_counts() {
        let report = report();
        assert_eq!(report.created(), 1);
        assert_eq!(report.deleted(), 1);
        assert_eq!(report.failures().count(), 1);
        assert!(report.has_failures());
        assert!(report.volume("b").is_some_and(VolumeReport::has_failures));
    }

    #[test]
    fn test_summary() {
        assert_eq!(
            report().summary(),
            "daily: created 1, deleted 1 across 2 volume(s), 1 failure(s) in 12ms"
        );
    }

    #[test]
    fn test_dry_run_summary() {
        let mut report = RotationReport::new(Cadence::weekly(), "run-2".to_string(), true);
        report.skipped.push(VolumeId::new("c"));
        assert_eq!(
            report.summary(),
            "weekly: would create 0, would delete 0 across 0 volume(s), 1 skipped in 0ms"
        );
        assert!(report.has_failures());
    }

    #[test]
    fn test_failure_display() {
        let report = report();
        let failure = report.failures().next().unwrap();
        assert_eq!(failure.kind, FailureKind::QuotaExceeded);
        assert_eq!(
            failure.to_string(),
            "b [create] b-daily-20240104: snapshot quota exceeded: SNAPSHOTS"
        );
    }
}
