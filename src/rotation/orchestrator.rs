//! Rotation driver.
//!
//! For every volume the provider lists, one unit of work runs in order:
//! list the partition's snapshots, name the new snapshot, create it, decide
//! retention over the existing snapshots plus the new one, then delete the
//! losers. A failed create skips the deletions for that volume, so a volume
//! is never left with fewer snapshots of a cadence than before the run.
//!
//! Volumes are independent and run on a bounded pool of scoped threads. A
//! failure on one volume is recorded in its [`VolumeReport`] and never
//! stops the others; only configuration errors and a failed volume listing
//! fail the whole call.
//!
//! # Cancellation
//!
//! When [`RotationOptions::deadline`] elapses, workers stop picking up new
//! volumes; a volume already in progress runs to completion. Volumes never
//! started are listed in [`RotationReport::skipped`].

use super::lock::PartitionLocks;
use super::policy::RetentionPolicy;
use super::report::{FailureKind, FailureStage, RotationFailure, RotationReport, VolumeReport};
use crate::models::{CadencePolicy, Snapshot, SnapshotId, Volume, VolumeId};
use crate::naming::SnapshotNamer;
use crate::observability::{RunContext, current_run_id, enter_run_context};
use crate::provider::{
    DeleteOutcome, ProviderClient, ProviderError, ProviderResult, SnapshotFilter,
};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, instrument, warn};

/// Default number of volumes rotated in parallel.
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

/// Execution options for rotation runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationOptions {
    /// Maximum volumes processed at the same time.
    pub max_concurrent: usize,
    /// Time after which no new volume is started.
    pub deadline: Option<Duration>,
    /// Whether overlapping runs are excluded per (volume, cadence).
    pub serialize: bool,
}

impl Default for RotationOptions {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            deadline: None,
            serialize: true,
        }
    }
}

impl RotationOptions {
    /// Loads options from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies environment variable overrides.
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `SNAPROT_MAX_CONCURRENT` | Parallel volumes | 4 |
    /// | `SNAPROT_DEADLINE_SECS` | Run deadline, 0 for none | none |
    /// | `SNAPROT_SERIALIZE` | Per-partition locking | true |
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("SNAPROT_MAX_CONCURRENT")
            && let Ok(parsed) = v.parse::<usize>()
        {
            self.max_concurrent = parsed.max(1);
        }
        if let Ok(v) = std::env::var("SNAPROT_DEADLINE_SECS")
            && let Ok(parsed) = v.parse::<u64>()
        {
            self.deadline = (parsed > 0).then(|| Duration::from_secs(parsed));
        }
        if let Ok(v) = std::env::var("SNAPROT_SERIALIZE") {
            let v = v.to_lowercase();
            self.serialize = !(v == "false" || v == "0" || v == "no");
        }
        self
    }

    /// Sets the worker count.
    #[must_use]
    pub const fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    /// Sets the run deadline.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Enables or disables per-partition locking.
    #[must_use]
    pub const fn with_serialize(mut self, serialize: bool) -> Self {
        self.serialize = serialize;
        self
    }
}

/// Drives rotation runs against a provider.
pub struct RotationOrchestrator<P: ProviderClient> {
    provider: Arc<P>,
    options: RotationOptions,
    locks: PartitionLocks,
}

impl<P: ProviderClient> RotationOrchestrator<P> {
    /// Creates an orchestrator for `provider`.
    #[must_use]
    pub fn new(provider: Arc<P>, options: RotationOptions) -> Self {
        Self {
            provider,
            options,
            locks: PartitionLocks::new(),
        }
    }

    /// Returns the provider.
    #[must_use]
    pub const fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    /// Returns the execution options.
    #[must_use]
    pub const fn options(&self) -> &RotationOptions {
        &self.options
    }

    /// Rotates every volume for `cadence` using the current time.
    ///
    /// # Errors
    ///
    /// Returns a configuration error ([`Error::InvalidInput`],
    /// [`Error::InvalidFormat`]) before any provider call, or
    /// [`Error::Provider`] if volumes cannot be listed.
    pub fn rotate(&self, cadence: &str, format: &str, retention: u32) -> Result<RotationReport> {
        let policy = CadencePolicy::new(cadence, format, retention)?;
        self.rotate_policy(&policy)
    }

    /// Rotates every volume under `policy` using the current time.
    ///
    /// # Errors
    ///
    /// See [`Self::rotate`].
    pub fn rotate_policy(&self, policy: &CadencePolicy) -> Result<RotationReport> {
        self.rotate_at(policy, Utc::now())
    }

    /// Rotates every volume under `policy` as if the time were `now`.
    ///
    /// # Errors
    ///
    /// See [`Self::rotate`].
    pub fn rotate_at(&self, policy: &CadencePolicy, now: DateTime<Utc>) -> Result<RotationReport> {
        self.run(policy, now, false)
    }

    /// Computes what a run at `now` would create and delete, without
    /// creating or deleting anything.
    ///
    /// # Errors
    ///
    /// See [`Self::rotate`].
    pub fn plan_at(&self, policy: &CadencePolicy, now: DateTime<Utc>) -> Result<RotationReport> {
        self.run(policy, now, true)
    }

    #[instrument(
        name = "snaprot.rotate",
        skip_all,
        fields(
            run_id = tracing::field::Empty,
            cadence = %policy.cadence,
            format = %policy.format,
            retention = policy.retention,
            dry_run = dry_run,
            provider = self.provider.name()
        )
    )]
    fn run(
        &self,
        policy: &CadencePolicy,
        now: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<RotationReport> {
        let start = Instant::now();
        validate_policy(policy, &now)?;

        let context = current_run_id().map_or_else(RunContext::new, RunContext::from_id);
        let run_id = context.run_id().to_string();
        tracing::Span::current().record("run_id", run_id.as_str());
        let _context = enter_run_context(context.clone());

        let mut volumes = self
            .provider
            .list_volumes()?
            .collect::<ProviderResult<Vec<Volume>>>()?;
        volumes.sort_by(|a, b| a.id.cmp(&b.id));
        debug!(volumes = volumes.len(), "Listed volumes");

        let deadline = self.options.deadline.map(|d| start + d);
        let next = AtomicUsize::new(0);
        let halted: Mutex<Option<String>> = Mutex::new(None);
        let finished: Mutex<Vec<(usize, VolumeReport)>> = Mutex::new(Vec::new());

        let work = || {
            let _context = enter_run_context(context.clone());
            loop {
                if halted.lock().unwrap_or_else(PoisonError::into_inner).is_some() {
                    break;
                }
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    break;
                }
                let index = next.fetch_add(1, Ordering::SeqCst);
                let Some(volume) = volumes.get(index) else {
                    break;
                };

                let report = self.rotate_volume(volume, policy, &now, dry_run, &run_id);
                if let Some(reason) = halt_reason(&report) {
                    halted
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .get_or_insert(reason);
                }
                finished
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push((index, report));
            }
        };

        let workers = self.options.max_concurrent.max(1).min(volumes.len());
        std::thread::scope(|scope| {
            let work = &work;
            let mut spawned = 0;
            for worker in 0..workers {
                let spawn = std::thread::Builder::new()
                    .name(format!("snaprot-worker-{worker}"))
                    .spawn_scoped(scope, move || work());
                match spawn {
                    Ok(_) => spawned += 1,
                    Err(e) => warn!(worker, error = %e, "Failed to spawn rotation worker"),
                }
            }
            if spawned == 0 && workers > 0 {
                work();
            }
        });

        let mut finished = finished.into_inner().unwrap_or_else(PoisonError::into_inner);
        finished.sort_by_key(|(index, _)| *index);

        let mut report = RotationReport::new(policy.cadence.clone(), run_id, dry_run);
        report.halted = halted.into_inner().unwrap_or_else(PoisonError::into_inner);
        let mut done = finished.iter().map(|(index, _)| *index).peekable();
        for (index, volume) in volumes.iter().enumerate() {
            if done.peek() == Some(&index) {
                done.next();
            } else {
                report.skipped.push(volume.id.clone());
            }
        }
        report.volumes = finished.into_iter().map(|(_, v)| v).collect();
        report.duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        record_run_metrics(&report);

        if !report.skipped.is_empty() {
            warn!(
                skipped = report.skipped.len(),
                halted = report.halted.as_deref().unwrap_or("deadline exceeded"),
                "Rotation run stopped before all volumes were started"
            );
        }
        info!(
            created = report.created(),
            deleted = report.deleted(),
            failures = report.failures().count(),
            duration_ms = report.duration_ms,
            "Rotation run completed"
        );

        Ok(report)
    }

    fn rotate_volume(
        &self,
        volume: &Volume,
        policy: &CadencePolicy,
        now: &DateTime<Utc>,
        dry_run: bool,
        run_id: &str,
    ) -> VolumeReport {
        let _span = info_span!(
            "snaprot.rotate.volume",
            run_id,
            volume = %volume.id,
            cadence = %policy.cadence
        )
        .entered();
        let mut report = VolumeReport::new(volume.id.clone());

        let _guard = if self.options.serialize && !dry_run {
            let Some(guard) = self.locks.try_acquire(&volume.id, &policy.cadence) else {
                report.failures.push(RotationFailure {
                    volume: volume.id.clone(),
                    stage: FailureStage::Lock,
                    snapshot: None,
                    kind: FailureKind::Locked,
                    message: format!(
                        "another run is rotating {} for cadence {}",
                        volume.id, policy.cadence
                    ),
                });
                log_failures(&report);
                return report;
            };
            Some(guard)
        } else {
            None
        };

        let filter = SnapshotFilter::new(
            volume.provider_id.clone(),
            SnapshotNamer::prefix(&volume.id, &policy.cadence),
        );
        let existing = match self.list_partition(volume, policy, &filter) {
            Ok(existing) => existing,
            Err(e) => {
                report.failures.push(RotationFailure::from_provider(
                    &volume.id,
                    FailureStage::List,
                    None,
                    &e,
                ));
                log_failures(&report);
                return report;
            },
        };

        let name = match SnapshotNamer::name(&volume.id, &policy.cadence, now, &policy.format) {
            Ok(name) => name,
            Err(e) => {
                report.failures.push(RotationFailure {
                    volume: volume.id.clone(),
                    stage: FailureStage::Name,
                    snapshot: None,
                    kind: FailureKind::InvalidName,
                    message: e.to_string(),
                });
                log_failures(&report);
                return report;
            },
        };

        let created = if dry_run {
            planned_snapshot(volume, &name, &existing)
        } else {
            match self.provider.create_snapshot(volume, &name) {
                Ok(snapshot) => {
                    info!(snapshot = %snapshot.id, "Created snapshot");
                    metrics::counter!(
                        "rotation_snapshots_created_total",
                        "cadence" => policy.cadence.to_string()
                    )
                    .increment(1);
                    snapshot
                },
                Err(e) => {
                    report.failures.push(RotationFailure::from_provider(
                        &volume.id,
                        FailureStage::Create,
                        Some(&name),
                        &e,
                    ));
                    log_failures(&report);
                    return report;
                },
            }
        };
        report.created = Some(created.id.clone());

        let decision = RetentionPolicy::decide(&existing, &created, policy.retention);
        report.retained = decision.keep.iter().map(|s| s.id.clone()).collect();

        for snapshot in decision.remove {
            if dry_run {
                report.deleted.push(snapshot.id);
                continue;
            }
            match self.provider.delete_snapshot(&snapshot) {
                Ok(DeleteOutcome::Deleted) => {
                    info!(snapshot = %snapshot.id, "Deleted expired snapshot");
                    metrics::counter!(
                        "rotation_snapshots_deleted_total",
                        "cadence" => policy.cadence.to_string()
                    )
                    .increment(1);
                    report.deleted.push(snapshot.id);
                },
                Ok(DeleteOutcome::NotFound) | Err(ProviderError::NotFound(_)) => {
                    debug!(snapshot = %snapshot.id, "Expired snapshot already gone");
                    report.deleted.push(snapshot.id);
                },
                Err(e) => {
                    report.failures.push(RotationFailure::from_provider(
                        &volume.id,
                        FailureStage::Delete,
                        Some(&snapshot.id),
                        &e,
                    ));
                },
            }
        }

        log_failures(&report);
        report
    }

    /// Lists the partition and drops anything the provider returned that is
    /// not strictly inside it.
    fn list_partition(
        &self,
        volume: &Volume,
        policy: &CadencePolicy,
        filter: &SnapshotFilter,
    ) -> ProviderResult<Vec<Snapshot>> {
        let listed = self
            .provider
            .list_snapshots(filter)?
            .collect::<ProviderResult<Vec<Snapshot>>>()?;
        let total = listed.len();
        let existing: Vec<Snapshot> = listed
            .into_iter()
            .filter(|s| {
                filter.matches(s)
                    && SnapshotNamer::matches(s.id.as_str(), &volume.id, &policy.cadence)
            })
            .collect();
        if existing.len() < total {
            warn!(
                ignored = total - existing.len(),
                filter = %filter,
                "Provider returned snapshots outside the partition"
            );
        }
        debug!(existing = existing.len(), "Listed partition snapshots");
        Ok(existing)
    }
}

/// Rejects policies that cannot produce a valid snapshot for any volume.
///
/// The sample name uses the shortest possible volume name, so a failure here
/// means every volume would fail the same way.
fn validate_policy(policy: &CadencePolicy, now: &DateTime<Utc>) -> Result<()> {
    if policy.retention == 0 {
        return Err(Error::InvalidInput(format!(
            "retention for cadence '{}' must be at least 1",
            policy.cadence
        )));
    }
    SnapshotNamer::name(&VolumeId::new("a"), &policy.cadence, now, &policy.format).map(|_| ())
}

/// The snapshot a dry run would create; an existing one with the same name
/// stands in for it.
fn planned_snapshot(volume: &Volume, name: &SnapshotId, existing: &[Snapshot]) -> Snapshot {
    existing
        .iter()
        .find(|s| s.id == *name)
        .cloned()
        .unwrap_or_else(|| Snapshot {
            id: name.clone(),
            provider_id: String::new(),
            source_volume_id: volume.provider_id.clone(),
            created_at: None,
        })
}

/// A provider rejecting a locally valid name means the format table is
/// broken; starting more volumes would fail the same way.
fn halt_reason(report: &VolumeReport) -> Option<String> {
    report
        .failures
        .iter()
        .find(|f| f.stage == FailureStage::Create && f.kind.halts_run())
        .map(|f| format!("provider rejected snapshot name: {}", f.message))
}

fn log_failures(report: &VolumeReport) {
    for failure in &report.failures {
        warn!(
            stage = failure.stage.as_str(),
            kind = failure.kind.as_str(),
            snapshot = failure.snapshot.as_ref().map(SnapshotId::as_str),
            error = %failure.message,
            "Rotation step failed"
        );
    }
}

fn record_run_metrics(report: &RotationReport) {
    let cadence = report.cadence.to_string();
    metrics::counter!(
        "rotation_runs_total",
        "cadence" => cadence.clone(),
        "dry_run" => report.dry_run.to_string()
    )
    .increment(1);
    for failure in report.failures() {
        metrics::counter!(
            "rotation_failures_total",
            "cadence" => cadence.clone(),
            "stage" => failure.stage.as_str(),
            "kind" => failure.kind.as_str()
        )
        .increment(1);
    }
    #[allow(clippy::cast_precision_loss)]
    metrics::histogram!("rotation_duration_ms", "cadence" => cadence)
        .record(report.duration_ms as f64);
}
