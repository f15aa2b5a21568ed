//! Trigger layer.
//!
//! A scheduler names a cadence; the trigger resolves it through the
//! [`CadenceTable`] and runs the orchestrator. The report is returned to the
//! caller whatever the per-volume outcome, and every failure is logged at
//! `error` so alerting does not depend on the caller inspecting it.
//!
//! With the `http` feature, [`http`] exposes the trigger as
//! `GET /cron/{cadence}`.

#[cfg(feature = "http")]
pub mod http;

use crate::config::HttpSettings;
use crate::models::{CadencePolicy, CadenceTable};
use crate::provider::ProviderClient;
use crate::rotation::{RotationOrchestrator, RotationReport};
use crate::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Maps scheduled invocations to rotation runs.
pub struct CronTrigger<P: ProviderClient> {
    orchestrator: Arc<RotationOrchestrator<P>>,
    cadences: CadenceTable,
}

impl<P: ProviderClient> CronTrigger<P> {
    /// Creates a trigger over `cadences`.
    #[must_use]
    pub const fn new(orchestrator: Arc<RotationOrchestrator<P>>, cadences: CadenceTable) -> Self {
        Self {
            orchestrator,
            cadences,
        }
    }

    /// Returns the cadence table.
    #[must_use]
    pub const fn cadences(&self) -> &CadenceTable {
        &self.cadences
    }

    /// Returns the orchestrator.
    #[must_use]
    pub const fn orchestrator(&self) -> &Arc<RotationOrchestrator<P>> {
        &self.orchestrator
    }

    /// Looks up the policy of `cadence`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnknownCadence`] if the table has no entry.
    pub fn policy(&self, cadence: &str) -> Result<&CadencePolicy> {
        self.cadences.get(cadence)
    }

    /// Runs the rotation for `cadence` now.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnknownCadence`] for a cadence missing from the
    /// table, or any error of [`RotationOrchestrator::rotate_policy`].
    pub fn fire(&self, cadence: &str) -> Result<RotationReport> {
        self.fire_at(cadence, Utc::now())
    }

    /// Runs the rotation for `cadence` as if the time were `now`.
    ///
    /// # Errors
    ///
    /// See [`Self::fire`].
    pub fn fire_at(&self, cadence: &str, now: DateTime<Utc>) -> Result<RotationReport> {
        let policy = self.policy(cadence)?;
        tracing::info!(cadence, "Cron trigger fired");
        let report = self.orchestrator.rotate_at(policy, now)?;
        log_report(&report);
        Ok(report)
    }

    /// Plans the rotation for `cadence` without changing anything.
    ///
    /// # Errors
    ///
    /// See [`Self::fire`].
    pub fn plan(&self, cadence: &str) -> Result<RotationReport> {
        let policy = self.policy(cadence)?;
        self.orchestrator.plan_at(policy, Utc::now())
    }
}

fn log_report(report: &RotationReport) {
    for failure in report.failures() {
        tracing::error!(
            run_id = %report.run_id,
            cadence = %report.cadence,
            volume = %failure.volume,
            stage = failure.stage.as_str(),
            kind = failure.kind.as_str(),
            error = %failure.message,
            "Snapshot rotation failed for volume"
        );
    }
    if let Some(reason) = &report.halted {
        tracing::error!(
            run_id = %report.run_id,
            cadence = %report.cadence,
            reason = %reason,
            "Rotation run halted"
        );
    }
    if !report.skipped.is_empty() {
        tracing::error!(
            run_id = %report.run_id,
            cadence = %report.cadence,
            skipped = report.skipped.len(),
            "Rotation run left volumes unrotated"
        );
    }
}

/// Serves the HTTP trigger until interrupted.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or the server fails.
#[cfg(feature = "http")]
pub fn serve_http<P: ProviderClient + 'static>(
    trigger: Arc<CronTrigger<P>>,
    settings: &HttpSettings,
) -> Result<()> {
    http::serve(trigger, settings)
}

/// Serves the HTTP trigger (feature not enabled).
///
/// # Errors
///
/// Always returns [`crate::Error::FeatureNotEnabled`].
#[cfg(not(feature = "http"))]
#[allow(clippy::needless_pass_by_value)]
pub fn serve_http<P: ProviderClient + 'static>(
    _trigger: Arc<CronTrigger<P>>,
    _settings: &HttpSettings,
) -> Result<()> {
    Err(crate::Error::FeatureNotEnabled("http".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::provider::InMemoryProvider;
    use crate::rotation::RotationOptions;
    use chrono::TimeZone;

    fn trigger() -> (Arc<InMemoryProvider>, CronTrigger<InMemoryProvider>) {
        let provider = Arc::new(InMemoryProvider::new());
        provider.add_volume("disk1");
        let orchestrator = Arc::new(RotationOrchestrator::new(
            Arc::clone(&provider),
            RotationOptions::default(),
        ));
        (provider, CronTrigger::new(orchestrator, CadenceTable::default()))
    }

    #[test]
    fn test_fire_uses_table_policy() {
        let (provider, trigger) = trigger();
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 10, 15, 0).unwrap();

        let report = trigger.fire_at("monthly", now).unwrap();
        assert_eq!(report.created(), 1);
        assert_eq!(provider.snapshot_names("disk1-"), vec!["disk1-monthly-202403"]);
    }

    #[test]
    fn test_unknown_cadence() {
        let (provider, trigger) = trigger();
        assert!(matches!(trigger.fire("yearly"), Err(Error::UnknownCadence(_))));
        assert!(provider.calls().is_empty());
    }
}
