//! Rotation integration tests.
//!
//! Drives full rotation runs against the in-memory and filesystem providers:
//! - Exact-N retention over repeated runs
//! - Cadence partitioning (`daily` vs `dailyx` vs `weekly`)
//! - Create-before-delete ordering and failure isolation
//! - Deadlines, halts, and idempotent deletes

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use chrono::{DateTime, TimeZone, Utc};
use snaprot::provider::{
    FaultOp, FilesystemProvider, InMemoryProvider, ProviderCall, ProviderError, ProviderResult,
};
use snaprot::{
    CadencePolicy, CadenceTable, CronTrigger, Error, FailureKind, FailureStage, ProviderClient,
    RotationOptions, RotationOrchestrator,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

// ============================================================================
// Test Helpers
// ============================================================================

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, d, 3, 0, 0).unwrap()
}

fn policy(cadence: &str, format: &str, retention: u32) -> CadencePolicy {
    CadencePolicy::new(cadence, format, retention).unwrap()
}

fn orchestrator(provider: &Arc<InMemoryProvider>) -> RotationOrchestrator<InMemoryProvider> {
    RotationOrchestrator::new(Arc::clone(provider), RotationOptions::default())
}

// ============================================================================
// Retention
// ============================================================================

#[test]
fn test_daily_retention_three() {
    let provider = Arc::new(InMemoryProvider::new());
    provider.add_volume("disk1");
    for d in 1..=3 {
        provider.insert_snapshot("disk1", &format!("disk1-daily-2024010{d}"));
    }

    let report = orchestrator(&provider)
        .rotate_at(&policy("daily", "YYYYMMDD", 3), day(4))
        .unwrap();

    let volume = report.volume("disk1").unwrap();
    assert_eq!(volume.created.as_ref().unwrap().as_str(), "disk1-daily-20240104");
    assert_eq!(volume.deleted.len(), 1);
    assert_eq!(volume.deleted[0].as_str(), "disk1-daily-20240101");
    assert_eq!(
        provider.snapshot_names("disk1-daily-"),
        [
            "disk1-daily-20240102",
            "disk1-daily-20240103",
            "disk1-daily-20240104"
        ]
    );
    assert!(!report.has_failures());
}

#[test]
fn test_retention_one_without_history() {
    let provider = Arc::new(InMemoryProvider::new());
    provider.add_volume("disk1");

    let report = orchestrator(&provider)
        .rotate_at(&policy("daily", "YYYYMMDD", 1), day(1))
        .unwrap();

    assert_eq!(report.created(), 1);
    assert_eq!(report.deleted(), 0);
    assert_eq!(provider.snapshot_names("disk1-"), ["disk1-daily-20240101"]);
}

#[test]
fn test_repeated_runs_converge_to_retention() {
    let provider = Arc::new(InMemoryProvider::new());
    provider.add_volume("disk1");
    let orchestrator = orchestrator(&provider);
    let daily = policy("daily", "YYYYMMDD", 4);

    for d in 1..=10 {
        orchestrator.rotate_at(&daily, day(d)).unwrap();
        let expected = usize::try_from(d.min(4)).unwrap();
        assert_eq!(provider.snapshot_names("disk1-daily-").len(), expected);
    }
    assert_eq!(
        provider.snapshot_names("disk1-daily-"),
        [
            "disk1-daily-20240107",
            "disk1-daily-20240108",
            "disk1-daily-20240109",
            "disk1-daily-20240110"
        ]
    );
}

#[test]
fn test_cadences_never_prune_each_other() {
    let provider = Arc::new(InMemoryProvider::new());
    provider.add_volume("disk1");
    for d in 1..=3 {
        provider.insert_snapshot("disk1", &format!("disk1-daily-2024010{d}"));
        provider.insert_snapshot("disk1", &format!("disk1-dailyx-2024010{d}"));
        provider.insert_snapshot("disk1", &format!("disk1-weekly-2023-4{d}"));
    }

    let report = orchestrator(&provider)
        .rotate_at(&policy("daily", "YYYYMMDD", 1), day(4))
        .unwrap();

    assert_eq!(report.deleted(), 3);
    assert_eq!(provider.snapshot_names("disk1-daily-"), ["disk1-daily-20240104"]);
    assert_eq!(provider.snapshot_names("disk1-dailyx-").len(), 3);
    assert_eq!(provider.snapshot_names("disk1-weekly-").len(), 3);
}

#[test]
fn test_volume_prefix_collision_is_partitioned() {
    let provider = Arc::new(InMemoryProvider::new());
    provider.add_volume("db");
    provider.add_volume("db-daily");
    provider.insert_snapshot("db-daily", "db-daily-daily-20240101");
    provider.insert_snapshot("db-daily", "db-daily-daily-20240102");

    let report = orchestrator(&provider)
        .rotate_at(&policy("daily", "YYYYMMDD", 1), day(3))
        .unwrap();

    // `db` lists with its own source volume id, so it never sees the other
    // volume's snapshots even though the names share a prefix.
    assert_eq!(report.volume("db").unwrap().deleted.len(), 0);
    assert_eq!(report.volume("db-daily").unwrap().deleted.len(), 2);
    assert_eq!(provider.snapshot_names("db-daily-20240103"), ["db-daily-20240103"]);
}

// ============================================================================
// Ordering and Failure Isolation
// ============================================================================

#[test]
fn test_create_precedes_every_delete() {
    let provider = Arc::new(InMemoryProvider::new());
    provider.add_volume("disk1");
    for d in 1..=5 {
        provider.insert_snapshot("disk1", &format!("disk1-daily-2024010{d}"));
    }
    provider.clear_calls();

    orchestrator(&provider)
        .rotate_at(&policy("daily", "YYYYMMDD", 2), day(6))
        .unwrap();

    let calls = provider.calls();
    let create = calls
        .iter()
        .position(|c| matches!(c, ProviderCall::Create { .. }))
        .unwrap();
    let deletes: Vec<usize> = calls
        .iter()
        .enumerate()
        .filter(|(_, c)| matches!(c, ProviderCall::Delete(_)))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(deletes.len(), 4);
    assert!(deletes.iter().all(|&i| i > create));
}

#[test]
fn test_partial_failure_is_isolated() {
    let provider = Arc::new(InMemoryProvider::new());
    provider.add_volume("a");
    provider.add_volume("b");
    provider.insert_snapshot("a", "a-daily-20240101");
    provider.insert_snapshot("b", "b-daily-20240101");
    provider.fail_times(
        FaultOp::Create,
        Some("a"),
        ProviderError::unavailable("create_snapshot", "backend error"),
        5,
    );

    let report = orchestrator(&provider)
        .rotate_at(&policy("daily", "YYYYMMDD", 1), day(2))
        .unwrap();

    let a = report.volume("a").unwrap();
    assert!(a.created.is_none());
    assert!(a.deleted.is_empty());
    assert_eq!(a.failures.len(), 1);
    assert_eq!(a.failures[0].stage, FailureStage::Create);
    assert_eq!(a.failures[0].kind, FailureKind::Unavailable);

    let b = report.volume("b").unwrap();
    assert!(!b.has_failures());
    assert_eq!(provider.snapshot_names("b-"), ["b-daily-20240102"]);
    // The old snapshot of `a` survives because nothing replaced it.
    assert_eq!(provider.snapshot_names("a-"), ["a-daily-20240101"]);
    assert!(report.halted.is_none());
}

#[test]
fn test_quota_exceeded_skips_deletes() {
    let provider = Arc::new(InMemoryProvider::new());
    provider.add_volume("disk1");
    for d in 1..=3 {
        provider.insert_snapshot("disk1", &format!("disk1-daily-2024010{d}"));
    }
    provider.set_quota(Some(3));
    provider.clear_calls();

    let report = orchestrator(&provider)
        .rotate_at(&policy("daily", "YYYYMMDD", 1), day(4))
        .unwrap();

    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, FailureKind::QuotaExceeded);
    assert_eq!(failures[0].snapshot.as_ref().unwrap().as_str(), "disk1-daily-20240104");
    assert!(!provider.calls().iter().any(|c| matches!(c, ProviderCall::Delete(_))));
    assert_eq!(provider.snapshot_names("disk1-").len(), 3);
}

#[test]
fn test_delete_failure_keeps_other_deletes() {
    let provider = Arc::new(InMemoryProvider::new());
    provider.add_volume("disk1");
    for d in 1..=3 {
        provider.insert_snapshot("disk1", &format!("disk1-daily-2024010{d}"));
    }
    provider.fail_times(
        FaultOp::Delete,
        Some("disk1-daily-20240102"),
        ProviderError::unavailable("delete_snapshot", "backend error"),
        5,
    );

    let report = orchestrator(&provider)
        .rotate_at(&policy("daily", "YYYYMMDD", 1), day(4))
        .unwrap();

    let volume = report.volume("disk1").unwrap();
    assert_eq!(volume.created.as_ref().unwrap().as_str(), "disk1-daily-20240104");
    assert_eq!(volume.deleted.len(), 2);
    assert_eq!(volume.failures.len(), 1);
    assert_eq!(volume.failures[0].stage, FailureStage::Delete);
    assert_eq!(
        provider.snapshot_names("disk1-"),
        ["disk1-daily-20240102", "disk1-daily-20240104"]
    );
}

#[test]
fn test_delete_of_vanished_snapshot_counts_as_deleted() {
    let provider = Arc::new(InMemoryProvider::new());
    provider.add_volume("disk1");
    provider.insert_snapshot("disk1", "disk1-daily-20240101");
    provider.fail_next(
        FaultOp::Delete,
        Some("disk1-daily-20240101"),
        ProviderError::NotFound("disk1-daily-20240101".to_string()),
    );

    let report = orchestrator(&provider)
        .rotate_at(&policy("daily", "YYYYMMDD", 1), day(2))
        .unwrap();

    assert!(!report.has_failures());
    assert_eq!(report.deleted(), 1);
}

#[test]
fn test_rerun_in_same_period_changes_nothing() {
    let provider = Arc::new(InMemoryProvider::new());
    provider.add_volume("disk1");
    let orchestrator = orchestrator(&provider);
    let daily = policy("daily", "YYYYMMDD", 2);

    orchestrator.rotate_at(&daily, day(1)).unwrap();
    let report = orchestrator.rotate_at(&daily, day(1)).unwrap();

    let failure = report.failures().next().unwrap();
    assert_eq!(failure.kind, FailureKind::AlreadyExists);
    assert_eq!(provider.snapshot_names("disk1-"), ["disk1-daily-20240101"]);
}

// ============================================================================
// Run Control
// ============================================================================

#[test]
fn test_provider_invalid_name_halts_run() {
    let provider = Arc::new(InMemoryProvider::new());
    for name in ["a", "b", "c"] {
        provider.add_volume(name);
    }
    provider.fail_next(
        FaultOp::Create,
        Some("a"),
        ProviderError::InvalidName {
            name: "a-daily-20240101".to_string(),
            reason: "rejected".to_string(),
        },
    );
    let orchestrator = RotationOrchestrator::new(
        Arc::clone(&provider),
        RotationOptions::default().with_max_concurrent(1),
    );

    let report = orchestrator
        .rotate_at(&policy("daily", "YYYYMMDD", 1), day(1))
        .unwrap();

    assert!(report.halted.is_some());
    assert_eq!(report.volumes.len(), 1);
    assert_eq!(report.skipped.len(), 2);
    assert!(provider.snapshot_names("b-").is_empty());
    assert!(report.summary().contains("halted"));
}

#[test]
fn test_deadline_leaves_volumes_unstarted() {
    let provider = Arc::new(InMemoryProvider::new());
    for name in ["a", "b", "c"] {
        provider.add_volume(name);
    }
    provider.set_latency(Some(Duration::from_millis(100)));
    let orchestrator = RotationOrchestrator::new(
        Arc::clone(&provider),
        RotationOptions::default()
            .with_max_concurrent(1)
            .with_deadline(Some(Duration::from_millis(200))),
    );

    let report = orchestrator
        .rotate_at(&policy("daily", "YYYYMMDD", 1), day(1))
        .unwrap();

    assert!(!report.skipped.is_empty());
    assert_eq!(report.volumes.len() + report.skipped.len(), 3);
    // Started volumes run to completion.
    assert!(report.volumes.iter().all(|v| v.created.is_some()));
    assert!(report.has_failures());
}

#[test]
fn test_list_volumes_failure_is_an_error() {
    let provider = Arc::new(InMemoryProvider::new());
    provider.add_volume("disk1");
    provider.fail_next(
        FaultOp::ListVolumes,
        None,
        ProviderError::unavailable("list_volumes", "backend error"),
    );

    let err = orchestrator(&provider)
        .rotate_at(&policy("daily", "YYYYMMDD", 1), day(1))
        .unwrap_err();

    assert!(matches!(err, Error::Provider(ProviderError::Unavailable { .. })));
    assert!(provider.snapshot_names("").is_empty());
}

#[test]
fn test_invalid_configuration_makes_no_calls() {
    let provider = Arc::new(InMemoryProvider::new());
    provider.add_volume("disk1");
    let orchestrator = orchestrator(&provider);

    assert!(matches!(
        orchestrator.rotate("daily", "YYYYMMDD", 0),
        Err(Error::InvalidInput(_))
    ));
    assert!(matches!(
        orchestrator.rotate("hourly", "YYYYMMDD", 24),
        Err(Error::InvalidFormat { .. })
    ));
    assert!(provider.calls().is_empty());
}

// ============================================================================
// Trigger and Filesystem Provider
// ============================================================================

#[test]
fn test_trigger_uses_cadence_table() {
    let provider = Arc::new(InMemoryProvider::new());
    provider.add_volume("disk1");
    let trigger = CronTrigger::new(Arc::new(orchestrator(&provider)), CadenceTable::default());

    let now = Utc.with_ymd_and_hms(2024, 3, 15, 12, 30, 0).unwrap();
    let weekly = trigger.fire_at("weekly", now).unwrap();
    let hourly = trigger.fire_at("hourly", now).unwrap();

    assert_eq!(
        weekly.volume("disk1").unwrap().created.as_ref().unwrap().as_str(),
        "disk1-weekly-2024-11"
    );
    assert_eq!(
        hourly.volume("disk1").unwrap().created.as_ref().unwrap().as_str(),
        "disk1-hourly-202403151230"
    );
    assert!(matches!(
        trigger.fire("fortnightly"),
        Err(Error::UnknownCadence(_))
    ));
}

#[test]
fn test_filesystem_provider_end_to_end() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");
    {
        let provider = Arc::new(FilesystemProvider::open(&path).unwrap());
        provider.add_volume("disk1").unwrap();
        provider.add_volume("disk2").unwrap();
        let orchestrator = RotationOrchestrator::new(provider, RotationOptions::default());
        let daily = policy("daily", "YYYYMMDD", 3);
        for d in 1..=5 {
            let report = orchestrator.rotate_at(&daily, day(d)).unwrap();
            assert!(!report.has_failures(), "{}", report.summary());
        }
    }

    let reopened = FilesystemProvider::open(&path).unwrap();
    let volumes: Vec<_> = reopened
        .list_volumes()
        .unwrap()
        .collect::<ProviderResult<Vec<_>>>()
        .unwrap();
    assert_eq!(volumes.len(), 2);

    let disk1 = volumes.iter().find(|v| v.id.as_str() == "disk1").unwrap();
    let filter = snaprot::SnapshotFilter::new(disk1.provider_id.clone(), "disk1-daily-");
    let mut names: Vec<String> = reopened
        .list_snapshots(&filter)
        .unwrap()
        .map(|s| s.unwrap().id.as_str().to_string())
        .collect();
    names.sort();
    assert_eq!(
        names,
        [
            "disk1-daily-20240103",
            "disk1-daily-20240104",
            "disk1-daily-20240105"
        ]
    );
}
