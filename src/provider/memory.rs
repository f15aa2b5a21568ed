//! In-memory provider.
//!
//! Keeps volumes and snapshots in process memory, records every call in a
//! journal, and supports injected faults. Used by tests and by
//! `snaprot --provider memory` for rehearsals.

use super::{
    DeleteOutcome, Listing, ProviderClient, ProviderError, ProviderResult, SnapshotFilter,
};
use crate::models::{Snapshot, SnapshotId, Volume, VolumeId};
use crate::naming::SnapshotNamer;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A call observed by the in-memory provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    /// `list_volumes`.
    ListVolumes,
    /// `list_snapshots` with its filter.
    ListSnapshots(SnapshotFilter),
    /// `create_snapshot` for a volume.
    Create {
        /// Volume the snapshot was requested for.
        volume: VolumeId,
        /// Requested name.
        name: SnapshotId,
    },
    /// `delete_snapshot`.
    Delete(SnapshotId),
}

/// Operation a fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOp {
    /// `list_volumes`; the error is yielded after the last volume.
    ListVolumes,
    /// `list_snapshots`.
    ListSnapshots,
    /// `create_snapshot`.
    Create,
    /// `delete_snapshot`.
    Delete,
}

#[derive(Debug)]
struct Fault {
    op: FaultOp,
    target: Option<String>,
    error: ProviderError,
    remaining: usize,
}

impl Fault {
    fn applies(&self, op: FaultOp, subject: &str) -> bool {
        self.op == op
            && self.remaining > 0
            && self
                .target
                .as_deref()
                .is_none_or(|target| subject.starts_with(target))
    }
}

#[derive(Debug, Default)]
struct State {
    volumes: Vec<Volume>,
    snapshots: BTreeMap<String, Snapshot>,
    calls: Vec<ProviderCall>,
    faults: Vec<Fault>,
    quota: Option<usize>,
    next_id: u64,
}

impl State {
    fn next_provider_id(&mut self) -> String {
        self.next_id += 1;
        (1000 + self.next_id).to_string()
    }

    fn take_fault(&mut self, op: FaultOp, subject: &str) -> Option<ProviderError> {
        let fault = self
            .faults
            .iter_mut()
            .find(|fault| fault.applies(op, subject))?;
        fault.remaining -= 1;
        Some(fault.error.clone())
    }
}

/// Process-local provider with a call journal and fault injection.
#[derive(Debug, Default)]
pub struct InMemoryProvider {
    state: Mutex<State>,
    latency: Mutex<Option<Duration>>,
}

impl InMemoryProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn simulate_latency(&self) {
        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(latency) = latency {
            std::thread::sleep(latency);
        }
    }

    /// Adds a volume with a generated provider id.
    pub fn add_volume(&self, name: &str) -> Volume {
        let mut state = self.state();
        let provider_id = state.next_provider_id();
        let volume = Volume::new(name, provider_id);
        state.volumes.push(volume.clone());
        volume
    }

    /// Adds a volume with an explicit provider id.
    pub fn add_volume_with_id(&self, name: &str, provider_id: &str) -> Volume {
        let volume = Volume::new(name, provider_id);
        self.state().volumes.push(volume.clone());
        volume
    }

    /// Seeds an existing snapshot of the named volume.
    ///
    /// Returns `None` if the volume does not exist.
    pub fn insert_snapshot(&self, volume: &str, name: &str) -> Option<Snapshot> {
        let mut state = self.state();
        let source = state
            .volumes
            .iter()
            .find(|v| v.id.as_str() == volume)?
            .provider_id
            .clone();
        let snapshot = Snapshot {
            id: SnapshotId::new(name),
            provider_id: state.next_provider_id(),
            source_volume_id: source,
            created_at: Some(Utc::now()),
        };
        state.snapshots.insert(name.to_string(), snapshot.clone());
        Some(snapshot)
    }

    /// Returns all snapshots, ordered by name.
    #[must_use]
    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.state().snapshots.values().cloned().collect()
    }

    /// Returns the names of all snapshots starting with `prefix`, ordered.
    #[must_use]
    pub fn snapshot_names(&self, prefix: &str) -> Vec<String> {
        self.state()
            .snapshots
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Returns the call journal.
    #[must_use]
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.state().calls.clone()
    }

    /// Clears the call journal.
    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Limits the total number of snapshots.
    pub fn set_quota(&self, quota: Option<usize>) {
        self.state().quota = quota;
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    /// Fails the next matching call with `error`.
    ///
    /// `target` restricts the fault to calls whose volume name (or, for
    /// deletes, snapshot name) starts with it.
    pub fn fail_next(&self, op: FaultOp, target: Option<&str>, error: ProviderError) {
        self.fail_times(op, target, error, 1);
    }

    /// Fails the next `times` matching calls with `error`.
    pub fn fail_times(&self, op: FaultOp, target: Option<&str>, error: ProviderError, times: usize) {
        self.state().faults.push(Fault {
            op,
            target: target.map(str::to_string),
            error,
            remaining: times,
        });
    }
}

impl ProviderClient for InMemoryProvider {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn list_volumes(&self) -> ProviderResult<Listing<'_, Volume>> {
        self.simulate_latency();
        let mut state = self.state();
        state.calls.push(ProviderCall::ListVolumes);
        let mut items: Vec<ProviderResult<Volume>> =
            state.volumes.iter().cloned().map(Ok).collect();
        if let Some(error) = state.take_fault(FaultOp::ListVolumes, "") {
            items.push(Err(error));
        }
        Ok(Box::new(items.into_iter()))
    }

    fn list_snapshots(&self, filter: &SnapshotFilter) -> ProviderResult<Listing<'_, Snapshot>> {
        self.simulate_latency();
        let mut state = self.state();
        state.calls.push(ProviderCall::ListSnapshots(filter.clone()));
        if let Some(error) = state.take_fault(FaultOp::ListSnapshots, &filter.name_prefix) {
            return Err(error);
        }
        let matching: Vec<Snapshot> = state
            .snapshots
            .values()
            .filter(|snapshot| filter.matches(snapshot))
            .cloned()
            .collect();
        Ok(Box::new(matching.into_iter().map(Ok)))
    }

    fn create_snapshot(&self, volume: &Volume, name: &SnapshotId) -> ProviderResult<Snapshot> {
        self.simulate_latency();
        let mut state = self.state();
        state.calls.push(ProviderCall::Create {
            volume: volume.id.clone(),
            name: name.clone(),
        });
        if let Some(error) = state.take_fault(FaultOp::Create, volume.id.as_str()) {
            return Err(error);
        }
        if let Err(e) = SnapshotNamer::validate(name.as_str()) {
            return Err(ProviderError::InvalidName {
                name: name.to_string(),
                reason: e.to_string(),
            });
        }
        if state.snapshots.contains_key(name.as_str()) {
            return Err(ProviderError::AlreadyExists(name.to_string()));
        }
        if state
            .quota
            .is_some_and(|quota| state.snapshots.len() >= quota)
        {
            return Err(ProviderError::QuotaExceeded(format!(
                "{} snapshots in project",
                state.snapshots.len()
            )));
        }
        let snapshot = Snapshot {
            id: name.clone(),
            provider_id: state.next_provider_id(),
            source_volume_id: volume.provider_id.clone(),
            created_at: Some(Utc::now()),
        };
        state
            .snapshots
            .insert(name.as_str().to_string(), snapshot.clone());
        Ok(snapshot)
    }

    fn delete_snapshot(&self, snapshot: &Snapshot) -> ProviderResult<DeleteOutcome> {
        self.simulate_latency();
        let mut state = self.state();
        state.calls.push(ProviderCall::Delete(snapshot.id.clone()));
        if let Some(error) = state.take_fault(FaultOp::Delete, snapshot.id.as_str()) {
            return Err(error);
        }
        Ok(match state.snapshots.remove(snapshot.id.as_str()) {
            Some(_) => DeleteOutcome::Deleted,
            None => DeleteOutcome::NotFound,
        })
    }
}
