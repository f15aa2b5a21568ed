//! Filesystem-backed provider.
//!
//! Stores volumes and snapshots in a single JSON state file. Useful for
//! local runs, dry-run rehearsals, and environments without cloud access.
//!
//! Every call reloads the file under an advisory lock on a sibling
//! `<state>.lock` file: reads share the lock, and a load-modify-save cycle
//! holds it exclusively. Several processes sharing one state file therefore
//! see each other's writes and never overwrite them. Saves go to a unique
//! temp file in the same directory and are renamed into place.

use super::{
    DeleteOutcome, Listing, ProviderClient, ProviderError, ProviderResult, SnapshotFilter,
};
use crate::models::{Snapshot, SnapshotId, Volume};
use crate::naming::SnapshotNamer;
use crate::{Error, Result};
use chrono::Utc;
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tempfile::NamedTempFile;

/// Maximum state file size (16MB).
const MAX_STATE_SIZE: u64 = 16 * 1024 * 1024;

/// Serialized provider state.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredState {
    #[serde(default)]
    volumes: Vec<Volume>,
    #[serde(default)]
    snapshots: Vec<Snapshot>,
    /// Maximum number of snapshots, if limited.
    #[serde(default)]
    quota: Option<usize>,
    #[serde(default)]
    next_id: u64,
}

impl StoredState {
    fn next_provider_id(&mut self) -> String {
        self.next_id += 1;
        format!("fs-{}", self.next_id)
    }
}

/// Provider keeping its state in a JSON file.
#[derive(Debug)]
pub struct FilesystemProvider {
    path: PathBuf,
    lock_path: PathBuf,
    lock: Mutex<()>,
}

impl FilesystemProvider {
    /// Opens the provider at `path`, creating an empty state file if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the parent directory or the
    /// state file cannot be created, or the existing file cannot be parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::OperationFailed {
                operation: "create_state_dir".to_string(),
                cause: format!("{}: {e}", parent.display()),
            })?;
        }
        let mut lock_name = path.file_name().map_or_else(|| OsString::from("state"), OsString::from);
        lock_name.push(".lock");
        let provider = Self {
            lock_path: path.with_file_name(lock_name),
            path,
            lock: Mutex::new(()),
        };
        if provider.path.exists() {
            provider.read(|_| ())?;
        } else {
            provider.update(|_| Ok::<_, ProviderError>(()))?;
        }
        Ok(provider)
    }

    /// Returns the state file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Registers a volume; provider ids are assigned sequentially.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if a volume with this name exists, or
    /// a provider error if the state file cannot be read or written.
    pub fn add_volume(&self, name: &str) -> Result<Volume> {
        self.update(|state| {
            if state.volumes.iter().any(|v| v.id.as_str() == name) {
                return Err(Error::InvalidInput(format!("volume '{name}' already exists")));
            }
            let volume = Volume::new(name, state.next_provider_id());
            state.volumes.push(volume.clone());
            Ok(volume)
        })
    }

    /// Limits the total number of snapshots.
    ///
    /// # Errors
    ///
    /// Returns a provider error if the state file cannot be read or written.
    pub fn set_quota(&self, quota: Option<usize>) -> Result<()> {
        self.update(|state| {
            state.quota = quota;
            Ok(())
        })
    }

    fn load(&self) -> ProviderResult<StoredState> {
        let metadata = match fs::metadata(&self.path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(StoredState::default()),
            Err(e) => return Err(ProviderError::unavailable("load_state", e.to_string())),
        };
        if metadata.len() > MAX_STATE_SIZE {
            return Err(ProviderError::unavailable(
                "load_state",
                format!("state file exceeds {MAX_STATE_SIZE} bytes"),
            ));
        }
        let raw = fs::read_to_string(&self.path)
            .map_err(|e| ProviderError::unavailable("load_state", e.to_string()))?;
        if raw.trim().is_empty() {
            return Ok(StoredState::default());
        }
        serde_json::from_str(&raw).map_err(|e| {
            ProviderError::unavailable("load_state", format!("{}: {e}", self.path.display()))
        })
    }

    fn save(&self, state: &StoredState) -> ProviderResult<()> {
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| ProviderError::unavailable("save_state", e.to_string()))?;
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)
            .map_err(|e| ProviderError::unavailable("save_state", e.to_string()))?;
        tmp.write_all(json.as_bytes())
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| ProviderError::unavailable("save_state", e.to_string()))?;
        tmp.persist(&self.path)
            .map(|_| ())
            .map_err(|e| ProviderError::unavailable("save_state", e.error.to_string()))
    }

    fn lock_file(&self) -> ProviderResult<RwLock<File>> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|e| {
                ProviderError::unavailable("lock_state", format!("{}: {e}", self.lock_path.display()))
            })?;
        Ok(RwLock::new(file))
    }

    fn read<T>(&self, f: impl FnOnce(&StoredState) -> T) -> ProviderResult<T> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let lock = self.lock_file()?;
        let _shared = lock
            .read()
            .map_err(|e| ProviderError::unavailable("lock_state", e.to_string()))?;
        let state = self.load()?;
        Ok(f(&state))
    }

    fn update<T, E>(
        &self,
        f: impl FnOnce(&mut StoredState) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<ProviderError>,
    {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut lock = self.lock_file()?;
        let _exclusive = lock
            .write()
            .map_err(|e| ProviderError::unavailable("lock_state", e.to_string()))?;
        let mut state = self.load()?;
        let value = f(&mut state)?;
        self.save(&state)?;
        Ok(value)
    }
}

impl ProviderClient for FilesystemProvider {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    fn list_volumes(&self) -> ProviderResult<Listing<'_, Volume>> {
        let volumes = self.read(|state| state.volumes.clone())?;
        Ok(Box::new(volumes.into_iter().map(Ok)))
    }

    fn list_snapshots(&self, filter: &SnapshotFilter) -> ProviderResult<Listing<'_, Snapshot>> {
        let matching = self.read(|state| {
            state
                .snapshots
                .iter()
                .filter(|snapshot| filter.matches(snapshot))
                .cloned()
                .collect::<Vec<_>>()
        })?;
        Ok(Box::new(matching.into_iter().map(Ok)))
    }

    fn create_snapshot(&self, volume: &Volume, name: &SnapshotId) -> ProviderResult<Snapshot> {
        SnapshotNamer::validate(name.as_str()).map_err(|e| ProviderError::InvalidName {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        self.update(|state| {
            if !state.volumes.iter().any(|v| v.provider_id == volume.provider_id) {
                return Err(ProviderError::NotFound(volume.id.to_string()));
            }
            if state.snapshots.iter().any(|s| s.id == *name) {
                return Err(ProviderError::AlreadyExists(name.to_string()));
            }
            if state.quota.is_some_and(|quota| state.snapshots.len() >= quota) {
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
            state.snapshots.push(snapshot.clone());
            Ok(snapshot)
        })
    }

    fn delete_snapshot(&self, snapshot: &Snapshot) -> ProviderResult<DeleteOutcome> {
        self.update(|state| {
            let before = state.snapshots.len();
            state
                .snapshots
                .retain(|s| !(s.id == snapshot.id && s.provider_id == snapshot.provider_id));
            Ok(if state.snapshots.len() < before {
                DeleteOutcome::Deleted
            } else {
                DeleteOutcome::NotFound
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn provider() -> (TempDir, FilesystemProvider) {
        let dir = TempDir::new().unwrap();
        let provider = FilesystemProvider::open(dir.path().join("state.json")).unwrap();
        (dir, provider)
    }

    #[test]
    fn test_open_creates_state_file() {
        let (_dir, provider) = provider();
        assert!(provider.path().exists());
        assert_eq!(provider.list_volumes().unwrap().count(), 0);
    }

    #[test]
    fn test_state_survives_reopen() {
        let (dir, provider) = provider();
        let volume = provider.add_volume("disk1").unwrap();
        provider
            .create_snapshot(&volume, &SnapshotId::new("disk1-daily-20240101"))
            .unwrap();
        drop(provider);

        let reopened = FilesystemProvider::open(dir.path().join("state.json")).unwrap();
        let filter = SnapshotFilter::new(volume.provider_id, "disk1-daily-");
        let names: Vec<String> = reopened
            .list_snapshots(&filter)
            .unwrap()
            .map(|s| s.unwrap().id.to_string())
            .collect();
        assert_eq!(names, vec!["disk1-daily-20240101"]);
    }

    #[test]
    fn test_duplicate_volume_rejected() {
        let (_dir, provider) = provider();
        provider.add_volume("disk1").unwrap();
        assert!(matches!(
            provider.add_volume("disk1"),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_create_errors() {
        let (_dir, provider) = provider();
        let volume = provider.add_volume("disk1").unwrap();
        let name = SnapshotId::new("disk1-daily-20240101");
        provider.create_snapshot(&volume, &name).unwrap();

        assert!(matches!(
            provider.create_snapshot(&volume, &name),
            Err(ProviderError::AlreadyExists(_))
        ));
        assert!(matches!(
            provider.create_snapshot(&volume, &SnapshotId::new("Disk1-daily-x")),
            Err(ProviderError::InvalidName { .. })
        ));

        provider.set_quota(Some(1)).unwrap();
        assert!(matches!(
            provider.create_snapshot(&volume, &SnapshotId::new("disk1-daily-20240102")),
            Err(ProviderError::QuotaExceeded(_))
        ));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let (_dir, provider) = provider();
        let volume = provider.add_volume("disk1").unwrap();
        let snapshot = provider
            .create_snapshot(&volume, &SnapshotId::new("disk1-daily-20240101"))
            .unwrap();
        assert_eq!(provider.delete_snapshot(&snapshot).unwrap(), DeleteOutcome::Deleted);
        assert_eq!(provider.delete_snapshot(&snapshot).unwrap(), DeleteOutcome::NotFound);
    }

    #[test]
    fn test_shared_state_file_keeps_every_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let first = FilesystemProvider::open(&path).unwrap();
        let second = FilesystemProvider::open(&path).unwrap();
        let disk1 = first.add_volume("disk1").unwrap();
        let disk2 = second.add_volume("disk2").unwrap();

        std::thread::scope(|scope| {
            for (provider, volume) in [(&first, &disk1), (&second, &disk2)] {
                scope.spawn(move || {
                    for i in 0..50 {
                        let name = SnapshotId::new(format!("{}-hourly-{i:04}", volume.id));
                        provider.create_snapshot(volume, &name).unwrap();
                    }
                });
            }
        });

        let reopened = FilesystemProvider::open(&path).unwrap();
        for volume in [&disk1, &disk2] {
            let filter = SnapshotFilter::new(volume.provider_id.clone(), format!("{}-", volume.id));
            assert_eq!(reopened.list_snapshots(&filter).unwrap().count(), 50);
        }
        assert_eq!(reopened.list_volumes().unwrap().count(), 2);
    }

    #[test]
    fn test_corrupt_state_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();
        assert!(FilesystemProvider::open(&path).is_err());
    }
}
