//! Provider construction for CLI commands.

use crate::config::{ProviderKind, ProviderSettings};
use crate::models::{Snapshot, SnapshotId, Volume};
use crate::provider::{
    DeleteOutcome, FilesystemProvider, InMemoryProvider, Listing, ProviderClient, ProviderResult,
    ResilientProvider, SnapshotFilter,
};
use crate::Result;
use std::sync::Arc;

/// The provider selected by configuration.
#[derive(Debug)]
pub enum Backend {
    /// Process-local provider.
    Memory(InMemoryProvider),
    /// JSON state file provider.
    Filesystem(FilesystemProvider),
}

impl Backend {
    /// Opens the provider named by `settings`.
    ///
    /// # Errors
    ///
    /// Returns an error if the filesystem state file cannot be opened.
    pub fn open(settings: &ProviderSettings) -> Result<Self> {
        match settings.kind {
            ProviderKind::Memory => Ok(Self::Memory(InMemoryProvider::new())),
            ProviderKind::Filesystem => {
                FilesystemProvider::open(&settings.state_path).map(Self::Filesystem)
            },
        }
    }

    /// Registers a volume.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] if the filesystem provider
    /// already has a volume of that name, or an I/O error.
    pub fn add_volume(&self, name: &str) -> Result<Volume> {
        match self {
            Self::Memory(provider) => Ok(provider.add_volume(name)),
            Self::Filesystem(provider) => provider.add_volume(name),
        }
    }
}

impl ProviderClient for Backend {
    fn name(&self) -> &'static str {
        match self {
            Self::Memory(provider) => provider.name(),
            Self::Filesystem(provider) => provider.name(),
        }
    }

    fn list_volumes(&self) -> ProviderResult<Listing<'_, Volume>> {
        match self {
            Self::Memory(provider) => provider.list_volumes(),
            Self::Filesystem(provider) => provider.list_volumes(),
        }
    }

    fn list_snapshots(&self, filter: &SnapshotFilter) -> ProviderResult<Listing<'_, Snapshot>> {
        match self {
            Self::Memory(provider) => provider.list_snapshots(filter),
            Self::Filesystem(provider) => provider.list_snapshots(filter),
        }
    }

    fn create_snapshot(&self, volume: &Volume, name: &SnapshotId) -> ProviderResult<Snapshot> {
        match self {
            Self::Memory(provider) => provider.create_snapshot(volume, name),
            Self::Filesystem(provider) => provider.create_snapshot(volume, name),
        }
    }

    fn delete_snapshot(&self, snapshot: &Snapshot) -> ProviderResult<DeleteOutcome> {
        match self {
            Self::Memory(provider) => provider.delete_snapshot(snapshot),
            Self::Filesystem(provider) => provider.delete_snapshot(snapshot),
        }
    }
}

/// Opens the configured provider and wraps it with timeouts, retry, and
/// circuit breaking.
///
/// # Errors
///
/// See [`Backend::open`].
pub fn build_provider(settings: &ProviderSettings) -> Result<ResilientProvider<Backend>> {
    let backend = Arc::new(Backend::open(settings)?);
    tracing::debug!(
        provider = backend.name(),
        state_path = %settings.state_path.display(),
        "Opened provider"
    );
    Ok(ResilientProvider::new(backend, settings.resilience.clone()))
}
