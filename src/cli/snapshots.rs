//! Snapshot listing CLI command.

use super::{OutputFormat, output_error, write_json};
use crate::models::{Cadence, Snapshot, VolumeId};
use crate::naming::SnapshotNamer;
use crate::provider::{ProviderClient, ProviderResult, SnapshotFilter};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::{self, Write};

/// One listed snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotRow {
    /// Volume the snapshot was taken from.
    pub volume: VolumeId,
    /// Snapshot name.
    pub name: String,
    /// Provider-assigned id.
    pub provider_id: String,
    /// Creation time, if the provider reports one.
    pub created_at: Option<DateTime<Utc>>,
}

impl SnapshotRow {
    fn new(volume: &VolumeId, snapshot: Snapshot) -> Self {
        Self {
            volume: volume.clone(),
            name: snapshot.id.as_str().to_string(),
            provider_id: snapshot.provider_id,
            created_at: snapshot.created_at,
        }
    }
}

/// Lists snapshots, optionally restricted to one volume and one cadence.
///
/// Rows are ordered by volume, then by name (oldest first within a
/// cadence).
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for a malformed cadence or a volume the
/// provider does not know, or the provider error of a failed listing.
pub fn collect_snapshots<P: ProviderClient>(
    provider: &P,
    volume: Option<&str>,
    cadence: Option<&str>,
) -> Result<Vec<SnapshotRow>> {
    let cadence = cadence.map(Cadence::parse).transpose()?;
    let mut volumes = provider
        .list_volumes()?
        .collect::<ProviderResult<Vec<_>>>()?;
    if let Some(name) = volume {
        volumes.retain(|v| v.id.as_str() == name);
        if volumes.is_empty() {
            return Err(Error::InvalidInput(format!("unknown volume '{name}'")));
        }
    }
    volumes.sort_by(|a, b| a.id.cmp(&b.id));

    let mut rows = Vec::new();
    for volume in &volumes {
        let prefix = cadence.as_ref().map_or_else(
            || format!("{}-", volume.id),
            |cadence| SnapshotNamer::prefix(&volume.id, cadence),
        );
        let filter = SnapshotFilter::new(volume.provider_id.clone(), prefix);
        let mut snapshots = provider
            .list_snapshots(&filter)?
            .collect::<ProviderResult<Vec<_>>>()?;
        snapshots.retain(|s| filter.matches(s));
        snapshots.sort_by(|a, b| a.order_key().cmp(b.order_key()));
        rows.extend(snapshots.into_iter().map(|s| SnapshotRow::new(&volume.id, s)));
    }
    Ok(rows)
}

/// Writes a snapshot listing.
///
/// # Errors
///
/// Returns an error if serialization or writing fails.
pub fn write_snapshots<W: Write>(
    writer: &mut W,
    rows: &[SnapshotRow],
    format: OutputFormat,
) -> Result<()> {
    if format == OutputFormat::Json {
        return write_json(writer, rows);
    }
    let width = rows
        .iter()
        .map(|r| r.name.len())
        .max()
        .unwrap_or(0)
        .max("SNAPSHOT".len())
        + 2;
    writeln!(writer, "{:<16}{:<width$}CREATED", "VOLUME", "SNAPSHOT").map_err(output_error)?;
    for row in rows {
        let created = row
            .created_at
            .map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string());
        writeln!(writer, "{:<16}{:<width$}{}", row.volume.as_str(), row.name, created)
            .map_err(output_error)?;
    }
    Ok(())
}

/// Executes the snapshots command.
///
/// # Errors
///
/// See [`collect_snapshots`] and [`write_snapshots`].
pub fn cmd_snapshots<P: ProviderClient>(
    provider: &P,
    volume: Option<&str>,
    cadence: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let rows = collect_snapshots(provider, volume, cadence)?;
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    write_snapshots(&mut handle, &rows, format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::InMemoryProvider;

    fn provider() -> InMemoryProvider {
        let provider = InMemoryProvider::new();
        provider.add_volume("disk1");
        provider.add_volume("disk2");
        provider.insert_snapshot("disk1", "disk1-daily-20240102");
        provider.insert_snapshot("disk1", "disk1-daily-20240101");
        provider.insert_snapshot("disk1", "disk1-dailyx-20240101");
        provider.insert_snapshot("disk1", "disk1-weekly-2024-01");
        provider.insert_snapshot("disk2", "disk2-daily-20240101");
        provider
    }

    fn names(rows: &[SnapshotRow]) -> Vec<&str> {
        rows.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn test_lists_all_volumes() {
        let rows = collect_snapshots(&provider(), None, None).unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0].name, "disk1-daily-20240101");
        assert_eq!(rows[4].volume.as_str(), "disk2");
    }

    #[test]
    fn test_cadence_filter_is_anchored() {
        let rows = collect_snapshots(&provider(), Some("disk1"), Some("daily")).unwrap();
        assert_eq!(names(&rows), ["disk1-daily-20240101", "disk1-daily-20240102"]);
    }

    #[test]
    fn test_unknown_volume() {
        let err = collect_snapshots(&provider(), Some("disk9"), None).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_table_output() {
        let rows = collect_snapshots(&provider(), Some("disk2"), None).unwrap();
        let mut out = Vec::new();
        write_snapshots(&mut out, &rows, OutputFormat::Table).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().nth(1).unwrap().starts_with("disk2"));
    }
}
