//! Volume CLI commands.

use super::{Backend, OutputFormat, output_error, write_json};
use crate::models::Volume;
use crate::provider::{ProviderClient, ProviderResult};
use crate::Result;
use std::io::{self, Write};

/// Writes a volume listing.
///
/// # Errors
///
/// Returns an error if serialization or writing fails.
pub fn write_volumes<W: Write>(
    writer: &mut W,
    volumes: &[Volume],
    format: OutputFormat,
) -> Result<()> {
    if format == OutputFormat::Json {
        return write_json(writer, volumes);
    }
    writeln!(writer, "{:<24}PROVIDER ID", "VOLUME").map_err(output_error)?;
    for volume in volumes {
        writeln!(writer, "{:<24}{}", volume.id.as_str(), volume.provider_id)
            .map_err(output_error)?;
    }
    Ok(())
}

/// Executes `volumes list`.
///
/// # Errors
///
/// Returns an error if the provider listing or output fails.
pub fn cmd_volumes_list<P: ProviderClient>(provider: &P, format: OutputFormat) -> Result<()> {
    let mut volumes = provider
        .list_volumes()?
        .collect::<ProviderResult<Vec<_>>>()?;
    volumes.sort_by(|a, b| a.id.cmp(&b.id));

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    write_volumes(&mut handle, &volumes, format)
}

/// Executes `volumes add`.
///
/// # Errors
///
/// Returns an error if the volume cannot be registered.
pub fn cmd_volumes_add(backend: &Backend, name: &str) -> Result<()> {
    let volume = backend.add_volume(name)?;
    tracing::info!(volume = %volume.id, provider_id = %volume.provider_id, "Registered volume");

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    writeln!(handle, "Added volume {} ({})", volume.id, volume.provider_id).map_err(output_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_and_json() {
        let volumes = vec![Volume::new("disk1", "1001"), Volume::new("disk2", "1002")];

        let mut out = Vec::new();
        write_volumes(&mut out, &volumes, OutputFormat::Table).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().nth(1), Some(format!("{:<24}1001", "disk1").as_str()));

        let mut out = Vec::new();
        write_volumes(&mut out, &volumes, OutputFormat::Json).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(json[1]["id"], "disk2");
        assert_eq!(json[1]["provider_id"], "1002");
    }
}
