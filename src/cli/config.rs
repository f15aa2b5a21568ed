//! Config CLI command.

use super::output_error;
use crate::config::RotatorConfig;
use crate::Result;
use std::io::{self, Write};

/// Writes the effective configuration as TOML.
///
/// With `sources`, the files it was loaded from are listed first as
/// comments.
///
/// # Errors
///
/// Returns an error if rendering or writing fails.
pub fn write_config<W: Write>(writer: &mut W, config: &RotatorConfig, sources: bool) -> Result<()> {
    if sources {
        if config.config_sources.is_empty() {
            writeln!(writer, "# no configuration file loaded; using defaults")
                .map_err(output_error)?;
        }
        for source in &config.config_sources {
            writeln!(writer, "# loaded from {}", source.display()).map_err(output_error)?;
        }
        writeln!(writer).map_err(output_error)?;
    }
    write!(writer, "{}", config.to_toml()?).map_err(output_error)
}

/// Executes the config command.
///
/// # Errors
///
/// See [`write_config`].
pub fn cmd_config(config: &RotatorConfig, sources: bool) -> Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    write_config(&mut handle, config, sources)
}
