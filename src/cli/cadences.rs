//! CLI command for showing the cadence table.

use super::{OutputFormat, output_error, write_json};
use crate::models::CadenceTable;
use crate::Result;
use serde::Serialize;
use std::io::{self, Write};

#[derive(Debug, Serialize)]
struct CadenceRow<'a> {
    cadence: &'a str,
    format: &'a str,
    retention: u32,
    cyclic: bool,
}

fn rows(table: &CadenceTable) -> Vec<CadenceRow<'_>> {
    table
        .iter()
        .map(|policy| CadenceRow {
            cadence: policy.cadence.as_str(),
            format: policy.format.pattern(),
            retention: policy.retention,
            cyclic: policy.format.is_cyclic(),
        })
        .collect()
}

/// Writes the cadence table.
///
/// # Errors
///
/// Returns an error if serialization or writing fails.
pub fn write_cadences<W: Write>(
    writer: &mut W,
    table: &CadenceTable,
    format: OutputFormat,
) -> Result<()> {
    let rows = rows(table);
    if format == OutputFormat::Json {
        return write_json(writer, &rows);
    }

    writeln!(writer, "{:<12}{:<16}{:<11}NOTE", "CADENCE", "FORMAT", "RETENTION")
        .map_err(output_error)?;
    for row in &rows {
        let note = if row.cyclic { "cyclic" } else { "" };
        writeln!(
            writer,
            "{:<12}{:<16}{:<11}{}",
            row.cadence, row.format, row.retention, note
        )
        .map_err(output_error)?;
    }
    Ok(())
}

/// Executes the cadences command.
///
/// # Errors
///
/// Returns an error if output fails.
pub fn cmd_cadences(table: &CadenceTable, format: OutputFormat) -> Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    write_cadences(&mut handle, table, format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CadencePolicy;

    #[test]
    fn test_default_table() {
        let mut out = Vec::new();
        write_cadences(&mut out, &CadenceTable::default(), OutputFormat::Table).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert_eq!(text.lines().count(), 5);
        assert!(text.contains("daily       YYYYMMDD        7"));
        assert!(text.contains("weekly      YYYY-WW         4"));
    }

    #[test]
    fn test_cyclic_note_and_json() {
        let table = CadenceTable::empty().with(CadencePolicy::new("hourly", "HHmm", 24).unwrap());

        let mut out = Vec::new();
        write_cadences(&mut out, &table, OutputFormat::Table).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("cyclic"));

        let mut out = Vec::new();
        write_cadences(&mut out, &table, OutputFormat::Json).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(json[0]["cadence"], "hourly");
        assert_eq!(json[0]["format"], "HHmm");
        assert_eq!(json[0]["cyclic"], true);
    }
}
