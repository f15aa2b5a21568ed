//! Rotate CLI command.

use super::{OutputFormat, output_error, write_json};
use crate::provider::ProviderClient;
use crate::rotation::RotationReport;
use crate::trigger::CronTrigger;
use crate::Result;
use std::io::{self, Write};

/// Writes a rotation report.
///
/// The table lists one row per volume, then every failure, then the
/// summary line.
///
/// # Errors
///
/// Returns an error if serialization or writing fails.
pub fn write_report<W: Write>(
    writer: &mut W,
    report: &RotationReport,
    format: OutputFormat,
) -> Result<()> {
    if format == OutputFormat::Json {
        return write_json(writer, report);
    }

    let created_header = if report.dry_run { "WOULD CREATE" } else { "CREATED" };
    let width = report
        .volumes
        .iter()
        .filter_map(|v| v.created.as_ref().map(|s| s.as_str().len()))
        .max()
        .unwrap_or(0)
        .max(created_header.len())
        + 2;

    writeln!(
        writer,
        "{:<16}{:<width$}{:<10}RETAINED",
        "VOLUME", created_header, "DELETED"
    )
    .map_err(output_error)?;
    for volume in &report.volumes {
        let created = volume.created.as_ref().map_or("-", |s| s.as_str());
        writeln!(
            writer,
            "{:<16}{:<width$}{:<10}{}",
            volume.volume.as_str(),
            created,
            volume.deleted.len(),
            volume.retained.len()
        )
        .map_err(output_error)?;
    }
    for volume in &report.skipped {
        writeln!(writer, "{:<16}skipped", volume.as_str()).map_err(output_error)?;
    }

    let mut failures = report.failures().peekable();
    if failures.peek().is_some() {
        writeln!(writer).map_err(output_error)?;
        for failure in failures {
            writeln!(writer, "FAILED {failure}").map_err(output_error)?;
        }
    }

    writeln!(writer).map_err(output_error)?;
    writeln!(writer, "{}", report.summary()).map_err(output_error)
}

/// Executes the rotate command.
///
/// Returns `true` if every volume rotated cleanly.
///
/// # Errors
///
/// Returns an error for an unknown cadence, an invalid policy, a failed
/// volume listing, or failed output.
pub fn cmd_rotate<P: ProviderClient>(
    trigger: &CronTrigger<P>,
    cadence: &str,
    dry_run: bool,
    format: OutputFormat,
) -> Result<bool> {
    let report = if dry_run {
        trigger.plan(cadence)?
    } else {
        trigger.fire(cadence)?
    };

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    write_report(&mut handle, &report, format)?;
    Ok(!report.has_failures())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CadencePolicy, CadenceTable};
    use crate::provider::{FaultOp, InMemoryProvider, ProviderError};
    use crate::rotation::{RotationOptions, RotationOrchestrator};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn trigger() -> (Arc<InMemoryProvider>, CronTrigger<InMemoryProvider>) {
        let provider = Arc::new(InMemoryProvider::new());
        provider.add_volume("disk1");
        provider.add_volume("disk2");
        provider.insert_snapshot("disk1", "disk1-daily-20240101");
        provider.insert_snapshot("disk1", "disk1-daily-20240102");
        let orchestrator = Arc::new(RotationOrchestrator::new(
            Arc::clone(&provider),
            RotationOptions::default(),
        ));
        let table = CadenceTable::empty().with(CadencePolicy::new("daily", "YYYYMMDD", 2).unwrap());
        (provider, CronTrigger::new(orchestrator, table))
    }

    fn render(report: &RotationReport, format: OutputFormat) -> String {
        let mut out = Vec::new();
        write_report(&mut out, report, format).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_table_report() {
        let (_, trigger) = trigger();
        let now = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
        let report = trigger.fire_at("daily", now).unwrap();
        let text = render(&report, OutputFormat::Table);

        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("VOLUME"));
        assert!(lines[1].starts_with("disk1"));
        assert!(lines[1].contains("disk1-daily-20240103"));
        assert!(lines[2].starts_with("disk2"));
        assert!(text.contains("daily: created 2, deleted 1 across 2 volume(s)"));
        assert!(!text.contains("FAILED"));
    }

    #[test]
    fn test_table_report_lists_failures() {
        let (provider, trigger) = trigger();
        provider.fail_next(
            FaultOp::Create,
            Some("disk2"),
            ProviderError::QuotaExceeded("SNAPSHOTS".to_string()),
        );
        let now = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
        let report = trigger.fire_at("daily", now).unwrap();
        let text = render(&report, OutputFormat::Table);

        assert!(text.contains("FAILED disk2 [create] disk2-daily-20240103"));
        assert!(text.contains("1 failure(s)"));
    }

    #[test]
    fn test_json_report() {
        let (_, trigger) = trigger();
        let report = trigger.plan("daily").unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&render(&report, OutputFormat::Json)).unwrap();

        assert_eq!(json["cadence"], "daily");
        assert_eq!(json["dry_run"], true);
        assert_eq!(json["volumes"].as_array().unwrap().len(), 2);
    }
}
