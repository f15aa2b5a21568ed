//! CLI command implementations.
//!
//! Each submodule implements one `snaprot` command. Output goes to a
//! caller-supplied writer so the commands can be tested without a terminal.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rotate` | Rotate (or plan) one cadence across all volumes |
//! | `cadences` | Show the cadence table |
//! | `volumes` | List or register volumes |
//! | `snapshots` | List snapshots per volume and cadence |
//! | `serve` | Run the HTTP cron trigger |
//! | `config` | Show the effective configuration |
//!
//! # Example Usage
//!
//! ```bash
//! # Register a volume with the filesystem provider
//! snaprot volumes add disk1
//!
//! # See what a daily run would do
//! snaprot rotate daily --dry-run
//!
//! # Rotate for real, reporting as JSON
//! snaprot rotate daily --format json
//! ```

mod backend;
mod cadences;
mod config;
mod rotate;
mod serve;
mod snapshots;
mod volumes;

pub use backend::{Backend, build_provider};
pub use cadences::{cmd_cadences, write_cadences};
pub use config::{cmd_config, write_config};
pub use rotate::{cmd_rotate, write_report};
pub use serve::cmd_serve;
pub use snapshots::{SnapshotRow, cmd_snapshots, collect_snapshots, write_snapshots};
pub use volumes::{cmd_volumes_add, cmd_volumes_list, write_volumes};

use crate::Error;
use serde::Serialize;
use std::fmt;
use std::io::Write;

/// Output format of listing commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Aligned text table (default).
    #[default]
    Table,
    /// Pretty-printed JSON.
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Table => f.write_str("table"),
            Self::Json => f.write_str("json"),
        }
    }
}

fn output_error(e: impl fmt::Display) -> Error {
    Error::OperationFailed {
        operation: "write_output".to_string(),
        cause: e.to_string(),
    }
}

fn write_json<W: Write, T: Serialize + ?Sized>(writer: &mut W, value: &T) -> crate::Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(output_error)?;
    writeln!(writer, "{json}").map_err(output_error)
}
