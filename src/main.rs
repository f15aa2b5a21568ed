//! Binary entry point for snaprot.
//!
//! This binary provides the CLI interface for scheduled snapshot rotation.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use clap::{Parser, Subcommand};
use snaprot::cli::{
    Backend, OutputFormat, build_provider, cmd_cadences, cmd_config, cmd_rotate, cmd_serve,
    cmd_snapshots, cmd_volumes_add, cmd_volumes_list,
};
use snaprot::config::{ProviderKind, RotatorConfig};
use snaprot::observability::{self, InitOptions};
use snaprot::provider::ResilientProvider;
use snaprot::{CronTrigger, RotationOrchestrator};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// Exit code for configuration errors (bad cadence, format, or arguments).
const EXIT_CONFIG: u8 = 2;

/// Snaprot - scheduled rotation of volume snapshots.
#[derive(Parser)]
#[command(name = "snaprot")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Provider to use, overriding the configuration.
    #[arg(long, global = true, value_enum)]
    provider: Option<ProviderKind>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rotate snapshots of one cadence across all volumes.
    Rotate {
        /// Cadence to rotate (hourly, daily, weekly, monthly, or a custom one).
        cadence: String,

        /// Show what would be created and deleted without changing anything.
        #[arg(long)]
        dry_run: bool,

        /// Output format.
        #[arg(short, long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// Show the configured cadences.
    Cadences {
        /// Output format.
        #[arg(short, long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// Manage volumes.
    Volumes {
        #[command(subcommand)]
        action: VolumesAction,
    },

    /// Inspect snapshots.
    Snapshots {
        #[command(subcommand)]
        action: SnapshotsAction,
    },

    /// Serve the HTTP cron trigger.
    Serve {
        /// Port to listen on.
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show the effective configuration.
    Config {
        /// List the files the configuration was loaded from.
        #[arg(long)]
        sources: bool,
    },
}

#[derive(Subcommand)]
enum VolumesAction {
    /// List volumes.
    List {
        /// Output format.
        #[arg(short, long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// Register a volume.
    Add {
        /// Volume name.
        name: String,
    },
}

#[derive(Subcommand)]
enum SnapshotsAction {
    /// List snapshots.
    List {
        /// Only this volume.
        #[arg(long)]
        volume: Option<String>,

        /// Only this cadence.
        #[arg(long)]
        cadence: Option<String>,

        /// Output format.
        #[arg(short, long, value_enum, default_value_t)]
        format: OutputFormat,
    },
}

/// Main entry point.
fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let mut config = match RotatorConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::from(EXIT_CONFIG);
        },
    };
    if let Some(kind) = cli.provider {
        config.provider.kind = kind;
    }

    let _observability =
        match observability::init_from_config(&config, InitOptions { verbose: cli.verbose }) {
            Ok(handle) => handle,
            Err(e) => {
                eprintln!("Failed to initialize observability: {e}");
                return ExitCode::FAILURE;
            },
        };

    for warning in config.warnings() {
        tracing::warn!(warning = %warning, "Configuration warning");
    }

    match run_command(cli.command, &config) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("Error: {e}");
            if e.is_configuration() {
                ExitCode::from(EXIT_CONFIG)
            } else {
                ExitCode::FAILURE
            }
        },
    }
}

/// Runs the selected command.
fn run_command(command: Commands, config: &RotatorConfig) -> snaprot::Result<ExitCode> {
    // Listing commands don't need the orchestrator.
    match command {
        Commands::Cadences { format } => {
            cmd_cadences(&config.cadences, format)?;
            return Ok(ExitCode::SUCCESS);
        },
        Commands::Config { sources } => {
            cmd_config(config, sources)?;
            return Ok(ExitCode::SUCCESS);
        },
        _ => {},
    }

    let provider = Arc::new(build_provider(&config.provider)?);
    match command {
        Commands::Rotate {
            cadence,
            dry_run,
            format,
        } => {
            let trigger = build_trigger(provider, config);
            let clean = cmd_rotate(&trigger, &cadence, dry_run, format)?;
            Ok(if clean {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        },
        Commands::Volumes { action } => {
            match action {
                VolumesAction::List { format } => cmd_volumes_list(&*provider, format)?,
                VolumesAction::Add { name } => add_volume(provider.inner(), &name)?,
            }
            Ok(ExitCode::SUCCESS)
        },
        Commands::Snapshots {
            action:
                SnapshotsAction::List {
                    volume,
                    cadence,
                    format,
                },
        } => {
            cmd_snapshots(&*provider, volume.as_deref(), cadence.as_deref(), format)?;
            Ok(ExitCode::SUCCESS)
        },
        Commands::Serve { port } => {
            let trigger = Arc::new(build_trigger(provider, config));
            cmd_serve(trigger, &config.http, port)?;
            Ok(ExitCode::SUCCESS)
        },
        Commands::Cadences { .. } | Commands::Config { .. } => Ok(ExitCode::SUCCESS),
    }
}

fn build_trigger(
    provider: Arc<ResilientProvider<Backend>>,
    config: &RotatorConfig,
) -> CronTrigger<ResilientProvider<Backend>> {
    let orchestrator = Arc::new(RotationOrchestrator::new(provider, config.rotation.clone()));
    CronTrigger::new(orchestrator, config.cadences.clone())
}

fn add_volume(backend: &Backend, name: &str) -> snaprot::Result<()> {
    if matches!(backend, Backend::Memory(_)) {
        tracing::warn!("The memory provider forgets volumes when the process exits");
    }
    cmd_volumes_add(backend, name)
}
