//! Configuration management.
//!
//! Configuration is layered: built-in defaults, then a TOML file, then
//! `SNAPROT_*` environment variables.
//!
//! ```toml
//! [rotation]
//! max_concurrent = 8
//! deadline_secs = 540
//!
//! [cadences.daily]
//! format = "YYYYMMDD"
//! retention = 14
//!
//! [cadences.quarterhourly]
//! format = "YYYYMMDDHHmm"
//! retention = 96
//!
//! [provider]
//! kind = "filesystem"
//! state_path = "/var/lib/snaprot/state.json"
//! ```
//!
//! Cadence entries are validated while loading: a broken format table is a
//! configuration bug and fails the load instead of a later run.

use crate::models::{CadencePolicy, CadenceTable};
use crate::observability::{DEFAULT_METRICS_PORT, LogFormat};
use crate::provider::ProviderResilienceConfig;
use crate::rotation::RotationOptions;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default HTTP listen port.
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Header a scheduler sets on authenticated cron requests.
pub const DEFAULT_CRON_HEADER: &str = "X-Appengine-Cron";

/// Main configuration for snaprot.
#[derive(Debug, Clone)]
pub struct RotatorConfig {
    /// Rotation run options.
    pub rotation: RotationOptions,
    /// Cadence name to policy mapping.
    pub cadences: CadenceTable,
    /// Provider selection and resilience.
    pub provider: ProviderSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
    /// Metrics settings.
    pub metrics: MetricsSettings,
    /// HTTP trigger settings.
    pub http: HttpSettings,
    /// Files the configuration was loaded from.
    pub config_sources: Vec<PathBuf>,
}

/// Available providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ProviderKind {
    /// Process-local state, lost on exit.
    Memory,
    /// JSON state file.
    #[default]
    Filesystem,
}

impl ProviderKind {
    /// Returns the provider name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Filesystem => "filesystem",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "in-memory" => Ok(Self::Memory),
            "filesystem" | "fs" | "file" => Ok(Self::Filesystem),
            other => Err(Error::InvalidInput(format!(
                "unknown provider '{other}' (expected memory or filesystem)"
            ))),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider settings.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Which provider to use.
    pub kind: ProviderKind,
    /// State file of the filesystem provider.
    pub state_path: PathBuf,
    /// Timeout, retry, and circuit breaker settings.
    pub resilience: ProviderResilienceConfig,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            state_path: default_state_path(),
            resilience: ProviderResilienceConfig::default(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Default)]
pub struct LoggingSettings {
    /// Output format.
    pub format: LogFormat,
    /// `EnvFilter` directive; `RUST_LOG` takes precedence.
    pub filter: Option<String>,
    /// Log file; stderr when unset.
    pub file: Option<PathBuf>,
}

/// Metrics settings.
#[derive(Debug, Clone)]
pub struct MetricsSettings {
    /// Whether the Prometheus exporter runs.
    pub enabled: bool,
    /// Exporter port.
    pub port: u16,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            port: DEFAULT_METRICS_PORT,
        }
    }
}

/// HTTP trigger settings.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    /// Listen port.
    pub port: u16,
    /// Header that must be `true` on cron requests.
    pub cron_header: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_HTTP_PORT,
            cron_header: DEFAULT_CRON_HEADER.to_string(),
        }
    }
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Rotation section.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation: Option<ConfigFileRotation>,
    /// Cadence entries keyed by name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cadences: Option<BTreeMap<String, ConfigFileCadence>>,
    /// Provider section.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ConfigFileProvider>,
    /// Logging section.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<ConfigFileLogging>,
    /// Metrics section.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ConfigFileMetrics>,
    /// HTTP section.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http: Option<ConfigFileHttp>,
}

/// Rotation section in config file.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFileRotation {
    /// Parallel volumes.
    pub max_concurrent: Option<usize>,
    /// Run deadline in seconds (0 disables).
    pub deadline_secs: Option<u64>,
    /// Per-partition locking.
    pub serialize: Option<bool>,
}

/// Cadence entry in config file.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFileCadence {
    /// Timestamp pattern.
    pub format: Option<String>,
    /// Retention count.
    pub retention: Option<u32>,
}

/// Provider section in config file.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFileProvider {
    /// Provider name.
    pub kind: Option<String>,
    /// Filesystem provider state file.
    pub state_path: Option<String>,
    /// Per-call timeout.
    pub call_timeout_ms: Option<u64>,
    /// Retries on transient errors.
    pub max_retries: Option<u32>,
    /// Backoff between retries.
    pub retry_backoff_ms: Option<u64>,
    /// Failures before the circuit opens.
    pub breaker_failure_threshold: Option<u32>,
    /// Open-circuit duration.
    pub breaker_reset_ms: Option<u64>,
}

/// Logging section in config file.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFileLogging {
    /// `pretty` or `json`.
    pub format: Option<String>,
    /// Filter directive.
    pub filter: Option<String>,
    /// Log file path.
    pub file: Option<String>,
}

/// Metrics section in config file.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFileMetrics {
    /// Enable the exporter.
    pub enabled: Option<bool>,
    /// Exporter port.
    pub port: Option<u16>,
}

/// HTTP section in config file.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFileHttp {
    /// Listen port.
    pub port: Option<u16>,
    /// Cron authentication header.
    pub cron_header: Option<String>,
}

impl Default for RotatorConfig {
    fn default() -> Self {
        Self {
            rotation: RotationOptions::default(),
            cadences: CadenceTable::default(),
            provider: ProviderSettings::default(),
            logging: LoggingSettings::default(),
            metrics: MetricsSettings::default(),
            http: HttpSettings::default(),
            config_sources: Vec::new(),
        }
    }
}

impl RotatorConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from `path`, or from the default location when
    /// `path` is `None`, then applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit file is missing, a file cannot be
    /// parsed, or a cadence entry is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load_default()?,
        };
        Ok(config.with_env_overrides())
    }

    /// Loads configuration from a file path, without environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or a cadence
    /// entry is invalid.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        let mut config = Self::from_toml(&contents)?;
        config.config_sources.push(path.to_path_buf());
        Ok(config)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text cannot be parsed or a value is invalid.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })?;
        Self::from_config_file(file)
    }

    /// Loads configuration from the default location.
    ///
    /// Checks `<config dir>/snaprot/config.toml` (platform-specific), then
    /// `~/.config/snaprot/config.toml`. Returns defaults if neither exists.
    ///
    /// # Errors
    ///
    /// Returns an error if a found file is invalid.
    pub fn load_default() -> Result<Self> {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Ok(Self::default());
        };

        let platform_config = base_dirs.config_dir().join("snaprot").join("config.toml");
        if platform_config.exists() {
            return Self::load_from_file(&platform_config);
        }

        let xdg_config = base_dirs
            .home_dir()
            .join(".config")
            .join("snaprot")
            .join("config.toml");
        if xdg_config.exists() {
            return Self::load_from_file(&xdg_config);
        }

        Ok(Self::default())
    }

    /// Converts a `ConfigFile` to `RotatorConfig`.
    fn from_config_file(file: ConfigFile) -> Result<Self> {
        let mut config = Self::default();

        if let Some(rotation) = file.rotation {
            if let Some(max_concurrent) = rotation.max_concurrent {
                config.rotation.max_concurrent = max_concurrent.max(1);
            }
            if let Some(secs) = rotation.deadline_secs {
                config.rotation.deadline = (secs > 0).then(|| Duration::from_secs(secs));
            }
            if let Some(serialize) = rotation.serialize {
                config.rotation.serialize = serialize;
            }
        }

        for (name, entry) in file.cadences.unwrap_or_default() {
            let inherited = config.cadences.get(&name).ok();
            let format = entry
                .format
                .or_else(|| inherited.map(|p| p.format.pattern().to_string()))
                .ok_or_else(|| {
                    Error::InvalidInput(format!("cadence '{name}' needs a format"))
                })?;
            let retention = entry
                .retention
                .or_else(|| inherited.map(|p| p.retention))
                .ok_or_else(|| {
                    Error::InvalidInput(format!("cadence '{name}' needs a retention"))
                })?;
            config
                .cadences
                .insert(CadencePolicy::new(&name, &format, retention)?);
        }

        if let Some(provider) = file.provider {
            if let Some(kind) = provider.kind {
                config.provider.kind = kind.parse()?;
            }
            if let Some(path) = provider.state_path {
                config.provider.state_path = PathBuf::from(path);
            }
            let resilience = &mut config.provider.resilience;
            if let Some(v) = provider.call_timeout_ms {
                resilience.call_timeout_ms = v;
            }
            if let Some(v) = provider.max_retries {
                resilience.max_retries = v;
            }
            if let Some(v) = provider.retry_backoff_ms {
                resilience.retry_backoff_ms = v;
            }
            if let Some(v) = provider.breaker_failure_threshold {
                resilience.breaker_failure_threshold = v.max(1);
            }
            if let Some(v) = provider.breaker_reset_ms {
                resilience.breaker_reset_timeout_ms = v;
            }
        }

        if let Some(logging) = file.logging {
            if let Some(format) = logging.format {
                config.logging.format = format.parse()?;
            }
            config.logging.filter = logging.filter.or(config.logging.filter);
            if let Some(file) = logging.file {
                config.logging.file = Some(PathBuf::from(file));
            }
        }

        if let Some(metrics) = file.metrics {
            if let Some(enabled) = metrics.enabled {
                config.metrics.enabled = enabled;
            }
            if let Some(port) = metrics.port {
                config.metrics.port = port;
            }
        }

        if let Some(http) = file.http {
            if let Some(port) = http.port {
                config.http.port = port;
            }
            if let Some(header) = http.cron_header {
                config.http.cron_header = header;
            }
        }

        Ok(config)
    }

    /// Applies environment variable overrides.
    ///
    /// | Variable | Setting |
    /// |----------|---------|
    /// | `SNAPROT_MAX_CONCURRENT`, `SNAPROT_DEADLINE_SECS`, `SNAPROT_SERIALIZE` | rotation |
    /// | `SNAPROT_PROVIDER` | provider kind |
    /// | `SNAPROT_STATE_PATH` | filesystem state file |
    /// | `SNAPROT_CALL_TIMEOUT_MS`, `SNAPROT_MAX_RETRIES`, `SNAPROT_RETRY_BACKOFF_MS` | resilience |
    /// | `SNAPROT_LOG_FORMAT`, `SNAPROT_LOG_FILE` | logging |
    /// | `SNAPROT_METRICS_ENABLED`, `SNAPROT_METRICS_PORT` | metrics |
    /// | `PORT` | HTTP listen port |
    ///
    /// Unparseable values are ignored.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        self.rotation = self.rotation.with_env_overrides();
        self.provider.resilience = self.provider.resilience.with_env_overrides();

        if let Some(kind) = env_string("SNAPROT_PROVIDER").and_then(|v| v.parse().ok()) {
            self.provider.kind = kind;
        }
        if let Some(path) = env_string("SNAPROT_STATE_PATH") {
            self.provider.state_path = PathBuf::from(path);
        }
        if let Some(format) = env_string("SNAPROT_LOG_FORMAT").and_then(|v| v.parse().ok()) {
            self.logging.format = format;
        }
        if let Some(file) = env_string("SNAPROT_LOG_FILE") {
            self.logging.file = Some(PathBuf::from(file));
        }
        if let Some(enabled) = env_string("SNAPROT_METRICS_ENABLED") {
            let enabled = enabled.to_lowercase();
            self.metrics.enabled = enabled == "true" || enabled == "1" || enabled == "yes";
        }
        if let Some(port) = env_string("SNAPROT_METRICS_PORT").and_then(|v| v.parse().ok()) {
            self.metrics.port = port;
        }
        if let Some(port) = env_string("PORT").and_then(|v| v.parse().ok()) {
            self.http.port = port;
        }
        self
    }

    /// Returns configuration problems that are legal but likely mistakes.
    #[must_use]
    pub fn warnings(&self) -> Vec<String> {
        self.cadences
            .iter()
            .filter(|policy| policy.format.is_cyclic())
            .map(|policy| {
                format!(
                    "cadence '{}' uses format '{}' without a year; names repeat and \
                     retention ordering breaks when the cycle wraps",
                    policy.cadence, policy.format
                )
            })
            .collect()
    }

    /// Renders the effective configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(&ConfigFile::from(self)).map_err(|e| Error::OperationFailed {
            operation: "render_config".to_string(),
            cause: e.to_string(),
        })
    }
}

impl From<&RotatorConfig> for ConfigFile {
    fn from(config: &RotatorConfig) -> Self {
        let resilience = &config.provider.resilience;
        Self {
            rotation: Some(ConfigFileRotation {
                max_concurrent: Some(config.rotation.max_concurrent),
                deadline_secs: Some(config.rotation.deadline.map_or(0, |d| d.as_secs())),
                serialize: Some(config.rotation.serialize),
            }),
            cadences: Some(
                config
                    .cadences
                    .iter()
                    .map(|policy| {
                        (
                            policy.cadence.to_string(),
                            ConfigFileCadence {
                                format: Some(policy.format.pattern().to_string()),
                                retention: Some(policy.retention),
                            },
                        )
                    })
                    .collect(),
            ),
            provider: Some(ConfigFileProvider {
                kind: Some(config.provider.kind.to_string()),
                state_path: Some(config.provider.state_path.display().to_string()),
                call_timeout_ms: Some(resilience.call_timeout_ms),
                max_retries: Some(resilience.max_retries),
                retry_backoff_ms: Some(resilience.retry_backoff_ms),
                breaker_failure_threshold: Some(resilience.breaker_failure_threshold),
                breaker_reset_ms: Some(resilience.breaker_reset_timeout_ms),
            }),
            logging: Some(ConfigFileLogging {
                format: Some(config.logging.format.to_string()),
                filter: config.logging.filter.clone(),
                file: config
                    .logging
                    .file
                    .as_ref()
                    .map(|p| p.display().to_string()),
            }),
            metrics: Some(ConfigFileMetrics {
                enabled: Some(config.metrics.enabled),
                port: Some(config.metrics.port),
            }),
            http: Some(ConfigFileHttp {
                port: Some(config.http.port),
                cron_header: Some(config.http.cron_header.clone()),
            }),
        }
    }
}

fn default_state_path() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from("snaprot-state.json"),
        |dirs| dirs.data_local_dir().join("snaprot").join("state.json"),
    )
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RotatorConfig::default();
        assert_eq!(config.cadences.len(), 4);
        assert_eq!(config.http.port, DEFAULT_HTTP_PORT);
        assert_eq!(config.provider.kind, ProviderKind::Filesystem);
        assert!(config.warnings().is_empty());
    }

    #[test]
    fn test_cadence_entries_merge_over_defaults() {
        let config = RotatorConfig::from_toml(
            r#"
            [cadences.daily]
            retention = 14

            [cadences.quarterhourly]
            format = "YYYYMMDDHHmm"
            retention = 96
            "#,
        )
        .unwrap();

        let daily = config.cadences.get("daily").unwrap();
        assert_eq!(daily.retention, 14);
        assert_eq!(daily.format.pattern(), "YYYYMMDD");
        assert_eq!(config.cadences.get("quarterhourly").unwrap().retention, 96);
        assert_eq!(config.cadences.len(), 5);
    }

    #[test]
    fn test_broken_cadence_fails_load() {
        let result = RotatorConfig::from_toml(
            r#"
            [cadences.weekly]
            format = "YYYYW"
            "#,
        );
        assert!(matches!(result, Err(Error::InvalidFormat { .. })));

        let result = RotatorConfig::from_toml(
            r#"
            [cadences.custom]
            retention = 3
            "#,
        );
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_cyclic_format_warns() {
        let config = RotatorConfig::from_toml(
            r#"
            [cadences.hourly]
            format = "HHmm"
            "#,
        )
        .unwrap();
        assert_eq!(config.warnings().len(), 1);
    }

    #[test]
    fn test_sections() {
        let config = RotatorConfig::from_toml(
            r#"
            [rotation]
            max_concurrent = 0
            deadline_secs = 30
            serialize = false

            [provider]
            kind = "memory"
            max_retries = 2

            [logging]
            format = "json"

            [http]
            port = 9000
            "#,
        )
        .unwrap();
        assert_eq!(config.rotation.max_concurrent, 1);
        assert_eq!(config.rotation.deadline, Some(Duration::from_secs(30)));
        assert!(!config.rotation.serialize);
        assert_eq!(config.provider.kind, ProviderKind::Memory);
        assert_eq!(config.provider.resilience.max_retries, 2);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.http.port, 9000);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let result = RotatorConfig::from_toml("[provider]\nkind = \"gce\"\n");
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_to_toml_round_trips_cadences() {
        let config = RotatorConfig::default();
        let rendered = config.to_toml().unwrap();
        let reparsed = RotatorConfig::from_toml(&rendered).unwrap();
        assert_eq!(reparsed.cadences, config.cadences);
    }
}
