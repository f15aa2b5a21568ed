//! Rotation cadences and their retention policies.

use crate::naming::{TimeUnit, TimestampFormat};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Built-in cadence names, in the order they are listed.
pub const BUILTIN_CADENCES: [&str; 4] = ["hourly", "daily", "weekly", "monthly"];

/// A named rotation frequency.
///
/// Names are lowercase alphanumerics starting with a letter. The `-` character
/// is excluded so `<volume>-<cadence>-` can never match another cadence's
/// snapshots of the same volume.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cadence(String);

impl Cadence {
    /// Parses and validates a cadence name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the name is empty, does not start
    /// with a lowercase letter, or contains anything other than `[a-z0-9]`.
    pub fn parse(name: &str) -> Result<Self> {
        let mut chars = name.chars();
        let valid = chars.next().is_some_and(|c| c.is_ascii_lowercase())
            && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
        if !valid {
            return Err(Error::InvalidInput(format!(
                "cadence name '{name}' must match [a-z][a-z0-9]*"
            )));
        }
        Ok(Self(name.to_string()))
    }

    /// Returns the `hourly` cadence.
    #[must_use]
    pub fn hourly() -> Self {
        Self("hourly".to_string())
    }

    /// Returns the `daily` cadence.
    #[must_use]
    pub fn daily() -> Self {
        Self("daily".to_string())
    }

    /// Returns the `weekly` cadence.
    #[must_use]
    pub fn weekly() -> Self {
        Self("weekly".to_string())
    }

    /// Returns the `monthly` cadence.
    #[must_use]
    pub fn monthly() -> Self {
        Self("monthly".to_string())
    }

    /// Returns the cadence name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for the four built-in cadences.
    #[must_use]
    pub fn is_builtin(&self) -> bool {
        BUILTIN_CADENCES.contains(&self.0.as_str())
    }

    /// Returns the coarsest unit a timestamp format must resolve.
    ///
    /// Two runs of the cadence must never render the same timestamp. Custom
    /// cadences have no known period and return `None`.
    #[must_use]
    pub fn resolution(&self) -> Option<TimeUnit> {
        match self.0.as_str() {
            "hourly" => Some(TimeUnit::Hour),
            "daily" => Some(TimeUnit::Day),
            "weekly" => Some(TimeUnit::Week),
            "monthly" => Some(TimeUnit::Month),
            _ => None,
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Cadence {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Cadence> for String {
    fn from(cadence: Cadence) -> Self {
        cadence.0
    }
}

/// Timestamp format and retention count bound to one cadence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CadencePolicy {
    /// The cadence.
    pub cadence: Cadence,
    /// Format of the timestamp segment of snapshot names.
    pub format: TimestampFormat,
    /// Maximum snapshots kept per volume after a run (at least 1).
    pub retention: u32,
}

impl CadencePolicy {
    /// Builds a validated policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a bad cadence name or a retention of
    /// zero, and [`Error::InvalidFormat`] if the pattern cannot produce sortable
    /// names at the cadence's resolution.
    pub fn new(cadence: &str, format: &str, retention: u32) -> Result<Self> {
        let cadence = Cadence::parse(cadence)?;
        if retention == 0 {
            return Err(Error::InvalidInput(format!(
                "retention for cadence '{cadence}' must be at least 1"
            )));
        }
        let format = TimestampFormat::parse(format)?;
        format.check_resolution(&cadence)?;
        Ok(Self {
            cadence,
            format,
            retention,
        })
    }
}

/// Static mapping from cadence name to its policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CadenceTable {
    policies: BTreeMap<Cadence, CadencePolicy>,
}

impl CadenceTable {
    /// Creates an empty table.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            policies: BTreeMap::new(),
        }
    }

    /// Inserts or replaces a policy.
    pub fn insert(&mut self, policy: CadencePolicy) {
        self.policies.insert(policy.cadence.clone(), policy);
    }

    /// Adds a policy, builder-style.
    #[must_use]
    pub fn with(mut self, policy: CadencePolicy) -> Self {
        self.insert(policy);
        self
    }

    /// Looks up a cadence by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownCadence`] if no policy is registered.
    pub fn get(&self, name: &str) -> Result<&CadencePolicy> {
        self.policies
            .iter()
            .find(|(cadence, _)| cadence.as_str() == name)
            .map(|(_, policy)| policy)
            .ok_or_else(|| Error::UnknownCadence(name.to_string()))
    }

    /// Iterates over all policies, ordered by cadence name.
    pub fn iter(&self) -> impl Iterator<Item = &CadencePolicy> {
        self.policies.values()
    }

    /// Returns the number of cadences.
    #[must_use]
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Returns `true` if the table has no cadences.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

impl Default for CadenceTable {
    fn default() -> Self {
        let defaults = [
            ("hourly", "YYYYMMDDHHmm", 24),
            ("daily", "YYYYMMDD", 7),
            ("weekly", "YYYY-WW", 4),
            ("monthly", "YYYYMM", 12),
        ];
        let mut table = Self::empty();
        for (cadence, format, retention) in defaults {
            // The built-in patterns are covered by tests; a failure here would
            // leave the cadence out rather than abort.
            match CadencePolicy::new(cadence, format, retention) {
                Ok(policy) => table.insert(policy),
                Err(e) => tracing::error!(cadence, error = %e, "Invalid built-in cadence"),
            }
        }
        table
    }
}
