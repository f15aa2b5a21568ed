//! Fixed-width timestamp patterns.
//!
//! Patterns use moment-style tokens so existing cron tables carry over:
//!
//! | Token | Meaning | Width |
//! |-------|---------|-------|
//! | `YYYY` | Year (ISO week-based year when `WW` is present) | 4 |
//! | `MM` | Month, `01`-`12` | 2 |
//! | `WW` | ISO week, `01`-`53` | 2 |
//! | `DD` | Day of month, `01`-`31` | 2 |
//! | `HH` | Hour, `00`-`23` | 2 |
//! | `mm` | Minute | 2 |
//! | `ss` | Second | 2 |
//! | `-` | Literal separator | 1 |
//!
//! Only patterns whose rendered output sorts the same way as the instants it
//! was rendered from are accepted: every token is zero-padded, tokens appear
//! most-significant first, and no unit between two tokens is skipped.

use crate::models::Cadence;
use crate::{Error, Result};
use chrono::{DateTime, Datelike, Timelike, Utc};
use std::fmt;

/// Calendar units, ordered from coarsest to finest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimeUnit {
    /// Calendar year.
    Year,
    /// Calendar month.
    Month,
    /// ISO week.
    Week,
    /// Day of month.
    Day,
    /// Hour of day.
    Hour,
    /// Minute of hour.
    Minute,
    /// Second of minute.
    Second,
}

impl TimeUnit {
    /// Returns the pattern token for this unit.
    #[must_use]
    pub const fn token(self) -> &'static str {
        match self {
            Self::Year => "YYYY",
            Self::Month => "MM",
            Self::Week => "WW",
            Self::Day => "DD",
            Self::Hour => "HH",
            Self::Minute => "mm",
            Self::Second => "ss",
        }
    }

    const fn width(self) -> usize {
        match self {
            Self::Year => 4,
            _ => 2,
        }
    }

    /// Returns whether `next` may directly follow `self` in a pattern.
    const fn precedes(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Year, Self::Month | Self::Week)
                | (Self::Month, Self::Day)
                | (Self::Day, Self::Hour)
                | (Self::Hour, Self::Minute)
                | (Self::Minute, Self::Second)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment {
    Field(TimeUnit),
    Separator,
}

/// A validated, fixed-width timestamp pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampFormat {
    pattern: String,
    segments: Vec<Segment>,
}

impl TimestampFormat {
    /// Parses a pattern such as `YYYYMMDD` or `YYYY-WW`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFormat`] if the pattern is empty, contains an
    /// unsupported or unpadded token, misplaces a separator, or orders its
    /// tokens so that rendered output would not sort chronologically.
    pub fn parse(pattern: &str) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidFormat {
            format: pattern.to_string(),
            reason,
        };

        let chars: Vec<char> = pattern.chars().collect();
        if chars.is_empty() {
            return Err(invalid("pattern is empty".to_string()));
        }

        let mut segments = Vec::new();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            let run = chars[i..].iter().take_while(|&&other| other == c).count();
            if c == '-' {
                segments.extend(std::iter::repeat_n(Segment::Separator, run));
                i += run;
                continue;
            }
            let token: String = chars[i..i + run].iter().collect();
            let unit = match (c, run) {
                ('Y', 4) => TimeUnit::Year,
                ('M', 2) => TimeUnit::Month,
                ('W', 2) => TimeUnit::Week,
                ('D', 2) => TimeUnit::Day,
                ('H', 2) => TimeUnit::Hour,
                ('m', 2) => TimeUnit::Minute,
                ('s', 2) => TimeUnit::Second,
                ('Y' | 'M' | 'W' | 'D' | 'H' | 'm' | 's', 1) | ('Y', 2) => {
                    return Err(invalid(format!("token '{token}' is not fixed-width")));
                },
                ('Y' | 'M' | 'W' | 'D' | 'H' | 'm' | 's', _) => {
                    return Err(invalid(format!("unsupported token '{token}'")));
                },
                _ => return Err(invalid(format!("unsupported character '{c}'"))),
            };
            segments.push(Segment::Field(unit));
            i += run;
        }

        Self::check_layout(&segments).map_err(invalid)?;

        Ok(Self {
            pattern: pattern.to_string(),
            segments,
        })
    }

    fn check_layout(segments: &[Segment]) -> std::result::Result<(), String> {
        if segments.first() == Some(&Segment::Separator)
            || segments.last() == Some(&Segment::Separator)
        {
            return Err("separator must sit between two tokens".to_string());
        }
        if segments
            .windows(2)
            .any(|pair| pair[0] == Segment::Separator && pair[1] == Segment::Separator)
        {
            return Err("consecutive separators".to_string());
        }

        let units: Vec<TimeUnit> = segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Field(unit) => Some(*unit),
                Segment::Separator => None,
            })
            .collect();
        if units.is_empty() {
            return Err("pattern has no time tokens".to_string());
        }
        for pair in units.windows(2) {
            let (prev, next) = (pair[0], pair[1]);
            if !prev.precedes(next) {
                return Err(format!(
                    "'{}' cannot follow '{}'; tokens must run from year down without gaps",
                    next.token(),
                    prev.token()
                ));
            }
        }
        Ok(())
    }

    /// Returns the original pattern.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Returns the rendered width in characters.
    #[must_use]
    pub fn width(&self) -> usize {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Field(unit) => unit.width(),
                Segment::Separator => 1,
            })
            .sum()
    }

    fn units(&self) -> impl Iterator<Item = TimeUnit> + '_ {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Field(unit) => Some(*unit),
            Segment::Separator => None,
        })
    }

    /// Returns the finest unit the pattern resolves.
    #[must_use]
    pub fn finest_unit(&self) -> TimeUnit {
        self.units().max().unwrap_or(TimeUnit::Year)
    }

    /// Returns `true` if the pattern does not start at the year.
    ///
    /// Names rendered from such a pattern repeat (e.g. `HHmm` every day), so
    /// ordering only holds within one cycle.
    #[must_use]
    pub fn is_cyclic(&self) -> bool {
        self.units().next() != Some(TimeUnit::Year)
    }

    /// Checks that two runs of `cadence` can never render the same timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFormat`] if the pattern is coarser than the
    /// cadence's resolution.
    pub fn check_resolution(&self, cadence: &Cadence) -> Result<()> {
        let Some(required) = cadence.resolution() else {
            return Ok(());
        };
        if self.finest_unit() < required {
            return Err(Error::InvalidFormat {
                format: self.pattern.clone(),
                reason: format!(
                    "cadence '{cadence}' needs a pattern resolving at least '{}'",
                    required.token()
                ),
            });
        }
        Ok(())
    }

    /// Renders a timestamp.
    #[must_use]
    pub fn render(&self, timestamp: &DateTime<Utc>) -> String {
        let week_based = self.units().any(|unit| unit == TimeUnit::Week);
        let mut out = String::with_capacity(self.width());
        for segment in &self.segments {
            let Segment::Field(unit) = segment else {
                out.push('-');
                continue;
            };
            let rendered = match unit {
                TimeUnit::Year if week_based => {
                    format!("{:04}", timestamp.iso_week().year().clamp(0, 9999))
                },
                TimeUnit::Year => format!("{:04}", timestamp.year().clamp(0, 9999)),
                TimeUnit::Month => format!("{:02}", timestamp.month()),
                TimeUnit::Week => format!("{:02}", timestamp.iso_week().week()),
                TimeUnit::Day => format!("{:02}", timestamp.day()),
                TimeUnit::Hour => format!("{:02}", timestamp.hour()),
                TimeUnit::Minute => format!("{:02}", timestamp.minute()),
                TimeUnit::Second => format!("{:02}", timestamp.second()),
            };
            out.push_str(&rendered);
        }
        out
    }
}

impl fmt::Display for TimestampFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use test_case::test_case;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 7).unwrap()
    }

    #[test_case("YYYYMMDD", "20240104" ; "daily")]
    #[test_case("YYYYMM", "202401" ; "monthly")]
    #[test_case("YYYY-WW", "2024-01" ; "weekly padded")]
    #[test_case("YYYYWW", "202401" ; "weekly compact")]
    #[test_case("HHmm", "0905" ; "hourly legacy")]
    #[test_case("YYYYMMDDHHmm", "202401040905" ; "hourly dated")]
    #[test_case("YYYYMMDD-HHmmss", "20240104-090507" ; "seconds")]
    fn test_render(pattern: &str, expected: &str) {
        let format = TimestampFormat::parse(pattern).unwrap();
        let rendered = format.render(&at(2024, 1, 4, 9, 5));
        assert_eq!(rendered, expected);
        assert_eq!(rendered.len(), format.width());
    }

    #[test_case("YYYYMD" ; "unpadded month and day")]
    #[test_case("YYYYW" ; "unpadded week")]
    #[test_case("YYMMDD" ; "two digit year")]
    #[test_case("DDMMYYYY" ; "least significant first")]
    #[test_case("YYYYDD" ; "gap between year and day")]
    #[test_case("YYYYWWDD" ; "week then day")]
    #[test_case("YYYYMMWW" ; "month then week")]
    #[test_case("YYYY_MM" ; "underscore")]
    #[test_case("-YYYY" ; "leading separator")]
    #[test_case("YYYY--MM" ; "double separator")]
    #[test_case("YYYYYY" ; "six y")]
    #[test_case("" ; "empty")]
    #[test_case("YYYYMMYYYY" ; "repeated year")]
    fn test_rejects(pattern: &str) {
        assert!(matches!(
            TimestampFormat::parse(pattern),
            Err(Error::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_week_uses_iso_week_year() {
        let format = TimestampFormat::parse("YYYY-WW").unwrap();
        // 2024-12-30 is in ISO week 1 of 2025.
        assert_eq!(format.render(&at(2024, 12, 30, 0, 0)), "2025-01");
        assert_eq!(format.render(&at(2024, 12, 23, 0, 0)), "2024-52");
        assert!(format.render(&at(2024, 12, 23, 0, 0)) < format.render(&at(2024, 12, 30, 0, 0)));
    }

    #[test]
    fn test_resolution() {
        let monthly = TimestampFormat::parse("YYYYMM").unwrap();
        assert!(monthly.check_resolution(&Cadence::monthly()).is_ok());
        assert!(monthly.check_resolution(&Cadence::weekly()).is_err());
        assert!(monthly.check_resolution(&Cadence::daily()).is_err());

        let weekly = TimestampFormat::parse("YYYY-WW").unwrap();
        assert!(weekly.check_resolution(&Cadence::weekly()).is_ok());
        assert!(weekly.check_resolution(&Cadence::monthly()).is_ok());
        assert!(weekly.check_resolution(&Cadence::daily()).is_err());

        let custom = Cadence::parse("quarterly").unwrap();
        assert!(monthly.check_resolution(&custom).is_ok());
    }

    #[test]
    fn test_cyclic() {
        assert!(TimestampFormat::parse("HHmm").unwrap().is_cyclic());
        assert!(!TimestampFormat::parse("YYYYMMDDHHmm").unwrap().is_cyclic());
    }

    #[test]
    fn test_render_sorts_chronologically() {
        let format = TimestampFormat::parse("YYYYMMDDHHmm").unwrap();
        let earlier = format.render(&at(2024, 2, 9, 23, 59));
        let later = format.render(&at(2024, 2, 10, 0, 0));
        assert!(earlier < later);
    }
}
