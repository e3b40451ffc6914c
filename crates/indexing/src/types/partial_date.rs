//! Partial FHIR date/time values.
//!
//! FHIR `date` and `dateTime` values may be given to any precision from a
//! year down to fractions of a second. For indexing and comparison they are
//! expanded to the closed instant range they cover, e.g. `2024-02` covers
//! `2024-02-01T00:00:00.000Z` through `2024-02-29T23:59:59.999Z`.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

static PARTIAL_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\d{4})(?:-(\d{2})(?:-(\d{2})(?:T(\d{2}):(\d{2})(?::(\d{2})(?:\.(\d{1,9}))?)?(Z|[+-]\d{2}:\d{2})?)?)?)?$",
    )
    .expect("partial date pattern is a valid regex")
});

/// The precision a partial date was written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatePrecision {
    /// `YYYY`
    Year,
    /// `YYYY-MM`
    Month,
    /// `YYYY-MM-DD`
    Day,
    /// `YYYY-MM-DDThh:mm`
    Minute,
    /// `YYYY-MM-DDThh:mm:ss`
    Second,
    /// `YYYY-MM-DDThh:mm:ss.f+`
    Fraction,
}

/// A date/time parsed at the precision it was written with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialDateTime {
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
    nanos: u32,
    offset: FixedOffset,
    precision: DatePrecision,
    raw: String,
}

/// Error returned for strings that are not valid partial dates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialDateError(String);

impl fmt::Display for PartialDateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' is not a valid date", self.0)
    }
}

impl std::error::Error for PartialDateError {}

impl FromStr for PartialDateTime {
    type Err = PartialDateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PartialDateError(s.to_string());
        let caps = PARTIAL_DATE_RE.captures(s.trim()).ok_or_else(invalid)?;

        let num = |i: usize| -> Option<u32> { caps.get(i).and_then(|m| m.as_str().parse().ok()) };

        let year: i32 = caps
            .get(1)
            .and_then(|m| m.as_str().parse().ok())
            .ok_or_else(invalid)?;

        let precision = if caps.get(7).is_some() {
            DatePrecision::Fraction
        } else if caps.get(6).is_some() {
            DatePrecision::Second
        } else if caps.get(5).is_some() {
            DatePrecision::Minute
        } else if caps.get(3).is_some() {
            DatePrecision::Day
        } else if caps.get(2).is_some() {
            DatePrecision::Month
        } else {
            DatePrecision::Year
        };

        // Right-pad the fraction to nanoseconds
        let nanos = match caps.get(7) {
            Some(m) => {
                let digits = m.as_str();
                let padded = format!("{:0<9}", digits);
                padded.parse().map_err(|_| invalid())?
            }
            None => 0,
        };

        let offset = match caps.get(8).map(|m| m.as_str()) {
            None | Some("Z") => FixedOffset::east_opt(0),
            Some(tz) => {
                let sign = if tz.starts_with('-') { -1 } else { 1 };
                let hours: i32 = tz[1..3].parse().map_err(|_| invalid())?;
                let minutes: i32 = tz[4..6].parse().map_err(|_| invalid())?;
                FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
            }
        }
        .ok_or_else(invalid)?;

        let parsed = PartialDateTime {
            year,
            month: num(2).unwrap_or(1),
            day: num(3).unwrap_or(1),
            hour: num(4).unwrap_or(0),
            minute: num(5).unwrap_or(0),
            second: num(6).unwrap_or(0),
            nanos,
            offset,
            precision,
            raw: s.to_string(),
        };

        // Reject impossible calendar values such as 2023-02-30
        parsed.local_start().ok_or_else(invalid)?;
        Ok(parsed)
    }
}

impl PartialDateTime {
    /// Returns the precision the value was written with.
    pub fn precision(&self) -> DatePrecision {
        self.precision
    }

    /// Returns the text the value was parsed from.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn local_start(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)?.and_hms_nano_opt(
            self.hour,
            self.minute,
            self.second,
            self.nanos,
        )
    }

    fn to_utc(&self, local: NaiveDateTime) -> Option<DateTime<Utc>> {
        self.offset
            .from_local_datetime(&local)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// The first instant covered by this value.
    pub fn start(&self) -> DateTime<Utc> {
        self.local_start()
            .and_then(|local| self.to_utc(local))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// The last instant covered by this value, at millisecond granularity.
    pub fn end(&self) -> DateTime<Utc> {
        let Some(start) = self.local_start() else {
            return DateTime::<Utc>::MAX_UTC;
        };

        let next = match self.precision {
            DatePrecision::Year => NaiveDate::from_ymd_opt(self.year + 1, 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0)),
            DatePrecision::Month => {
                let (y, m) = if self.month == 12 {
                    (self.year + 1, 1)
                } else {
                    (self.year, self.month + 1)
                };
                NaiveDate::from_ymd_opt(y, m, 1).and_then(|d| d.and_hms_opt(0, 0, 0))
            }
            DatePrecision::Day => start.checked_add_signed(TimeDelta::days(1)),
            DatePrecision::Minute => start.checked_add_signed(TimeDelta::minutes(1)),
            DatePrecision::Second => start.checked_add_signed(TimeDelta::seconds(1)),
            DatePrecision::Fraction => return self.to_utc(start).unwrap_or(DateTime::<Utc>::MAX_UTC),
        };

        next.and_then(|n| n.checked_sub_signed(TimeDelta::milliseconds(1)))
            .and_then(|local| self.to_utc(local))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl fmt::Display for PartialDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
