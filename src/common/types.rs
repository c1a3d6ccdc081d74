use crate::common::error::{PipelineError, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One tide height exactly as a provider reported it.
///
/// `timestamp` keeps the provider's text: either an instant with an offset
/// (`2024-06-01T10:00:00-07:00`) or a naive local time (`2024-06-01 10:00`)
/// whose offset the normalizer infers from the location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTideObservation {
    /// Provider station/location identifier
    pub location: String,
    pub timestamp: String,
    pub height: f64,
    pub unit: String,
}

/// Sunrise and sunset for one local date, as the almanac reported them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawAstronomicalEvent {
    /// Almanac location identifier
    pub location: String,
    /// Local calendar date, `YYYY-MM-DD`
    pub date: String,
    /// Local `HH:MM`; `None` when the sun does not rise that day
    pub sunrise: Option<String>,
    /// Local `HH:MM`; `None` when the sun does not set that day
    pub sunset: Option<String>,
    /// Fixed offset (`-07:00`) or IANA zone name; `None` means "infer from location"
    pub tz_offset: Option<String>,
}

/// What a normalized record describes.
///
/// Variant order is the tie-break order for records sharing a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordKind {
    TideHeight,
    Sunrise,
    Sunset,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::TideHeight => "tide-height",
            RecordKind::Sunrise => "sunrise",
            RecordKind::Sunset => "sunset",
        }
    }

    /// Position in the tie-break order, persisted alongside the kind.
    pub fn rank(&self) -> i64 {
        match self {
            RecordKind::TideHeight => 0,
            RecordKind::Sunrise => 1,
            RecordKind::Sunset => 2,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tide-height" => Ok(RecordKind::TideHeight),
            "sunrise" => Ok(RecordKind::Sunrise),
            "sunset" => Ok(RecordKind::Sunset),
            other => Err(PipelineError::PersistenceError(format!(
                "unknown record kind '{}'",
                other
            ))),
        }
    }
}

/// A canonical, UTC, unit-normalized record. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    /// Canonical location key
    pub location: String,
    pub timestamp: DateTime<Utc>,
    pub kind: RecordKind,
    /// Height in meters for tide records; `None` for event markers
    pub value: Option<f64>,
    /// `"m"` for tide records; `None` for event markers
    pub unit: Option<String>,
}

impl NormalizedRecord {
    pub fn tide_height(location: impl Into<String>, timestamp: DateTime<Utc>, meters: f64) -> Self {
        Self {
            location: location.into(),
            timestamp,
            kind: RecordKind::TideHeight,
            value: Some(meters),
            unit: Some(crate::common::constants::CANONICAL_HEIGHT_UNIT.to_string()),
        }
    }

    pub fn event(location: impl Into<String>, timestamp: DateTime<Utc>, kind: RecordKind) -> Self {
        Self {
            location: location.into(),
            timestamp,
            kind,
            value: None,
            unit: None,
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            location: self.location.clone(),
            timestamp: self.timestamp,
            kind: self.kind,
        }
    }
}

/// Identity of a record for idempotent writes. Field order gives the
/// canonical output order: location, then time, then kind.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub location: String,
    pub timestamp: DateTime<Utc>,
    pub kind: RecordKind,
}

/// Half-open UTC interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if end < start {
            return Err(PipelineError::Config(format!(
                "time range end {} precedes start {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    /// `days` whole UTC days starting at midnight of `first`.
    pub fn whole_days(first: NaiveDate, days: u32) -> Self {
        let start = Utc.from_utc_datetime(&first.and_time(NaiveTime::MIN));
        Self {
            start,
            end: start + Duration::days(i64::from(days)),
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }
}

/// Inclusive span of calendar dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateSpan {
    pub first: NaiveDate,
    pub last: NaiveDate,
}

impl DateSpan {
    pub fn new(first: NaiveDate, days: u32) -> Self {
        let last = first + Duration::days(i64::from(days.max(1)) - 1);
        Self { first, last }
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.first.iter_days().take_while(move |d| *d <= self.last)
    }
}
