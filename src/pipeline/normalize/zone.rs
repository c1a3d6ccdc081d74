//! Timezone resolution for provider timestamps.
//!
//! Providers declare time three ways: an offset embedded in the timestamp,
//! a separate offset/zone field, or nothing at all (naive local time, which
//! is resolved against the location's configured zone).

use chrono::{
    DateTime, FixedOffset, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc,
};
use chrono_tz::Tz;

/// A zone that can place naive local times on the UTC timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ZoneSpec {
    Fixed(FixedOffset),
    Named(Tz),
}

impl ZoneSpec {
    /// Parse `Z`, `UTC`, `+05:30`, `-0700`, `-07`, or an IANA name such as `US/Arizona`.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        if let Some(offset) = parse_fixed_offset(text) {
            return Some(ZoneSpec::Fixed(offset));
        }
        text.parse::<Tz>().ok().map(ZoneSpec::Named)
    }

    /// Fixed offset from fractional hours, as some almanac APIs report it (`-7.0`, `5.5`).
    pub fn from_hours(hours: f64) -> Option<Self> {
        if !hours.is_finite() {
            return None;
        }
        let secs = (hours * 3600.0).round() as i32;
        FixedOffset::east_opt(secs).map(ZoneSpec::Fixed)
    }

    /// Convert a naive local time to UTC.
    ///
    /// Ambiguous local times (DST fall-back) resolve to the earlier instant;
    /// nonexistent ones (DST spring-forward gap) yield `None`.
    pub fn to_utc(&self, local: &NaiveDateTime) -> Option<DateTime<Utc>> {
        match self {
            ZoneSpec::Fixed(offset) => earliest(offset.from_local_datetime(local)),
            ZoneSpec::Named(tz) => earliest(tz.from_local_datetime(local)),
        }
    }

    /// UTC instant of local midnight starting `date`.
    pub fn start_of_day(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        let midnight = date.and_time(NaiveTime::MIN);
        self.to_utc(&midnight).or_else(|| {
            // Zones that skip midnight on DST days start at the first valid hour
            (1..=3).find_map(|h| self.to_utc(&(midnight + chrono::Duration::hours(h))))
        })
    }

    /// Local date of a UTC instant in this zone.
    pub fn local_date(&self, ts: DateTime<Utc>) -> NaiveDate {
        match self {
            ZoneSpec::Fixed(offset) => ts.with_timezone(offset).date_naive(),
            ZoneSpec::Named(tz) => ts.with_timezone(tz).date_naive(),
        }
    }

    /// Offset in effect at local noon of `date`, in seconds east of UTC.
    pub fn offset_seconds_on(&self, date: NaiveDate) -> i32 {
        match self {
            ZoneSpec::Fixed(offset) => offset.local_minus_utc(),
            ZoneSpec::Named(tz) => {
                let noon = date.and_time(NaiveTime::MIN) + chrono::Duration::hours(12);
                let utc_noon = Utc.from_utc_datetime(&noon);
                utc_noon.with_timezone(tz).offset().fix().local_minus_utc()
            }
        }
    }
}

fn earliest<T: TimeZone>(result: LocalResult<DateTime<T>>) -> Option<DateTime<Utc>> {
    match result {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(first, second) => Some(first.min(second).with_timezone(&Utc)),
        LocalResult::None => None,
    }
}

/// Accepts `Z`, `UTC`, `GMT`, and signed `hh:mm`, `hhmm` or `hh` offsets up to 14 hours.
fn parse_fixed_offset(text: &str) -> Option<FixedOffset> {
    let upper = text.to_ascii_uppercase();
    if matches!(upper.as_str(), "Z" | "UTC" | "GMT") {
        return FixedOffset::east_opt(0);
    }
    let (sign, rest) = match text.as_bytes().first()? {
        b'+' => (1, &text[1..]),
        b'-' => (-1, &text[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let (hours, minutes) = match digits.len() {
        1 | 2 => (digits.parse::<i32>().ok()?, 0),
        3 | 4 => {
            let split = digits.len() - 2;
            (digits[..split].parse::<i32>().ok()?, digits[split..].parse::<i32>().ok()?)
        }
        _ => return None,
    };
    if hours > 14 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Timestamp text as providers send it: with or without an embedded offset.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedTimestamp {
    Absolute(DateTime<Utc>),
    Naive(NaiveDateTime),
}

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%d %H:%M%:z",
    "%Y-%m-%d %H:%M%z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parse provider timestamp text. Returns `None` when the text is not a timestamp at all.
pub fn parse_timestamp(text: &str) -> Option<ParsedTimestamp> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(ParsedTimestamp::Absolute(dt.with_timezone(&Utc)));
    }
    // A trailing `Z` is rewritten so the offset formats below can read it
    let rewritten = match text.strip_suffix('Z').or_else(|| text.strip_suffix('z')) {
        Some(stem) => format!("{}+00:00", stem),
        None => text.to_string(),
    };
    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(&rewritten, format) {
            return Some(ParsedTimestamp::Absolute(dt.with_timezone(&Utc)));
        }
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(ParsedTimestamp::Naive(naive));
        }
    }
    None
}

/// Parse a local clock time such as `05:48`, `5:48`, or `05:48:30`.
pub fn parse_local_time(text: &str) -> Option<NaiveTime> {
    let text = text.trim();
    NaiveTime::parse_from_str(text, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M:%S"))
        .ok()
}
