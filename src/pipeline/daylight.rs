//! Read-side helpers the installation uses to drive its lights: today's sun
//! window for a location, whether the lights should be out at a given instant,
//! and where the current tide sits within the surrounding day's range.

use crate::common::error::Result;
use crate::common::types::{NormalizedRecord, RecordKind, TimeRange};
use crate::pipeline::normalize::zone::ZoneSpec;
use crate::pipeline::storage::RecordStore;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::Serialize;

/// Sunrise and sunset bounding one local date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SunWindow {
    pub location: String,
    pub date: NaiveDate,
    pub sunrise: Option<DateTime<Utc>>,
    pub sunset: Option<DateTime<Utc>>,
    /// True when the stored day was missing and the previous day's times were shifted forward
    pub from_previous_day: bool,
}

fn local_day(zone: &ZoneSpec, date: NaiveDate) -> Option<TimeRange> {
    let start = zone.start_of_day(date)?;
    let end = zone.start_of_day(date + Duration::days(1))?;
    TimeRange::new(start, end).ok()
}

fn pick(records: &[NormalizedRecord], kind: RecordKind) -> Option<DateTime<Utc>> {
    records.iter().find(|r| r.kind == kind).map(|r| r.timestamp)
}

/// Sun window for `date` in the location's zone.
///
/// When nothing is stored for `date`, the previous local day's events are used,
/// shifted by one day. Returns `None` when neither day has any event.
pub async fn sun_window(
    store: &dyn RecordStore,
    location: &str,
    zone: &ZoneSpec,
    date: NaiveDate,
) -> Result<Option<SunWindow>> {
    for (day, shift) in [(date, 0), (date - Duration::days(1), 1)] {
        let Some(range) = local_day(zone, day) else {
            continue;
        };
        let records = store.query(location, &range).await?;
        let sunrise = pick(&records, RecordKind::Sunrise);
        let sunset = pick(&records, RecordKind::Sunset);
        if sunrise.is_some() || sunset.is_some() {
            let offset = Duration::days(shift);
            return Ok(Some(SunWindow {
                location: location.to_string(),
                date,
                sunrise: sunrise.map(|t| t + offset),
                sunset: sunset.map(|t| t + offset),
                from_previous_day: shift != 0,
            }));
        }
    }
    Ok(None)
}

/// When the lights switch relative to the sun.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LightsPolicy {
    /// Minutes added to both sunrise and sunset
    pub on_offset_minutes: i64,
    /// Local clock time after which lights are forced out
    pub hard_off: Option<NaiveTime>,
}

impl LightsPolicy {
    /// Whether lights are out at `at`.
    ///
    /// Without a hard-off time, lights are out between the offset sunrise and
    /// the offset sunset. With one, they are out until the offset sunset and
    /// again once the local clock passes the hard-off time. `None` when the
    /// window lacks the events the rule needs or the offset overflows.
    pub fn lights_out(&self, window: &SunWindow, zone: &ZoneSpec, at: DateTime<Utc>) -> Option<bool> {
        let offset = Duration::try_minutes(self.on_offset_minutes)?;
        let sunset = window.sunset?.checked_add_signed(offset)?;
        match self.hard_off {
            Some(off) => {
                let local_time = local_time_of(zone, at);
                Some(at < sunset || local_time > off)
            }
            None => {
                let sunrise = window.sunrise?.checked_add_signed(offset)?;
                Some(sunrise <= at && at < sunset)
            }
        }
    }

    pub fn lights_on(&self, window: &SunWindow, zone: &ZoneSpec, at: DateTime<Utc>) -> Option<bool> {
        self.lights_out(window, zone, at).map(|out| !out)
    }
}

fn local_time_of(zone: &ZoneSpec, at: DateTime<Utc>) -> NaiveTime {
    match zone {
        ZoneSpec::Fixed(offset) => at.with_timezone(offset).time(),
        ZoneSpec::Named(tz) => at.with_timezone(tz).time(),
    }
}

/// Latest tide reading with its position in the surrounding range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TideLevel {
    pub location: String,
    pub timestamp: DateTime<Utc>,
    pub height_m: f64,
    /// Decile 1..=10 within the heights from 12 h before to 12 h after `at`
    pub level: u8,
}

/// Decile 1..=10 of `height` within `[low, high]`; a flat range is level 1.
pub fn decile(height: f64, low: f64, high: f64) -> u8 {
    if high <= low {
        return 1;
    }
    let fraction = ((height - low) / (high - low)).clamp(0.0, 1.0);
    ((fraction * 10.0).floor() as u8 + 1).min(10)
}

/// Pure form of [`tide_level`] over already-fetched records.
pub fn level_from_records(records: &[NormalizedRecord], at: DateTime<Utc>) -> Option<TideLevel> {
    let heights: Vec<(&NormalizedRecord, f64)> = records
        .iter()
        .filter(|r| r.kind == RecordKind::TideHeight)
        .filter_map(|r| r.value.map(|v| (r, v)))
        .collect();
    let (latest, height) = heights
        .iter()
        .filter(|(r, _)| r.timestamp <= at)
        .max_by_key(|(r, _)| r.timestamp)?;
    let low = heights.iter().map(|(_, v)| *v).fold(f64::INFINITY, f64::min);
    let high = heights.iter().map(|(_, v)| *v).fold(f64::NEG_INFINITY, f64::max);
    Some(TideLevel {
        location: latest.location.clone(),
        timestamp: latest.timestamp,
        height_m: *height,
        level: decile(*height, low, high),
    })
}

/// Tide level at `at`: the most recent stored height at or before `at`,
/// ranked against every height within twelve hours either side.
pub async fn tide_level(
    store: &dyn RecordStore,
    location: &str,
    at: DateTime<Utc>,
) -> Result<Option<TideLevel>> {
    let range = TimeRange::new(at - Duration::hours(12), at + Duration::hours(12))?;
    let records = store.query(location, &range).await?;
    Ok(level_from_records(&records, at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DuplicatePolicy;
    use crate::pipeline::storage::InMemoryStore;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn arizona() -> ZoneSpec {
        ZoneSpec::parse("US/Arizona").unwrap()
    }

    fn june(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, day).unwrap()
    }

    async fn store_with_june_first() -> InMemoryStore {
        let store = InMemoryStore::new(DuplicatePolicy::KeepExisting);
        store
            .persist(&[
                NormalizedRecord::event("phoenix", ts("2024-06-01T12:48:00Z"), RecordKind::Sunrise),
                NormalizedRecord::event("phoenix", ts("2024-06-02T03:32:00Z"), RecordKind::Sunset),
            ])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_sun_window_uses_local_day() {
        let store = store_with_june_first().await;
        let window = sun_window(&store, "phoenix", &arizona(), june(1)).await.unwrap().unwrap();
        assert_eq!(window.sunrise, Some(ts("2024-06-01T12:48:00Z")));
        // Local evening sunset lands on the next UTC day but the same local day
        assert_eq!(window.sunset, Some(ts("2024-06-02T03:32:00Z")));
        assert!(!window.from_previous_day);
    }

    #[tokio::test]
    async fn test_sun_window_falls_back_to_previous_day() {
        let store = store_with_june_first().await;
        let window = sun_window(&store, "phoenix", &arizona(), june(2)).await.unwrap().unwrap();
        assert!(window.from_previous_day);
        assert_eq!(window.sunrise, Some(ts("2024-06-02T12:48:00Z")));
        assert!(sun_window(&store, "phoenix", &arizona(), june(5)).await.unwrap().is_none());
    }

    #[test]
    fn test_lights_out_between_offset_sunrise_and_sunset() {
        let window = SunWindow {
            location: "phoenix".into(),
            date: june(1),
            sunrise: Some(ts("2024-06-01T12:48:00Z")),
            sunset: Some(ts("2024-06-02T03:32:00Z")),
            from_previous_day: false,
        };
        let policy = LightsPolicy { on_offset_minutes: 30, hard_off: None };
        let zone = arizona();
        assert_eq!(policy.lights_out(&window, &zone, ts("2024-06-01T13:00:00Z")), Some(false));
        assert_eq!(policy.lights_out(&window, &zone, ts("2024-06-01T20:00:00Z")), Some(true));
        // 20:45 local is before sunset + 30 min
        assert_eq!(policy.lights_out(&window, &zone, ts("2024-06-02T03:45:00Z")), Some(true));
        assert_eq!(policy.lights_on(&window, &zone, ts("2024-06-02T04:10:00Z")), Some(true));
    }

    #[test]
    fn test_hard_off_forces_lights_out_late() {
        let window = SunWindow {
            location: "phoenix".into(),
            date: june(1),
            sunrise: Some(ts("2024-06-01T12:48:00Z")),
            sunset: Some(ts("2024-06-02T03:32:00Z")),
            from_previous_day: false,
        };
        let policy = LightsPolicy {
            on_offset_minutes: 0,
            hard_off: NaiveTime::from_hms_opt(23, 0, 0),
        };
        let zone = arizona();
        // 21:00 local: after sunset, before hard off
        assert_eq!(policy.lights_out(&window, &zone, ts("2024-06-02T04:00:00Z")), Some(false));
        // 23:30 local
        assert_eq!(policy.lights_out(&window, &zone, ts("2024-06-02T06:30:00Z")), Some(true));
    }

    #[test]
    fn test_out_of_range_offset_is_undefined() {
        let window = SunWindow {
            location: "phoenix".into(),
            date: june(1),
            sunrise: Some(ts("2024-06-01T12:48:00Z")),
            sunset: Some(ts("2024-06-02T03:32:00Z")),
            from_previous_day: false,
        };
        let at = ts("2024-06-01T20:00:00Z");
        for minutes in [i64::MAX, i64::MIN, 9_000_000_000_000] {
            let policy = LightsPolicy { on_offset_minutes: minutes, hard_off: None };
            assert_eq!(policy.lights_out(&window, &arizona(), at), None, "{}", minutes);
        }
    }

    #[test]
    fn test_lights_out_needs_sunset() {
        let window = SunWindow {
            location: "tromso".into(),
            date: june(21),
            sunrise: None,
            sunset: None,
            from_previous_day: false,
        };
        let policy = LightsPolicy::default();
        assert_eq!(policy.lights_out(&window, &arizona(), ts("2024-06-21T12:00:00Z")), None);
    }

    #[test]
    fn test_decile_bounds() {
        assert_eq!(decile(0.0, 0.0, 2.0), 1);
        assert_eq!(decile(1.0, 0.0, 2.0), 6);
        assert_eq!(decile(2.0, 0.0, 2.0), 10);
        assert_eq!(decile(1.0, 1.0, 1.0), 1);
    }

    #[tokio::test]
    async fn test_tide_level_uses_latest_reading_at_or_before() {
        let store = InMemoryStore::default();
        store
            .persist(&[
                NormalizedRecord::tide_height("A", ts("2024-06-01T06:00:00Z"), 0.0),
                NormalizedRecord::tide_height("A", ts("2024-06-01T12:00:00Z"), 0.95),
                NormalizedRecord::tide_height("A", ts("2024-06-01T18:00:00Z"), 2.0),
            ])
            .await
            .unwrap();
        let level = tide_level(&store, "A", ts("2024-06-01T13:00:00Z")).await.unwrap().unwrap();
        assert_eq!(level.timestamp, ts("2024-06-01T12:00:00Z"));
        assert_eq!(level.level, 5);
        assert!(tide_level(&store, "A", ts("2024-06-01T05:00:00Z")).await.unwrap().is_none());
    }
}
